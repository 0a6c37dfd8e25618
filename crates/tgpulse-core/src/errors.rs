use std::{fmt, path::PathBuf};

/// Core error type for the bridge.
///
/// Adapter crates map their specific failures into this type so the wait
/// coordinator can tell retriable transport trouble from everything else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("send failed: {0}")]
    Send(String),

    /// Unreadable offset record. Only ever logged; readers fail open to zero.
    #[error("state corruption: {path}: {reason}")]
    StateCorruption { path: PathBuf, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed poll round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection refused, DNS, TLS, reset.
    Network,
    /// The round trip outlived its pulse plus grace.
    Timeout,
    /// Non-2xx HTTP status.
    Http(u16),
    /// Telegram answered `ok: false`.
    Api,
    /// Body did not decode.
    Malformed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Timeout => f.write_str("timeout"),
            Self::Http(status) => write!(f, "http {status}"),
            Self::Api => f.write_str("api"),
            Self::Malformed => f.write_str("malformed payload"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub detail: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, detail)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Malformed, detail)
    }
}
