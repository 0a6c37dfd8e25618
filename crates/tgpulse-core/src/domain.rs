use chrono::{DateTime, Utc};
use serde::Serialize;

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub i32);

/// A human message pulled off the transport during one wait.
///
/// Never persisted; only the offset it advances is durable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    pub update_id: i64,
    pub chat_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Result of one poll round trip.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchBatch {
    /// Destination messages, ascending by `update_id`.
    pub messages: Vec<InboundMessage>,
    /// Largest `update_id` seen, including updates filtered out of `messages`.
    pub high_water: Option<i64>,
}

impl FetchBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a batch, sorting messages and dropping repeated update ids.
    pub fn new(mut messages: Vec<InboundMessage>, high_water: Option<i64>) -> Self {
        // Stable sort keeps the first occurrence of a duplicated id in front.
        messages.sort_by_key(|m| m.update_id);
        messages.dedup_by_key(|m| m.update_id);

        let top = messages.last().map(|m| m.update_id);
        let high_water = match (high_water, top) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Self {
            messages,
            high_water,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.high_water.is_none()
    }
}

/// Text plus optional one-time reply keyboard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub choices: Vec<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = choices;
        self
    }
}
