use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{FetchBatch, MessageId, OutgoingMessage},
    errors::TransportError,
    Result,
};

/// Hexagonal port for pulling inbound updates off the chat transport.
///
/// One call is one round trip. Failures come back classified so the wait
/// coordinator can keep pulsing instead of aborting.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch updates strictly newer than `since`, long-polling for at most `timeout`.
    async fn fetch(
        &self,
        since: i64,
        timeout: Duration,
    ) -> std::result::Result<FetchBatch, TransportError>;
}

/// Hexagonal port for sending to the configured destination.
///
/// Implementations must not retry: send failures go straight back to the agent.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, msg: &OutgoingMessage) -> Result<Vec<MessageId>>;
}
