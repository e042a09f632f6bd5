//! Durable at-least-once message channel
//!
//! Producers `send` serialized order batches to a topic; the ingestion
//! consumer `receive`s them one at a time and `ack`s after persistence.
//! Messages that stay unacknowledged longer than the redelivery period are
//! handed out again.

mod memory;
mod redis_stream;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use memory::MemoryChannel;
pub use redis_stream::RedisStreamChannel;

/// Identifies one delivered message for acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle {
    pub topic: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub handle: AckHandle,
    pub payload: Vec<u8>,
    /// True when this message was handed out before and never acknowledged
    pub redelivered: bool,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Broker not reachable or not ready yet
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Channel closed")]
    Closed,

    #[error("Channel backend error: {0}")]
    Backend(String),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

impl From<redis::RedisError> for ChannelError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
            || err.kind() == redis::ErrorKind::BusyLoadingError
        {
            ChannelError::Unavailable(err.to_string())
        } else {
            ChannelError::Backend(err.to_string())
        }
    }
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Topic this channel consumes from
    fn topic(&self) -> &str;

    /// Create the consumed topic (and consumer group) if missing
    async fn ensure_topic(&self) -> Result<(), ChannelError>;

    /// Durably append `payload` to `topic`; returns the message id
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<String, ChannelError>;

    /// Wait for the next message
    ///
    /// Returns `Ok(None)` when the channel is closed or `cancel` fires.
    async fn receive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelMessage>, ChannelError>;

    /// Acknowledge a delivered message. Acking twice is not an error.
    async fn ack(&self, handle: &AckHandle) -> Result<(), ChannelError>;
}

/// Call `ensure_topic` until it succeeds, retrying only while the broker is
/// unavailable
pub async fn provision_topic(
    channel: &dyn MessageChannel,
    attempts: u32,
    delay: Duration,
) -> Result<(), ChannelError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match channel.ensure_topic().await {
            Ok(()) => {
                tracing::info!(
                    topic = %channel.topic(),
                    backend = channel.name(),
                    attempt,
                    "Topic provisioned"
                );
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    topic = %channel.topic(),
                    attempt,
                    attempts,
                    error = %e,
                    "Topic provisioning failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(topic = %channel.topic(), attempt, error = %e, "Topic provisioning gave up");
                return Err(e);
            }
        }
    }
}
