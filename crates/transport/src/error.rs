use std::io;
use std::time::Duration;

use crate::channels::ChannelKind;

/// A channel could not be opened. Never fatal to the supervisor; it retries.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to connect reliable channel: {0}")]
    Reliable(#[source] io::Error),
    #[error("failed to connect unreliable channel: {0}")]
    Unreliable(#[source] io::Error),
    #[error("timed out connecting {channel} channel after {timeout:?}")]
    Timeout {
        channel: ChannelKind,
        timeout: Duration,
    },
}

impl ConnectionError {
    pub fn channel(&self) -> Option<ChannelKind> {
        match self {
            ConnectionError::Config(_) => None,
            ConnectionError::Reliable(_) => Some(ChannelKind::Reliable),
            ConnectionError::Unreliable(_) => Some(ChannelKind::Unreliable),
            ConnectionError::Timeout { channel, .. } => Some(*channel),
        }
    }
}

/// A single failed read. Receivers log it and keep going.
#[derive(Debug, thiserror::Error)]
pub enum TransientReadError {
    #[error("channel closed")]
    Closed,
    #[error("connection closed by peer")]
    Eof,
    #[error("zero-length read")]
    Empty,
    #[error("no traffic received for {0:?}")]
    TimedOut(Duration),
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// One control record that could not be decoded. The record is discarded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolDecodeError {
    #[error("invalid record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record exceeds {limit} bytes")]
    TooLong { limit: usize },
}

/// Returned when a long-running operation stops because shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("relay address is empty")]
    MissingAddress,
    #[error("max datagram size {size} is below the minimum of {minimum} bytes")]
    DatagramTooSmall { size: usize, minimum: usize },
    #[error("minimum backoff must be greater than zero")]
    ZeroBackoff,
    #[error("maximum backoff {max:?} is shorter than minimum backoff {min:?}")]
    BackoffRange { min: Duration, max: Duration },
    #[error("queue capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("max record length must be greater than zero")]
    ZeroRecordLength,
}
