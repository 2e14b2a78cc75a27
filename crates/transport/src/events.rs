use std::time::Duration;

use crate::channels::ChannelKind;

/// A receiver's report that a channel of a given generation is unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFault {
    pub channel: ChannelKind,
    pub generation: u64,
    pub reason: String,
}

impl ChannelFault {
    pub fn new(channel: ChannelKind, generation: u64, reason: impl Into<String>) -> Self {
        Self {
            channel,
            generation,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        generation: u64,
    },
    ChannelFault(ChannelFault),
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Reconnected {
        generation: u64,
        attempts: u32,
    },
    Disconnected,
}
