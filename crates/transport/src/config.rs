use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::ConfigError;

/// Length of the peer identifier that prefixes every datagram on the
/// unreliable channel.
pub const GUID_LENGTH: usize = 22;
pub const MAX_DATAGRAM_SIZE: usize = 1500;
pub const DEFAULT_PORT: u16 = 5002;

/// Duration of one media frame. Reconnect attempts start at this cadence.
pub const FRAME_LENGTH: Duration = Duration::from_millis(40);
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_MAX_RECORD_LENGTH: usize = 64 * 1024;
const DEFAULT_MAX_CONSECUTIVE_READ_ERRORS: u32 = 32;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub address: String,
    pub max_datagram_size: usize,
    #[serde(with = "millis")]
    pub keepalive_interval: Duration,
    #[serde(with = "millis")]
    pub min_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    #[serde(with = "optional_millis")]
    pub receive_timeout: Option<Duration>,
    pub queue_capacity: usize,
    pub max_record_length: usize,
    pub max_consecutive_read_errors: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            keepalive_interval: KEEPALIVE_INTERVAL,
            min_backoff: FRAME_LENGTH,
            max_backoff: MAX_BACKOFF,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            receive_timeout: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_record_length: DEFAULT_MAX_RECORD_LENGTH,
            max_consecutive_read_errors: DEFAULT_MAX_CONSECUTIVE_READ_ERRORS,
        }
    }
}

impl RelayConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.min_backoff, self.max_backoff)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::MissingAddress);
        }
        if self.max_datagram_size <= GUID_LENGTH {
            return Err(ConfigError::DatagramTooSmall {
                size: self.max_datagram_size,
                minimum: GUID_LENGTH + 1,
            });
        }
        if self.min_backoff.is_zero() {
            return Err(ConfigError::ZeroBackoff);
        }
        if self.max_backoff < self.min_backoff {
            return Err(ConfigError::BackoffRange {
                min: self.min_backoff,
                max: self.max_backoff,
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_record_length == 0 {
            return Err(ConfigError::ZeroRecordLength);
        }
        Ok(())
    }
}

// Durations are written as integer milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_some(&u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_datagram_size, 1500);
        assert_eq!(config.min_backoff, FRAME_LENGTH);
        assert_eq!(config.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_datagram_size_without_payload_room() {
        let config = RelayConfig {
            max_datagram_size: GUID_LENGTH,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DatagramTooSmall { .. })
        ));
    }

    #[test]
    fn test_rejects_inverted_backoff_range() {
        let config = RelayConfig {
            min_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackoffRange { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_queue_capacity() {
        let config = RelayConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroQueueCapacity)
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RelayConfig = serde_json::from_str(
            r#"{"address":"relay.example:5002","keepalive_interval":500,"receive_timeout":2000}"#,
        )
        .unwrap();

        assert_eq!(config.address, "relay.example:5002");
        assert_eq!(config.keepalive_interval, Duration::from_millis(500));
        assert_eq!(config.receive_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.min_backoff, FRAME_LENGTH);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = RelayConfig {
            receive_timeout: Some(Duration::from_millis(250)),
            ..RelayConfig::new("10.0.0.1:5002")
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RelayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
