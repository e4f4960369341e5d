//! Sync configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::apply::DecrementStrategy;
use crate::retry::RetryPolicy;

/// Default time between scheduled passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default limit for a single remote call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for sync passes and the background worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Time between scheduled passes.
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
    /// Limit for a single remote call. Exceeding it counts as a transient failure.
    #[serde(with = "duration_ms", rename = "call_timeout_ms")]
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub decrement: DecrementStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
            decrement: DecrementStrategy::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_decrement(mut self, decrement: DecrementStrategy) -> Self {
        self.decrement = decrement;
        self
    }
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.retry.drop_threshold, 5);
        assert_eq!(config.decrement, DecrementStrategy::Atomic);
    }

    #[test]
    fn test_partial_json() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"interval_ms": 2500, "decrement": "read_modify_write"}"#)
                .unwrap();
        assert_eq!(config.interval, Duration::from_millis(2500));
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.decrement, DecrementStrategy::ReadModifyWrite);
    }

    #[test]
    fn test_serializes_millis() {
        let json = serde_json::to_value(SyncConfig::default()).unwrap();
        assert_eq!(json["interval_ms"], 10_000);
        assert_eq!(json["retry"]["drop_threshold"], 5);
    }
}
