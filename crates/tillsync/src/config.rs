//! Queue configuration.

use serde::{Deserialize, Serialize};
use tillsync_store::{DEAD_LETTER_KEY, QUEUE_KEY};
use tillsync_sync::SyncConfig;

/// Configuration for an [`OfflineQueue`](crate::OfflineQueue).
///
/// Every field has a default, so a host application can embed this in its
/// own configuration file and set only what it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Storage key of the pending queue.
    pub queue_key: String,
    /// Storage key of the dead letter list.
    pub dead_letter_key: String,
    pub sync: SyncConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_key: QUEUE_KEY.to_string(),
            dead_letter_key: DEAD_LETTER_KEY.to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_keys(mut self, queue_key: impl Into<String>, dead_letter_key: impl Into<String>) -> Self {
        self.queue_key = queue_key.into();
        self.dead_letter_key = dead_letter_key.into();
        self
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_json_is_default() {
        let config: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.queue_key, "sync_queue_v1");
    }

    #[test]
    fn test_nested_overrides() {
        let config: QueueConfig = serde_json::from_str(
            r#"{"queue_key": "till_2", "sync": {"interval_ms": 30000, "retry": {"drop_threshold": 8}}}"#,
        )
        .unwrap();
        assert_eq!(config.queue_key, "till_2");
        assert_eq!(config.dead_letter_key, "sync_dead_letter_v1");
        assert_eq!(config.sync.interval, Duration::from_secs(30));
        assert_eq!(config.sync.retry.drop_threshold, 8);
    }
}
