//! Engine and synchronization configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the subscription lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a subscription attempt may take to be acknowledged (in milliseconds).
    pub subscribe_timeout_ms: u64,
    /// Delay before the first retry (in milliseconds).
    pub initial_backoff_ms: u64,
    /// Upper bound for the retry delay (in milliseconds).
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before the engine reports itself offline.
    pub max_subscribe_attempts: u32,
    /// Capacity of the engine event channel. Slow subscribers past this lag.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            subscribe_timeout_ms: 10_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            max_subscribe_attempts: 5,
            event_buffer: 256,
        }
    }
}

impl SyncConfig {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Exponential backoff for the given 1-based attempt, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Builder for sync configuration.
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn subscribe_timeout(mut self, ms: u64) -> Self {
        self.config.subscribe_timeout_ms = ms;
        self
    }

    pub fn initial_backoff(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn max_subscribe_attempts(mut self, attempts: u32) -> Self {
        self.config.max_subscribe_attempts = attempts.max(1);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.config.event_buffer = capacity.max(1);
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a sync engine instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of this viewer, used in logs.
    pub viewer_name: String,
    /// Change channel to subscribe to.
    pub channel_name: String,
    /// Storage key prefix for uploaded media.
    pub media_prefix: String,
    /// Subscription lifecycle settings.
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            viewer_name: "Anonymous".to_string(),
            channel_name: "public-clipboard-history".to_string(),
            media_prefix: "clipboard-media".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

/// Builder for engine configuration.
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn viewer_name(mut self, name: impl Into<String>) -> Self {
        self.config.viewer_name = name.into();
        self
    }

    pub fn channel_name(mut self, name: impl Into<String>) -> Self {
        self.config.channel_name = name.into();
        self
    }

    pub fn media_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.media_prefix = prefix.into();
        self
    }

    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_builder() {
        let config = SyncConfigBuilder::new()
            .subscribe_timeout(250)
            .initial_backoff(10)
            .max_backoff(40)
            .max_subscribe_attempts(0)
            .event_buffer(0)
            .build();

        assert_eq!(config.subscribe_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_subscribe_attempts, 1);
        assert_eq!(config.event_buffer, 1);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"viewer_name": "Carol", "sync": {"max_subscribe_attempts": 5}}"#,
        )
        .unwrap();

        assert_eq!(config.viewer_name, "Carol");
        assert_eq!(config.channel_name, "public-clipboard-history");
        assert_eq!(config.sync.max_subscribe_attempts, 5);
        assert_eq!(config.sync.event_buffer, SyncConfig::default().event_buffer);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = SyncConfigBuilder::new()
            .initial_backoff(10)
            .max_backoff(40)
            .build();

        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
        assert_eq!(config.backoff(30), Duration::from_millis(40));
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfigBuilder::new()
            .viewer_name("Bob")
            .channel_name("board")
            .media_prefix("uploads")
            .build();

        assert_eq!(config.viewer_name, "Bob");
        assert_eq!(config.channel_name, "board");
        assert_eq!(config.media_prefix, "uploads");
        assert_eq!(config.sync.max_subscribe_attempts, 5);
    }
}
