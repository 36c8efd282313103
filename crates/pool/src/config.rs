//! Pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker limit used when none is configured: one slot per core, minus
/// one for the host context, never below one.
pub fn default_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

/// Pool configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use spindle_pool::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_limit(4)
///     .with_idle_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of live workers. Clamped to `[1, default_limit()]`.
    pub limit: usize,

    /// How long an idle worker lives before eviction. Zero disables
    /// eviction and pre-warms the pool to `limit` at launch.
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    /// Capacity of the overflow queue. Admissions beyond it are rejected
    /// explicitly, never dropped.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            idle_timeout: Duration::ZERO,
            queue_capacity: 64,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker limit, clamped to `[1, default_limit()]`.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, default_limit());
        self
    }

    /// Set the idle timeout. Zero disables eviction and enables
    /// pre-warming.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the overflow queue capacity (at least 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Whether the pool pre-warms to `limit` at launch.
    pub fn prewarm(&self) -> bool {
        self.idle_timeout.is_zero()
    }

    /// Validate a configuration that did not go through the builders
    /// (for example one that was deserialized).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::InvalidLimit(self.limit));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Worker limit out of range
    #[error("worker limit must be at least 1, got {0}")]
    InvalidLimit(usize),

    /// Queue capacity out of range
    #[error("queue capacity must be at least 1")]
    InvalidQueueCapacity,
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.limit >= 1);
        assert_eq!(config.limit, default_limit());
        assert_eq!(config.idle_timeout, Duration::ZERO);
        assert_eq!(config.queue_capacity, 64);
        assert!(config.prewarm());
    }

    #[test]
    fn test_limit_clamped() {
        let config = PoolConfig::default().with_limit(0);
        assert_eq!(config.limit, 1);

        let config = PoolConfig::default().with_limit(usize::MAX);
        assert_eq!(config.limit, default_limit());
    }

    #[test]
    fn test_idle_timeout_disables_prewarm() {
        let config = PoolConfig::default().with_idle_timeout(Duration::from_secs(5));
        assert!(!config.prewarm());
    }

    #[test]
    fn test_queue_capacity_floor() {
        let config = PoolConfig::default().with_queue_capacity(0);
        assert_eq!(config.queue_capacity, 1);
    }

    #[test]
    fn test_validate() {
        assert!(PoolConfig::default().validate().is_ok());

        let broken = PoolConfig {
            limit: 0,
            ..PoolConfig::default()
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_duration_serialized_as_millis() {
        let config = PoolConfig::default().with_idle_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["idle_timeout"], 1500);

        let parsed: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.idle_timeout, Duration::from_millis(1500));
    }
}
