use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Key-value store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum StoreConfig {
    /// In-process store. Data is lost on restart and is not shared between
    /// processes. Suitable for single-node deployments and local development.
    Memory(MemoryStoreConfig),

    /// Redis server. Required when several processes share sessions and counters.
    Redis(RedisStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory(MemoryStoreConfig::default())
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StoreConfig::Memory(c) => c.validate(),
            StoreConfig::Redis(c) => c.validate(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            StoreConfig::Memory(_) => "memory",
            StoreConfig::Redis(_) => "redis",
        }
    }
}

/// In-memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryStoreConfig {
    /// Maximum number of keys held.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Number of keys to evict when the store is full.
    /// Eviction removes expired keys first, then the least recently used.
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            eviction_batch_size: default_eviction_batch_size(),
        }
    }
}

impl MemoryStoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Memory store max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

fn default_eviction_batch_size() -> usize {
    100
}

/// Redis store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisStoreConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Password, when not embedded in the URL.
    #[serde(default)]
    pub password: Option<String>,

    /// Prefix applied to every key.
    /// Useful when sharing a Redis instance with other applications.
    #[serde(default)]
    pub key_prefix: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            password: None,
            key_prefix: String::new(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl RedisStoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        if !(self.url.starts_with("redis://")
            || self.url.starts_with("rediss://")
            || self.url.starts_with("unix://"))
        {
            return Err(ConfigError::Validation(format!(
                "Redis URL must use the redis://, rediss:// or unix:// scheme, got '{}'",
                self.url
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Redis connect_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

/// Client behaviour shared by every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Upper bound on a single store round-trip, in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// How values without a JSON form are written.
    #[serde(default)]
    pub payload_encoding: PayloadEncoding,

    /// Retry policy for idempotent operations.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            payload_encoding: PayloadEncoding::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "client.operation_timeout_ms must be greater than 0".into(),
            ));
        }
        self.retry.validate()
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

fn default_operation_timeout_ms() -> u64 {
    2000
}

/// Encoding for opaque (non-JSON) payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// Raw binary bytes.
    #[default]
    Binary,
    /// Hex text, for transports that only carry valid strings.
    Hex,
}

/// Retries for idempotent store operations on transient failures.
///
/// Non-idempotent operations (counters, pushes, pops, conditional writes)
/// always run once regardless of this setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial call).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay before first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (fraction, 0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Validation(format!(
                "client.retry.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            )));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(format!(
                "client.retry.backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Calculate the delay for a given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped_delay * self.jitter;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).max(0.0);
        Duration::from_millis(final_delay as u64)
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay_ms() -> u64 {
    25
}

fn default_max_delay_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

// ─────────────────────────────────────────────────────────────────────────────
// Expiry defaults
// ─────────────────────────────────────────────────────────────────────────────

/// General-purpose cache entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// TTL used by `cache_set` when the caller gives none.
    #[serde(default = "default_one_hour")]
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_one_hour(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Session lifetime, also applied when an update extends the TTL.
    #[serde(default = "default_one_hour")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_one_hour(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentsConfig {
    /// How long processed document results stay cached.
    #[serde(default = "default_one_hour")]
    pub result_ttl_secs: u64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            result_ttl_secs: default_one_hour(),
        }
    }
}

fn default_one_hour() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let retry = RetryConfig {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(25));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_jitter_stays_in_range() {
        let retry = RetryConfig {
            initial_delay_ms: 100,
            jitter: 0.5,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = retry.delay_for_attempt(0).as_millis();
            assert!((50..=150).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_redis_url_scheme_validated() {
        let config = RedisStoreConfig {
            url: "http://localhost:6379".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(RedisStoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_payload_encoding_names() {
        assert_eq!(
            serde_json::from_str::<PayloadEncoding>("\"hex\"").unwrap(),
            PayloadEncoding::Hex
        );
        assert_eq!(
            serde_json::from_str::<PayloadEncoding>("\"binary\"").unwrap(),
            PayloadEncoding::Binary
        );
    }
}
