use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;

use super::error::CacheResult;

/// Condition attached to a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetMode {
    /// Write unconditionally
    #[default]
    Always,
    /// Write only if the key does not exist (SET NX)
    IfAbsent,
    /// Write only if the key already exists (SET XX)
    IfPresent,
}

/// Options for a scalar write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expiry for the written key. `None` or a zero duration means no expiry.
    pub ttl: Option<Duration>,
    pub mode: SetMode,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            mode: SetMode::Always,
        }
    }

    pub fn mode(mut self, mode: SetMode) -> Self {
        self.mode = mode;
        self
    }

    /// The effective expiry, with zero treated as "none".
    pub fn expiry(&self) -> Option<Duration> {
        self.ttl.filter(|ttl| !ttl.is_zero())
    }
}

/// Which end of a list a push or pop applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Left,
    Right,
}

/// Remaining lifetime of a key, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist
    Missing,
    /// The key exists and has no expiry
    Persistent,
    /// The key expires after the given duration
    Expires(Duration),
    /// The lifetime could not be determined (store error)
    Unknown,
}

impl KeyTtl {
    /// Whole seconds remaining, rounded up, in the `TTL` command's convention:
    /// `-2` for a missing key and `-1` when there is no expiry (or it is unknown).
    pub fn as_secs(&self) -> i64 {
        match self {
            KeyTtl::Missing => -2,
            KeyTtl::Persistent | KeyTtl::Unknown => -1,
            KeyTtl::Expires(d) => i64::try_from(d.as_millis().div_ceil(1000)).unwrap_or(i64::MAX),
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }

    /// Build from a `PTTL` reply.
    pub fn from_millis_reply(reply: i64) -> Self {
        match reply {
            -2 => KeyTtl::Missing,
            r if r < 0 => KeyTtl::Persistent,
            r => KeyTtl::Expires(Duration::from_millis(r as u64)),
        }
    }
}

/// Health and usage figures reported by the store server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub version: String,
    pub connected_clients: u64,
    pub used_memory: u64,
    pub used_memory_human: String,
    pub total_connections_received: u64,
    pub total_commands_processed: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

/// An open connection to a key-value store.
///
/// Payloads are opaque bytes here; encoding happens in the client. All methods
/// map one-to-one onto a store command and report failures as errors, leaving
/// fail-soft policy to the caller.
#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trip liveness check
    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Returns false when the write was skipped because of the mode condition.
    async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> CacheResult<bool>;

    /// Delete keys of any kind, returning how many existed.
    async fn delete(&self, keys: &[&str]) -> CacheResult<u64>;

    /// Count how many of the keys exist.
    async fn exists(&self, keys: &[&str]) -> CacheResult<u64>;

    /// Set or update the expiry of a key. Returns false if the key doesn't exist.
    /// A zero duration expires the key immediately.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl>;

    /// Atomically add `delta` to an integer counter, creating it at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Hash Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Returns the number of fields newly created.
    async fn hash_set(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> CacheResult<u64>;

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, Vec<u8>>>;

    async fn hash_delete(&self, key: &str, fields: &[&str]) -> CacheResult<u64>;

    // ─────────────────────────────────────────────────────────────────────────────
    // List Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Push values one by one onto the given end. Returns the new length.
    async fn list_push(&self, key: &str, end: ListEnd, values: &[Vec<u8>]) -> CacheResult<u64>;

    async fn list_pop(&self, key: &str, end: ListEnd) -> CacheResult<Option<Vec<u8>>>;

    /// Inclusive range with negative indices counted from the tail.
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<Vec<u8>>>;

    async fn list_len(&self, key: &str) -> CacheResult<u64>;

    // ─────────────────────────────────────────────────────────────────────────────
    // SET Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Returns the number of members newly added.
    async fn set_add(&self, key: &str, members: &[Vec<u8>]) -> CacheResult<u64>;

    async fn set_members(&self, key: &str) -> CacheResult<Vec<Vec<u8>>>;

    async fn set_is_member(&self, key: &str, member: &[u8]) -> CacheResult<bool>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Keyspace / Server
    // ─────────────────────────────────────────────────────────────────────────────

    /// Enumerate keys matching a glob-style pattern.
    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    async fn info(&self) -> CacheResult<ServerInfo>;

    /// Remove every key this store can see: the whole database, or only the
    /// keys under the store's key prefix when it has one.
    async fn flush(&self) -> CacheResult<()>;

    /// Release the underlying connection. Called once on disconnect.
    async fn close(&self) {}
}

/// Opens connections to a store. Held by the client for the lifetime of the process
/// so it can reconnect after a disconnect.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn connect(&self) -> CacheResult<Arc<dyn Store>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ttl_seconds_convention() {
        assert_eq!(KeyTtl::Missing.as_secs(), -2);
        assert_eq!(KeyTtl::Persistent.as_secs(), -1);
        assert_eq!(KeyTtl::Unknown.as_secs(), -1);
        assert_eq!(KeyTtl::Expires(Duration::from_millis(59_001)).as_secs(), 60);
        assert_eq!(KeyTtl::Expires(Duration::from_secs(60)).as_secs(), 60);
    }

    #[test]
    fn test_key_ttl_from_pttl_reply() {
        assert_eq!(KeyTtl::from_millis_reply(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_millis_reply(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_millis_reply(1500),
            KeyTtl::Expires(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_set_options_zero_ttl_is_no_expiry() {
        assert_eq!(SetOptions::with_ttl(Duration::ZERO).expiry(), None);
        assert_eq!(
            SetOptions::with_ttl(Duration::from_secs(5)).expiry(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(SetOptions::default().expiry(), None);
    }
}
