use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{
    codec::Codec,
    error::{CacheError, CacheResult},
    memory::MemoryConnector,
    retry::{Idempotency, with_retry},
    traits::{Connector, KeyTtl, ListEnd, ServerInfo, SetMode, SetOptions, Store},
    value::{Map, Value},
};
use crate::config::{AppConfig, PayloadEncoding, RetryConfig, StoreConfig};

/// Keys deleted per DEL when purging by pattern.
const DELETE_BATCH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tunables for a [`StoreClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub operation_timeout: Duration,
    pub payload_encoding: PayloadEncoding,
    pub retry: RetryConfig,
    pub default_cache_ttl: Duration,
    pub session_ttl: Duration,
    pub document_result_ttl: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ClientOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            operation_timeout: config.client.operation_timeout(),
            payload_encoding: config.client.payload_encoding,
            retry: config.client.retry.clone(),
            default_cache_ttl: Duration::from_secs(config.cache.default_ttl_secs),
            session_ttl: Duration::from_secs(config.session.ttl_secs),
            document_result_ttl: Duration::from_secs(config.documents.result_ttl_secs),
        }
    }
}

struct Slot {
    state: ConnectionState,
    store: Option<Arc<dyn Store>>,
}

/// Client for the key-value store shared by the caching, session, queue and
/// rate-limit paths.
///
/// Connects lazily on first use, or eagerly through [`StoreClient::connect`].
/// Concurrent first uses open exactly one connection.
///
/// Every keyed operation fails soft: store errors are logged and turned into
/// the operation's empty default (`None`, `0`, `false`, empty collections).
/// The one error that is returned is a failure to connect, since no operation
/// can do anything useful without a connection. Counter updates are the
/// exception and report every failure.
pub struct StoreClient {
    connector: Arc<dyn Connector>,
    slot: RwLock<Slot>,
    connect_lock: Mutex<()>,
    codec: Codec,
    options: ClientOptions,
}

impl StoreClient {
    pub fn new(connector: Arc<dyn Connector>, options: ClientOptions) -> Self {
        Self {
            connector,
            slot: RwLock::new(Slot {
                state: ConnectionState::Disconnected,
                store: None,
            }),
            connect_lock: Mutex::new(()),
            codec: Codec::new(options.payload_encoding),
            options,
        }
    }

    /// Build a client for the backend named in the configuration. Does not connect.
    pub fn from_config(config: &AppConfig) -> Self {
        let connector: Arc<dyn Connector> = match &config.store {
            StoreConfig::Memory(memory) => Arc::new(MemoryConnector::from_config(memory)),
            #[cfg(feature = "redis")]
            StoreConfig::Redis(redis) => Arc::new(super::redis::RedisConnector::new(redis.clone())),
            #[cfg(not(feature = "redis"))]
            StoreConfig::Redis(_) => {
                tracing::warn!("Redis store configured but the 'redis' feature is disabled, using memory");
                Arc::new(MemoryConnector::from_config(&Default::default()))
            }
        };
        Self::new(connector, ClientOptions::from_config(config))
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.read().state
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// Open the connection and verify it with a round-trip ping.
    ///
    /// A no-op when already connected. On failure the client is left
    /// disconnected and the next operation tries again.
    pub async fn connect(&self) -> CacheResult<()> {
        self.handle().await.map(|_| ())
    }

    /// Release the connection. A no-op when already disconnected.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        let store = {
            let mut slot = self.slot.write();
            slot.state = ConnectionState::Disconnected;
            slot.store.take()
        };

        if let Some(store) = store {
            store.close().await;
            info!(backend = self.connector.name(), "Disconnected from store");
        }
    }

    /// Health check. Never fails; reports `false` when not connected or when
    /// the store does not answer.
    pub async fn ping(&self) -> bool {
        let Some(store) = self.current() else {
            return false;
        };
        matches!(
            tokio::time::timeout(self.options.operation_timeout, store.ping()).await,
            Ok(Ok(()))
        )
    }

    fn current(&self) -> Option<Arc<dyn Store>> {
        self.slot.read().store.clone()
    }

    /// The open connection, connecting first if needed.
    async fn handle(&self) -> CacheResult<Arc<dyn Store>> {
        if let Some(store) = self.current() {
            return Ok(store);
        }

        let _guard = self.connect_lock.lock().await;
        // Another caller may have connected while we waited
        if let Some(store) = self.current() {
            return Ok(store);
        }

        self.slot.write().state = ConnectionState::Connecting;
        match self.open().await {
            Ok(store) => {
                let mut slot = self.slot.write();
                slot.state = ConnectionState::Connected;
                slot.store = Some(store.clone());
                info!(backend = self.connector.name(), "Connected to store");
                Ok(store)
            }
            Err(e) => {
                let mut slot = self.slot.write();
                slot.state = ConnectionState::Disconnected;
                slot.store = None;
                error!(backend = self.connector.name(), error = %e, "Failed to connect to store");
                Err(match e {
                    CacheError::Connection(_) => e,
                    other => CacheError::Connection(other.to_string()),
                })
            }
        }
    }

    async fn open(&self) -> CacheResult<Arc<dyn Store>> {
        let store = self.connector.connect().await?;
        let timeout = self.options.operation_timeout;

        let liveness = match tokio::time::timeout(timeout, store.ping()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout.as_millis() as u64)),
        };
        match liveness {
            Ok(()) => Ok(store),
            Err(e) => {
                store.close().await;
                Err(CacheError::Connection(format!("liveness check failed: {e}")))
            }
        }
    }

    /// Forget a connection that the store has dropped, so the next call reconnects.
    fn invalidate(&self, store: &Arc<dyn Store>) {
        let mut slot = self.slot.write();
        if slot.store.as_ref().is_some_and(|s| Arc::ptr_eq(s, store)) {
            slot.store = None;
            slot.state = ConnectionState::Disconnected;
            debug!(backend = self.connector.name(), "Store connection lost, will reconnect");
        }
    }

    /// Run one store command with timeout and retry, surfacing the error.
    async fn call<T, F, Fut>(
        &self,
        store: &Arc<dyn Store>,
        operation: &'static str,
        key: &str,
        idempotency: Idempotency,
        call: F,
    ) -> CacheResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let result = with_retry(
            &self.options.retry,
            idempotency,
            self.options.operation_timeout,
            operation,
            key,
            call,
        )
        .await;

        if let Err(e) = &result {
            error!(operation, key, error = %e, "Store operation failed");
            if e.is_connection_lost() {
                self.invalidate(store);
            }
        }
        result
    }

    /// [`Self::call`] with the error replaced by `default`.
    async fn soft<T, F, Fut>(
        &self,
        store: &Arc<dyn Store>,
        operation: &'static str,
        key: &str,
        idempotency: Idempotency,
        default: T,
        call: F,
    ) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.call(store, operation, key, idempotency, call)
            .await
            .unwrap_or(default)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Scalar operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Store a value. Returns `false` if the write failed or the mode's
    /// condition was not met.
    pub async fn set(&self, key: &str, value: &Value, options: SetOptions) -> CacheResult<bool> {
        let store = self.handle().await?;
        let payload = self.codec.encode(value);
        let idempotency = match options.mode {
            SetMode::Always => Idempotency::Idempotent,
            SetMode::IfAbsent | SetMode::IfPresent => Idempotency::NonIdempotent,
        };
        Ok(self
            .soft(&store, "set", key, idempotency, false, || {
                store.set(key, &payload, options)
            })
            .await)
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let store = self.handle().await?;
        let payload = self
            .soft(&store, "get", key, Idempotency::Idempotent, None, || store.get(key))
            .await;
        Ok(payload.map(|p| self.codec.decode(&p)))
    }

    /// Delete keys, returning how many existed.
    pub async fn delete(&self, keys: &[&str]) -> CacheResult<u64> {
        let store = self.handle().await?;
        let key = keys.first().copied().unwrap_or_default();
        Ok(self
            .soft(&store, "delete", key, Idempotency::Idempotent, 0, || store.delete(keys))
            .await)
    }

    /// Count how many of the keys exist.
    pub async fn exists(&self, keys: &[&str]) -> CacheResult<u64> {
        let store = self.handle().await?;
        let key = keys.first().copied().unwrap_or_default();
        Ok(self
            .soft(&store, "exists", key, Idempotency::Idempotent, 0, || store.exists(keys))
            .await)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let store = self.handle().await?;
        Ok(self
            .soft(&store, "expire", key, Idempotency::Idempotent, false, || {
                store.expire(key, ttl)
            })
            .await)
    }

    pub async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let store = self.handle().await?;
        Ok(self
            .soft(&store, "ttl", key, Idempotency::Idempotent, KeyTtl::Unknown, || {
                store.ttl(key)
            })
            .await)
    }

    /// Atomically add `amount` to an integer counter, creating it at zero.
    ///
    /// Unlike the other operations this reports store failures, so a failed
    /// update is never mistaken for a counter value.
    pub async fn incr(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let store = self.handle().await?;
        self.call(&store, "incr", key, Idempotency::NonIdempotent, || {
            store.incr_by(key, amount)
        })
        .await
    }

    pub async fn decr(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let delta = amount
            .checked_neg()
            .ok_or_else(|| CacheError::NotInteger(format!("{key}: decrement out of range")))?;
        self.incr(key, delta).await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Hash operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Set hash fields, returning how many were newly created.
    pub async fn hash_set(&self, key: &str, fields: &Map) -> CacheResult<u64> {
        let store = self.handle().await?;
        let encoded: Vec<(&str, Vec<u8>)> = fields
            .iter()
            .map(|(field, value)| (field.as_str(), self.codec.encode(value)))
            .collect();
        Ok(self
            .soft(&store, "hash_set", key, Idempotency::Idempotent, 0, || {
                store.hash_set(key, &encoded)
            })
            .await)
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Value>> {
        let store = self.handle().await?;
        let payload = self
            .soft(&store, "hash_get", key, Idempotency::Idempotent, None, || {
                store.hash_get(key, field)
            })
            .await;
        Ok(payload.map(|p| self.codec.decode(&p)))
    }

    pub async fn hash_get_all(&self, key: &str) -> CacheResult<Map> {
        let store = self.handle().await?;
        let fields = self
            .soft(
                &store,
                "hash_get_all",
                key,
                Idempotency::Idempotent,
                Default::default(),
                || store.hash_get_all(key),
            )
            .await;
        Ok(fields
            .into_iter()
            .map(|(field, payload)| (field, self.codec.decode(&payload)))
            .collect())
    }

    pub async fn hash_delete(&self, key: &str, fields: &[&str]) -> CacheResult<u64> {
        let store = self.handle().await?;
        Ok(self
            .soft(&store, "hash_delete", key, Idempotency::Idempotent, 0, || {
                store.hash_delete(key, fields)
            })
            .await)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // List operations
    // ─────────────────────────────────────────────────────────────────────────────

    async fn list_push(
        &self,
        operation: &'static str,
        key: &str,
        end: ListEnd,
        values: &[Value],
    ) -> CacheResult<u64> {
        let store = self.handle().await?;
        let payloads: Vec<Vec<u8>> = values.iter().map(|v| self.codec.encode(v)).collect();
        Ok(self
            .soft(&store, operation, key, Idempotency::NonIdempotent, 0, || {
                store.list_push(key, end, &payloads)
            })
            .await)
    }

    async fn list_pop(
        &self,
        operation: &'static str,
        key: &str,
        end: ListEnd,
    ) -> CacheResult<Option<Value>> {
        let store = self.handle().await?;
        let payload = self
            .soft(&store, operation, key, Idempotency::NonIdempotent, None, || {
                store.list_pop(key, end)
            })
            .await;
        Ok(payload.map(|p| self.codec.decode(&p)))
    }

    /// Push values onto the head, one at a time. Returns the new length.
    pub async fn list_push_left(&self, key: &str, values: &[Value]) -> CacheResult<u64> {
        self.list_push("list_push_left", key, ListEnd::Left, values)
            .await
    }

    /// Push values onto the tail. Returns the new length.
    pub async fn list_push_right(&self, key: &str, values: &[Value]) -> CacheResult<u64> {
        self.list_push("list_push_right", key, ListEnd::Right, values)
            .await
    }

    pub async fn list_pop_left(&self, key: &str) -> CacheResult<Option<Value>> {
        self.list_pop("list_pop_left", key, ListEnd::Left).await
    }

    pub async fn list_pop_right(&self, key: &str) -> CacheResult<Option<Value>> {
        self.list_pop("list_pop_right", key, ListEnd::Right).await
    }

    /// Inclusive range; negative indices count from the tail.
    pub async fn list_range(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<Value>> {
        let store = self.handle().await?;
        let payloads = self
            .soft(&store, "list_range", key, Idempotency::Idempotent, Vec::new(), || {
                store.list_range(key, start, stop)
            })
            .await;
        Ok(payloads.iter().map(|p| self.codec.decode(p)).collect())
    }

    pub async fn list_len(&self, key: &str) -> CacheResult<u64> {
        let store = self.handle().await?;
        Ok(self
            .soft(&store, "list_len", key, Idempotency::Idempotent, 0, || {
                store.list_len(key)
            })
            .await)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Set operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Add members, returning how many were new.
    pub async fn set_add(&self, key: &str, members: &[Value]) -> CacheResult<u64> {
        let store = self.handle().await?;
        let payloads: Vec<Vec<u8>> = members.iter().map(|m| self.codec.encode(m)).collect();
        Ok(self
            .soft(&store, "set_add", key, Idempotency::Idempotent, 0, || {
                store.set_add(key, &payloads)
            })
            .await)
    }

    pub async fn set_members(&self, key: &str) -> CacheResult<Vec<Value>> {
        let store = self.handle().await?;
        let payloads = self
            .soft(&store, "set_members", key, Idempotency::Idempotent, Vec::new(), || {
                store.set_members(key)
            })
            .await;
        Ok(payloads.iter().map(|p| self.codec.decode(p)).collect())
    }

    pub async fn set_is_member(&self, key: &str, member: &Value) -> CacheResult<bool> {
        let store = self.handle().await?;
        let payload = self.codec.encode(member);
        Ok(self
            .soft(&store, "set_is_member", key, Idempotency::Idempotent, false, || {
                store.set_is_member(key, &payload)
            })
            .await)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Keyspace / server
    // ─────────────────────────────────────────────────────────────────────────────

    /// Keys matching a glob-style pattern (`*`, `?`).
    pub async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let store = self.handle().await?;
        Ok(self
            .soft(&store, "scan_keys", pattern, Idempotency::Idempotent, Vec::new(), || {
                store.scan_keys(pattern)
            })
            .await)
    }

    pub async fn server_info(&self) -> CacheResult<Option<ServerInfo>> {
        let store = self.handle().await?;
        Ok(self
            .call(&store, "server_info", "", Idempotency::Idempotent, || store.info())
            .await
            .ok())
    }

    /// Remove every key in the database. A Redis store configured with a
    /// `key_prefix` only removes its own prefixed keys.
    pub async fn flush_db(&self) -> CacheResult<bool> {
        let store = self.handle().await?;
        Ok(self
            .call(&store, "flush_db", "", Idempotency::Idempotent, || store.flush())
            .await
            .is_ok())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Cache
    // ─────────────────────────────────────────────────────────────────────────────

    /// Cache a value. Without a TTL (or with a zero one) the configured
    /// default applies.
    pub async fn cache_set(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let ttl = ttl
            .filter(|t| !t.is_zero())
            .unwrap_or(self.options.default_cache_ttl);
        self.set(key, value, SetOptions::with_ttl(ttl)).await
    }

    pub async fn cache_get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.get(key).await
    }

    /// Delete every key matching the pattern, returning how many were removed.
    pub async fn cache_delete(&self, pattern: &str) -> CacheResult<u64> {
        let keys = self.scan_keys(pattern).await?;
        let mut removed = 0;
        for chunk in keys.chunks(DELETE_BATCH) {
            let chunk: Vec<&str> = chunk.iter().map(String::as_str).collect();
            removed += self.delete(&chunk).await?;
        }
        if removed > 0 {
            debug!(pattern, removed, "Purged cache keys");
        }
        Ok(removed)
    }
}
