use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{FromRedisValue, InfoDict, IntoConnectionInfo, RedisError, aio::MultiplexedConnection};

use super::{
    error::{CacheError, CacheResult},
    traits::{Connector, KeyTtl, ListEnd, ServerInfo, SetMode, SetOptions, Store},
};
use crate::config::RedisStoreConfig;

/// Keys fetched per SCAN round-trip.
const SCAN_BATCH: usize = 500;

/// Store backed by a standalone Redis server.
///
/// All callers share one multiplexed connection; each command clones the
/// handle, which only copies the channel to the connection driver.
pub struct RedisStore {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(conn: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn unprefixed_key(&self, key: String) -> String {
        match key.strip_prefix(&self.key_prefix) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }

    async fn query<T: FromRedisValue>(&self, key: &str, cmd: &redis::Cmd) -> CacheResult<T> {
        let mut conn = self.conn.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| classify_error(e, key))
    }
}

/// Translate server replies with a dedicated error variant.
fn classify_error(e: RedisError, key: &str) -> CacheError {
    if e.code() == Some("WRONGTYPE") {
        return CacheError::WrongType(key.to_string());
    }
    if e.to_string().contains("not an integer") || e.to_string().contains("overflow") {
        return CacheError::NotInteger(key.to_string());
    }
    CacheError::Redis(e)
}

/// Millisecond expiry argument. Redis keeps expiries as signed 64-bit milliseconds.
fn expiry_millis(ttl: Duration) -> CacheResult<i64> {
    i64::try_from(ttl.as_millis()).map_err(|_| CacheError::InvalidTtl(ttl))
}

fn server_info(info: &InfoDict) -> ServerInfo {
    let number = |name: &str| info.get::<u64>(name).unwrap_or(0);
    ServerInfo {
        version: info
            .get("redis_version")
            .unwrap_or_else(|| "unknown".to_string()),
        connected_clients: number("connected_clients"),
        used_memory: number("used_memory"),
        used_memory_human: info
            .get("used_memory_human")
            .unwrap_or_else(|| "0B".to_string()),
        total_connections_received: number("total_connections_received"),
        total_commands_processed: number("total_commands_processed"),
        keyspace_hits: number("keyspace_hits"),
        keyspace_misses: number("keyspace_misses"),
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> CacheResult<()> {
        let _: String = self.query("", &redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("GET").arg(&full_key)).await
    }

    async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> CacheResult<bool> {
        let full_key = self.prefixed_key(key);

        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(value);
        if let Some(ttl) = options.expiry() {
            cmd.arg("PX").arg(expiry_millis(ttl)?.max(1));
        }
        match options.mode {
            SetMode::Always => {}
            SetMode::IfAbsent => {
                cmd.arg("NX");
            }
            SetMode::IfPresent => {
                cmd.arg("XX");
            }
        }

        // "OK" if written, nil if the NX/XX condition was not met
        let result: Option<String> = self.query(key, &cmd).await?;
        Ok(result.is_some())
    }

    async fn delete(&self, keys: &[&str]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        self.query(keys[0], redis::cmd("DEL").arg(&full_keys)).await
    }

    async fn exists(&self, keys: &[&str]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        self.query(keys[0], redis::cmd("EXISTS").arg(&full_keys)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let full_key = self.prefixed_key(key);
        self.query(
            key,
            redis::cmd("PEXPIRE")
                .arg(&full_key)
                .arg(expiry_millis(ttl)?),
        )
        .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let full_key = self.prefixed_key(key);
        let reply: i64 = self.query(key, redis::cmd("PTTL").arg(&full_key)).await?;
        Ok(KeyTtl::from_millis_reply(reply))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("INCRBY").arg(&full_key).arg(delta))
            .await
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> CacheResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let full_key = self.prefixed_key(key);

        let mut cmd = redis::cmd("HSET");
        cmd.arg(&full_key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value.as_slice());
        }
        self.query(key, &cmd).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("HGET").arg(&full_key).arg(field))
            .await
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, Vec<u8>>> {
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("HGETALL").arg(&full_key)).await
    }

    async fn hash_delete(&self, key: &str, fields: &[&str]) -> CacheResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("HDEL").arg(&full_key).arg(fields))
            .await
    }

    async fn list_push(&self, key: &str, end: ListEnd, values: &[Vec<u8>]) -> CacheResult<u64> {
        if values.is_empty() {
            return self.list_len(key).await;
        }
        let full_key = self.prefixed_key(key);

        let mut cmd = redis::cmd(match end {
            ListEnd::Left => "LPUSH",
            ListEnd::Right => "RPUSH",
        });
        cmd.arg(&full_key);
        for value in values {
            cmd.arg(value.as_slice());
        }
        self.query(key, &cmd).await
    }

    async fn list_pop(&self, key: &str, end: ListEnd) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.prefixed_key(key);
        let cmd = match end {
            ListEnd::Left => "LPOP",
            ListEnd::Right => "RPOP",
        };
        self.query(key, redis::cmd(cmd).arg(&full_key)).await
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<Vec<u8>>> {
        let full_key = self.prefixed_key(key);
        self.query(
            key,
            redis::cmd("LRANGE").arg(&full_key).arg(start).arg(stop),
        )
        .await
    }

    async fn list_len(&self, key: &str) -> CacheResult<u64> {
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("LLEN").arg(&full_key)).await
    }

    async fn set_add(&self, key: &str, members: &[Vec<u8>]) -> CacheResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let full_key = self.prefixed_key(key);

        let mut cmd = redis::cmd("SADD");
        cmd.arg(&full_key);
        for member in members {
            cmd.arg(member.as_slice());
        }
        self.query(key, &cmd).await
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<Vec<u8>>> {
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("SMEMBERS").arg(&full_key)).await
    }

    async fn set_is_member(&self, key: &str, member: &[u8]) -> CacheResult<bool> {
        let full_key = self.prefixed_key(key);
        self.query(key, redis::cmd("SISMEMBER").arg(&full_key).arg(member))
            .await
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let full_pattern = self.prefixed_key(pattern);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        // SCAN instead of KEYS so large keyspaces don't block the server
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    pattern,
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&full_pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH),
                )
                .await?;
            keys.extend(batch.into_iter().map(|k| self.unprefixed_key(k)));

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn info(&self) -> CacheResult<ServerInfo> {
        let info: InfoDict = self.query("", &redis::cmd("INFO")).await?;
        Ok(server_info(&info))
    }

    /// With a key prefix only this prefix's keys are removed; other tenants of
    /// the same database are left alone.
    async fn flush(&self) -> CacheResult<()> {
        if self.key_prefix.is_empty() {
            return self.query("", &redis::cmd("FLUSHDB")).await;
        }

        let keys = self.scan_keys("*").await?;
        for chunk in keys.chunks(SCAN_BATCH) {
            let chunk: Vec<&str> = chunk.iter().map(String::as_str).collect();
            self.delete(&chunk).await?;
        }
        Ok(())
    }
}

/// Opens multiplexed connections to the configured Redis server.
pub struct RedisConnector {
    config: RedisStoreConfig,
}

impl RedisConnector {
    pub fn new(config: RedisStoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> CacheResult<Arc<dyn Store>> {
        let mut info = self
            .config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| CacheError::Connection(format!("invalid Redis URL: {e}")))?;
        if let Some(password) = &self.config.password {
            info.redis.password = Some(password.clone());
        }

        let client =
            redis::Client::open(info).map_err(|e| CacheError::Connection(e.to_string()))?;

        let timeout = self.config.connect_timeout();
        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                CacheError::Connection(format!("timed out after {}s", timeout.as_secs()))
            })?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Arc::new(RedisStore::new(conn, self.config.key_prefix.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_millis_range() {
        assert_eq!(expiry_millis(Duration::from_millis(1500)).unwrap(), 1500);
        assert!(matches!(
            expiry_millis(Duration::from_secs(u64::MAX)),
            Err(CacheError::InvalidTtl(_))
        ));
    }

    #[test]
    fn test_server_info_from_info_dict() {
        let info = InfoDict::new(
            "# Server\r\nredis_version:7.2.4\r\n# Clients\r\nconnected_clients:3\r\n\
             used_memory:1048576\r\nused_memory_human:1.00M\r\nkeyspace_hits:10\r\n",
        );
        let info = server_info(&info);
        assert_eq!(info.version, "7.2.4");
        assert_eq!(info.connected_clients, 3);
        assert_eq!(info.used_memory, 1_048_576);
        assert_eq!(info.used_memory_human, "1.00M");
        assert_eq!(info.keyspace_hits, 10);
        assert_eq!(info.keyspace_misses, 0);
    }
}
