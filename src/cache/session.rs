//! User sessions stored as one record per session id.
//!
//! Updates are read-modify-write against the whole record, so two concurrent
//! updates of the same session race and the last write wins.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{
    client::StoreClient,
    error::CacheResult,
    keys::CacheKeys,
    traits::{KeyTtl, SetMode, SetOptions},
    value::{Map, Value},
};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub data: Map,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>, data: Map) -> Self {
        Self {
            user_id: user_id.into(),
            created_at: Utc::now(),
            data,
            updated_at: None,
        }
    }

    /// Rebuild a record from its stored form. Returns `None` if required fields are missing.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Map(mut map) = value else {
            return None;
        };

        let user_id = match map.remove("user_id")? {
            Value::String(s) => s,
            Value::Int(i) => i.to_string(),
            _ => return None,
        };
        let created_at = map.get("created_at").and_then(parse_timestamp)?;
        let updated_at = map.get("updated_at").and_then(parse_timestamp);
        let data = match map.remove("data") {
            Some(Value::Map(data)) => data,
            None | Some(Value::Null) => Map::new(),
            Some(_) => return None,
        };

        Some(Self {
            user_id,
            created_at,
            data,
            updated_at,
        })
    }
}

impl From<SessionRecord> for Value {
    fn from(record: SessionRecord) -> Self {
        let mut map = Map::new();
        map.insert("user_id".into(), Value::String(record.user_id));
        map.insert("created_at".into(), Value::String(record.created_at.to_rfc3339()));
        map.insert("data".into(), Value::Map(record.data));
        if let Some(updated_at) = record.updated_at {
            map.insert("updated_at".into(), Value::String(updated_at.to_rfc3339()));
        }
        Value::Map(map)
    }
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc()))
        .ok()
}

impl StoreClient {
    /// Store a new session, replacing any existing one with the same id.
    /// Without a TTL the configured session lifetime applies.
    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: &str,
        data: Map,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let ttl = ttl.unwrap_or(self.options().session_ttl);
        let record = SessionRecord::new(user_id, data);
        self.set(
            &CacheKeys::session(session_id),
            &record.into(),
            SetOptions::with_ttl(ttl),
        )
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> CacheResult<Option<SessionRecord>> {
        let Some(value) = self.get(&CacheKeys::session(session_id)).await? else {
            return Ok(None);
        };

        let record = SessionRecord::from_value(value);
        if record.is_none() {
            tracing::warn!(session_id, "Ignoring malformed session record");
        }
        Ok(record)
    }

    /// Merge `data` into the session's data (top-level keys only) and stamp
    /// `updated_at`.
    ///
    /// With `extend_ttl` the session gets a fresh full lifetime; otherwise its
    /// remaining lifetime is kept. Returns `false` when the session doesn't
    /// exist; a missing session is never recreated.
    pub async fn update_session(
        &self,
        session_id: &str,
        data: Map,
        extend_ttl: bool,
    ) -> CacheResult<bool> {
        let key = CacheKeys::session(session_id);
        let Some(mut record) = self.get_session(session_id).await? else {
            return Ok(false);
        };

        record.data.extend(data);
        record.updated_at = Some(Utc::now());

        let ttl = if extend_ttl {
            Some(self.options().session_ttl)
        } else {
            match self.ttl(&key).await? {
                KeyTtl::Missing => return Ok(false),
                KeyTtl::Persistent => None,
                KeyTtl::Expires(remaining) => Some(remaining.max(Duration::from_millis(1))),
                KeyTtl::Unknown => Some(self.options().session_ttl),
            }
        };

        // IfPresent: a session that expired in the meantime stays gone
        let options = SetOptions {
            ttl,
            mode: SetMode::IfPresent,
        };
        self.set(&key, &record.into(), options).await
    }

    pub async fn delete_session(&self, session_id: &str) -> CacheResult<bool> {
        let key = CacheKeys::session(session_id);
        let removed = self.delete(&[key.as_str()]).await?;
        Ok(removed > 0)
    }
}
