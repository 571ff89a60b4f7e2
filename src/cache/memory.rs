use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use wildmatch::WildMatch;

use super::{
    error::{CacheError, CacheResult},
    traits::{Connector, KeyTtl, ListEnd, ServerInfo, SetMode, SetOptions, Store},
};
use crate::config::MemoryStoreConfig;

enum EntryData {
    String(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(HashSet<Vec<u8>>),
}

impl EntryData {
    /// Approximate payload size, for the `used_memory` figure.
    fn size(&self) -> usize {
        match self {
            EntryData::String(b) => b.len(),
            EntryData::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len()).sum(),
            EntryData::List(l) => l.iter().map(Vec::len).sum(),
            EntryData::Set(s) => s.iter().map(Vec::len).sum(),
        }
    }
}

struct StoredEntry {
    data: EntryData,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl StoredEntry {
    fn new(data: EntryData, expires_at: Option<Instant>) -> Self {
        Self {
            data,
            expires_at,
            last_accessed: Instant::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    /// Aggregates disappear once their last element is removed.
    fn is_empty(&self) -> bool {
        match &self.data {
            EntryData::String(_) => false,
            EntryData::Hash(h) => h.is_empty(),
            EntryData::List(l) => l.is_empty(),
            EntryData::Set(s) => s.is_empty(),
        }
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::WrongType(key.to_string())
}

fn expiry_instant(ttl: Duration) -> CacheResult<Instant> {
    Instant::now()
        .checked_add(ttl)
        .ok_or(CacheError::InvalidTtl(ttl))
}

/// In-process store using DashMap for concurrent access.
///
/// Implements every [`Store`] primitive with the same observable semantics as
/// the Redis backend: lazy expiry, typed keys, and aggregates that vanish when
/// emptied. Not shared between processes.
///
/// The store can be taken offline with [`MemoryStore::set_available`], after
/// which every command fails with [`CacheError::Unavailable`] and new
/// connections are refused.
pub struct MemoryStore {
    data: DashMap<String, StoredEntry>,
    max_entries: usize,
    eviction_batch_size: usize,
    available: AtomicBool,
    commands_processed: AtomicU64,
    keyspace_hits: AtomicU64,
    keyspace_misses: AtomicU64,
}

impl MemoryStore {
    pub fn new(config: &MemoryStoreConfig) -> Self {
        Self {
            data: DashMap::new(),
            max_entries: config.max_entries,
            eviction_batch_size: config.eviction_batch_size.max(1),
            available: AtomicBool::new(true),
            commands_processed: AtomicU64::new(0),
            keyspace_hits: AtomicU64::new(0),
            keyspace_misses: AtomicU64::new(0),
        }
    }

    /// Bring the store online or take it offline.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn command(&self) -> CacheResult<()> {
        if !self.is_available() {
            return Err(CacheError::Unavailable);
        }
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn evict_if_needed(&self) {
        if self.data.len() < self.max_entries {
            return;
        }

        // First pass: remove all expired entries
        self.data.retain(|_, entry| !entry.is_expired());

        let current_len = self.data.len();
        if current_len < self.max_entries {
            return;
        }

        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);

        if to_evict == 0 {
            return;
        }

        // Oldest first
        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
    }

    /// Run `f` against a live entry. Expired entries are removed and read as absent.
    fn read<R>(&self, key: &str, f: impl FnOnce(&StoredEntry) -> R) -> Option<R> {
        let mut entry = self.data.get_mut(key)?;
        if entry.is_expired() {
            drop(entry);
            self.data.remove_if(key, |_, e| e.is_expired());
            return None;
        }
        entry.touch();
        Some(f(&entry))
    }

    /// Mutate a live entry, dropping it if the mutation left it empty.
    /// Returns `None` when the key is absent.
    fn modify<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut StoredEntry) -> CacheResult<R>,
    ) -> CacheResult<Option<R>> {
        let Some(mut entry) = self.data.get_mut(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            drop(entry);
            self.data.remove_if(key, |_, e| e.is_expired());
            return Ok(None);
        }
        entry.touch();
        let result = f(&mut entry);
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.data.remove_if(key, |_, e| e.is_empty());
        }
        result.map(Some)
    }

    /// Mutate an entry, creating it from `init` if absent or expired.
    fn upsert<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> EntryData,
        f: impl FnOnce(&mut StoredEntry) -> CacheResult<R>,
    ) -> CacheResult<R> {
        self.evict_if_needed();

        let mut entry = match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredEntry::new(init(), None));
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(StoredEntry::new(init(), None)),
        };
        entry.touch();
        let result = f(&mut entry);
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.data.remove_if(key, |_, e| e.is_empty());
        }
        result
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> CacheResult<()> {
        self.command()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.command()?;
        let value = self
            .read(key, |entry| match &entry.data {
                EntryData::String(bytes) => Ok(bytes.clone()),
                _ => Err(wrong_type(key)),
            })
            .transpose()?;

        let counter = if value.is_some() {
            &self.keyspace_hits
        } else {
            &self.keyspace_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> CacheResult<bool> {
        self.command()?;
        self.evict_if_needed();

        let expires_at = options.expiry().map(expiry_instant).transpose()?;
        let fresh = || StoredEntry::new(EntryData::String(value.to_vec()), expires_at);

        // Entry API for atomic check-and-insert
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let live = !e.get().is_expired();
                let write = match options.mode {
                    SetMode::Always => true,
                    SetMode::IfAbsent => !live,
                    SetMode::IfPresent => live,
                };
                if write {
                    e.insert(fresh());
                } else if !live {
                    e.remove();
                }
                Ok(write)
            }
            Entry::Vacant(e) => {
                if options.mode == SetMode::IfPresent {
                    return Ok(false);
                }
                e.insert(fresh());
                Ok(true)
            }
        }
    }

    async fn delete(&self, keys: &[&str]) -> CacheResult<u64> {
        self.command()?;
        let removed = keys
            .iter()
            .filter(|key| {
                self.data
                    .remove(**key)
                    .is_some_and(|(_, entry)| !entry.is_expired())
            })
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, keys: &[&str]) -> CacheResult<u64> {
        self.command()?;
        let present = keys
            .iter()
            .filter(|key| self.read(key, |_| ()).is_some())
            .count();
        Ok(present as u64)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.command()?;
        if ttl.is_zero() {
            return Ok(self
                .data
                .remove(key)
                .is_some_and(|(_, entry)| !entry.is_expired()));
        }

        let expires_at = expiry_instant(ttl)?;
        let updated = self.modify(key, |entry| {
            entry.expires_at = Some(expires_at);
            Ok(())
        })?;
        Ok(updated.is_some())
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.command()?;
        let ttl = self.read(key, |entry| match entry.expires_at {
            None => KeyTtl::Persistent,
            Some(at) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        });
        Ok(ttl.unwrap_or(KeyTtl::Missing))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.command()?;
        self.upsert(
            key,
            || EntryData::String(b"0".to_vec()),
            |entry| {
                let EntryData::String(bytes) = &mut entry.data else {
                    return Err(wrong_type(key));
                };
                let current: i64 = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| CacheError::NotInteger(key.to_string()))?;
                let next = current.checked_add(delta).ok_or_else(|| {
                    CacheError::NotInteger(format!("{key}: increment would overflow"))
                })?;
                *bytes = next.to_string().into_bytes();
                Ok(next)
            },
        )
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, Vec<u8>)]) -> CacheResult<u64> {
        self.command()?;
        self.upsert(
            key,
            || EntryData::Hash(HashMap::new()),
            |entry| {
                let EntryData::Hash(hash) = &mut entry.data else {
                    return Err(wrong_type(key));
                };
                let created = fields
                    .iter()
                    .filter(|(field, value)| hash.insert(field.to_string(), value.clone()).is_none())
                    .count();
                Ok(created as u64)
            },
        )
    }

    async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<Vec<u8>>> {
        self.command()?;
        let value = self.read(key, |entry| match &entry.data {
            EntryData::Hash(hash) => Ok(hash.get(field).cloned()),
            _ => Err(wrong_type(key)),
        });
        Ok(value.transpose()?.flatten())
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<HashMap<String, Vec<u8>>> {
        self.command()?;
        let value = self.read(key, |entry| match &entry.data {
            EntryData::Hash(hash) => Ok(hash.clone()),
            _ => Err(wrong_type(key)),
        });
        Ok(value.transpose()?.unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, fields: &[&str]) -> CacheResult<u64> {
        self.command()?;
        let removed = self.modify(key, |entry| {
            let EntryData::Hash(hash) = &mut entry.data else {
                return Err(wrong_type(key));
            };
            Ok(fields.iter().filter(|f| hash.remove(**f).is_some()).count() as u64)
        })?;
        Ok(removed.unwrap_or(0))
    }

    async fn list_push(&self, key: &str, end: ListEnd, values: &[Vec<u8>]) -> CacheResult<u64> {
        self.command()?;
        self.upsert(
            key,
            || EntryData::List(VecDeque::new()),
            |entry| {
                let EntryData::List(list) = &mut entry.data else {
                    return Err(wrong_type(key));
                };
                for value in values {
                    match end {
                        ListEnd::Left => list.push_front(value.clone()),
                        ListEnd::Right => list.push_back(value.clone()),
                    }
                }
                Ok(list.len() as u64)
            },
        )
    }

    async fn list_pop(&self, key: &str, end: ListEnd) -> CacheResult<Option<Vec<u8>>> {
        self.command()?;
        let popped = self.modify(key, |entry| {
            let EntryData::List(list) = &mut entry.data else {
                return Err(wrong_type(key));
            };
            Ok(match end {
                ListEnd::Left => list.pop_front(),
                ListEnd::Right => list.pop_back(),
            })
        })?;
        Ok(popped.flatten())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<Vec<u8>>> {
        self.command()?;
        let range = self.read(key, |entry| {
            let EntryData::List(list) = &entry.data else {
                return Err(wrong_type(key));
            };
            let len = list.len() as i64;
            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            if start > stop || start >= len {
                return Ok(Vec::new());
            }
            Ok(list
                .iter()
                .skip(start as usize)
                .take((stop - start + 1) as usize)
                .cloned()
                .collect())
        });
        Ok(range.transpose()?.unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> CacheResult<u64> {
        self.command()?;
        let len = self.read(key, |entry| match &entry.data {
            EntryData::List(list) => Ok(list.len() as u64),
            _ => Err(wrong_type(key)),
        });
        Ok(len.transpose()?.unwrap_or(0))
    }

    async fn set_add(&self, key: &str, members: &[Vec<u8>]) -> CacheResult<u64> {
        self.command()?;
        self.upsert(
            key,
            || EntryData::Set(HashSet::new()),
            |entry| {
                let EntryData::Set(set) = &mut entry.data else {
                    return Err(wrong_type(key));
                };
                Ok(members.iter().filter(|m| set.insert((*m).clone())).count() as u64)
            },
        )
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<Vec<u8>>> {
        self.command()?;
        let members = self.read(key, |entry| match &entry.data {
            EntryData::Set(set) => Ok(set.iter().cloned().collect()),
            _ => Err(wrong_type(key)),
        });
        Ok(members.transpose()?.unwrap_or_default())
    }

    async fn set_is_member(&self, key: &str, member: &[u8]) -> CacheResult<bool> {
        self.command()?;
        let found = self.read(key, |entry| match &entry.data {
            EntryData::Set(set) => Ok(set.contains(member)),
            _ => Err(wrong_type(key)),
        });
        Ok(found.transpose()?.unwrap_or(false))
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.command()?;
        let matcher = WildMatch::new(pattern);
        Ok(self
            .data
            .iter()
            .filter(|entry| !entry.is_expired() && matcher.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn info(&self) -> CacheResult<ServerInfo> {
        self.command()?;
        let used_memory: usize = self
            .data
            .iter()
            .map(|entry| entry.key().len() + entry.data.size())
            .sum();
        Ok(ServerInfo {
            version: format!("memory-{}", env!("CARGO_PKG_VERSION")),
            connected_clients: 1,
            used_memory: used_memory as u64,
            used_memory_human: format!("{used_memory}B"),
            total_connections_received: 0,
            total_commands_processed: self.commands_processed.load(Ordering::Relaxed),
            keyspace_hits: self.keyspace_hits.load(Ordering::Relaxed),
            keyspace_misses: self.keyspace_misses.load(Ordering::Relaxed),
        })
    }

    async fn flush(&self) -> CacheResult<()> {
        self.command()?;
        self.data.clear();
        Ok(())
    }
}

/// Hands out the shared [`MemoryStore`]. Refuses to connect while the store is offline.
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn from_config(config: &MemoryStoreConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new(config)))
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> CacheResult<Arc<dyn Store>> {
        if !self.store.is_available() {
            return Err(CacheError::Connection("memory store is offline".into()));
        }
        Ok(self.store.clone())
    }
}
