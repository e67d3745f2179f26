//! In-memory backend
//!
//! `DashMap` shards give per-key atomicity: the entry API holds the shard
//! write lock for the whole check-and-insert, which is what makes
//! `acquire_lock` exclusive. Expiry is measured with `tokio::time::Instant`,
//! so a paused test clock controls TTLs.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{KeyValueStore, LockStore};
use crate::Result;

#[derive(Debug, Clone)]
struct ValueEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local store. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, ValueEntry>,
    locks: DashMap<String, LockEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) values.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired values and locks. Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len() + self.locks.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.locks.retain(|_, lock| lock.is_live(now));
        before - (self.entries.len() + self.locks.len())
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), ValueEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }
}

#[async_trait]
impl LockStore for InMemoryStore {
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let fresh = LockEntry {
            token: token.to_string(),
            expires_at: now + ttl,
        };

        let acquired = match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    debug!("Lock {} expired, taking over", key);
                    occupied.insert(fresh);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };

        Ok(acquired)
    }

    async fn extend_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.locks.get_mut(key) {
            Some(mut lock) if lock.token == token && lock.is_live(now) => {
                lock.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let released = self
            .locks
            .remove_if(key, |_, lock| lock.token == token)
            .is_some();

        // Locks of crashed holders are never released by them
        let now = Instant::now();
        self.locks.retain(|_, lock| lock.is_live(now));
        Ok(released)
    }
}
