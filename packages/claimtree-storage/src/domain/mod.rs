//! Storage ports
//!
//! # Contracts
//!
//! - `KeyValueStore`: blob get/set/delete. `set` always overwrites the whole
//!   value, so readers observe either the previous blob or the new one, never a
//!   mix.
//! - `LockStore`: token-guarded mutual exclusion with TTL.
//!
//! Keys are plain strings; callers namespace them (`pipeline_state:{id}`,
//! `pipeline_lock:{id}`). Operations on distinct keys never interfere.

use async_trait::async_trait;
use std::time::Duration;

use crate::Result;

/// Blob store with optional per-key expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value; expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite `key` with `value`. `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Token-guarded lock primitive.
///
/// # Guarantees
///
/// - `acquire_lock` succeeds for at most one caller while the lock is live.
/// - `extend_lock` / `release_lock` only succeed for the current holder's token.
/// - A lock whose TTL elapsed is free again (crash recovery).
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lock if nobody holds it. `false` if held by a live token.
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Push the expiry out to `now + ttl`. `false` if `token` is not the holder
    /// or the lock already expired.
    async fn extend_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lock. `false` on token mismatch or if nothing is held.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool>;
}
