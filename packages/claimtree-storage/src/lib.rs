//! Key-value and lock store for report pipeline jobs.
//!
//! Two contracts live here:
//!
//! 1. **KeyValueStore**: `get` / `set` (full overwrite, optional TTL) / `delete`
//!    over opaque byte blobs. The orchestration layer persists one serialized
//!    `PipelineState` per report through it.
//! 2. **LockStore**: `acquire_lock` / `extend_lock` / `release_lock` keyed by
//!    string and guarded by an opaque token. Two concurrent acquisitions of the
//!    same key never both succeed; an expired lock counts as free.
//!
//! ## Backends
//!
//! - `InMemoryStore`: `DashMap`-backed, expiry on the tokio clock.
//! - `SqliteStore` (feature `sqlite`, default): durable single-file store.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use claimtree_storage::{InMemoryStore, KeyValueStore, LockStore};
//! use std::time::Duration;
//!
//! let store = InMemoryStore::new();
//! store.set("pipeline_state:r1", b"{}".to_vec(), None).await?;
//!
//! assert!(store.acquire_lock("pipeline_lock:r1", "token-a", Duration::from_secs(60)).await?);
//! assert!(!store.acquire_lock("pipeline_lock:r1", "token-b", Duration::from_secs(60)).await?);
//! store.release_lock("pipeline_lock:r1", "token-a").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{KeyValueStore, LockStore};
pub use infrastructure::memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use infrastructure::sqlite::SqliteStore;
