//! SQLite backend
//!
//! Schema:
//! - `kv_entries(key PRIMARY KEY, value BLOB, expires_at INTEGER NULL)`
//! - `kv_locks(key PRIMARY KEY, token TEXT, expires_at INTEGER)`
//!
//! Expiry columns hold unix epoch milliseconds. Lock acquisition runs inside an
//! IMMEDIATE transaction so two processes sharing the file cannot both insert.
//! Statements are sub-millisecond; they run inline under the connection mutex.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::{KeyValueStore, LockStore};
use crate::{Result, StorageError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv_entries (
    key        TEXT PRIMARY KEY NOT NULL,
    value      BLOB NOT NULL,
    expires_at INTEGER
);
CREATE TABLE IF NOT EXISTS kv_locks (
    key        TEXT PRIMARY KEY NOT NULL,
    token      TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> Result<i64> {
    i64::try_from(ttl.as_millis())
        .map_err(|_| StorageError::config(format!("TTL out of range: {:?}", ttl)))
}

/// Durable store over a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        // WAL lets readers proceed while a run persists its state
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("SQLite journal_mode={}", mode);
        info!("Opened SQLite store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Drop expired values and locks. Returns the number of rows removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_ms();
        let conn = self.conn.lock();
        let values = conn.execute(
            "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        let locks = conn.execute("DELETE FROM kv_locks WHERE expires_at <= ?1", params![now])?;
        Ok(values + locks)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM kv_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= now_ms() => {
                conn.execute(
                    "DELETE FROM kv_entries WHERE key = ?1 AND expires_at = ?2",
                    params![key, expires_at],
                )?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(now_ms() + ttl_ms(ttl)?),
            None => None,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM kv_entries WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, now_ms()],
        )?;
        // Expired leftovers go too, but do not count as a live delete
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(removed == 1)
    }
}

#[async_trait]
impl LockStore for SqliteStore {
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let expires_at = now + ttl_ms(ttl)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let purged = tx.execute(
            "DELETE FROM kv_locks WHERE key = ?1 AND expires_at <= ?2",
            params![key, now],
        )?;
        if purged > 0 {
            debug!("Lock {} expired, taking over", key);
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO kv_locks (key, token, expires_at) VALUES (?1, ?2, ?3)",
            params![key, token, expires_at],
        )?;
        tx.commit()?;

        Ok(inserted == 1)
    }

    async fn extend_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let expires_at = now + ttl_ms(ttl)?;

        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE kv_locks SET expires_at = ?3 WHERE key = ?1 AND token = ?2 AND expires_at > ?4",
            params![key, token, expires_at, now],
        )?;
        Ok(updated == 1)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM kv_locks WHERE key = ?1 AND token = ?2",
            params![key, token],
        )?;
        Ok(removed == 1)
    }
}
