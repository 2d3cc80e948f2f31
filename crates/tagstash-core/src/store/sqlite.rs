//! SQLite-backed key-value store.

use super::{expiry_deadline, KeyValueStore, Lookup, StoreFactory};
use crate::config::ConnectionOptions;
use crate::error::{Result, TagStashError};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// SQLite-based key-value store.
///
/// One table holds every key, payloads and index blobs alike. Several
/// processes may open the same file; writers are serialized by SQLite and
/// `append` runs in an IMMEDIATE transaction so no appended bytes are lost.
pub struct SqliteStore {
    /// Database connection (wrapped for thread safety).
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// How long a writer waits for another connection's lock before failing.
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open (or create) a store at the specified database path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| TagStashError::Io {
                message: format!("Failed to create store directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| TagStashError::Database {
            message: format!("Failed to open store database: {}", e),
            source: Some(e),
        })?;

        // Set before anything else so concurrent openers wait instead of failing
        conn.busy_timeout(Self::BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| TagStashError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path.to_path_buf(),
        };

        store.init_schema()?;
        debug!("Opened SQLite store at {}", store.path.display());

        Ok(store)
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TagStashError::lock_poisoned("sqlite connection"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                -- Unix timestamp after which the key is dead; NULL = never
                expires_at INTEGER,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| TagStashError::Database {
            message: format!("Failed to initialize store schema: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Lookup> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp();

        let value: Option<Vec<u8>> = conn
            .query_row(
                r#"
                SELECT value FROM kv_entries
                WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                "#,
                params![key, now],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TagStashError::Database {
                message: format!("Failed to read key {}: {}", key, e),
                source: Some(e),
            })?;

        Ok(value.into())
    }

    fn set(&self, key: &str, value: &[u8], expiry: Option<u64>) -> Result<()> {
        let conn = self.conn()?;
        let now = Utc::now();
        let deadline = expiry.map(|e| expiry_deadline(e, now));

        conn.execute(
            r#"
            INSERT OR REPLACE INTO kv_entries (key, value, expires_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![key, value, deadline, now.to_rfc3339()],
        )
        .map_err(|e| TagStashError::Database {
            message: format!("Failed to write key {}: {}", key, e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn append(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn()?;
        let now = Utc::now();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<Vec<u8>> = tx
            .query_row(
                r#"
                SELECT value FROM kv_entries
                WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                "#,
                params![key, now.timestamp()],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            Some(mut existing) => {
                existing.extend_from_slice(value);
                tx.execute(
                    "UPDATE kv_entries SET value = ?1, updated_at = ?2 WHERE key = ?3",
                    params![existing, now.to_rfc3339(), key],
                )?;
            }
            None => {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO kv_entries (key, value, expires_at, updated_at)
                    VALUES (?1, ?2, NULL, ?3)
                    "#,
                    params![key, value, now.to_rfc3339()],
                )?;
            }
        }

        tx.commit().map_err(|e| TagStashError::Database {
            message: format!("Failed to append to key {}: {}", key, e),
            source: Some(e),
        })
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now().timestamp();

        let deleted = conn
            .execute(
                r#"
                DELETE FROM kv_entries
                WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                "#,
                params![key, now],
            )
            .map_err(|e| TagStashError::Database {
                message: format!("Failed to remove key {}: {}", key, e),
                source: Some(e),
            })?;

        if deleted == 0 {
            // Drop an expired leftover, if any.
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        }

        Ok(deleted > 0)
    }

    fn remove_many(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let now = Utc::now().timestamp();
        let tx = conn.transaction()?;
        let mut removed = 0;

        {
            let mut live = tx.prepare(
                r#"
                DELETE FROM kv_entries
                WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                "#,
            )?;
            let mut any = tx.prepare("DELETE FROM kv_entries WHERE key = ?1")?;

            for key in keys {
                let deleted = live.execute(params![key, now])?;
                if deleted == 0 {
                    any.execute(params![key])?;
                }
                removed += deleted;
            }
        }

        tx.commit().map_err(|e| TagStashError::Database {
            message: format!("Failed to remove {} keys: {}", keys.len(), e),
            source: Some(e),
        })?;

        debug!("Removed {} of {} keys", removed, keys.len());
        Ok(removed)
    }

    fn touch(&self, key: &str, expiry: u64) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now();

        let updated = conn
            .execute(
                r#"
                UPDATE kv_entries SET expires_at = ?1, updated_at = ?2
                WHERE key = ?3 AND (expires_at IS NULL OR expires_at > ?4)
                "#,
                params![
                    expiry_deadline(expiry, now),
                    now.to_rfc3339(),
                    key,
                    now.timestamp()
                ],
            )
            .map_err(|e| TagStashError::Database {
                message: format!("Failed to touch key {}: {}", key, e),
                source: Some(e),
            })?;

        Ok(updated > 0)
    }

    fn flush_all(&self) -> Result<usize> {
        let conn = self.conn()?;

        let deleted = conn
            .execute("DELETE FROM kv_entries", [])
            .map_err(|e| TagStashError::Database {
                message: format!("Failed to flush store: {}", e),
                source: Some(e),
            })?;

        debug!("Flushed {} keys from {}", deleted, self.path.display());
        Ok(deleted)
    }
}

/// Opens `<dir>/<bucket>.sqlite` for a dsn of the form `sqlite://<dir>`.
///
/// The bucket file is created on first open.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteStoreFactory;

impl SqliteStoreFactory {
    /// Database file a set of options points at.
    pub fn database_path(options: &ConnectionOptions) -> Result<PathBuf> {
        let (scheme, location) = options.scheme()?;
        if scheme != "sqlite" {
            return Err(TagStashError::Config {
                message: format!("expected a sqlite:// dsn, got {}", options.dsn),
            });
        }

        let bucket = options.bucket_name.as_str();
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(TagStashError::Config {
                message: format!("invalid bucket name: {:?}", bucket),
            });
        }

        let dir = if location.is_empty() { "." } else { location };
        Ok(Path::new(dir).join(format!("{}.sqlite", bucket)))
    }
}

impl StoreFactory for SqliteStoreFactory {
    fn open(&self, options: &ConnectionOptions) -> Result<Arc<dyn KeyValueStore>> {
        let path = Self::database_path(options)?;
        Ok(Arc::new(SqliteStore::open(path)?))
    }
}
