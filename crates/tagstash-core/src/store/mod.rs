//! Key-value store boundary.
//!
//! The cache and its tag index only ever see a [`KeyValueStore`]: flat string
//! keys, opaque byte values, per-key atomic append, and a single expiry field
//! per key. Two implementations ship with the crate:
//! - [`MemoryStore`] for in-process use and tests
//! - [`SqliteStore`] for a file-backed store shared between processes
//!
//! Stores are opened through a [`StoreFactory`] so callers can swap the
//! backend without touching the cache.

mod memory;
mod sqlite;

pub use memory::{MemoryStore, MemoryStoreFactory};
pub use sqlite::{SqliteStore, SqliteStoreFactory};

use crate::config::ConnectionOptions;
use crate::error::{Result, TagStashError};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Expiry fields up to this many seconds (30 days) are relative to now;
/// anything larger is an absolute Unix timestamp.
pub const RELATIVE_EXPIRY_LIMIT_SECS: u64 = 30 * 24 * 60 * 60;

/// Result of reading a key.
///
/// A found empty value is `Found(vec![])`, never `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Vec<u8>),
    NotFound,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

impl From<Option<Vec<u8>>> for Lookup {
    fn from(value: Option<Vec<u8>>) -> Self {
        value.map_or(Lookup::NotFound, Lookup::Found)
    }
}

/// Convert a store expiry field into the Unix timestamp at which the key dies.
pub fn expiry_deadline(expiry: u64, now: DateTime<Utc>) -> i64 {
    if expiry <= RELATIVE_EXPIRY_LIMIT_SECS {
        now.timestamp().saturating_add(expiry as i64)
    } else {
        i64::try_from(expiry).unwrap_or(i64::MAX)
    }
}

/// Whether a key with the given deadline is expired at `now`.
pub(crate) fn is_expired(deadline: Option<i64>, now: DateTime<Utc>) -> bool {
    deadline.is_some_and(|d| d <= now.timestamp())
}

/// Flat key-value store with per-key atomic append.
///
/// Implementations must be thread-safe. Only `append` carries an atomicity
/// requirement: concurrent appends to one key must all survive.
pub trait KeyValueStore: Send + Sync {
    /// Read a key. Expired keys read as [`Lookup::NotFound`].
    fn get(&self, key: &str) -> Result<Lookup>;

    /// Write a key, replacing any previous value and expiry.
    ///
    /// `expiry` follows the [`RELATIVE_EXPIRY_LIMIT_SECS`] convention;
    /// `None` means the key never expires.
    fn set(&self, key: &str, value: &[u8], expiry: Option<u64>) -> Result<()>;

    /// Append to a key, creating it without expiry if absent or expired.
    fn append(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a key. Returns `false` if it did not exist.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Delete several keys, returning how many existed.
    fn remove_many(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Replace the expiry of a live key. Returns `false` if it did not exist.
    fn touch(&self, key: &str, expiry: u64) -> Result<bool>;

    /// Delete every key in the store, returning how many were dropped.
    fn flush_all(&self) -> Result<usize>;

    /// Check whether a live value exists for a key.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_found())
    }
}

/// Opens a [`KeyValueStore`] from connection parameters.
pub trait StoreFactory: Send + Sync {
    fn open(&self, options: &ConnectionOptions) -> Result<Arc<dyn KeyValueStore>>;
}

/// Factory that picks a backend from the dsn scheme (`sqlite://`, `memory://`).
#[derive(Debug, Default)]
pub struct DefaultStoreFactory {
    memory: MemoryStoreFactory,
}

impl StoreFactory for DefaultStoreFactory {
    fn open(&self, options: &ConnectionOptions) -> Result<Arc<dyn KeyValueStore>> {
        match options.scheme()?.0 {
            "sqlite" => SqliteStoreFactory.open(options),
            "memory" => self.memory.open(options),
            other => Err(TagStashError::Config {
                message: format!("unsupported store scheme: {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_expiry_deadline_relative_and_absolute() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        assert_eq!(expiry_deadline(60, now), 1_700_000_060);
        assert_eq!(
            expiry_deadline(RELATIVE_EXPIRY_LIMIT_SECS, now),
            1_700_000_000 + RELATIVE_EXPIRY_LIMIT_SECS as i64
        );
        // One past the limit is read as an absolute timestamp in early 1970.
        assert_eq!(
            expiry_deadline(RELATIVE_EXPIRY_LIMIT_SECS + 1, now),
            RELATIVE_EXPIRY_LIMIT_SECS as i64 + 1
        );
        assert_eq!(expiry_deadline(1_700_000_900, now), 1_700_000_900);
        assert_eq!(expiry_deadline(u64::MAX, now), i64::MAX);
    }

    #[test]
    fn test_is_expired() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(!is_expired(None, now));
        assert!(is_expired(Some(1_700_000_000), now));
        assert!(!is_expired(Some(1_700_000_001), now));
    }

    #[test]
    fn test_lookup_distinguishes_empty_value() {
        let empty = Lookup::Found(Vec::new());
        assert!(empty.is_found());
        assert_eq!(empty.as_bytes(), Some(&[][..]));
        assert_ne!(empty, Lookup::NotFound);
        assert_eq!(Lookup::from(None), Lookup::NotFound);
    }

    #[test]
    fn test_default_factory_rejects_unknown_scheme() {
        let options = ConnectionOptions {
            dsn: "couchbase://127.0.0.1".into(),
            ..Default::default()
        };
        let err = DefaultStoreFactory::default().open(&options).err().unwrap();
        assert!(matches!(err, TagStashError::Config { .. }));
    }
}
