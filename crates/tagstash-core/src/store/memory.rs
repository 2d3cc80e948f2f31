//! In-process key-value store.

use super::{expiry_deadline, is_expired, KeyValueStore, Lookup, StoreFactory};
use crate::config::ConnectionOptions;
use crate::error::{Result, TagStashError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    deadline: Option<i64>,
}

/// Key-value store held in a mutex-guarded map.
///
/// Every operation holds the lock for its whole duration, which is what makes
/// `append` atomic. Expired keys are dropped lazily when touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, expired or not.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredValue>>> {
        self.entries
            .lock()
            .map_err(|_| TagStashError::lock_poisoned("memory store"))
    }

    /// Live entry for `key`, evicting it first if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, StoredValue>,
        key: &str,
    ) -> Option<&'a mut StoredValue> {
        if entries
            .get(key)
            .is_some_and(|stored| is_expired(stored.deadline, Utc::now()))
        {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Lookup> {
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key)
            .map(|stored| stored.value.clone())
            .into())
    }

    fn set(&self, key: &str, value: &[u8], expiry: Option<u64>) -> Result<()> {
        let deadline = expiry.map(|e| expiry_deadline(e, Utc::now()));
        self.lock()?.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                deadline,
            },
        );
        Ok(())
    }

    fn append(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key) {
            Some(stored) => stored.value.extend_from_slice(value),
            None => {
                entries.insert(
                    key.to_string(),
                    StoredValue {
                        value: value.to_vec(),
                        deadline: None,
                    },
                );
            }
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock()?;
        let existed = Self::live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    fn remove_many(&self, keys: &[String]) -> Result<usize> {
        let mut entries = self.lock()?;
        let mut removed = 0;
        for key in keys {
            if Self::live(&mut entries, key).is_some() {
                entries.remove(key.as_str());
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn touch(&self, key: &str, expiry: u64) -> Result<bool> {
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key) {
            Some(stored) => {
                stored.deadline = Some(expiry_deadline(expiry, Utc::now()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn flush_all(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

/// Hands out one shared [`MemoryStore`] per bucket name.
#[derive(Debug, Default)]
pub struct MemoryStoreFactory {
    buckets: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl StoreFactory for MemoryStoreFactory {
    fn open(&self, options: &ConnectionOptions) -> Result<Arc<dyn KeyValueStore>> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| TagStashError::lock_poisoned("memory bucket registry"))?;
        let store = buckets
            .entry(options.bucket_name.clone())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone();
        Ok(store)
    }
}
