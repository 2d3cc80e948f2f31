//! Tag-aware cache over a [`KeyValueStore`].
//!
//! [`CacheStore`] is the contract a host caching framework talks to. Payload
//! reads and writes go straight to the store; everything involving tags goes
//! through the [`TagIndex`] kept in the same store.
//!
//! Removing an entry deletes its payload only. Its id stays in every tag
//! list it was added to until [`CacheStore::compact`] runs, so id lists
//! returned here may name entries that no longer exist.

use crate::config::{CacheDirectives, ConnectionOptions};
use crate::error::{Result, TagStashError};
use crate::index::{dedup_preserving_order, validate_entry, validate_id, CompactionReport, TagIndex};
use crate::lifetime::{Lifetime, LifetimePolicy};
use crate::store::{KeyValueStore, Lookup, StoreFactory};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which entries [`CacheStore::clean`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningMode {
    /// Every key in the store, index included.
    #[default]
    All,
    /// Expired entries. Unsupported: the store owns expiry.
    Old,
    /// Entries carrying all of the given tags.
    MatchingTag,
    /// Entries carrying none of the given tags.
    NotMatchingTag,
    /// Entries carrying at least one of the given tags.
    MatchingAnyTag,
}

impl CleaningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleaningMode::All => "all",
            CleaningMode::Old => "old",
            CleaningMode::MatchingTag => "matching_tag",
            CleaningMode::NotMatchingTag => "not_matching_tag",
            CleaningMode::MatchingAnyTag => "matching_any_tag",
        }
    }
}

impl FromStr for CleaningMode {
    type Err = TagStashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "all" => Ok(CleaningMode::All),
            "old" => Ok(CleaningMode::Old),
            "matching_tag" => Ok(CleaningMode::MatchingTag),
            "not_matching_tag" => Ok(CleaningMode::NotMatchingTag),
            "matching_any_tag" => Ok(CleaningMode::MatchingAnyTag),
            _ => Err(TagStashError::InvalidCleaningMode(s.to_string())),
        }
    }
}

impl fmt::Display for CleaningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What this cache can do, in the host framework's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether the host must schedule cleaning itself.
    pub automatic_cleaning: bool,
    pub tags: bool,
    /// Whether expired entries can still be read.
    pub expired_read: bool,
    pub priority: bool,
    pub infinite_lifetime: bool,
    /// Whether ids and tags can be listed.
    pub get_list: bool,
}

/// Per-entry metadata shape of the host contract.
///
/// [`CacheStore::get_metadatas`] never produces one: entries carry no
/// metadata besides the expiry, and the store does not expose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub expire: Option<i64>,
    pub tags: Vec<String>,
    pub mtime: i64,
}

/// Tag-aware cache.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    index: TagIndex,
    policy: LifetimePolicy,
    directives: CacheDirectives,
}

impl CacheStore {
    /// Static capability descriptor.
    pub const CAPABILITIES: Capabilities = Capabilities {
        automatic_cleaning: false,
        tags: true,
        expired_read: false,
        priority: false,
        infinite_lifetime: true,
        get_list: true,
    };

    pub fn new(store: Arc<dyn KeyValueStore>, directives: CacheDirectives) -> Self {
        Self {
            index: TagIndex::new(store.clone()),
            policy: LifetimePolicy::new(directives.default_lifetime),
            store,
            directives,
        }
    }

    /// Open the store described by `options` through `factory`.
    pub fn open(
        factory: &dyn StoreFactory,
        options: &ConnectionOptions,
        directives: CacheDirectives,
    ) -> Result<Self> {
        let store = factory.open(options)?;
        debug!(
            "Opened cache bucket '{}' at {}",
            options.bucket_name, options.dsn
        );
        Ok(Self::new(store, directives))
    }

    pub fn directives(&self) -> &CacheDirectives {
        &self.directives
    }

    pub fn index(&self) -> &TagIndex {
        &self.index
    }

    /// Read an entry's payload.
    ///
    /// Expiry is the store's business; whatever it returns is returned.
    /// Ids in the reserved index namespace are rejected.
    pub fn load(&self, id: &str) -> Result<Lookup> {
        validate_id(id)?;
        self.store.get(id)
    }

    /// Whether an entry currently exists.
    pub fn test(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        self.store.contains(id)
    }

    /// Write a payload and record it under `tags`.
    ///
    /// Ids and tags are validated before any write. The payload write and
    /// the index appends are separate store operations: if one of the
    /// appends fails the payload stays, indexed under the tags done so far.
    pub fn save<S: AsRef<str>>(
        &self,
        payload: &[u8],
        id: &str,
        tags: &[S],
        lifetime: Lifetime,
    ) -> Result<()> {
        validate_entry(id, tags)?;

        let expiry = self.policy.resolve(lifetime);
        self.store.set(id, payload, expiry)?;
        self.index.record(id, tags)?;

        if self.directives.logging {
            info!("Saved {} ({} bytes, {} tags, expiry {:?})", id, payload.len(), tags.len(), expiry);
        } else {
            debug!("Saved {} ({} bytes, {} tags, expiry {:?})", id, payload.len(), tags.len(), expiry);
        }
        Ok(())
    }

    /// Delete an entry's payload. Returns `false` if it did not exist.
    ///
    /// The id is left in the tag index.
    pub fn remove(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let removed = self.store.remove(id)?;
        if self.directives.logging {
            info!("Removed {} (existed: {})", id, removed);
        } else {
            debug!("Removed {} (existed: {})", id, removed);
        }
        Ok(removed)
    }

    /// Remove entries selected by `mode` and `tags`.
    ///
    /// Returns how many payloads were removed, or for [`CleaningMode::All`]
    /// how many keys were flushed. Index lists are not touched except by
    /// `All`, which empties the whole store.
    pub fn clean<S: AsRef<str>>(&self, mode: CleaningMode, tags: &[S]) -> Result<usize> {
        let ids = match mode {
            CleaningMode::All => {
                let flushed = self.store.flush_all()?;
                info!("Flushed {} keys", flushed);
                return Ok(flushed);
            }
            CleaningMode::Old => {
                return Err(TagStashError::NotImplemented {
                    operation: "clean(old)",
                })
            }
            CleaningMode::MatchingTag => self.get_ids_matching_tags(tags)?,
            CleaningMode::NotMatchingTag => {
                if tags.is_empty() {
                    warn!("clean(not_matching_tag) without tags removes every indexed entry");
                }
                self.get_ids_not_matching_tags(tags)?
            }
            CleaningMode::MatchingAnyTag => self.get_ids_matching_any_tags(tags)?,
        };

        let removed = self.store.remove_many(&ids)?;
        info!(
            "Cleaned {} of {} candidate entries ({}, {} tags)",
            removed,
            ids.len(),
            mode,
            tags.len()
        );
        Ok(removed)
    }

    /// Every id ever saved, once each.
    pub fn get_ids(&self) -> Result<Vec<String>> {
        Ok(dedup_preserving_order(self.index.all_ids()?))
    }

    /// Every tag ever used, once each.
    pub fn get_tags(&self) -> Result<Vec<String>> {
        Ok(dedup_preserving_order(self.index.known_tags()?))
    }

    /// Ids carrying all of `tags` (AND).
    pub fn get_ids_matching_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        self.index.ids_for_all_tags(tags)
    }

    /// Ids carrying none of `tags`.
    pub fn get_ids_not_matching_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        self.index.ids_not_matching_any_tag(tags)
    }

    /// Ids carrying at least one of `tags` (OR), once each.
    pub fn get_ids_matching_any_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        Ok(dedup_preserving_order(self.index.ids_for_any_tag(tags)?))
    }

    /// Give a live entry a new expiry `extra_lifetime` seconds from now.
    ///
    /// Returns `false` if the entry does not exist.
    pub fn touch(&self, id: &str, extra_lifetime: u64) -> Result<bool> {
        validate_id(id)?;
        let expiry = LifetimePolicy::expiry_after(extra_lifetime, Utc::now());
        let touched = self.store.touch(id, expiry)?;
        debug!("Touched {} until {} (existed: {})", id, expiry, touched);
        Ok(touched)
    }

    pub fn capabilities(&self) -> Capabilities {
        Self::CAPABILITIES
    }

    /// Always fails: the store keeps no per-entry metadata.
    pub fn get_metadatas(&self, _id: &str) -> Result<EntryMetadata> {
        Err(TagStashError::NotImplemented {
            operation: "get_metadatas",
        })
    }

    /// Always fails: the store does not report its capacity.
    pub fn get_filling_percentage(&self) -> Result<u8> {
        Err(TagStashError::NotImplemented {
            operation: "get_filling_percentage",
        })
    }

    /// Prune removed and expired ids from the tag index.
    pub fn compact(&self) -> Result<CompactionReport> {
        self.index.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MemoryStoreFactory};

    const NO_TAGS: &[&str] = &[];

    fn cache() -> CacheStore {
        CacheStore::new(Arc::new(MemoryStore::new()), CacheDirectives::default())
    }

    #[test]
    fn test_cleaning_mode_parse() {
        assert_eq!("all".parse::<CleaningMode>().unwrap(), CleaningMode::All);
        assert_eq!(
            "matching-any-tag".parse::<CleaningMode>().unwrap(),
            CleaningMode::MatchingAnyTag
        );
        assert_eq!(
            "NOT_MATCHING_TAG".parse::<CleaningMode>().unwrap(),
            CleaningMode::NotMatchingTag
        );
        assert!(matches!(
            "sometimes".parse::<CleaningMode>(),
            Err(TagStashError::InvalidCleaningMode(_))
        ));
        assert_eq!(CleaningMode::MatchingTag.to_string(), "matching_tag");
    }

    #[test]
    fn test_save_and_load() {
        let cache = cache();
        cache.save(b"v1", "k1", &["a"], Lifetime::Default).unwrap();
        cache.save(b"", "empty", NO_TAGS, Lifetime::Infinite).unwrap();

        assert_eq!(cache.load("k1").unwrap(), Lookup::Found(b"v1".to_vec()));
        assert_eq!(cache.load("empty").unwrap(), Lookup::Found(Vec::new()));
        assert_eq!(cache.load("missing").unwrap(), Lookup::NotFound);
        assert!(cache.test("k1").unwrap());
        assert!(!cache.test("missing").unwrap());
    }

    #[test]
    fn test_zero_lifetime_is_born_expired() {
        let cache = cache();
        cache.save(b"v", "k", NO_TAGS, Lifetime::Seconds(0)).unwrap();
        assert_eq!(cache.load("k").unwrap(), Lookup::NotFound);
    }

    #[test]
    fn test_invalid_tag_writes_nothing() {
        let cache = cache();
        let err = cache
            .save(b"v", "k", &["fine", "not fine"], Lifetime::Default)
            .unwrap_err();
        assert!(matches!(err, TagStashError::InvalidToken { .. }));
        assert_eq!(cache.load("k").unwrap(), Lookup::NotFound);
        assert!(cache.get_ids().unwrap().is_empty());
    }

    #[test]
    fn test_index_keys_are_not_entry_ids() {
        let cache = cache();
        cache.save(b"v1", "k1", &["a"], Lifetime::Default).unwrap();

        for key in ["__ids", "__tags", "__tag:a"] {
            assert!(matches!(cache.load(key), Err(TagStashError::InvalidToken { .. })));
            assert!(matches!(cache.test(key), Err(TagStashError::InvalidToken { .. })));
            assert!(matches!(cache.remove(key), Err(TagStashError::InvalidToken { .. })));
            assert!(matches!(cache.touch(key, 0), Err(TagStashError::InvalidToken { .. })));
        }

        assert_eq!(cache.get_ids_matching_tags(&["a"]).unwrap(), vec!["k1"]);
        assert_eq!(cache.get_ids().unwrap(), vec!["k1"]);
        assert_eq!(cache.get_tags().unwrap(), vec!["a"]);
        assert_eq!(cache.load("k1").unwrap(), Lookup::Found(b"v1".to_vec()));
    }

    #[test]
    fn test_unsupported_operations_fail_loudly() {
        let cache = cache();
        assert!(cache.clean(CleaningMode::Old, NO_TAGS).unwrap_err().is_not_implemented());
        assert!(cache.get_metadatas("k").unwrap_err().is_not_implemented());
        assert!(cache.get_filling_percentage().unwrap_err().is_not_implemented());
    }

    #[test]
    fn test_touch() {
        let cache = cache();
        cache.save(b"v", "k", NO_TAGS, Lifetime::Seconds(0)).unwrap();
        assert!(!cache.touch("k", 60).unwrap());

        cache.save(b"v", "k", NO_TAGS, Lifetime::Seconds(5)).unwrap();
        assert!(cache.touch("k", 3600).unwrap());
        assert!(cache.test("k").unwrap());
    }

    #[test]
    fn test_capabilities() {
        let caps = cache().capabilities();
        assert!(caps.tags);
        assert!(caps.get_list);
        assert!(caps.infinite_lifetime);
        assert!(!caps.automatic_cleaning);
        assert!(!caps.expired_read);
        assert!(!caps.priority);
    }

    #[test]
    fn test_open_through_factory() {
        let factory = MemoryStoreFactory::default();
        let options = ConnectionOptions {
            dsn: "memory://".into(),
            bucket_name: "shared".into(),
        };

        let writer = CacheStore::open(&factory, &options, CacheDirectives::default()).unwrap();
        writer.save(b"v", "k", &["t"], Lifetime::Default).unwrap();

        let reader = CacheStore::open(&factory, &options, CacheDirectives::default()).unwrap();
        assert_eq!(reader.get_ids_matching_tags(&["t"]).unwrap(), vec!["k"]);
    }
}
