//! tagstash - tag-aware caching over flat key-value stores.
//!
//! A key-value store gives you `get`, `set`, `append` and `remove` by key and
//! nothing else. This crate layers tags on top: every cache entry can carry
//! any number of tags, and entries can be listed or invalidated by tag with
//! AND, OR and NOT-OR semantics. The tag index lives in the same store as the
//! payloads, as append-only id lists, so it needs no locks and no
//! transactions from the backend beyond an atomic append.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagstash::{CacheDirectives, CacheStore, CleaningMode, Lifetime, MemoryStore};
//!
//! let cache = CacheStore::new(Arc::new(MemoryStore::new()), CacheDirectives::default());
//!
//! cache.save(b"<html>..", "page:home", &["pages", "nav"], Lifetime::Default)?;
//! cache.save(b"<html>..", "page:about", &["pages"], Lifetime::Seconds(60))?;
//!
//! // Both pages carry "pages"; only the home page carries "nav" too.
//! assert_eq!(cache.get_ids_matching_tags(&["pages", "nav"])?, vec!["page:home"]);
//!
//! // Drop everything tagged "nav".
//! cache.clean(CleaningMode::MatchingAnyTag, &["nav"])?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod lifetime;
pub mod store;

pub use cache::{CacheStore, Capabilities, CleaningMode, EntryMetadata};
pub use config::{CacheDirectives, ConnectionOptions, TagStashConfig};
pub use error::{Result, TagStashError};
pub use index::{CompactionReport, TagIndex};
pub use lifetime::{Lifetime, LifetimePolicy};
pub use store::{
    DefaultStoreFactory, KeyValueStore, Lookup, MemoryStore, MemoryStoreFactory, SqliteStore,
    SqliteStoreFactory, StoreFactory,
};
