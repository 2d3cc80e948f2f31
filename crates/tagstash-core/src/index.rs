//! Inverted tag index stored inside the key-value store.
//!
//! Each tag owns one blob under `__tag:<tag>` holding the ids tagged with it,
//! each followed by [`DELIMITER`]. Two catalogs sit beside them: `__ids`
//! lists every id ever tagged and `__tags` every tag name ever used.
//!
//! Blobs only grow, through the store's atomic append, so concurrent writers
//! never lose each other's ids and readers never block. The cost is that
//! lists keep duplicates and ids whose payload is gone; readers tolerate both
//! and [`TagIndex::compact`] prunes them on demand.
//!
//! Queries materialize the lists and do set arithmetic client side, so the
//! largest tag is bounded by the largest value the store accepts.

use crate::error::{Result, TagStashError};
use crate::store::{KeyValueStore, Lookup};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Separator written after every token in an index blob.
pub const DELIMITER: char = ' ';

/// Prefix reserved for index keys; entry ids may not start with it.
pub const RESERVED_PREFIX: &str = "__";

/// Catalog of every id ever tagged.
pub const ALL_IDS_KEY: &str = "__ids";

/// Catalog of every tag name ever used.
pub const KNOWN_TAGS_KEY: &str = "__tags";

const TAG_KEY_PREFIX: &str = "__tag:";

/// Store key holding the member list of `tag`.
pub fn tag_key(tag: &str) -> String {
    format!("{}{}", TAG_KEY_PREFIX, tag)
}

/// Check that `id` can be stored as a payload key and an index token.
pub fn validate_id(id: &str) -> Result<()> {
    validate_token("id", id)?;
    if id.starts_with(RESERVED_PREFIX) {
        return Err(TagStashError::InvalidToken {
            field: "id",
            value: id.to_string(),
            reason: "starts with the reserved prefix __",
        });
    }
    Ok(())
}

/// Check that `tag` can be stored as an index token.
pub fn validate_tag(tag: &str) -> Result<()> {
    validate_token("tag", tag)
}

fn validate_token(field: &'static str, value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains(DELIMITER) {
        "contains the list delimiter"
    } else {
        return Ok(());
    };
    Err(TagStashError::InvalidToken {
        field,
        value: value.to_string(),
        reason,
    })
}

/// Check an id and all of its tags, so nothing is written for a bad entry.
pub fn validate_entry<S: AsRef<str>>(id: &str, tags: &[S]) -> Result<()> {
    validate_id(id)?;
    for tag in tags {
        validate_tag(tag.as_ref())?;
    }
    Ok(())
}

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn token(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(DELIMITER as u8);
    bytes
}

fn encode<S: AsRef<str>>(values: &[S]) -> Vec<u8> {
    values.iter().flat_map(|v| token(v.as_ref())).collect()
}

/// Outcome of a [`TagIndex::compact`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Tags whose member lists were examined.
    pub tags_scanned: usize,
    /// Tags left with no live member and removed from the catalog.
    pub tags_dropped: usize,
    /// Member tokens removed across all lists, duplicates included.
    pub tokens_dropped: usize,
    /// Distinct ids still live after compaction.
    pub live_ids: usize,
}

/// Tag index over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct TagIndex {
    store: Arc<dyn KeyValueStore>,
}

impl TagIndex {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Record `id` under every tag in `tags` and in the all-ids catalog.
    ///
    /// Every token is validated before the first write. Each append is
    /// atomic on its own; a failure partway leaves earlier appends in place.
    /// Tagging the same id twice stores it twice.
    pub fn tag<S: AsRef<str>>(&self, id: &str, tags: &[S]) -> Result<()> {
        validate_entry(id, tags)?;
        self.record(id, tags)
    }

    /// Append already validated tokens. Callers run [`validate_entry`] first.
    pub(crate) fn record<S: AsRef<str>>(&self, id: &str, tags: &[S]) -> Result<()> {
        let id_token = token(id);
        self.store.append(ALL_IDS_KEY, &id_token)?;
        for tag in tags {
            let tag = tag.as_ref();
            self.store.append(&tag_key(tag), &id_token)?;
            self.store.append(KNOWN_TAGS_KEY, &token(tag))?;
        }

        debug!("Tagged {} with {} tags", id, tags.len());
        Ok(())
    }

    /// Raw member list of one tag, duplicates and stale ids included.
    pub fn members(&self, tag: &str) -> Result<Vec<String>> {
        self.read_list(&tag_key(tag))
    }

    /// Every id ever tagged, in append order, duplicates included.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        self.read_list(ALL_IDS_KEY)
    }

    /// Every tag name ever used, in append order, duplicates included.
    pub fn known_tags(&self) -> Result<Vec<String>> {
        self.read_list(KNOWN_TAGS_KEY)
    }

    /// Ids carrying at least one of `tags` (logical OR).
    ///
    /// The member lists are concatenated in input order without
    /// deduplication; callers wanting a set dedup the result.
    pub fn ids_for_any_tag<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for tag in tags {
            ids.extend(self.members(tag.as_ref())?);
        }
        Ok(ids)
    }

    /// Ids carrying every one of `tags` (logical AND).
    ///
    /// No tags yields no ids. The result is deduplicated and keeps the order
    /// of the first tag's list.
    pub fn ids_for_all_tags<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        let Some((first, rest)) = tags.split_first() else {
            return Ok(Vec::new());
        };

        let mut ids = dedup_preserving_order(self.members(first.as_ref())?);
        for tag in rest {
            if ids.is_empty() {
                break;
            }
            let members: HashSet<String> = self.members(tag.as_ref())?.into_iter().collect();
            ids.retain(|id| members.contains(id));
        }
        Ok(ids)
    }

    /// Ids carrying none of `tags` (NOT OR): all ids minus [`Self::ids_for_any_tag`].
    ///
    /// The result is deduplicated and keeps the order of the all-ids catalog.
    pub fn ids_not_matching_any_tag<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<String>> {
        let excluded: HashSet<String> = self.ids_for_any_tag(tags)?.into_iter().collect();
        let mut ids = dedup_preserving_order(self.all_ids()?);
        ids.retain(|id| !excluded.contains(id));
        Ok(ids)
    }

    /// Rewrite every list keeping only ids whose payload still exists.
    ///
    /// Lists come back deduplicated; tags left empty lose their blob and
    /// their catalog entry. This is a maintenance pass, not a hot path
    /// operation: ids appended while it runs may be overwritten, so run it
    /// when writers are quiet.
    pub fn compact(&self) -> Result<CompactionReport> {
        let mut report = CompactionReport::default();
        let mut liveness: HashMap<String, bool> = HashMap::new();

        let tags = dedup_preserving_order(self.known_tags()?);
        let mut kept_tags = Vec::with_capacity(tags.len());

        for tag in tags {
            report.tags_scanned += 1;
            let key = tag_key(&tag);
            let (kept, dropped) = self.prune_list(&key, &mut liveness)?;
            report.tokens_dropped += dropped;
            if kept.is_empty() {
                report.tags_dropped += 1;
            } else {
                kept_tags.push(tag);
            }
        }

        let (live_ids, dropped) = self.prune_list(ALL_IDS_KEY, &mut liveness)?;
        report.tokens_dropped += dropped;
        report.live_ids = live_ids.len();

        self.rewrite(KNOWN_TAGS_KEY, &kept_tags)?;

        info!(
            "Compacted tag index: {} tags scanned, {} dropped, {} tokens removed",
            report.tags_scanned, report.tags_dropped, report.tokens_dropped
        );
        Ok(report)
    }

    /// Filter one list down to live, unique ids and write it back.
    fn prune_list(
        &self,
        key: &str,
        liveness: &mut HashMap<String, bool>,
    ) -> Result<(Vec<String>, usize)> {
        let members = self.read_list(key)?;
        let total = members.len();

        let mut kept = Vec::new();
        for id in dedup_preserving_order(members) {
            let live = match liveness.get(&id) {
                Some(live) => *live,
                None => {
                    let live = self.store.contains(&id)?;
                    liveness.insert(id.clone(), live);
                    live
                }
            };
            if live {
                kept.push(id);
            }
        }

        if kept.len() != total {
            self.rewrite(key, &kept)?;
        }
        let dropped = total - kept.len();
        Ok((kept, dropped))
    }

    fn rewrite(&self, key: &str, values: &[String]) -> Result<()> {
        if values.is_empty() {
            self.store.remove(key)?;
        } else {
            self.store.set(key, &encode(values), None)?;
        }
        Ok(())
    }

    fn read_list(&self, key: &str) -> Result<Vec<String>> {
        let bytes = match self.store.get(key)? {
            Lookup::Found(bytes) => bytes,
            Lookup::NotFound => return Ok(Vec::new()),
        };
        let text = String::from_utf8(bytes).map_err(|e| TagStashError::CorruptIndex {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(text
            .split(DELIMITER)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NO_TAGS: &[&str] = &[];

    fn index() -> (Arc<MemoryStore>, TagIndex) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), TagIndex::new(store))
    }

    #[test]
    fn test_tag_writes_wire_format() {
        let (store, index) = index();
        index.tag("k1", &["a", "b"]).unwrap();
        index.tag("k2", &["b"]).unwrap();

        assert_eq!(
            store.get(&tag_key("b")).unwrap(),
            Lookup::Found(b"k1 k2 ".to_vec())
        );
        assert_eq!(
            store.get(ALL_IDS_KEY).unwrap(),
            Lookup::Found(b"k1 k2 ".to_vec())
        );
        assert_eq!(
            store.get(KNOWN_TAGS_KEY).unwrap(),
            Lookup::Found(b"a b b ".to_vec())
        );
    }

    #[test]
    fn test_untagged_id_is_still_catalogued() {
        let (_store, index) = index();
        index.tag("lonely", NO_TAGS).unwrap();

        assert_eq!(index.all_ids().unwrap(), vec!["lonely"]);
        assert!(index.known_tags().unwrap().is_empty());
    }

    #[test]
    fn test_tagging_twice_duplicates_member() {
        let (_store, index) = index();
        index.tag("k1", &["a"]).unwrap();
        index.tag("k1", &["a"]).unwrap();

        assert_eq!(index.members("a").unwrap(), vec!["k1", "k1"]);
    }

    #[test]
    fn test_set_queries() {
        let (_store, index) = index();
        index.tag("k1", &["a", "b"]).unwrap();
        index.tag("k2", &["b", "c"]).unwrap();
        index.tag("k3", &["d"]).unwrap();

        assert_eq!(index.ids_for_any_tag(&["a", "c"]).unwrap(), vec!["k1", "k2"]);
        assert_eq!(index.ids_for_any_tag(&["b", "a"]).unwrap(), vec!["k1", "k2", "k1"]);
        assert_eq!(index.ids_for_all_tags(&["a", "b"]).unwrap(), vec!["k1"]);
        assert!(index.ids_for_all_tags(&["a", "c"]).unwrap().is_empty());
        assert!(index.ids_for_all_tags(NO_TAGS).unwrap().is_empty());
        assert_eq!(
            index.ids_not_matching_any_tag(&["a"]).unwrap(),
            vec!["k2", "k3"]
        );
        assert_eq!(
            index.ids_not_matching_any_tag(NO_TAGS).unwrap(),
            vec!["k1", "k2", "k3"]
        );
    }

    #[test]
    fn test_unknown_tag_reads_empty() {
        let (_store, index) = index();
        assert!(index.members("nope").unwrap().is_empty());
        assert!(index.ids_for_any_tag(&["nope"]).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_tokens_are_rejected_before_writing() {
        let (store, index) = index();

        let err = index.tag("k1", &["ok", "has space"]).unwrap_err();
        assert!(matches!(err, TagStashError::InvalidToken { field: "tag", .. }));
        assert!(store.is_empty().unwrap());

        assert!(index.tag("", NO_TAGS).is_err());
        assert!(index.tag("two words", NO_TAGS).is_err());
        assert!(index.tag("__ids", NO_TAGS).is_err());
        assert!(index.tag("k1", &[""]).is_err());
    }

    #[test]
    fn test_validate_entry_checks_id_and_every_tag() {
        assert!(validate_entry("k1", &["a", "b"]).is_ok());
        assert!(validate_entry("k1", NO_TAGS).is_ok());

        let err = validate_entry("k1", &["a", "b c"]).unwrap_err();
        assert!(matches!(err, TagStashError::InvalidToken { field: "tag", .. }));
        let err = validate_entry("__tag:a", &["a"]).unwrap_err();
        assert!(matches!(err, TagStashError::InvalidToken { field: "id", .. }));
    }

    #[test]
    fn test_corrupt_blob_is_reported() {
        let (store, index) = index();
        store.set(&tag_key("bad"), &[0xff, 0xfe, b' '], None).unwrap();

        let err = index.members("bad").unwrap_err();
        assert!(matches!(err, TagStashError::CorruptIndex { .. }));
    }

    #[test]
    fn test_compact_prunes_stale_and_duplicate_ids() {
        let (store, index) = index();
        store.set("k1", b"v1", None).unwrap();
        store.set("k2", b"v2", None).unwrap();
        index.tag("k1", &["a", "b"]).unwrap();
        index.tag("k1", &["a"]).unwrap();
        index.tag("k2", &["b"]).unwrap();
        index.tag("gone", &["c"]).unwrap();

        let report = index.compact().unwrap();

        assert_eq!(report.tags_scanned, 3);
        assert_eq!(report.tags_dropped, 1);
        assert_eq!(report.live_ids, 2);
        // a: k1 dup; c: gone; __ids: k1 dup + gone
        assert_eq!(report.tokens_dropped, 4);

        assert_eq!(index.members("a").unwrap(), vec!["k1"]);
        assert_eq!(index.members("b").unwrap(), vec!["k1", "k2"]);
        assert!(index.members("c").unwrap().is_empty());
        assert_eq!(index.all_ids().unwrap(), vec!["k1", "k2"]);
        assert_eq!(index.known_tags().unwrap(), vec!["a", "b"]);
        assert!(!store.contains(&tag_key("c")).unwrap());
    }

    #[test]
    fn test_dedup_preserving_order() {
        let ids = vec!["b".to_string(), "a".into(), "b".into(), "c".into(), "a".into()];
        assert_eq!(dedup_preserving_order(ids), vec!["b", "a", "c"]);
    }
}
