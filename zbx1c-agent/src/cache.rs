//! In-memory cache of fetched records
//!
//! Entries are published whole: a reader sees either nothing or a complete
//! record list together with the time it was fetched.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Clusters,
    Infobases,
    Sessions,
    Jobs,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Clusters => "clusters",
            RecordKind::Infobases => "infobases",
            RecordKind::Sessions => "sessions",
            RecordKind::Jobs => "jobs",
        }
    }
}

/// `cluster` is `None` for endpoint-wide lists (the cluster list itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub cluster: Option<String>,
    pub kind: RecordKind,
}

impl CacheKey {
    pub fn endpoint(kind: RecordKind) -> Self {
        Self { cluster: None, kind }
    }

    pub fn cluster(cluster: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            cluster: Some(cluster.into()),
            kind,
        }
    }
}

#[derive(Debug)]
pub struct CacheEntry<T> {
    pub records: Arc<Vec<T>>,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            fetched_at: self.fetched_at,
        }
    }
}

/// Observable state of one cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EntryState {
    Absent,
    Fetching,
    Cached { records: usize, fetched_at: DateTime<Utc> },
}

pub struct CacheStore<T> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<T>>>,
}

impl<T> Default for CacheStore<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> CacheStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.entries.read().get(key).cloned()
    }

    /// Replace the entry for `key` with a fully built record list.
    pub fn publish(&self, key: CacheKey, records: Vec<T>) -> CacheEntry<T> {
        let entry = CacheEntry {
            records: Arc::new(records),
            fetched_at: Utc::now(),
        };
        self.entries.write().insert(key, entry.clone());
        entry
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop every entry scoped to `cluster`.
    pub fn invalidate_cluster(&self, cluster: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.cluster.as_deref() != Some(cluster));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_get() {
        let store = CacheStore::new();
        let key = CacheKey::cluster("abc", RecordKind::Infobases);
        assert!(store.get(&key).is_none());

        store.publish(key.clone(), vec![1, 2, 3]);
        let entry = store.get(&key).unwrap();
        assert_eq!(*entry.records, vec![1, 2, 3]);
    }

    #[test]
    fn publish_replaces_whole_entry() {
        let store = CacheStore::new();
        let key = CacheKey::endpoint(RecordKind::Clusters);
        let first = store.publish(key.clone(), vec!["a"]);
        store.publish(key.clone(), vec!["b", "c"]);

        assert_eq!(*first.records, vec!["a"]);
        assert_eq!(*store.get(&key).unwrap().records, vec!["b", "c"]);
    }

    #[test]
    fn invalidation_scopes() {
        let store = CacheStore::new();
        store.publish(CacheKey::cluster("abc", RecordKind::Infobases), vec![1]);
        store.publish(CacheKey::cluster("def", RecordKind::Infobases), vec![2]);
        store.publish(CacheKey::endpoint(RecordKind::Clusters), vec![3]);

        assert_eq!(store.invalidate_cluster("abc"), 1);
        assert_eq!(store.len(), 2);
        assert!(store.invalidate(&CacheKey::endpoint(RecordKind::Clusters)));
        assert!(!store.invalidate(&CacheKey::endpoint(RecordKind::Clusters)));

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn entry_state_serializes_with_tag() {
        let json = serde_json::to_value(EntryState::Fetching).unwrap();
        assert_eq!(json["state"], "fetching");
    }
}
