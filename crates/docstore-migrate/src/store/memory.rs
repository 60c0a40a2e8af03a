//! In-process document store.
//!
//! Used by the `memory` connector and throughout the test suite. Supports an
//! artificial per-read delay and injected write failures so the batch loop's
//! timing and failure paths can be exercised deterministically.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::{check_collection_name, document_key, Document, DocumentStore, StoreResult};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemCollection {
    docs: BTreeMap<String, Document>,
    indexes: Vec<String>,
}

/// Document store held entirely in memory.
pub struct MemoryStore {
    name: String,
    collections: RwLock<HashMap<String, MemCollection>>,
    read_delay: Option<Duration>,
    write_faults: Mutex<VecDeque<StoreError>>,
    insert_calls: AtomicUsize,
    online: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            read_delay: None,
            write_faults: Mutex::new(VecDeque::new()),
            insert_calls: AtomicUsize::new(0),
            online: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Sleep this long on every `find_window` call.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Load documents directly, bypassing duplicate checks.
    pub async fn seed(&self, collection: &str, docs: Vec<Document>) -> StoreResult<()> {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        for doc in docs {
            coll.docs.insert(document_key(&doc)?, doc);
        }
        Ok(())
    }

    /// Declare a secondary index.
    pub async fn create_index(&self, collection: &str, index: &str) {
        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        if !coll.indexes.iter().any(|i| i == index) {
            coll.indexes.push(index.to_string());
        }
    }

    /// Make the next `insert_unordered` call fail with `err` without writing.
    /// Queued faults are consumed one per call.
    pub async fn fail_next_insert(&self, err: StoreError) {
        self.write_faults.lock().await.push_back(err);
    }

    /// Simulate the store going offline or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Accept work again after `close`, as a fresh connection would.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Whether `close` has been called since the last `reopen`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `insert_unordered` calls, including failed ones.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of a collection's documents in key order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.docs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!(
                "store {} is closed",
                self.name
            )));
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!(
                "store {} is unreachable",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| c.docs.len() as u64)
            .unwrap_or(0))
    }

    async fn find_window(
        &self,
        collection: &str,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        self.check_available()?;
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(coll.docs.values().skip(skip).take(limit).cloned().collect())
    }

    async fn insert_unordered(&self, collection: &str, docs: Vec<Document>) -> StoreResult<usize> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        check_collection_name(collection)?;
        if let Some(fault) = self.write_faults.lock().await.pop_front() {
            return Err(fault);
        }

        let keyed = docs
            .into_iter()
            .map(|doc| document_key(&doc).map(|key| (key, doc)))
            .collect::<StoreResult<Vec<_>>>()?;

        let mut guard = self.collections.write().await;
        let coll = guard.entry(collection.to_string()).or_default();
        let mut inserted = 0;
        let mut duplicates = 0;
        for (key, doc) in keyed {
            if coll.docs.contains_key(&key) {
                duplicates += 1;
            } else {
                coll.docs.insert(key, doc);
                inserted += 1;
            }
        }

        if duplicates > 0 {
            return Err(StoreError::DuplicateKey {
                inserted,
                duplicates,
            });
        }
        Ok(inserted)
    }

    async fn index_count(&self, collection: &str) -> StoreResult<u64> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| 1 + c.indexes.len() as u64)
            .unwrap_or(0))
    }

    async fn sample(&self, collection: &str) -> StoreResult<Option<Document>> {
        self.check_available()?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.docs.values().next().cloned()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::doc;
    use serde_json::json;

    fn maps(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| doc(format!("map-{:05}", i), &[("year", json!(1500 + i))]))
            .collect()
    }

    #[tokio::test]
    async fn test_windows_are_ordered_and_bounded() {
        let store = MemoryStore::new("legacy");
        store.seed("maps", maps(25)).await.unwrap();

        let first = store.find_window("maps", 0, 10).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(document_key(&first[0]).unwrap(), "map-00000");

        let last = store.find_window("maps", 20, 10).await.unwrap();
        assert_eq!(last.len(), 5);
        assert_eq!(document_key(&last[4]).unwrap(), "map-00024");

        assert!(store.find_window("maps", 25, 10).await.unwrap().is_empty());
        assert!(store.find_window("missing", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unordered_insert_reports_duplicates_and_keeps_going() {
        let store = MemoryStore::new("atlas");
        store.seed("maps", maps(3)).await.unwrap();

        let err = store.insert_unordered("maps", maps(5)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::DuplicateKey {
                inserted: 2,
                duplicates: 3
            }
        );
        assert_eq!(store.count("maps").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_document_without_id_rejects_whole_batch() {
        let store = MemoryStore::new("atlas");
        let mut batch = maps(3);
        batch[1].remove("_id");

        let err = store.insert_unordered("maps", batch).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
        assert_eq!(store.count("maps").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed_once() {
        let store = MemoryStore::new("atlas");
        store
            .fail_next_insert(StoreError::Transient("primary stepped down".into()))
            .await;

        assert!(store.insert_unordered("maps", maps(2)).await.is_err());
        assert_eq!(store.insert_unordered("maps", maps(2)).await.unwrap(), 2);
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_index_count_includes_id_index() {
        let store = MemoryStore::new("legacy");
        assert_eq!(store.index_count("maps").await.unwrap(), 0);
        store.seed("maps", maps(1)).await.unwrap();
        store.create_index("maps", "year_1").await;
        store.create_index("maps", "year_1").await;
        assert_eq!(store.index_count("maps").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_closed_and_offline_stores_refuse_work() {
        let store = MemoryStore::new("legacy");
        store.set_online(false);
        assert!(matches!(store.ping().await, Err(StoreError::Connection(_))));
        store.set_online(true);
        assert!(store.ping().await.is_ok());

        store.close().await;
        assert!(store.is_closed());
        assert!(store.count("maps").await.is_err());
    }
}
