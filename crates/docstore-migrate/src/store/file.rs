//! Directory-backed document store.
//!
//! Layout of a store directory:
//!
//! ```text
//! <dir>/maps.jsonl      one JSON document per line, append-only
//! <dir>/layers.jsonl
//! <dir>/_indexes.json   {"maps": ["year_1", "bbox_2dsphere"], ...}
//! ```
//!
//! A collection is loaded into memory on first use and kept in `_id` order;
//! inserts append to the file and update the cached copy.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{check_collection_name, document_key, Document, DocumentStore, StoreResult};
use crate::error::StoreError;

const INDEX_FILE: &str = "_indexes.json";

type Collection = BTreeMap<String, Document>;

/// Document store persisted as JSON Lines files in one directory.
pub struct FileStore {
    name: String,
    dir: PathBuf,
    collections: Mutex<HashMap<String, Collection>>,
    closed: AtomicBool,
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub async fn open(name: impl Into<String>, dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            name: name.into(),
            dir,
            collections: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Declare a secondary index on `collection`.
    pub async fn create_index(&self, collection: &str, index: &str) -> StoreResult<()> {
        self.check_open()?;
        check_collection_name(collection)?;
        let mut indexes = self.read_indexes().await?;
        let entry = indexes.entry(collection.to_string()).or_default();
        if !entry.iter().any(|i| i == index) {
            entry.push(index.to_string());
        }

        let content = serde_json::to_string_pretty(&indexes)?;
        let path = self.dir.join(INDEX_FILE);
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", collection))
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!(
                "store {} is closed",
                self.name
            )));
        }
        Ok(())
    }

    async fn read_indexes(&self) -> StoreResult<HashMap<String, Vec<String>>> {
        match tokio::fs::read_to_string(self.dir.join(INDEX_FILE)).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_collection(&self, collection: &str) -> StoreResult<Option<Collection>> {
        let path = self.collection_path(collection);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut docs = Collection::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let doc: Document = serde_json::from_str(line).map_err(|e| {
                StoreError::Json(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            docs.entry(document_key(&doc)?).or_insert(doc);
        }
        debug!("{}: loaded {} ({} documents)", self.name, collection, docs.len());
        Ok(Some(docs))
    }

    /// Run `f` against the cached collection, loading it first if needed.
    /// `f` receives `None` when the collection does not exist.
    async fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(Option<&Collection>) -> T,
    ) -> StoreResult<T> {
        self.check_open()?;
        check_collection_name(collection)?;
        let mut guard = self.collections.lock().await;
        if !guard.contains_key(collection) {
            match self.load_collection(collection).await? {
                Some(docs) => {
                    guard.insert(collection.to_string(), docs);
                }
                None => return Ok(f(None)),
            }
        }
        Ok(f(guard.get(collection)))
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_open()?;
        let meta = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| StoreError::Connection(format!("{}: {}", self.dir.display(), e)))?;
        if !meta.is_dir() {
            return Err(StoreError::Connection(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        self.with_collection(collection, |c| c.map(|c| c.len() as u64).unwrap_or(0))
            .await
    }

    async fn find_window(
        &self,
        collection: &str,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        self.with_collection(collection, |c| {
            c.map(|c| c.values().skip(skip).take(limit).cloned().collect())
                .unwrap_or_default()
        })
        .await
    }

    async fn insert_unordered(&self, collection: &str, docs: Vec<Document>) -> StoreResult<usize> {
        self.check_open()?;
        check_collection_name(collection)?;
        let mut guard = self.collections.lock().await;
        if !guard.contains_key(collection) {
            let existing = self.load_collection(collection).await?.unwrap_or_default();
            guard.insert(collection.to_string(), existing);
        }
        let Some(existing) = guard.get_mut(collection) else {
            return Err(StoreError::Io(format!("collection {} not cached", collection)));
        };

        let mut fresh: Vec<(String, Document)> = Vec::with_capacity(docs.len());
        let mut duplicates = 0;
        for doc in docs {
            let key = document_key(&doc)?;
            if existing.contains_key(&key) || fresh.iter().any(|(k, _)| *k == key) {
                duplicates += 1;
            } else {
                fresh.push((key, doc));
            }
        }

        let mut buf = String::new();
        for (_, doc) in &fresh {
            buf.push_str(&serde_json::to_string(doc)?);
            buf.push('\n');
        }
        if !buf.is_empty() {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.collection_path(collection))
                .await?;
            file.write_all(buf.as_bytes()).await?;
            file.sync_data().await?;
        }

        let inserted = fresh.len();
        existing.extend(fresh);

        if duplicates > 0 {
            return Err(StoreError::DuplicateKey {
                inserted,
                duplicates,
            });
        }
        Ok(inserted)
    }

    async fn index_count(&self, collection: &str) -> StoreResult<u64> {
        let exists = self.with_collection(collection, |c| c.is_some()).await?;
        if !exists {
            return Ok(0);
        }
        let indexes = self.read_indexes().await?;
        Ok(1 + indexes.get(collection).map(|v| v.len() as u64).unwrap_or(0))
    }

    async fn sample(&self, collection: &str) -> StoreResult<Option<Document>> {
        self.with_collection(collection, |c| c.and_then(|c| c.values().next().cloned()))
            .await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.collections.lock().await.clear();
    }
}
