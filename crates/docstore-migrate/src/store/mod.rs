//! Abstract document store handle and its implementations.
//!
//! The engine only ever talks to a store through [`DocumentStore`]:
//!
//! - [`DocumentStore::count`] and [`DocumentStore::find_window`] on the source
//! - [`DocumentStore::insert_unordered`] on the target
//! - [`DocumentStore::index_count`], [`DocumentStore::sample`] and
//!   [`DocumentStore::ping`] for verification and status
//!
//! Concrete stores ([`MemoryStore`], [`FileStore`]) are opened by a
//! [`StoreConnector`](connector::StoreConnector).

pub mod connector;
pub mod file;
pub mod memory;

pub use connector::{connect_store, FileConnector, MemoryConnector, StoreConnector};
pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::StoreError;

/// A schemaless JSON document.
pub type Document = Map<String, Value>;

/// Field holding a document's identity.
pub const ID_FIELD: &str = "_id";

/// Store-level result alias.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A connected document store.
///
/// # Ordering
///
/// `find_window` enumerates a collection in ascending [`document_key`] order,
/// so a given snapshot yields the same window for the same offset on every call.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable name for logs (never includes credentials).
    fn name(&self) -> &str;

    /// Check that the store answers.
    async fn ping(&self) -> StoreResult<()>;

    /// Number of documents in `collection` (0 if it does not exist).
    async fn count(&self, collection: &str) -> StoreResult<u64>;

    /// Up to `limit` documents starting at position `offset`.
    async fn find_window(
        &self,
        collection: &str,
        offset: u64,
        limit: usize,
    ) -> StoreResult<Vec<Document>>;

    /// Insert without stopping at the first failure.
    ///
    /// Documents whose key already exists are left untouched; all others are
    /// inserted. Returns the inserted count, or [`StoreError::DuplicateKey`]
    /// if any document was a duplicate. A document without a usable `_id`
    /// fails the call with [`StoreError::InvalidDocument`] before anything is
    /// written.
    async fn insert_unordered(&self, collection: &str, docs: Vec<Document>) -> StoreResult<usize>;

    /// Number of indexes on `collection`, including the implicit `_id` index.
    async fn index_count(&self, collection: &str) -> StoreResult<u64>;

    /// One document from `collection`, if any.
    async fn sample(&self, collection: &str) -> StoreResult<Option<Document>>;

    /// Release the handle. Later calls fail with a connection error.
    async fn close(&self);
}

/// Ordering/identity key of a document.
///
/// String ids are used as-is; any other non-null id uses its JSON encoding.
pub fn document_key(doc: &Document) -> StoreResult<String> {
    match doc.get(ID_FIELD) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(StoreError::InvalidDocument(
            "document has no _id".to_string(),
        )),
        Some(other) => Ok(other.to_string()),
    }
}

/// Top-level field names of a document.
pub fn key_set(doc: &Document) -> BTreeSet<&str> {
    doc.keys().map(String::as_str).collect()
}

/// Reject collection names that are empty or could escape a directory.
pub(crate) fn check_collection_name(name: &str) -> StoreResult<()> {
    let bad = name.is_empty()
        || name.starts_with('_')
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidCollection(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn doc(id: impl Into<Value>, fields: &[(&str, Value)]) -> Document {
    let mut d = Document::new();
    d.insert(ID_FIELD.to_string(), id.into());
    for (k, v) in fields {
        d.insert((*k).to_string(), v.clone());
    }
    d
}
