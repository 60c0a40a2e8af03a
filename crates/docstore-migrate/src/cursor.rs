//! Deterministic fixed-size windows over a source collection.

use std::sync::Arc;

use crate::store::{Document, DocumentStore, StoreResult};

/// Enumerates one collection in windows keyed by a document-count offset.
///
/// Windows follow the store's stable `_id` order, so the same offset yields the
/// same documents for an unchanged snapshot. Reading has no side effects.
#[derive(Clone)]
pub struct BatchCursor {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl BatchCursor {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Documents `[offset, offset + batch_size)`. Empty at end-of-collection.
    pub async fn next_window(&self, offset: u64, batch_size: usize) -> StoreResult<Vec<Document>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        self.store
            .find_window(&self.collection, offset, batch_size)
            .await
    }
}
