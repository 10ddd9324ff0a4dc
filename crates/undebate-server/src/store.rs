//! In-memory election document store.

use dashmap::DashMap;
use serde_json::Value;

/// Election documents keyed by id.
#[derive(Debug, Default)]
pub struct ElectionStore {
    docs: DashMap<String, Value>,
}

impl ElectionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the document stored under `id`.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.docs.get(id).map(|doc| doc.value().clone())
    }

    /// Insert or replace the document under `id`.
    ///
    /// Returns `true` if a document was already stored.
    pub fn upsert(&self, id: impl Into<String>, doc: Value) -> bool {
        self.docs.insert(id.into(), doc).is_some()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
