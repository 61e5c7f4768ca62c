//! Server-side access to authoritative documents.

use crate::error::ServerResult;
use keepsync_core::{EntityId, Filter, MirrorDocument};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Read access to the authoritative documents the reconciliation endpoint
/// queries.
pub trait DocumentSource: Send + Sync {
    /// Returns the distinct ids of `entity_type` documents matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ServerError::Source`] if the query fails.
    fn find_ids(&self, entity_type: &str, filter: &Filter) -> ServerResult<Vec<EntityId>>;
}

/// In-memory [`DocumentSource`], also usable as a tiny document store by
/// registered methods.
#[derive(Debug, Default)]
pub struct MemorySource {
    docs: RwLock<HashMap<String, BTreeMap<String, MirrorDocument>>>,
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a document.
    pub fn put(&self, entity_type: &str, doc: MirrorDocument) {
        self.docs
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .insert(doc.id().as_str().to_string(), doc);
    }

    /// Reads one document.
    pub fn get(&self, entity_type: &str, id: &EntityId) -> Option<MirrorDocument> {
        self.docs
            .read()
            .get(entity_type)
            .and_then(|docs| docs.get(id.as_str()))
            .cloned()
    }

    /// Removes a document, returning whether it existed.
    pub fn remove(&self, entity_type: &str, id: &EntityId) -> bool {
        self.docs
            .write()
            .get_mut(entity_type)
            .is_some_and(|docs| docs.remove(id.as_str()).is_some())
    }

    /// Number of documents of `entity_type`.
    pub fn len(&self, entity_type: &str) -> usize {
        self.docs.read().get(entity_type).map_or(0, BTreeMap::len)
    }

    /// Returns true if `entity_type` has no documents.
    pub fn is_empty(&self, entity_type: &str) -> bool {
        self.len(entity_type) == 0
    }
}

impl DocumentSource for MemorySource {
    fn find_ids(&self, entity_type: &str, filter: &Filter) -> ServerResult<Vec<EntityId>> {
        Ok(self
            .docs
            .read()
            .get(entity_type)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filter.matches(doc.body()))
                    .map(|doc| doc.id().clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
