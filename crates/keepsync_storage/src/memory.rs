//! In-memory storage engine.

use crate::engine::{sequence_key, BatchOp, StorageEngine, WriteBatch};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Contents of one named store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StoreData {
    pub(crate) entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Last key handed out by `append` (0 = none yet).
    pub(crate) last_sequence: u64,
}

impl StoreData {
    pub(crate) fn apply(&mut self, batch: WriteBatch) {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    self.entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    pub(crate) fn append(&mut self, store: &str, value: &[u8]) -> StorageResult<u64> {
        let sequence = self
            .last_sequence
            .checked_add(1)
            .ok_or_else(|| StorageError::SequenceExhausted(store.to_string()))?;
        self.entries.insert(sequence_key(sequence).to_vec(), value.to_vec());
        self.last_sequence = sequence;
        Ok(sequence)
    }
}

/// An in-memory storage engine.
///
/// Suitable for:
/// - Unit and integration tests
/// - Sessions that do not need to survive a restart
///
/// # Thread Safety
///
/// The engine is thread-safe; share it with `Arc` to model several
/// application instances on the same origin.
///
/// # Example
///
/// ```rust
/// use keepsync_storage::{InMemoryEngine, StorageEngine};
///
/// let engine = InMemoryEngine::new();
/// engine.put("notes", b"n1", b"doc").unwrap();
/// assert_eq!(engine.get("notes", b"n1").unwrap(), Some(b"doc".to_vec()));
/// assert_eq!(engine.append("queue", b"op").unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    stores: RwLock<BTreeMap<String, StoreData>>,
}

impl InMemoryEngine {
    /// Creates a new empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for InMemoryEngine {
    fn get(&self, store: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .stores
            .read()
            .get(store)
            .and_then(|data| data.entries.get(key).cloned()))
    }

    fn scan(&self, store: &str) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .stores
            .read()
            .get(store)
            .map(|data| {
                data.entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count(&self, store: &str) -> StorageResult<usize> {
        Ok(self
            .stores
            .read()
            .get(store)
            .map_or(0, |data| data.entries.len()))
    }

    fn commit(&self, store: &str, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.stores
            .write()
            .entry(store.to_string())
            .or_default()
            .apply(batch);
        Ok(())
    }

    fn append(&self, store: &str, value: &[u8]) -> StorageResult<u64> {
        self.stores
            .write()
            .entry(store.to_string())
            .or_default()
            .append(store, value)
    }

    fn clear(&self, store: &str) -> StorageResult<()> {
        if let Some(data) = self.stores.write().get_mut(store) {
            data.entries.clear();
        }
        Ok(())
    }

    fn store_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.stores.read().keys().cloned().collect())
    }
}
