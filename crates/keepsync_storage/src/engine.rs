//! Storage engine trait definition.

use crate::error::StorageResult;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key (no-op if absent).
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// An ordered set of mutations committed atomically to one store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    /// Returns true if the batch contains no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the number of mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Consumes the batch, yielding its mutations in order.
    #[must_use]
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Encodes an auto-increment sequence number as a store key.
///
/// Big-endian so that key order equals numeric order.
#[must_use]
pub fn sequence_key(sequence: u64) -> [u8; 8] {
    sequence.to_be_bytes()
}

/// Decodes a key produced by [`sequence_key`].
#[must_use]
pub fn decode_sequence_key(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// A persistent key-value storage engine made of named stores.
///
/// Engines are **opaque byte stores**: they never interpret keys or values.
/// A single engine is typically shared (via `Arc`) by every instance of the
/// application on the same origin, so the engine is the source of truth for
/// mirrored documents, the write queue and watermarks.
///
/// # Invariants
///
/// - `commit` applies every mutation of a batch or none of them
/// - `scan` returns entries in ascending key order
/// - `append` assigns keys from a per-store generator that never reuses a
///   value, even after the entry holding it is deleted
/// - Stores are created implicitly on first write
///
/// # Implementors
///
/// - [`super::InMemoryEngine`] - For tests and ephemeral sessions
/// - [`super::FileEngine`] - For durable storage in a directory
pub trait StorageEngine: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn get(&self, store: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Returns every entry of a store in ascending key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn scan(&self, store: &str) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Returns the number of entries in a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn count(&self, store: &str) -> StorageResult<usize>;

    /// Applies a batch atomically to one store.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable; in that case
    /// none of its mutations are visible.
    fn commit(&self, store: &str, batch: WriteBatch) -> StorageResult<()>;

    /// Stores `value` under the next auto-increment key and returns it.
    ///
    /// The first key of a store is 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be made durable.
    fn append(&self, store: &str, value: &[u8]) -> StorageResult<u64>;

    /// Removes every entry of a store. The key generator is not reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be cleared durably.
    fn clear(&self, store: &str) -> StorageResult<()>;

    /// Lists the names of all stores that have ever been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be read.
    fn store_names(&self) -> StorageResult<Vec<String>>;

    /// Convenience wrapper committing a single put.
    ///
    /// # Errors
    ///
    /// See [`StorageEngine::commit`].
    fn put(&self, store: &str, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.commit(store, batch)
    }

    /// Convenience wrapper committing a single delete.
    ///
    /// # Errors
    ///
    /// See [`StorageEngine::commit`].
    fn delete(&self, store: &str, key: &[u8]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.commit(store, batch)
    }
}
