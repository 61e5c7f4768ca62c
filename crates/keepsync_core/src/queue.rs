//! Durable write queue.

use crate::error::{CoreError, CoreResult};
use crate::id::{stringify_ids, EntityId};
use keepsync_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};
use keepsync_storage::{decode_sequence_key, sequence_key, StorageEngine};
use std::sync::Arc;

/// Store holding queued operations.
pub const QUEUE_STORE: &str = "_queue";

/// A mutating operation captured while disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    /// Position in the queue; assigned on enqueue, never reused.
    pub sequence_id: u64,
    /// Name of the server operation.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Entity type written by the operation, once known.
    pub entity_type: Option<String>,
    /// Client-assigned id of the document the operation created.
    pub created_id: Option<EntityId>,
}

impl QueuedOperation {
    /// Returns `true` if any argument contains `id` as an exact text value.
    #[must_use]
    pub fn references(&self, id: &EntityId) -> bool {
        let target = id.to_value();
        self.args.iter().any(|arg| arg.contains_value(&target))
    }

    /// Encodes everything but the sequence id (which is the storage key).
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut pairs = vec![
            ("name", Value::Text(self.name.clone())),
            ("args", Value::Array(self.args.clone())),
        ];
        if let Some(entity_type) = &self.entity_type {
            pairs.push(("type", Value::Text(entity_type.clone())));
        }
        if let Some(id) = &self.created_id {
            pairs.push(("created", id.to_value()));
        }
        to_canonical_cbor(&Value::object(pairs))
    }

    /// Decodes an entry stored under `sequence_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a queued operation.
    pub fn decode(sequence_id: u64, bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let map = value
            .as_map()
            .ok_or_else(|| CodecError::invalid_structure("expected map"))?;

        let get_field = |name: &str| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        };

        let name = get_field("name")
            .and_then(Value::as_text)
            .ok_or_else(|| CodecError::invalid_structure("missing name"))?
            .to_string();
        let args = get_field("args")
            .and_then(Value::as_array)
            .ok_or_else(|| CodecError::invalid_structure("missing args"))?
            .to_vec();
        let entity_type = get_field("type").and_then(Value::as_text).map(str::to_string);
        let created_id = get_field("created").and_then(EntityId::from_value);

        Ok(Self {
            sequence_id,
            name,
            args,
            entity_type,
            created_id,
        })
    }
}

/// Ordered log of operations waiting for replay.
///
/// Sequence ids come from the storage engine's auto-increment generator, so
/// they are strictly increasing and never reused.
#[derive(Clone)]
pub struct WriteQueue {
    engine: Arc<dyn StorageEngine>,
}

impl WriteQueue {
    /// Creates a queue over `engine`.
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Appends an operation; ids wrapped as object ids are stringified first.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be stored.
    pub fn enqueue(&self, name: &str, mut args: Vec<Value>) -> CoreResult<QueuedOperation> {
        for arg in &mut args {
            stringify_ids(arg);
        }
        let mut op = QueuedOperation {
            sequence_id: 0,
            name: name.to_string(),
            args,
            entity_type: None,
            created_id: None,
        };
        op.sequence_id = self.engine.append(QUEUE_STORE, &op.encode()?)?;
        tracing::debug!(sequence_id = op.sequence_id, operation = name, "queued operation");
        Ok(op)
    }

    /// Returns every queued operation in ascending sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or an entry is corrupted.
    pub fn list(&self) -> CoreResult<Vec<QueuedOperation>> {
        self.engine
            .scan(QUEUE_STORE)?
            .into_iter()
            .map(|(key, bytes)| {
                let sequence_id =
                    decode_sequence_key(&key).ok_or_else(|| CoreError::CorruptedQueueEntry {
                        sequence_id: 0,
                        message: format!("bad key of {} bytes", key.len()),
                    })?;
                QueuedOperation::decode(sequence_id, &bytes).map_err(|e| {
                    CoreError::CorruptedQueueEntry {
                        sequence_id,
                        message: e.to_string(),
                    }
                })
            })
            .collect()
    }

    /// Returns the number of queued operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.engine.count(QUEUE_STORE)?)
    }

    /// Returns `true` if nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes one operation. Removing an absent id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal could not be stored.
    pub fn dequeue(&self, sequence_id: u64) -> CoreResult<()> {
        self.engine.delete(QUEUE_STORE, &sequence_key(sequence_id))?;
        Ok(())
    }

    /// Overwrites an existing operation in place, keeping its position.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be stored.
    pub fn update(&self, op: &QueuedOperation) -> CoreResult<()> {
        self.engine
            .put(QUEUE_STORE, &sequence_key(op.sequence_id), &op.encode()?)?;
        Ok(())
    }

    /// Stamps the most recent operation with the type it wrote and, for a
    /// creation, the id of the created document.
    ///
    /// The type is only set when the operation has none yet or the same one;
    /// the created id is only set once. Returns the stamped operation, or
    /// `None` when the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub fn stamp_last(
        &self,
        entity_type: &str,
        created_id: Option<&EntityId>,
    ) -> CoreResult<Option<QueuedOperation>> {
        let Some(mut last) = self.list()?.pop() else {
            return Ok(None);
        };

        let mut changed = false;
        if last.entity_type.as_deref().map_or(true, |t| t == entity_type) {
            changed |= last.entity_type.as_deref() != Some(entity_type);
            last.entity_type = Some(entity_type.to_string());
        }
        if let (Some(id), None) = (created_id, &last.created_id) {
            last.created_id = Some(id.clone());
            changed = true;
        }
        if changed {
            self.update(&last)?;
        }
        Ok(Some(last))
    }

    /// Removes every queued operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue could not be cleared.
    pub fn clear(&self) -> CoreResult<()> {
        Ok(self.engine.clear(QUEUE_STORE)?)
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue").finish_non_exhaustive()
    }
}
