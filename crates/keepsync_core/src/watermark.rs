//! Per-type reconciliation watermarks.

use crate::error::{CoreError, CoreResult};
use keepsync_codec::{from_cbor, to_canonical_cbor, Value};
use keepsync_storage::{StorageEngine, WriteBatch};
use std::sync::Arc;

/// Store holding watermarks, keyed by entity type name.
pub const WATERMARK_STORE: &str = "_syncs";

/// Persisted `lastReconciledAt` timestamps (milliseconds since the epoch).
#[derive(Clone)]
pub struct Watermarks {
    engine: Arc<dyn StorageEngine>,
}

impl Watermarks {
    /// Creates a watermark table over `engine`.
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// Returns the watermark of `entity_type`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the value is invalid.
    pub fn get(&self, entity_type: &str) -> CoreResult<Option<i64>> {
        self.engine
            .get(WATERMARK_STORE, entity_type.as_bytes())?
            .map(|bytes| decode(entity_type, &bytes))
            .transpose()
    }

    /// Sets the watermark of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value could not be stored.
    pub fn set(&self, entity_type: &str, at_millis: i64) -> CoreResult<()> {
        let bytes = to_canonical_cbor(&Value::Integer(at_millis))?;
        self.engine.put(WATERMARK_STORE, entity_type.as_bytes(), &bytes)?;
        Ok(())
    }

    /// Sets several watermarks in one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be stored.
    pub fn set_many(&self, marks: &[(String, i64)]) -> CoreResult<()> {
        let mut batch = WriteBatch::new();
        for (entity_type, at_millis) in marks {
            batch.put(
                entity_type.as_bytes(),
                to_canonical_cbor(&Value::Integer(*at_millis))?,
            );
        }
        Ok(self.engine.commit(WATERMARK_STORE, batch)?)
    }

    /// Returns every watermark, sorted by type name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn all(&self) -> CoreResult<Vec<(String, i64)>> {
        self.engine
            .scan(WATERMARK_STORE)?
            .into_iter()
            .map(|(key, bytes)| {
                let name = String::from_utf8_lossy(&key).into_owned();
                let at = decode(&name, &bytes)?;
                Ok((name, at))
            })
            .collect()
    }

    /// Removes the watermark of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal could not be stored.
    pub fn remove(&self, entity_type: &str) -> CoreResult<()> {
        Ok(self.engine.delete(WATERMARK_STORE, entity_type.as_bytes())?)
    }

    /// Removes every watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be cleared.
    pub fn clear(&self) -> CoreResult<()> {
        Ok(self.engine.clear(WATERMARK_STORE)?)
    }
}

impl std::fmt::Debug for Watermarks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watermarks").finish_non_exhaustive()
    }
}

fn decode(entity_type: &str, bytes: &[u8]) -> CoreResult<i64> {
    from_cbor(bytes)?
        .as_integer()
        .ok_or_else(|| CoreError::invalid_document(format!("watermark of {entity_type} is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_storage::InMemoryEngine;

    #[test]
    fn missing_watermark_is_none() {
        let marks = Watermarks::new(Arc::new(InMemoryEngine::new()));
        assert_eq!(marks.get("notes").unwrap(), None);
        assert!(marks.all().unwrap().is_empty());
    }

    #[test]
    fn set_get_all() {
        let marks = Watermarks::new(Arc::new(InMemoryEngine::new()));
        marks.set("notes", 1_700_000_000_000).unwrap();
        marks
            .set_many(&[("todos".to_string(), 5), ("notes".to_string(), 7)])
            .unwrap();

        assert_eq!(marks.get("notes").unwrap(), Some(7));
        assert_eq!(
            marks.all().unwrap(),
            vec![("notes".to_string(), 7), ("todos".to_string(), 5)]
        );

        marks.remove("notes").unwrap();
        assert_eq!(marks.get("notes").unwrap(), None);
    }
}
