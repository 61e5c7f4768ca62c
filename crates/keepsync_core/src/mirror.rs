//! Bounded persistent mirror of server documents.

use crate::config::RetryConfig;
use crate::document::MirrorDocument;
use crate::error::{CoreError, CoreResult};
use crate::id::EntityId;
use crate::queue::{QueuedOperation, WriteQueue, QUEUE_STORE};
use crate::retention::RetentionRegistry;
use crate::watermark::{Watermarks, WATERMARK_STORE};
use keepsync_codec::Value;
use keepsync_storage::{StorageEngine, WriteBatch};
use std::sync::Arc;

const DOC_STORE_PREFIX: &str = "docs.";

/// Result of [`MirrorStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The document was written without evicting anything.
    Written,
    /// The document was written after evicting another one.
    Evicted(EntityId),
    /// The store is full of more wanted documents; nothing was written.
    Skipped,
}

impl PutOutcome {
    /// Returns `true` if the document was persisted.
    #[must_use]
    pub fn is_written(&self) -> bool {
        !matches!(self, PutOutcome::Skipped)
    }
}

/// The local mirror: documents per entity type, the write queue and the
/// reconciliation watermarks, all held in one storage engine.
///
/// `put` enforces each type's retention limit. The mirror knows nothing about
/// connectivity; callers decide when writes happen.
#[derive(Clone)]
pub struct MirrorStore {
    engine: Arc<dyn StorageEngine>,
    registry: Arc<RetentionRegistry>,
    queue: WriteQueue,
    watermarks: Watermarks,
}

impl MirrorStore {
    /// Creates a mirror over `engine`.
    pub fn new(engine: Arc<dyn StorageEngine>, registry: Arc<RetentionRegistry>) -> Self {
        Self {
            queue: WriteQueue::new(Arc::clone(&engine)),
            watermarks: Watermarks::new(Arc::clone(&engine)),
            engine,
            registry,
        }
    }

    /// The retention registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RetentionRegistry> {
        &self.registry
    }

    /// The write queue.
    #[must_use]
    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }

    /// The watermark table.
    #[must_use]
    pub fn watermarks(&self) -> &Watermarks {
        &self.watermarks
    }

    /// Writes `doc`, enforcing the retention limit of `entity_type`.
    ///
    /// When the store is full, the least wanted document on the sort key is
    /// evicted to make room, unless the incoming document is itself less
    /// wanted, in which case nothing is written. The document of `identity`
    /// in the identity type is never evicted and, when incoming, always
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntityType`] if the type is not kept, or a
    /// storage error.
    pub fn put(
        &self,
        entity_type: &str,
        doc: &MirrorDocument,
        identity: Option<&EntityId>,
    ) -> CoreResult<PutOutcome> {
        let policy = self
            .registry
            .policy(entity_type)
            .ok_or_else(|| CoreError::unknown_type(entity_type))?;
        let store = doc_store(entity_type);
        let key = doc.id().as_str().as_bytes();

        let Some(limit) = policy.limit else {
            self.engine.put(&store, key, &doc.encode()?)?;
            return Ok(PutOutcome::Written);
        };

        let exists = self.engine.get(&store, key)?.is_some();
        let count = self.engine.count(&store)? + usize::from(!exists);
        if count <= limit {
            self.engine.put(&store, key, &doc.encode()?)?;
            return Ok(PutOutcome::Written);
        }

        let protected = identity.filter(|_| entity_type == self.registry.identity_type());
        let incoming_protected = protected.is_some_and(|id| id == doc.id());

        let field = policy.sort.field.as_str();
        let mut candidate: Option<(EntityId, Value)> = None;
        for (_, bytes) in self.engine.scan(&store)? {
            let stored = MirrorDocument::decode(&bytes)?;
            if stored.id() == doc.id() || protected.is_some_and(|id| id == stored.id()) {
                continue;
            }
            let rank = stored.get(field).cloned().unwrap_or(Value::Null);
            let replace = match &candidate {
                None => true,
                Some((_, best)) => policy.sort.less_wanted(&rank, best),
            };
            if replace {
                candidate = Some((stored.id().clone(), rank));
            }
        }

        let Some((victim, victim_rank)) = candidate else {
            if incoming_protected {
                self.engine.put(&store, key, &doc.encode()?)?;
                return Ok(PutOutcome::Written);
            }
            return Ok(PutOutcome::Skipped);
        };

        let incoming_rank = doc.get(field).unwrap_or(&Value::Null);
        if !incoming_protected && policy.sort.less_wanted(incoming_rank, &victim_rank) {
            tracing::debug!(entity_type, id = %doc.id(), "document below retention cut, not stored");
            return Ok(PutOutcome::Skipped);
        }

        let mut batch = WriteBatch::new();
        batch
            .delete(victim.as_str().as_bytes())
            .put(key, doc.encode()?);
        self.engine.commit(&store, batch)?;
        tracing::debug!(entity_type, evicted = %victim, id = %doc.id(), "evicted document");
        Ok(PutOutcome::Evicted(victim))
    }

    /// Reads one document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get(&self, entity_type: &str, id: &EntityId) -> CoreResult<Option<MirrorDocument>> {
        self.engine
            .get(&doc_store(entity_type), id.as_str().as_bytes())?
            .map(|bytes| MirrorDocument::decode(&bytes))
            .transpose()
    }

    /// Returns every document of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_all(&self, entity_type: &str) -> CoreResult<Vec<MirrorDocument>> {
        self.engine
            .scan(&doc_store(entity_type))?
            .into_iter()
            .map(|(_, bytes)| MirrorDocument::decode(&bytes))
            .collect()
    }

    /// Number of documents of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn count(&self, entity_type: &str) -> CoreResult<usize> {
        Ok(self.engine.count(&doc_store(entity_type))?)
    }

    /// Deletes one document. Deleting an absent id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn remove(&self, entity_type: &str, id: &EntityId) -> CoreResult<()> {
        Ok(self
            .engine
            .delete(&doc_store(entity_type), id.as_str().as_bytes())?)
    }

    /// Deletes several documents atomically.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn remove_many(&self, entity_type: &str, ids: &[EntityId]) -> CoreResult<()> {
        let mut batch = WriteBatch::new();
        for id in ids {
            batch.delete(id.as_str().as_bytes());
        }
        Ok(self.engine.commit(&doc_store(entity_type), batch)?)
    }

    /// Deletes one document, retrying with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RetryExhausted`] once every attempt has failed.
    pub fn remove_with_retry(
        &self,
        entity_type: &str,
        id: &EntityId,
        retry: &RetryConfig,
    ) -> CoreResult<()> {
        retry
            .run(|attempt| {
                self.remove(entity_type, id).inspect_err(|e| {
                    tracing::warn!(entity_type, %id, attempt, error = %e, "delete failed");
                })
            })
            .map_err(|(attempts, e)| CoreError::RetryExhausted {
                operation: format!("delete {entity_type}/{id}"),
                attempts,
                message: e.to_string(),
            })
    }

    /// Removes every document of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear(&self, entity_type: &str) -> CoreResult<()> {
        Ok(self.engine.clear(&doc_store(entity_type))?)
    }

    /// Removes every document, every queued operation and every watermark.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear_all(&self) -> CoreResult<()> {
        for entity_type in self.entity_types()? {
            self.clear(&entity_type)?;
        }
        self.queue.clear()?;
        self.watermarks.clear()?;
        Ok(())
    }

    /// Entity types that have ever had documents stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn entity_types(&self) -> CoreResult<Vec<String>> {
        Ok(self
            .engine
            .store_names()?
            .into_iter()
            .filter(|name| name != QUEUE_STORE && name != WATERMARK_STORE)
            .filter_map(|name| name.strip_prefix(DOC_STORE_PREFIX).map(str::to_string))
            .collect())
    }

    /// Queues an operation if it is queueable.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn enqueue(&self, name: &str, args: Vec<Value>) -> CoreResult<Option<QueuedOperation>> {
        if !self.registry.can_queue(name) {
            tracing::debug!(operation = name, "operation not queueable");
            return Ok(None);
        }
        self.queue.enqueue(name, args).map(Some)
    }

    /// Removes a queued operation.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn dequeue(&self, sequence_id: u64) -> CoreResult<()> {
        self.queue.dequeue(sequence_id)
    }

    /// Lists queued operations in replay order.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn list_queued(&self) -> CoreResult<Vec<QueuedOperation>> {
        self.queue.list()
    }

    /// Returns the watermark of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn get_watermark(&self, entity_type: &str) -> CoreResult<Option<i64>> {
        self.watermarks.get(entity_type)
    }

    /// Sets the watermark of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn set_watermark(&self, entity_type: &str, at_millis: i64) -> CoreResult<()> {
        self.watermarks.set(entity_type, at_millis)
    }
}

impl std::fmt::Debug for MirrorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorStore")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn doc_store(entity_type: &str) -> String {
    format!("{DOC_STORE_PREFIX}{entity_type}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflineConfig;
    use crate::retention::SortKey;
    use keepsync_storage::{InMemoryEngine, StorageResult, StorageError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn mirror(config: OfflineConfig) -> MirrorStore {
        MirrorStore::new(
            Arc::new(InMemoryEngine::new()),
            Arc::new(RetentionRegistry::new(&config)),
        )
    }

    fn notes_mirror(limit: usize) -> MirrorStore {
        let config = OfflineConfig::new()
            .with_keep_all(false)
            .with_sort(SortKey::descending("createdAt"))
            .with_limit(limit);
        let m = mirror(config.clone());
        m.registry().keep("notes", config.default_policy()).unwrap();
        m
    }

    fn note(id: &str, created: i64) -> MirrorDocument {
        MirrorDocument::new(id, vec![("createdAt", Value::Integer(created))])
    }

    fn ids(m: &MirrorStore, entity_type: &str) -> Vec<String> {
        m.get_all(entity_type)
            .unwrap()
            .into_iter()
            .map(|d| d.id().to_string())
            .collect()
    }

    #[test]
    fn keeps_most_recent_within_limit() {
        let m = notes_mirror(2);
        for (id, t) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            m.put("notes", &note(id, t), None).unwrap();
        }
        assert_eq!(ids(&m, "notes"), vec!["c", "d"]);
    }

    #[test]
    fn older_document_is_skipped_when_full() {
        let m = notes_mirror(2);
        m.put("notes", &note("b", 2), None).unwrap();
        m.put("notes", &note("c", 3), None).unwrap();
        assert_eq!(m.put("notes", &note("a", 1), None).unwrap(), PutOutcome::Skipped);
        assert_eq!(
            m.put("notes", &note("d", 4), None).unwrap(),
            PutOutcome::Evicted(EntityId::new("b"))
        );
    }

    #[test]
    fn ascending_sort_evicts_largest() {
        let config = OfflineConfig::new()
            .with_keep_all(false)
            .with_sort(SortKey::ascending("createdAt"))
            .with_limit(2);
        let m = mirror(config.clone());
        m.registry().keep("things", config.default_policy()).unwrap();

        for (id, t) in [("a", 1), ("b", 2), ("c", 3), ("z", 0)] {
            m.put("things", &note(id, t), None).unwrap();
        }
        assert_eq!(ids(&m, "things"), vec!["a", "z"]);
    }

    #[test]
    fn updating_existing_document_never_evicts() {
        let m = notes_mirror(2);
        m.put("notes", &note("a", 1), None).unwrap();
        m.put("notes", &note("b", 2), None).unwrap();
        assert_eq!(m.put("notes", &note("a", 0), None).unwrap(), PutOutcome::Written);
        assert_eq!(m.count("notes").unwrap(), 2);
    }

    #[test]
    fn unbounded_type_accepts_everything() {
        let config = OfflineConfig::new().with_keep_all(false).unbounded();
        let m = mirror(config.clone());
        m.registry().keep("notes", config.default_policy()).unwrap();
        for i in 0..10 {
            m.put("notes", &note(&format!("n{i}"), i), None).unwrap();
        }
        assert_eq!(m.count("notes").unwrap(), 10);
    }

    #[test]
    fn identity_document_is_never_evicted() {
        let config = OfflineConfig::new()
            .with_sort(SortKey::descending("createdAt"))
            .with_limit(2);
        let m = mirror(config);
        let me = EntityId::new("me");

        m.put("users", &note("me", 0), Some(&me)).unwrap();
        for (id, t) in [("u1", 1), ("u2", 2), ("u3", 3)] {
            m.put("users", &note(id, t), Some(&me)).unwrap();
        }
        let kept = ids(&m, "users");
        assert!(kept.contains(&"me".to_string()));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn incoming_identity_is_always_written() {
        let config = OfflineConfig::new()
            .with_sort(SortKey::descending("createdAt"))
            .with_limit(2);
        let m = mirror(config);
        let me = EntityId::new("me");

        m.put("users", &note("u1", 5), Some(&me)).unwrap();
        m.put("users", &note("u2", 6), Some(&me)).unwrap();
        let outcome = m.put("users", &note("me", 0), Some(&me)).unwrap();
        assert_eq!(outcome, PutOutcome::Evicted(EntityId::new("u1")));
        assert_eq!(ids(&m, "users"), vec!["me", "u2"]);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let m = notes_mirror(2);
        assert!(matches!(
            m.put("todos", &note("a", 1), None),
            Err(CoreError::UnknownEntityType { .. })
        ));
    }

    #[test]
    fn enqueue_respects_queueable_check() {
        let m = notes_mirror(2);
        assert!(m.enqueue("updateUser", vec![]).unwrap().is_none());
        let op = m.enqueue("insertNote", vec![Value::from("A")]).unwrap().unwrap();
        assert_eq!(m.list_queued().unwrap(), vec![op.clone()]);
        m.dequeue(op.sequence_id).unwrap();
        assert!(m.list_queued().unwrap().is_empty());
    }

    #[test]
    fn clear_all_wipes_everything() {
        let m = notes_mirror(5);
        m.put("notes", &note("a", 1), None).unwrap();
        m.enqueue("insertNote", vec![]).unwrap();
        m.set_watermark("notes", 10).unwrap();
        assert_eq!(m.entity_types().unwrap(), vec!["notes"]);

        m.clear_all().unwrap();
        assert_eq!(m.count("notes").unwrap(), 0);
        assert!(m.list_queued().unwrap().is_empty());
        assert_eq!(m.get_watermark("notes").unwrap(), None);
    }

    struct FlakyEngine {
        inner: InMemoryEngine,
        failures_left: AtomicU32,
    }

    impl StorageEngine for FlakyEngine {
        fn get(&self, store: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
            self.inner.get(store, key)
        }
        fn scan(&self, store: &str) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan(store)
        }
        fn count(&self, store: &str) -> StorageResult<usize> {
            self.inner.count(store)
        }
        fn commit(&self, store: &str, batch: WriteBatch) -> StorageResult<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Unavailable("flaky".into()));
            }
            self.inner.commit(store, batch)
        }
        fn append(&self, store: &str, value: &[u8]) -> StorageResult<u64> {
            self.inner.append(store, value)
        }
        fn clear(&self, store: &str) -> StorageResult<()> {
            self.inner.clear(store)
        }
        fn store_names(&self) -> StorageResult<Vec<String>> {
            self.inner.store_names()
        }
    }

    fn flaky_mirror(failures: u32) -> MirrorStore {
        let engine = Arc::new(FlakyEngine {
            inner: InMemoryEngine::new(),
            failures_left: AtomicU32::new(0),
        });
        let config = OfflineConfig::new().unbounded();
        let m = MirrorStore::new(engine.clone(), Arc::new(RetentionRegistry::new(&config)));
        m.registry().register_type("notes");
        m.put("notes", &note("a", 1), None).unwrap();
        engine.failures_left.store(failures, Ordering::SeqCst);
        m
    }

    #[test]
    fn remove_with_retry_recovers() {
        let m = flaky_mirror(2);
        let retry = RetryConfig::new(3).with_initial_delay(Duration::ZERO);
        m.remove_with_retry("notes", &EntityId::new("a"), &retry).unwrap();
        assert_eq!(m.count("notes").unwrap(), 0);
    }

    #[test]
    fn remove_with_retry_gives_up() {
        let m = flaky_mirror(5);
        let retry = RetryConfig::new(3).with_initial_delay(Duration::ZERO);
        let err = m
            .remove_with_retry("notes", &EntityId::new("a"), &retry)
            .unwrap_err();
        assert!(matches!(err, CoreError::RetryExhausted { attempts: 3, .. }));
    }
}
