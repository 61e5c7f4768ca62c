//! Bridges the authoritative cache to the mirror store.

use crate::broadcast::BroadcastChannel;
use crate::cache::{CacheObserver, ChangeContext, ChangeOrigin, ObserverHandle, ReactiveCache};
use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;
use keepsync_core::{EntityId, Filter, MirrorDocument, MirrorStore};
use keepsync_protocol::BroadcastPayload;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Writes cache changes of one observed query into the mirror.
struct MirrorWriter {
    mirror: Arc<MirrorStore>,
    transport: Arc<dyn Transport>,
    channel: Arc<BroadcastChannel>,
    auto_sync: bool,
    skip_initial: bool,
}

impl MirrorWriter {
    fn ignores(&self, ctx: ChangeContext) -> bool {
        ctx.suppresses_writeback() || (self.skip_initial && ctx.is_initial())
    }

    /// Returns whether the instance is offline, or `None` when offline
    /// writes are not kept at all.
    fn offline(&self) -> Option<bool> {
        let offline = self.transport.status().is_offline();
        if offline && !self.auto_sync {
            return None;
        }
        Some(offline)
    }

    fn write(&self, entity_type: &str, doc: &MirrorDocument, ctx: ChangeContext, created: bool) {
        let Some(offline) = self.offline() else {
            return;
        };
        let identity = self.transport.identity();
        match self.mirror.put(entity_type, doc, identity.as_ref()) {
            Ok(outcome) => {
                tracing::trace!(entity_type, id = %doc.id(), ?outcome, "mirrored document");
            }
            Err(e) => {
                tracing::warn!(entity_type, id = %doc.id(), error = %e, "failed to mirror document");
            }
        }

        if offline && ctx.origin == ChangeOrigin::Live {
            let created_id = created.then(|| doc.id());
            if let Err(e) = self.mirror.queue().stamp_last(entity_type, created_id) {
                tracing::warn!(entity_type, error = %e, "failed to stamp queued operation");
            }
            self.channel
                .post(entity_type, BroadcastPayload::Write(doc.body().clone()));
        }
    }
}

impl CacheObserver for MirrorWriter {
    fn added(&self, entity_type: &str, doc: &MirrorDocument, ctx: ChangeContext) {
        if !self.ignores(ctx) {
            self.write(entity_type, doc, ctx, true);
        }
    }

    fn changed(&self, entity_type: &str, doc: &MirrorDocument, ctx: ChangeContext) {
        if !self.ignores(ctx) {
            self.write(entity_type, doc, ctx, false);
        }
    }

    fn removed(&self, entity_type: &str, id: &EntityId, ctx: ChangeContext) {
        if self.ignores(ctx) {
            return;
        }
        let Some(offline) = self.offline() else {
            return;
        };
        if let Err(e) = self.mirror.remove(entity_type, id) {
            tracing::warn!(entity_type, %id, error = %e, "failed to remove mirrored document");
        }
        if offline {
            if let Err(e) = self.mirror.queue().stamp_last(entity_type, None) {
                tracing::warn!(entity_type, error = %e, "failed to stamp queued operation");
            }
            self.channel
                .post(entity_type, BroadcastPayload::Remove(id.as_str().to_string()));
        }
    }
}

/// Hydrates the cache from the mirror and keeps the mirror following it.
///
/// Types whose retention filter refers to the authenticated identity are
/// deferred until an identity is known; they are attached exactly once.
pub struct ChangeObserver {
    cache: Arc<dyn ReactiveCache>,
    mirror: Arc<MirrorStore>,
    transport: Arc<dyn Transport>,
    channel: Arc<BroadcastChannel>,
    auto_sync: bool,
    handles: Mutex<HashMap<String, ObserverHandle>>,
    deferred: Mutex<Vec<(String, Filter)>>,
}

impl ChangeObserver {
    /// Creates an observer. Nothing is attached until
    /// [`hydrate_and_observe`](Self::hydrate_and_observe).
    pub fn new(
        cache: Arc<dyn ReactiveCache>,
        mirror: Arc<MirrorStore>,
        transport: Arc<dyn Transport>,
        channel: Arc<BroadcastChannel>,
        auto_sync: bool,
    ) -> Self {
        Self {
            cache,
            mirror,
            transport,
            channel,
            auto_sync,
            handles: Mutex::new(HashMap::new()),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Loads every retained type from the mirror into the cache, then
    /// starts observing. Returns the number of documents loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror cannot be read.
    pub fn hydrate_and_observe(&self, identity: Option<&EntityId>) -> SyncResult<usize> {
        let mut loaded = 0;
        for entity_type in self.mirror.registry().retained_types() {
            loaded += self.observe_type(&entity_type, identity)?;
        }
        tracing::info!(loaded, "hydrated cache from mirror");
        Ok(loaded)
    }

    /// Hydrates and observes a single type. Already observed types are
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror cannot be read.
    pub fn observe_type(&self, entity_type: &str, identity: Option<&EntityId>) -> SyncResult<usize> {
        if self.is_observed(entity_type) || self.is_deferred(entity_type) {
            return Ok(0);
        }
        let Some(policy) = self.mirror.registry().policy(entity_type) else {
            return Ok(0);
        };

        let hydration = ChangeContext::new(ChangeOrigin::Hydration);
        let mut loaded = 0;
        for doc in self.mirror.get_all(entity_type)? {
            match self.cache.insert(entity_type, doc, hydration).map_err(SyncError::from) {
                Ok(()) => loaded += 1,
                Err(e) if e.is_duplicate() => {
                    tracing::trace!(entity_type, error = %e, "already in cache");
                }
                Err(e) => return Err(e),
            }
        }

        match (policy.filter.needs_identity(), identity) {
            (false, _) => self.attach(entity_type, policy.filter, true),
            (true, Some(id)) => self.attach(entity_type, policy.filter.resolve(id), true),
            (true, None) => {
                tracing::info!(entity_type, "deferring observation until identity is known");
                self.deferred
                    .lock()
                    .push((entity_type.to_string(), policy.filter));
            }
        }
        Ok(loaded)
    }

    /// Attaches every deferred observer with the identity resolved.
    ///
    /// Documents already matching are mirrored. Returns the number of
    /// observers attached; later calls attach nothing.
    pub fn on_identity(&self, identity: &EntityId) -> usize {
        let deferred = std::mem::take(&mut *self.deferred.lock());
        let attached = deferred.len();
        for (entity_type, filter) in deferred {
            tracing::debug!(entity_type = %entity_type, %identity, "attaching deferred observer");
            self.attach(&entity_type, filter.resolve(identity), false);
        }
        attached
    }

    /// Returns true if `entity_type` has an attached observer.
    pub fn is_observed(&self, entity_type: &str) -> bool {
        self.handles.lock().contains_key(entity_type)
    }

    /// Returns true if `entity_type` waits for an identity.
    pub fn is_deferred(&self, entity_type: &str) -> bool {
        self.deferred.lock().iter().any(|(name, _)| name == entity_type)
    }

    fn attach(&self, entity_type: &str, filter: Filter, skip_initial: bool) {
        let writer = Arc::new(MirrorWriter {
            mirror: Arc::clone(&self.mirror),
            transport: Arc::clone(&self.transport),
            channel: Arc::clone(&self.channel),
            auto_sync: self.auto_sync,
            skip_initial,
        });
        let handle = self.cache.observe(entity_type, filter, writer);
        self.handles.lock().insert(entity_type.to_string(), handle);
    }
}

impl std::fmt::Debug for ChangeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeObserver")
            .field("observed", &self.handles.lock().len())
            .field("deferred", &self.deferred.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastHub;
    use crate::cache::MemoryCache;
    use crate::transport::{ConnectionStatus, MockTransport};
    use keepsync_codec::Value;
    use keepsync_core::{OfflineConfig, RetentionRegistry};
    use keepsync_storage::InMemoryEngine;

    struct Fixture {
        cache: Arc<MemoryCache>,
        mirror: Arc<MirrorStore>,
        transport: Arc<MockTransport>,
        hub: BroadcastHub,
        observer: ChangeObserver,
    }

    fn fixture(config: OfflineConfig) -> Fixture {
        let registry = Arc::new(RetentionRegistry::new(&config));
        registry.register_type("notes");
        let mirror = Arc::new(MirrorStore::new(Arc::new(InMemoryEngine::new()), registry));
        let cache = Arc::new(MemoryCache::new());
        let transport = Arc::new(MockTransport::new());
        let hub = BroadcastHub::default();
        let observer = ChangeObserver::new(
            cache.clone(),
            mirror.clone(),
            transport.clone(),
            Arc::new(hub.join()),
            config.auto_sync,
        );
        Fixture {
            cache,
            mirror,
            transport,
            hub,
            observer,
        }
    }

    fn note(id: &str) -> MirrorDocument {
        MirrorDocument::new(id, vec![("updatedAt", Value::Integer(1))])
    }

    #[test]
    fn hydration_is_not_written_back() {
        let f = fixture(OfflineConfig::new());
        f.mirror.put("notes", &note("a"), None).unwrap();
        let peer = f.hub.join();

        assert_eq!(f.observer.hydrate_and_observe(None).unwrap(), 1);
        assert!(f.cache.get("notes", &EntityId::new("a")).is_some());
        assert!(f.observer.is_observed("notes"));
        assert!(peer.drain().is_empty());
        assert!(f.mirror.list_queued().unwrap().is_empty());
    }

    #[test]
    fn offline_add_is_mirrored_stamped_and_broadcast() {
        let f = fixture(OfflineConfig::new());
        let peer = f.hub.join();
        f.observer.hydrate_and_observe(None).unwrap();

        f.mirror.enqueue("insertNote", vec![Value::from("a")]).unwrap();
        f.cache.insert("notes", note("a"), ChangeContext::live()).unwrap();

        assert!(f.mirror.get("notes", &EntityId::new("a")).unwrap().is_some());
        let queued = f.mirror.list_queued().unwrap();
        assert_eq!(queued[0].entity_type.as_deref(), Some("notes"));
        assert_eq!(queued[0].created_id, Some(EntityId::new("a")));
        assert_eq!(peer.drain().len(), 1);
    }

    #[test]
    fn online_changes_are_mirrored_without_side_effects() {
        let f = fixture(OfflineConfig::new());
        let peer = f.hub.join();
        f.transport.set_status(ConnectionStatus::Connected);
        f.observer.hydrate_and_observe(None).unwrap();

        f.cache.insert("notes", note("a"), ChangeContext::live()).unwrap();
        assert_eq!(f.mirror.count("notes").unwrap(), 1);
        f.cache.remove("notes", &EntityId::new("a"), ChangeContext::live());
        assert_eq!(f.mirror.count("notes").unwrap(), 0);
        assert!(peer.drain().is_empty());
    }

    #[test]
    fn offline_without_auto_sync_leaves_mirror_alone() {
        let f = fixture(OfflineConfig::new().with_auto_sync(false));
        f.observer.hydrate_and_observe(None).unwrap();
        f.cache.insert("notes", note("a"), ChangeContext::live()).unwrap();
        assert_eq!(f.mirror.count("notes").unwrap(), 0);
    }

    #[test]
    fn unsubscribe_removals_keep_mirrored_copies() {
        let f = fixture(OfflineConfig::new());
        f.observer.hydrate_and_observe(None).unwrap();
        f.cache.insert("notes", note("a"), ChangeContext::live()).unwrap();

        f.cache.unsubscribe("notes", &[EntityId::new("a")]);
        assert_eq!(f.mirror.count("notes").unwrap(), 1);
    }

    #[test]
    fn identity_filter_attaches_once() {
        let config = OfflineConfig::new().with_keep_all(false);
        let f = fixture(config.clone());
        f.mirror
            .registry()
            .keep("tasks", config.policy(Filter::eq_identity("owner")))
            .unwrap();
        f.transport.set_status(ConnectionStatus::Connected);
        f.cache
            .insert(
                "tasks",
                MirrorDocument::new("t1", vec![("owner", Value::from("u1"))]),
                ChangeContext::live(),
            )
            .unwrap();

        f.observer.hydrate_and_observe(None).unwrap();
        assert!(f.observer.is_deferred("tasks"));
        assert_eq!(f.cache.observer_count("tasks"), 0);

        assert_eq!(f.observer.on_identity(&EntityId::new("u1")), 1);
        assert_eq!(f.observer.on_identity(&EntityId::new("u1")), 0);
        assert_eq!(f.cache.observer_count("tasks"), 1);
        assert!(f.mirror.get("tasks", &EntityId::new("t1")).unwrap().is_some());
    }
}
