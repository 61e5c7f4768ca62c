//! The authoritative reactive cache the engine observes and feeds.
//!
//! The engine never owns the live query cache; it only needs imperative
//! writes, filtered reads and change notifications. Every write carries a
//! [`ChangeContext`] naming where it came from, so observers can tell their
//! own echoes apart from genuine changes.

use keepsync_core::{EntityId, Filter, MirrorDocument};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors returned by the authoritative cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A document with this id already exists.
    #[error("duplicate id {id} in {entity_type}")]
    DuplicateId {
        /// Entity type name.
        entity_type: String,
        /// Offending id.
        id: String,
    },

    /// No document with this id exists.
    #[error("no document {id} in {entity_type}")]
    NotFound {
        /// Entity type name.
        entity_type: String,
        /// Missing id.
        id: String,
    },
}

/// Where a cache change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// An application write or a server push.
    Live,
    /// A document that already matched when the observer attached.
    Initial,
    /// A write received from another application instance.
    Broadcast,
    /// A document loaded from the mirror at startup.
    Hydration,
    /// A correction made while reconciling with the server.
    Reconcile,
    /// A document dropped because its subscription stopped.
    Unsubscribe,
}

/// Per-change context passed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeContext {
    /// Origin of the change.
    pub origin: ChangeOrigin,
}

impl ChangeContext {
    /// Creates a context.
    pub fn new(origin: ChangeOrigin) -> Self {
        Self { origin }
    }

    /// Context for application writes.
    pub fn live() -> Self {
        Self::new(ChangeOrigin::Live)
    }

    /// Returns true if the change must not be written back to the mirror.
    pub fn suppresses_writeback(&self) -> bool {
        matches!(
            self.origin,
            ChangeOrigin::Broadcast
                | ChangeOrigin::Hydration
                | ChangeOrigin::Reconcile
                | ChangeOrigin::Unsubscribe
        )
    }

    /// Returns true for the initial delivery of an attaching observer.
    pub fn is_initial(&self) -> bool {
        self.origin == ChangeOrigin::Initial
    }
}

impl Default for ChangeContext {
    fn default() -> Self {
        Self::live()
    }
}

/// Receives change notifications for one filtered query.
pub trait CacheObserver: Send + Sync {
    /// A document started matching the query.
    fn added(&self, entity_type: &str, doc: &MirrorDocument, ctx: ChangeContext);

    /// A matching document changed and still matches.
    fn changed(&self, entity_type: &str, doc: &MirrorDocument, ctx: ChangeContext);

    /// A document stopped matching the query or was removed.
    fn removed(&self, entity_type: &str, id: &EntityId, ctx: ChangeContext);
}

/// Handle of an attached observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// The authoritative live query cache.
pub trait ReactiveCache: Send + Sync {
    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::DuplicateId`] if the id is already present.
    fn insert(&self, entity_type: &str, doc: MirrorDocument, ctx: ChangeContext) -> CacheResult<()>;

    /// Replaces an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if the id is absent.
    fn update(&self, entity_type: &str, doc: MirrorDocument, ctx: ChangeContext) -> CacheResult<()>;

    /// Inserts or replaces a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn upsert(&self, entity_type: &str, doc: MirrorDocument, ctx: ChangeContext) -> CacheResult<()> {
        if self.get(entity_type, doc.id()).is_some() {
            self.update(entity_type, doc, ctx)
        } else {
            self.insert(entity_type, doc, ctx)
        }
    }

    /// Removes a document, returning whether it existed.
    fn remove(&self, entity_type: &str, id: &EntityId, ctx: ChangeContext) -> bool;

    /// Reads one document.
    fn get(&self, entity_type: &str, id: &EntityId) -> Option<MirrorDocument>;

    /// Returns every document of `entity_type` matching `filter`.
    fn find(&self, entity_type: &str, filter: &Filter) -> Vec<MirrorDocument>;

    /// Attaches an observer to a filtered query.
    ///
    /// Documents that already match are delivered immediately as
    /// [`ChangeOrigin::Initial`] additions.
    fn observe(
        &self,
        entity_type: &str,
        filter: Filter,
        observer: Arc<dyn CacheObserver>,
    ) -> ObserverHandle;

    /// Detaches an observer. No notifications are emitted.
    fn stop(&self, handle: ObserverHandle);

    /// Holds back notifications for `entity_type` until resumed.
    fn pause(&self, entity_type: &str);

    /// Delivers held notifications for `entity_type` in order.
    fn resume(&self, entity_type: &str);
}

enum Event {
    Added(MirrorDocument),
    Changed(MirrorDocument),
    Removed(EntityId),
}

struct Notification {
    observer: Arc<dyn CacheObserver>,
    entity_type: String,
    event: Event,
    ctx: ChangeContext,
}

impl Notification {
    fn deliver(self) {
        match &self.event {
            Event::Added(doc) => self.observer.added(&self.entity_type, doc, self.ctx),
            Event::Changed(doc) => self.observer.changed(&self.entity_type, doc, self.ctx),
            Event::Removed(id) => self.observer.removed(&self.entity_type, id, self.ctx),
        }
    }
}

struct Subscription {
    handle: ObserverHandle,
    entity_type: String,
    filter: Filter,
    observer: Arc<dyn CacheObserver>,
}

#[derive(Default)]
struct CacheState {
    docs: HashMap<String, BTreeMap<String, MirrorDocument>>,
    subscriptions: Vec<Subscription>,
    paused: HashSet<String>,
    held: Vec<Notification>,
    next_handle: u64,
}

impl CacheState {
    /// Computes notifications for a transition of one document and either
    /// holds or returns them.
    fn notify(
        &mut self,
        entity_type: &str,
        before: Option<&MirrorDocument>,
        after: Option<&MirrorDocument>,
        ctx: ChangeContext,
    ) -> Vec<Notification> {
        let mut out = Vec::new();
        for sub in self.subscriptions.iter().filter(|s| s.entity_type == entity_type) {
            let was = before.is_some_and(|d| sub.filter.matches(d.body()));
            let is = after.is_some_and(|d| sub.filter.matches(d.body()));
            let event = match (was, is, before, after) {
                (false, true, _, Some(doc)) => Event::Added(doc.clone()),
                (true, true, _, Some(doc)) => Event::Changed(doc.clone()),
                (true, false, Some(doc), _) => Event::Removed(doc.id().clone()),
                _ => continue,
            };
            out.push(Notification {
                observer: Arc::clone(&sub.observer),
                entity_type: entity_type.to_string(),
                event,
                ctx,
            });
        }
        if self.paused.contains(entity_type) {
            self.held.extend(out);
            return Vec::new();
        }
        out
    }
}

/// In-memory [`ReactiveCache`].
///
/// Notifications are delivered after the internal lock is released, so
/// observers may call back into the cache.
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops documents whose subscription stopped.
    ///
    /// The documents leave the cache but observers see the removals as
    /// [`ChangeOrigin::Unsubscribe`], so mirrored copies survive.
    pub fn unsubscribe(&self, entity_type: &str, ids: &[EntityId]) -> usize {
        let ctx = ChangeContext::new(ChangeOrigin::Unsubscribe);
        ids.iter()
            .filter(|id| self.remove(entity_type, id, ctx))
            .count()
    }

    /// Number of documents of `entity_type`.
    pub fn len(&self, entity_type: &str) -> usize {
        self.state
            .lock()
            .docs
            .get(entity_type)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if `entity_type` has no documents.
    pub fn is_empty(&self, entity_type: &str) -> bool {
        self.len(entity_type) == 0
    }

    /// Number of attached observers for `entity_type`.
    pub fn observer_count(&self, entity_type: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.entity_type == entity_type)
            .count()
    }

    fn write(
        &self,
        entity_type: &str,
        doc: MirrorDocument,
        ctx: ChangeContext,
        must_exist: bool,
    ) -> CacheResult<()> {
        let pending = {
            let mut state = self.state.lock();
            let docs = state.docs.entry(entity_type.to_string()).or_default();
            let key = doc.id().as_str().to_string();
            let before = docs.get(&key).cloned();
            match (&before, must_exist) {
                (Some(_), false) => {
                    return Err(CacheError::DuplicateId {
                        entity_type: entity_type.to_string(),
                        id: key,
                    })
                }
                (None, true) => {
                    return Err(CacheError::NotFound {
                        entity_type: entity_type.to_string(),
                        id: key,
                    })
                }
                _ => {}
            }
            docs.insert(key, doc.clone());
            state.notify(entity_type, before.as_ref(), Some(&doc), ctx)
        };
        pending.into_iter().for_each(Notification::deliver);
        Ok(())
    }
}

impl ReactiveCache for MemoryCache {
    fn insert(&self, entity_type: &str, doc: MirrorDocument, ctx: ChangeContext) -> CacheResult<()> {
        self.write(entity_type, doc, ctx, false)
    }

    fn update(&self, entity_type: &str, doc: MirrorDocument, ctx: ChangeContext) -> CacheResult<()> {
        self.write(entity_type, doc, ctx, true)
    }

    fn remove(&self, entity_type: &str, id: &EntityId, ctx: ChangeContext) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let Some(before) = state
                .docs
                .get_mut(entity_type)
                .and_then(|docs| docs.remove(id.as_str()))
            else {
                return false;
            };
            state.notify(entity_type, Some(&before), None, ctx)
        };
        pending.into_iter().for_each(Notification::deliver);
        true
    }

    fn get(&self, entity_type: &str, id: &EntityId) -> Option<MirrorDocument> {
        self.state
            .lock()
            .docs
            .get(entity_type)
            .and_then(|docs| docs.get(id.as_str()))
            .cloned()
    }

    fn find(&self, entity_type: &str, filter: &Filter) -> Vec<MirrorDocument> {
        self.state
            .lock()
            .docs
            .get(entity_type)
            .map(|docs| {
                docs.values()
                    .filter(|d| filter.matches(d.body()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn observe(
        &self,
        entity_type: &str,
        filter: Filter,
        observer: Arc<dyn CacheObserver>,
    ) -> ObserverHandle {
        let (handle, initial) = {
            let mut state = self.state.lock();
            state.next_handle += 1;
            let handle = ObserverHandle(state.next_handle);
            let initial: Vec<MirrorDocument> = state
                .docs
                .get(entity_type)
                .map(|docs| {
                    docs.values()
                        .filter(|d| filter.matches(d.body()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            state.subscriptions.push(Subscription {
                handle,
                entity_type: entity_type.to_string(),
                filter,
                observer: Arc::clone(&observer),
            });
            (handle, initial)
        };

        let ctx = ChangeContext::new(ChangeOrigin::Initial);
        for doc in &initial {
            observer.added(entity_type, doc, ctx);
        }
        handle
    }

    fn stop(&self, handle: ObserverHandle) {
        let mut state = self.state.lock();
        state.subscriptions.retain(|s| s.handle != handle);
    }

    fn pause(&self, entity_type: &str) {
        self.state.lock().paused.insert(entity_type.to_string());
    }

    fn resume(&self, entity_type: &str) {
        let pending = {
            let mut state = self.state.lock();
            if !state.paused.remove(entity_type) {
                return;
            }
            let (ready, held) = std::mem::take(&mut state.held)
                .into_iter()
                .partition(|n| n.entity_type == entity_type);
            state.held = held;
            ready
        };
        pending.into_iter().for_each(Notification::deliver);
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryCache")
            .field("types", &state.docs.len())
            .field("subscriptions", &state.subscriptions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_codec::Value;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, String, ChangeOrigin)>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<(String, String, ChangeOrigin)> {
            self.events.lock().clone()
        }
    }

    impl CacheObserver for Recorder {
        fn added(&self, _: &str, doc: &MirrorDocument, ctx: ChangeContext) {
            self.events
                .lock()
                .push(("added".into(), doc.id().to_string(), ctx.origin));
        }

        fn changed(&self, _: &str, doc: &MirrorDocument, ctx: ChangeContext) {
            self.events
                .lock()
                .push(("changed".into(), doc.id().to_string(), ctx.origin));
        }

        fn removed(&self, _: &str, id: &EntityId, ctx: ChangeContext) {
            self.events
                .lock()
                .push(("removed".into(), id.to_string(), ctx.origin));
        }
    }

    fn note(id: &str, owner: &str) -> MirrorDocument {
        MirrorDocument::new(id, vec![("owner", Value::from(owner))])
    }

    #[test]
    fn suppression_by_origin() {
        assert!(!ChangeContext::live().suppresses_writeback());
        assert!(!ChangeContext::new(ChangeOrigin::Initial).suppresses_writeback());
        for origin in [
            ChangeOrigin::Broadcast,
            ChangeOrigin::Hydration,
            ChangeOrigin::Reconcile,
            ChangeOrigin::Unsubscribe,
        ] {
            assert!(ChangeContext::new(origin).suppresses_writeback());
        }
    }

    #[test]
    fn insert_rejects_duplicates() {
        let cache = MemoryCache::new();
        cache.insert("notes", note("a", "u1"), ChangeContext::live()).unwrap();
        let err = cache
            .insert("notes", note("a", "u1"), ChangeContext::live())
            .unwrap_err();
        assert!(matches!(err, CacheError::DuplicateId { .. }));
        let err = cache
            .update("notes", note("b", "u1"), ChangeContext::live())
            .unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }

    #[test]
    fn observer_sees_initial_then_live_changes() {
        let cache = MemoryCache::new();
        cache.insert("notes", note("a", "u1"), ChangeContext::live()).unwrap();

        let recorder = Arc::new(Recorder::default());
        cache.observe("notes", Filter::All, recorder.clone());
        cache.upsert("notes", note("a", "u2"), ChangeContext::live()).unwrap();
        cache.insert("notes", note("b", "u1"), ChangeContext::live()).unwrap();
        assert!(cache.remove("notes", &EntityId::new("a"), ChangeContext::live()));
        assert!(!cache.remove("notes", &EntityId::new("zz"), ChangeContext::live()));

        assert_eq!(
            recorder.events(),
            vec![
                ("added".into(), "a".into(), ChangeOrigin::Initial),
                ("changed".into(), "a".into(), ChangeOrigin::Live),
                ("added".into(), "b".into(), ChangeOrigin::Live),
                ("removed".into(), "a".into(), ChangeOrigin::Live),
            ]
        );
    }

    #[test]
    fn filter_transitions_become_add_and_remove() {
        let cache = MemoryCache::new();
        let recorder = Arc::new(Recorder::default());
        cache.observe("notes", Filter::eq("owner", "u1"), recorder.clone());

        cache.insert("notes", note("a", "u2"), ChangeContext::live()).unwrap();
        cache.update("notes", note("a", "u1"), ChangeContext::live()).unwrap();
        cache.update("notes", note("a", "u2"), ChangeContext::live()).unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                ("added".into(), "a".into(), ChangeOrigin::Live),
                ("removed".into(), "a".into(), ChangeOrigin::Live),
            ]
        );
        assert_eq!(cache.find("notes", &Filter::eq("owner", "u2")).len(), 1);
    }

    #[test]
    fn paused_notifications_are_held_in_order() {
        let cache = MemoryCache::new();
        let recorder = Arc::new(Recorder::default());
        cache.observe("notes", Filter::All, recorder.clone());

        cache.pause("notes");
        cache.insert("notes", note("a", "u1"), ChangeContext::live()).unwrap();
        cache.remove("notes", &EntityId::new("a"), ChangeContext::new(ChangeOrigin::Reconcile));
        assert!(recorder.events().is_empty());

        cache.resume("notes");
        assert_eq!(
            recorder.events(),
            vec![
                ("added".into(), "a".into(), ChangeOrigin::Live),
                ("removed".into(), "a".into(), ChangeOrigin::Reconcile),
            ]
        );
    }

    #[test]
    fn stopped_observer_hears_nothing() {
        let cache = MemoryCache::new();
        let recorder = Arc::new(Recorder::default());
        let handle = cache.observe("notes", Filter::All, recorder.clone());
        assert_eq!(cache.observer_count("notes"), 1);
        cache.stop(handle);
        assert_eq!(cache.observer_count("notes"), 0);
        cache.insert("notes", note("a", "u1"), ChangeContext::live()).unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn unsubscribe_marks_removals() {
        let cache = MemoryCache::new();
        cache.insert("notes", note("a", "u1"), ChangeContext::live()).unwrap();
        let recorder = Arc::new(Recorder::default());
        cache.observe("notes", Filter::All, recorder.clone());

        assert_eq!(cache.unsubscribe("notes", &[EntityId::new("a"), EntityId::new("b")]), 1);
        assert!(cache.is_empty("notes"));
        assert_eq!(
            recorder.events().last().cloned(),
            Some(("removed".into(), "a".into(), ChangeOrigin::Unsubscribe))
        );
    }
}
