//! Offline continuity scenarios against an in-process server.

use keepsync_codec::Value;
use keepsync_core::{
    EntityId, Filter, MirrorDocument, MirrorStore, OfflineConfig, RetryConfig, SortKey,
    WATERMARK_STORE,
};
use keepsync_engine::{
    BroadcastHub, CallOutcome, ChangeContext, ConnectionStatus, MemoryCache, MockTransport,
    OfflineClient, ReactiveCache, SyncError, SyncErrors, Transport,
};
use keepsync_server::{
    CallContext, KeepHandler, MemorySource, MethodRegistry, ServerConfig, ServerError,
};
use keepsync_storage::{
    FileEngine, InMemoryEngine, StorageEngine, StorageError, StorageResult, WriteBatch,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A server that assigns its own ids and pushes every write to the
/// subscribed client cache.
struct Server {
    source: Arc<MemorySource>,
    registry: Arc<MethodRegistry>,
}

impl Server {
    fn new(config: ServerConfig, subscriber: Arc<MemoryCache>) -> Self {
        let source = Arc::new(MemorySource::new());
        let registry = Arc::new(MethodRegistry::new(KeepHandler::new(config, source.clone())));
        let next_id = Arc::new(AtomicU64::new(0));

        let (store, cache, ids) = (source.clone(), subscriber.clone(), next_id);
        registry
            .register("insertNote", move |_, args| {
                let text = args
                    .first()
                    .and_then(|doc| doc.get("text"))
                    .cloned()
                    .ok_or_else(|| ServerError::InvalidRequest("missing text".into()))?;
                let id = format!("S{}", ids.fetch_add(1, Ordering::Relaxed));
                let doc = MirrorDocument::new(id.as_str(), vec![("text", text)]);
                store.put("notes", doc.clone());
                cache
                    .upsert("notes", doc, ChangeContext::live())
                    .map_err(|e| ServerError::Internal(e.to_string()))?;
                Ok(Value::from(id))
            })
            .unwrap();

        let (store, cache) = (source.clone(), subscriber);
        registry
            .register("updateNote", move |_, args| {
                let id = args
                    .first()
                    .and_then(EntityId::from_value)
                    .ok_or_else(|| ServerError::InvalidRequest("missing id".into()))?;
                let text = args.get(1).cloned().unwrap_or(Value::Null);
                if store.get("notes", &id).is_none() {
                    return Err(ServerError::InvalidRequest(format!("no note {id}")));
                }
                let doc = MirrorDocument::new(id, vec![("text", text)]);
                store.put("notes", doc.clone());
                cache
                    .upsert("notes", doc, ChangeContext::live())
                    .map_err(|e| ServerError::Internal(e.to_string()))?;
                Ok(Value::Null)
            })
            .unwrap();

        Self { source, registry }
    }

    /// Routes transport calls of an authenticated client to this server.
    fn serve(&self, transport: &MockTransport, identity: &str) {
        let registry = self.registry.clone();
        let ctx = CallContext::authenticated(identity);
        transport.set_handler(move |name, args| {
            registry
                .call(&ctx, name, args)
                .map_err(|e| SyncError::Server(e.to_string()))
        });
    }
}

/// An in-memory engine that can be told to reject commits to one store.
#[derive(Default)]
struct FailingEngine {
    inner: InMemoryEngine,
    failing: Mutex<Option<String>>,
}

impl FailingEngine {
    fn fail(&self, store: &str) {
        *self.failing.lock() = Some(store.to_string());
    }

    fn check(&self, store: &str) -> StorageResult<()> {
        if self.failing.lock().as_deref() == Some(store) {
            return Err(StorageError::Unavailable(store.to_string()));
        }
        Ok(())
    }
}

impl StorageEngine for FailingEngine {
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
        self.check(store)?;
        self.inner.commit(store, batch)
    }
    fn append(&self, store: &str, value: &[u8]) -> StorageResult<u64> {
        self.check(store)?;
        self.inner.append(store, value)
    }
    fn clear(&self, store: &str) -> StorageResult<()> {
        self.check(store)?;
        self.inner.clear(store)
    }
    fn store_names(&self) -> StorageResult<Vec<String>> {
        self.inner.store_names()
    }
}

struct Instance {
    cache: Arc<MemoryCache>,
    transport: Arc<MockTransport>,
    client: OfflineClient,
}

fn instance(config: OfflineConfig, engine: Arc<dyn StorageEngine>, hub: &BroadcastHub) -> Instance {
    let cache = Arc::new(MemoryCache::new());
    let transport = Arc::new(MockTransport::new());
    let client = OfflineClient::new(config, engine, cache.clone(), transport.clone(), hub);
    Instance {
        cache,
        transport,
        client,
    }
}

fn text_of(mirror: &MirrorStore, id: &str) -> Option<Value> {
    mirror
        .get("notes", &EntityId::new(id))
        .unwrap()
        .and_then(|doc| doc.get("text").cloned())
}

fn go_online(instance: &Instance, identity: &str) {
    instance.transport.set_identity(Some(EntityId::new(identity)));
    instance.transport.set_status(ConnectionStatus::Connected);
}

#[test]
fn notes_keep_the_two_most_recent() {
    let config = OfflineConfig::new()
        .with_sort(SortKey::descending("createdAt"))
        .with_limit(2);
    let app = instance(config, Arc::new(InMemoryEngine::new()), &BroadcastHub::default());
    app.transport.set_status(ConnectionStatus::Connected);
    app.client.register_type("notes").unwrap();
    app.client.start().unwrap();

    for (id, at) in [("n1", 1), ("n2", 2), ("n3", 3), ("n4", 4)] {
        let doc = MirrorDocument::new(id, vec![("createdAt", Value::Integer(at))]);
        app.cache.insert("notes", doc, ChangeContext::live()).unwrap();
    }

    let mut kept: Vec<String> = app
        .client
        .mirror()
        .get_all("notes")
        .unwrap()
        .into_iter()
        .map(|doc| doc.id().to_string())
        .collect();
    kept.sort();
    assert_eq!(kept, vec!["n3", "n4"]);
}

#[test]
fn offline_insert_then_update_is_remapped() {
    let app = instance(
        OfflineConfig::new(),
        Arc::new(InMemoryEngine::new()),
        &BroadcastHub::default(),
    );
    let server = Server::new(ServerConfig::new(), app.cache.clone());
    server.serve(&app.transport, "u1");
    app.client.register_type("notes").unwrap();
    app.client.start().unwrap();

    // Offline: queue the calls, then apply their local effects.
    let draft = Value::object(vec![("_id", Value::from("A")), ("text", Value::from("draft"))]);
    let queued = app.client.call("insertNote", vec![draft.clone()]).unwrap();
    assert!(matches!(queued, CallOutcome::Queued(Some(_))));
    app.cache
        .insert("notes", MirrorDocument::from_value(draft).unwrap(), ChangeContext::live())
        .unwrap();

    app.client
        .call("updateNote", vec![Value::from("A"), Value::from("final")])
        .unwrap();
    let edited = MirrorDocument::new("A", vec![("text", Value::from("final"))]);
    app.cache.update("notes", edited, ChangeContext::live()).unwrap();

    let queue = app.client.mirror().list_queued().unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].created_id, Some(EntityId::new("A")));
    assert_eq!(text_of(app.client.mirror(), "A"), Some(Value::from("final")));

    go_online(&app, "u1");
    let report = app.client.poll().unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(report.reconciled_ids, 1);
    assert!(report.errors.is_empty());

    let a = EntityId::new("A");
    let b = EntityId::new("S0");
    assert!(app.cache.get("notes", &a).is_none());
    assert!(app.client.mirror().get("notes", &a).unwrap().is_none());
    assert_eq!(text_of(app.client.mirror(), "S0"), Some(Value::from("final")));
    assert_eq!(
        server.source.get("notes", &b).and_then(|d| d.get("text").cloned()),
        Some(Value::from("final"))
    );
    assert!(app.client.mirror().list_queued().unwrap().is_empty());
    assert_eq!(app.client.stats().ids_reconciled, 1);
}

#[test]
fn second_instance_sees_offline_write_via_broadcast() {
    let engine: Arc<dyn StorageEngine> = Arc::new(InMemoryEngine::new());
    let hub = BroadcastHub::default();
    let first = instance(OfflineConfig::new(), engine.clone(), &hub);
    let second = instance(OfflineConfig::new(), engine, &hub);
    for app in [&first, &second] {
        app.client.register_type("notes").unwrap();
        app.client.start().unwrap();
    }

    first.client.call("insertNote", vec![Value::from("hi")]).unwrap();
    let doc = MirrorDocument::new("n1", vec![("text", Value::from("hi"))]);
    first.cache.insert("notes", doc, ChangeContext::live()).unwrap();

    assert!(second.client.poll().is_none());
    assert!(second.cache.get("notes", &EntityId::new("n1")).is_some());
    assert!(second.transport.calls().is_empty());
    assert_eq!(second.client.mirror().list_queued().unwrap().len(), 1);
    assert!(first.client.poll().is_none());
}

#[test]
fn identity_placeholder_defers_one_observer() {
    let config = OfflineConfig::new().with_keep_all(false);
    let app = instance(config.clone(), Arc::new(InMemoryEngine::new()), &BroadcastHub::default());
    let policy = config.policy(Filter::eq_identity("owner"));
    app.client.keep("tasks", policy.clone()).unwrap();

    let server_config = ServerConfig::new()
        .with_kept("tasks", policy)
        .with_clock(|| 77);
    let server = Server::new(server_config, app.cache.clone());
    server.serve(&app.transport, "u1");

    app.client.start().unwrap();
    assert!(app.client.observer().is_deferred("tasks"));
    assert_eq!(app.cache.observer_count("tasks"), 0);

    go_online(&app, "u1");
    app.client.poll();
    app.transport.set_identity(Some(EntityId::new("u1")));
    app.client.poll();
    assert_eq!(app.cache.observer_count("tasks"), 1);
    assert_eq!(app.client.mirror().get_watermark("tasks").unwrap(), Some(77));

    for (id, owner) in [("t1", "u1"), ("t2", "u2")] {
        let doc = MirrorDocument::new(id, vec![("owner", Value::from(owner))]);
        app.cache.insert("tasks", doc, ChangeContext::live()).unwrap();
    }
    let mirrored = app.client.mirror().get_all("tasks").unwrap();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].id(), &EntityId::new("t1"));
}

#[test]
fn empty_queue_pass_leaves_watermarks() {
    let app = instance(
        OfflineConfig::new(),
        Arc::new(InMemoryEngine::new()),
        &BroadcastHub::default(),
    );
    app.transport.set_handler(|_, _| Ok(Value::Null));
    app.client.mirror().set_watermark("notes", 12).unwrap();
    app.client.start().unwrap();

    go_online(&app, "u1");
    let report = app.client.poll().unwrap();
    assert_eq!(report.replayed, 0);
    assert!(app.transport.calls().is_empty());
    assert_eq!(app.client.mirror().get_watermark("notes").unwrap(), Some(12));
}

#[test]
fn replay_errors_reach_the_handler() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let app = instance(
        OfflineConfig::new(),
        Arc::new(InMemoryEngine::new()),
        &BroadcastHub::default(),
    );
    let client = app.client.with_error_handler(move |errors: &SyncErrors, _: &MirrorStore| {
        sink.lock()
            .extend(errors.replay_errors.iter().map(|e| e.name.clone()));
    });
    let server = Server::new(ServerConfig::new(), app.cache.clone());
    server.serve(&app.transport, "u1");

    client
        .call("updateNote", vec![Value::from("missing"), Value::from("x")])
        .unwrap();
    app.transport.set_identity(Some(EntityId::new("u1")));
    app.transport.set_status(ConnectionStatus::Connected);
    let report = client.poll().unwrap();

    assert_eq!(report.errors.replay_errors.len(), 1);
    assert_eq!(*seen.lock(), vec!["updateNote".to_string()]);
    assert!(client.mirror().list_queued().unwrap().is_empty());
}

#[test]
fn stopped_subscription_keeps_mirror() {
    let app = instance(
        OfflineConfig::new(),
        Arc::new(InMemoryEngine::new()),
        &BroadcastHub::default(),
    );
    app.client.register_type("notes").unwrap();
    app.client.start().unwrap();
    app.transport.set_status(ConnectionStatus::Connected);
    let doc = MirrorDocument::new("n1", vec![("text", Value::from("hi"))]);
    app.cache.insert("notes", doc, ChangeContext::live()).unwrap();

    app.transport.set_status(ConnectionStatus::Offline);
    app.cache.unsubscribe("notes", &[EntityId::new("n1")]);
    assert!(app.cache.is_empty("notes"));
    assert_eq!(app.client.mirror().count("notes").unwrap(), 1);
}

#[test]
fn restart_hydrates_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = Arc::new(FileEngine::open(dir.path()).unwrap());
        let app = instance(OfflineConfig::new(), engine, &BroadcastHub::default());
        app.client.register_type("notes").unwrap();
        app.client.start().unwrap();
        app.client.call("insertNote", vec![Value::from("hi")]).unwrap();
        let doc = MirrorDocument::new("n1", vec![("text", Value::from("hi"))]);
        app.cache.insert("notes", doc, ChangeContext::live()).unwrap();
    }

    let engine = Arc::new(FileEngine::open(dir.path()).unwrap());
    let app = instance(OfflineConfig::new(), engine, &BroadcastHub::default());
    app.client.register_type("notes").unwrap();
    app.client.start().unwrap();
    assert!(app.cache.get("notes", &EntityId::new("n1")).is_some());

    let queue = app.client.mirror().list_queued().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].entity_type.as_deref(), Some("notes"));
    assert!(app.transport.identity().is_none());
}

#[test]
fn remap_survives_a_failed_corrective_delete() {
    let engine = Arc::new(FailingEngine::default());
    let config = OfflineConfig::new().with_retry(RetryConfig::no_retry());
    let app = instance(config, engine.clone(), &BroadcastHub::default());
    let server = Server::new(ServerConfig::new(), app.cache.clone());
    server.serve(&app.transport, "u1");
    app.client.register_type("notes").unwrap();
    app.client.start().unwrap();

    let draft = Value::object(vec![("_id", Value::from("A")), ("text", Value::from("draft"))]);
    app.client.call("insertNote", vec![draft.clone()]).unwrap();
    app.cache
        .insert("notes", MirrorDocument::from_value(draft).unwrap(), ChangeContext::live())
        .unwrap();
    app.client
        .call("updateNote", vec![Value::from("A"), Value::from("final")])
        .unwrap();

    engine.fail("docs.notes");
    go_online(&app, "u1");
    let report = app.client.poll().unwrap();

    assert!(report.errors.replay_errors.is_empty());
    let calls = app.transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].0, "updateNote");
    assert_eq!(calls[1].1, vec![Value::from("S0"), Value::from("final")]);
    assert_eq!(
        server
            .source
            .get("notes", &EntityId::new("S0"))
            .and_then(|d| d.get("text").cloned()),
        Some(Value::from("final"))
    );
    assert!(app.cache.get("notes", &EntityId::new("A")).is_none());
    assert!(app.client.mirror().list_queued().unwrap().is_empty());
}

#[test]
fn replay_and_reconcile_in_one_pass() {
    let config = OfflineConfig::new();
    let policy = config.policy(Filter::eq("done", false));
    let engine = Arc::new(FailingEngine::default());
    let app = instance(config, engine.clone(), &BroadcastHub::default());
    let failures: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    let client = app.client.with_error_handler(move |errors: &SyncErrors, _: &MirrorStore| {
        sink.lock().extend(
            errors
                .keep_errors
                .iter()
                .map(|e| (e.entity_type.clone(), e.retryable)),
        );
    });

    let server_config = ServerConfig::new()
        .with_kept("tasks", policy.clone())
        .with_clock(|| 42);
    let server = Server::new(server_config, app.cache.clone());
    server.serve(&app.transport, "u1");

    client.keep("tasks", policy).unwrap();
    client.register_type("notes").unwrap();
    let stale = MirrorDocument::new(
        "t1",
        vec![("done", Value::from(false)), ("updatedAt", Value::Integer(1))],
    );
    client.mirror().put("tasks", &stale, None).unwrap();
    client.mirror().set_watermark("tasks", 5).unwrap();
    server.source.put(
        "tasks",
        MirrorDocument::new(
            "t1",
            vec![("done", Value::from(true)), ("updatedAt", Value::Integer(10))],
        ),
    );
    client.start().unwrap();
    assert!(app.cache.get("tasks", &EntityId::new("t1")).is_some());

    let draft = Value::object(vec![("_id", Value::from("A")), ("text", Value::from("hi"))]);
    client.call("insertNote", vec![draft.clone()]).unwrap();
    app.cache
        .insert("notes", MirrorDocument::from_value(draft).unwrap(), ChangeContext::live())
        .unwrap();

    engine.fail(WATERMARK_STORE);
    app.transport.set_identity(Some(EntityId::new("u1")));
    app.transport.set_status(ConnectionStatus::Connected);
    let report = client.poll().unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(report.reconciled_ids, 1);
    assert_eq!(report.removed, 1);
    assert!(app.cache.get("tasks", &EntityId::new("t1")).is_none());
    assert!(client.mirror().get("tasks", &EntityId::new("t1")).unwrap().is_none());
    // Delivered once the replay resumed the paused observer.
    assert!(client.mirror().get("notes", &EntityId::new("S0")).unwrap().is_some());
    assert!(client.mirror().get("notes", &EntityId::new("A")).unwrap().is_none());

    assert_eq!(*failures.lock(), vec![("tasks".to_string(), false)]);
    assert_eq!(client.mirror().get_watermark("tasks").unwrap(), Some(5));
}

#[test]
fn hydration_skips_documents_already_cached() {
    let app = instance(
        OfflineConfig::new(),
        Arc::new(InMemoryEngine::new()),
        &BroadcastHub::default(),
    );
    app.client.register_type("notes").unwrap();
    for id in ["n1", "n2"] {
        let doc = MirrorDocument::new(id, vec![("text", Value::from("mirrored"))]);
        app.client.mirror().put("notes", &doc, None).unwrap();
    }
    let pushed = MirrorDocument::new("n1", vec![("text", Value::from("pushed"))]);
    app.cache.insert("notes", pushed, ChangeContext::live()).unwrap();

    app.client.start().unwrap();

    assert_eq!(app.cache.observer_count("notes"), 1);
    assert_eq!(
        app.cache
            .get("notes", &EntityId::new("n1"))
            .and_then(|d| d.get("text").cloned()),
        Some(Value::from("pushed"))
    );
    assert!(app.cache.get("notes", &EntityId::new("n2")).is_some());
}
