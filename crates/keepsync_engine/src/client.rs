//! The offline client: wiring of mirror, observer, broadcast and sync.

use crate::broadcast::{apply_broadcast, BroadcastChannel, BroadcastHub};
use crate::cache::ReactiveCache;
use crate::error::SyncResult;
use crate::observer::ChangeObserver;
use crate::orchestrator::{SyncErrorHandler, SyncOrchestrator, SyncReport, SyncState, SyncStats};
use crate::transport::{CallOptions, ConnectionStatus, Signal, Transport};
use keepsync_codec::Value;
use keepsync_core::{
    MirrorStore, OfflineConfig, QueuedOperation, RetentionPolicy, RetentionRegistry,
};
use keepsync_storage::StorageEngine;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Result of [`OfflineClient::call`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The server ran the operation.
    Completed(Value),
    /// The instance is offline; the operation was queued if queueable.
    Queued(Option<QueuedOperation>),
}

/// Offline continuity for one application instance.
///
/// The client is driven by [`poll`](Self::poll): it applies broadcasts
/// from peer instances and starts a sync pass when the transport becomes
/// connected with an authenticated identity.
///
/// Offline writes follow the usual order: [`call`](Self::call) queues the
/// operation, then the application applies its local effect to the cache,
/// which stamps the queued operation with the type and created id.
pub struct OfflineClient {
    config: OfflineConfig,
    mirror: Arc<MirrorStore>,
    cache: Arc<dyn ReactiveCache>,
    transport: Arc<dyn Transport>,
    channel: Arc<BroadcastChannel>,
    observer: ChangeObserver,
    orchestrator: SyncOrchestrator,
    signal: Mutex<watch::Receiver<Signal>>,
    last_signal: Mutex<Signal>,
    sync_pending: AtomicBool,
    started: AtomicBool,
}

impl OfflineClient {
    /// Creates a client over the given collaborators.
    pub fn new(
        config: OfflineConfig,
        engine: Arc<dyn StorageEngine>,
        cache: Arc<dyn ReactiveCache>,
        transport: Arc<dyn Transport>,
        hub: &BroadcastHub,
    ) -> Self {
        let registry = Arc::new(RetentionRegistry::new(&config));
        let mirror = Arc::new(MirrorStore::new(engine, registry));
        let channel = Arc::new(hub.join());
        let observer = ChangeObserver::new(
            Arc::clone(&cache),
            Arc::clone(&mirror),
            Arc::clone(&transport),
            Arc::clone(&channel),
            config.auto_sync,
        );
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&cache),
            Arc::clone(&mirror),
            Arc::clone(&transport),
            config.retry.clone(),
        );
        let signal = transport.signal();

        Self {
            config,
            mirror,
            cache,
            transport,
            channel,
            observer,
            orchestrator,
            signal: Mutex::new(signal),
            last_signal: Mutex::new(Signal::offline()),
            sync_pending: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Replaces the handler receiving sync errors.
    #[must_use]
    pub fn with_error_handler(self, handler: impl SyncErrorHandler + 'static) -> Self {
        self.orchestrator.set_error_handler(Arc::new(handler));
        self
    }

    /// The configuration.
    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    /// The mirror store.
    pub fn mirror(&self) -> &Arc<MirrorStore> {
        &self.mirror
    }

    /// The retention registry.
    pub fn registry(&self) -> &Arc<RetentionRegistry> {
        self.mirror.registry()
    }

    /// The change observer.
    pub fn observer(&self) -> &ChangeObserver {
        &self.observer
    }

    /// Keeps `entity_type` with an explicit policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the type was already kept explicitly, or if a
    /// started client cannot hydrate it.
    pub fn keep(&self, entity_type: &str, policy: RetentionPolicy) -> SyncResult<()> {
        self.registry().keep(entity_type, policy)?;
        self.observe_if_started(entity_type)
    }

    /// Announces an entity type the application uses. Under keep-all it
    /// is retained with the default policy.
    ///
    /// # Errors
    ///
    /// Returns an error if a started client cannot hydrate it.
    pub fn register_type(&self, entity_type: &str) -> SyncResult<()> {
        self.registry().register_type(entity_type);
        self.observe_if_started(entity_type)
    }

    fn observe_if_started(&self, entity_type: &str) -> SyncResult<()> {
        if self.started.load(Ordering::Acquire) {
            self.observer
                .observe_type(entity_type, self.transport.identity().as_ref())?;
        }
        Ok(())
    }

    /// Hydrates the cache from the mirror and starts observing. Later
    /// calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror cannot be read.
    pub fn start(&self) -> SyncResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let identity = self.transport.identity();
        self.observer.hydrate_and_observe(identity.as_ref())?;
        tracing::info!(
            types = self.registry().retained_types().len(),
            "offline client started"
        );
        Ok(())
    }

    /// Processes pending signal changes and broadcasts.
    ///
    /// Returns the report of the sync pass this poll ran, if any.
    pub fn poll(&self) -> Option<SyncReport> {
        for message in self.channel.drain() {
            if let Err(e) = apply_broadcast(self.cache.as_ref(), &message) {
                tracing::warn!(entity_type = %message.entity_type, error = %e, "ignoring broadcast");
            }
        }

        let current = self.signal.lock().borrow_and_update().clone();
        {
            let mut last = self.last_signal.lock();
            if current.status == ConnectionStatus::Connected
                && last.status != ConnectionStatus::Connected
            {
                tracing::debug!("transport connected");
                self.sync_pending.store(true, Ordering::Release);
            }
            if let Some(identity) = current.identity.as_ref().filter(|id| last.identity.as_ref() != Some(*id)) {
                tracing::debug!(%identity, "identity changed");
                if self.started.load(Ordering::Acquire) {
                    self.observer.on_identity(identity);
                }
                self.sync_pending.store(true, Ordering::Release);
            }
            *last = current.clone();
        }

        if current.status == ConnectionStatus::Connected
            && current.identity.is_some()
            && self.sync_pending.swap(false, Ordering::AcqRel)
        {
            return self.orchestrator.run_pass();
        }
        None
    }

    /// Runs a sync pass now if connected with an identity.
    pub fn sync_now(&self) -> Option<SyncReport> {
        if self.transport.status() != ConnectionStatus::Connected
            || self.transport.identity().is_none()
        {
            tracing::debug!("sync skipped, not connected or not authenticated");
            return None;
        }
        self.orchestrator.run_pass()
    }

    /// Invokes a server operation, or queues it while offline.
    ///
    /// # Errors
    ///
    /// Returns the server's error when online, or a storage error when the
    /// operation cannot be queued.
    pub fn call(&self, name: &str, args: Vec<Value>) -> SyncResult<CallOutcome> {
        if self.transport.status().is_offline() {
            return Ok(CallOutcome::Queued(self.queue_operation(name, args)?));
        }
        self.transport
            .call(name, &args, CallOptions::default())
            .map(CallOutcome::Completed)
    }

    /// Queues an operation for replay if it is queueable.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be written.
    pub fn queue_operation(&self, name: &str, args: Vec<Value>) -> SyncResult<Option<QueuedOperation>> {
        Ok(self.mirror.enqueue(name, args)?)
    }

    /// Returns true while a sync pass is running.
    pub fn is_syncing(&self) -> bool {
        self.orchestrator.is_syncing()
    }

    /// Current orchestrator state.
    pub fn state(&self) -> SyncState {
        self.orchestrator.state()
    }

    /// Lifetime sync statistics.
    pub fn stats(&self) -> SyncStats {
        self.orchestrator.stats()
    }

    /// Drops every mirrored document of `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear(&self, entity_type: &str) -> SyncResult<()> {
        Ok(self.mirror.clear(entity_type)?)
    }

    /// Drops every mirrored document, queued operation and watermark.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn clear_all(&self) -> SyncResult<()> {
        Ok(self.mirror.clear_all()?)
    }
}

impl std::fmt::Debug for OfflineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineClient")
            .field("instance", &self.channel.instance())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}
