//! Reconnect-driven replay and reconciliation.
//!
//! A pass moves `Idle → Replaying → Reconciling → Idle`. It never fails:
//! every error is collected and handed to the [`SyncErrorHandler`].

use crate::cache::{ChangeContext, ChangeOrigin, ReactiveCache};
use crate::error::SyncError;
use crate::reconcile::IdentifierReconciler;
use crate::transport::{CallOptions, Transport};
use keepsync_codec::Value;
use keepsync_core::{now_millis, EntityId, MirrorStore, RetryConfig, ID_FIELD};
use keepsync_protocol::{KeepRequest, KeepResponse, WatermarkEntry, KEEP_METHOD};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass running.
    Idle,
    /// Replaying queued operations.
    Replaying,
    /// Asking the server which retained documents to drop.
    Reconciling,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }
}

/// Statistics over the lifetime of an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes completed.
    pub passes_completed: u64,
    /// Queued operations replayed successfully.
    pub operations_replayed: u64,
    /// Queued operations whose replay failed.
    pub replay_failures: u64,
    /// Temporary ids remapped.
    pub ids_reconciled: u64,
    /// Documents dropped at the server's request.
    pub documents_removed: u64,
    /// When the last pass finished (milliseconds since the Unix epoch).
    pub last_pass_at: Option<i64>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// A queued operation whose replay failed.
#[derive(Debug, Clone)]
pub struct ReplayError {
    /// Operation name.
    pub name: String,
    /// Operation arguments as replayed.
    pub args: Vec<Value>,
    /// What went wrong.
    pub error: String,
}

/// An entity type whose reconciliation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepFailure {
    /// Entity type name.
    pub entity_type: String,
    /// What went wrong.
    pub error: String,
    /// True if the failure was transient and the next pass may succeed
    /// without touching local state.
    pub retryable: bool,
}

impl KeepFailure {
    /// A failure that requires resetting the type.
    pub fn new(entity_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            error: error.into(),
            retryable: false,
        }
    }

    /// A transient failure; the type keeps its documents and watermark.
    pub fn transient(entity_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(entity_type, error)
        }
    }
}

/// Errors collected during one pass.
#[derive(Debug, Clone, Default)]
pub struct SyncErrors {
    /// Replay failures, in queue order.
    pub replay_errors: Vec<ReplayError>,
    /// Reconciliation failures.
    pub keep_errors: Vec<KeepFailure>,
}

impl SyncErrors {
    /// Returns true if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.replay_errors.is_empty() && self.keep_errors.is_empty()
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Operations replayed successfully.
    pub replayed: usize,
    /// Temporary ids remapped.
    pub reconciled_ids: usize,
    /// Documents dropped at the server's request.
    pub removed: usize,
    /// Collected errors.
    pub errors: SyncErrors,
    /// Duration of the pass.
    pub duration: Duration,
}

/// Receives the errors of a pass that had any.
pub trait SyncErrorHandler: Send + Sync {
    /// Handles the collected errors.
    fn handle(&self, errors: &SyncErrors, mirror: &MirrorStore);
}

impl<F> SyncErrorHandler for F
where
    F: Fn(&SyncErrors, &MirrorStore) + Send + Sync,
{
    fn handle(&self, errors: &SyncErrors, mirror: &MirrorStore) {
        self(errors, mirror)
    }
}

type ReloadHook = Box<dyn Fn(&str) + Send + Sync>;

/// Logs replay errors and resets types that failed to reconcile.
///
/// A failed type has its mirrored documents and watermark dropped, so the
/// next pass bootstraps it from scratch; the reload hook lets the
/// application refetch it. Transient failures are only logged: the
/// watermark did not advance, so the next pass asks again.
#[derive(Default)]
pub struct DefaultErrorHandler {
    reload: Option<ReloadHook>,
}

impl DefaultErrorHandler {
    /// Creates a handler without a reload hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hook called with each reset entity type.
    pub fn with_reload(mut self, reload: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.reload = Some(Box::new(reload));
        self
    }
}

impl SyncErrorHandler for DefaultErrorHandler {
    fn handle(&self, errors: &SyncErrors, mirror: &MirrorStore) {
        for e in &errors.replay_errors {
            tracing::error!(operation = %e.name, error = %e.error, "replay failed");
        }
        for e in &errors.keep_errors {
            if e.retryable {
                tracing::warn!(entity_type = %e.entity_type, error = %e.error, "reconciliation interrupted, retrying next pass");
                continue;
            }
            tracing::warn!(entity_type = %e.entity_type, error = %e.error, "reconciliation failed, resetting type");
            if let Err(err) = mirror
                .clear(&e.entity_type)
                .and_then(|()| mirror.watermarks().remove(&e.entity_type))
            {
                tracing::error!(entity_type = %e.entity_type, error = %err, "failed to reset type");
            }
            if let Some(reload) = &self.reload {
                reload(&e.entity_type);
            }
        }
    }
}

impl std::fmt::Debug for DefaultErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultErrorHandler")
            .field("reload", &self.reload.is_some())
            .finish()
    }
}

/// Drives replay of the write queue and reconciliation of retained types.
pub struct SyncOrchestrator {
    cache: Arc<dyn ReactiveCache>,
    mirror: Arc<MirrorStore>,
    transport: Arc<dyn Transport>,
    reconciler: IdentifierReconciler,
    retry: RetryConfig,
    state: RwLock<SyncState>,
    in_flight: AtomicBool,
    stats: RwLock<SyncStats>,
    handler: RwLock<Arc<dyn SyncErrorHandler>>,
}

/// Returns the orchestrator to `Idle` however the pass ends.
struct PassGuard<'a>(&'a SyncOrchestrator);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        *self.0.state.write() = SyncState::Idle;
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator with the [`DefaultErrorHandler`].
    pub fn new(
        cache: Arc<dyn ReactiveCache>,
        mirror: Arc<MirrorStore>,
        transport: Arc<dyn Transport>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            reconciler: IdentifierReconciler::new(
                Arc::clone(&cache),
                Arc::clone(&mirror),
                retry.clone(),
            ),
            cache,
            mirror,
            transport,
            retry,
            state: RwLock::new(SyncState::Idle),
            in_flight: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            handler: RwLock::new(Arc::new(DefaultErrorHandler::new())),
        }
    }

    /// Replaces the error handler.
    pub fn set_error_handler(&self, handler: Arc<dyn SyncErrorHandler>) {
        *self.handler.write() = handler;
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Returns true while a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Lifetime statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one pass. Returns `None` if a pass is already running.
    pub fn run_pass(&self) -> Option<SyncReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sync pass already running");
            return None;
        }
        let _guard = PassGuard(self);
        let start = Instant::now();
        self.set_state(SyncState::Replaying);

        let marks: HashMap<String, i64> = match self.mirror.watermarks().all() {
            Ok(marks) => marks.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read watermarks");
                HashMap::new()
            }
        };

        let mut errors = SyncErrors::default();
        let (replayed, reconciled_ids) = self.replay(&mut errors);

        self.set_state(SyncState::Reconciling);
        let removed = self.reconcile_retained(&marks, &mut errors);

        let report = SyncReport {
            replayed,
            reconciled_ids,
            removed,
            errors,
            duration: start.elapsed(),
        };
        self.record(&report);
        tracing::info!(
            replayed,
            reconciled_ids,
            removed,
            replay_errors = report.errors.replay_errors.len(),
            keep_errors = report.errors.keep_errors.len(),
            "sync pass finished"
        );

        if !report.errors.is_empty() {
            let handler = Arc::clone(&*self.handler.read());
            handler.handle(&report.errors, &self.mirror);
        }
        Some(report)
    }

    fn record(&self, report: &SyncReport) {
        let mut stats = self.stats.write();
        stats.passes_completed += 1;
        stats.operations_replayed += report.replayed as u64;
        stats.replay_failures += report.errors.replay_errors.len() as u64;
        stats.ids_reconciled += report.reconciled_ids as u64;
        stats.documents_removed += report.removed as u64;
        stats.last_pass_at = Some(now_millis());
        let last = report
            .errors
            .replay_errors
            .last()
            .map(|e| e.error.clone())
            .or_else(|| report.errors.keep_errors.last().map(|e| e.error.clone()));
        if last.is_some() {
            stats.last_error = last;
        }
    }

    /// Replays a snapshot of the queue. Every attempted entry is dequeued.
    fn replay(&self, errors: &mut SyncErrors) -> (usize, usize) {
        let mut ops = match self.mirror.list_queued() {
            Ok(ops) => ops,
            Err(e) => {
                tracing::error!(error = %e, "failed to read write queue");
                return (0, 0);
            }
        };
        if ops.is_empty() {
            return (0, 0);
        }

        let touched: BTreeSet<String> = ops.iter().filter_map(|op| op.entity_type.clone()).collect();
        for entity_type in &touched {
            self.cache.pause(entity_type);
        }
        tracing::info!(operations = ops.len(), "replaying write queue");

        let mut replayed = 0;
        let mut reconciled = 0;
        for i in 0..ops.len() {
            let (done, rest) = ops.split_at_mut(i + 1);
            let op = &done[i];

            match self.transport.call(&op.name, &op.args, CallOptions::no_retry()) {
                Ok(result) => {
                    replayed += 1;
                    if let (Some(temporary), Some(entity_type), Some(assigned)) =
                        (&op.created_id, &op.entity_type, assigned_id(&result))
                    {
                        match self.reconciler.reconcile(entity_type, rest, temporary, &assigned) {
                            Ok(_) if *temporary != assigned => reconciled += 1,
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!(%temporary, %assigned, error = %e, "identifier reconciliation failed");
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(operation = %op.name, error = %e, "replay failed");
                    errors.replay_errors.push(ReplayError {
                        name: op.name.clone(),
                        args: op.args.clone(),
                        error: e.to_string(),
                    });
                }
            }

            let sequence_id = op.sequence_id;
            if let Err((attempts, e)) = self.retry.run(|_| self.mirror.dequeue(sequence_id)) {
                tracing::error!(sequence_id, attempts, error = %e, "failed to dequeue replayed operation");
            }
        }

        for entity_type in &touched {
            self.cache.resume(entity_type);
        }
        (replayed, reconciled)
    }

    /// Asks the server which retained documents no longer match their
    /// filters and drops them. Returns the number of documents removed.
    fn reconcile_retained(&self, marks: &HashMap<String, i64>, errors: &mut SyncErrors) -> usize {
        let filtered = self.mirror.registry().filtered_types();
        if filtered.is_empty() {
            return 0;
        }

        let request = KeepRequest::new(
            filtered
                .iter()
                .filter_map(|(name, _)| marks.get(name).map(|at| WatermarkEntry::new(name.as_str(), *at)))
                .collect(),
        );
        let response = self
            .transport
            .call(KEEP_METHOD, &request.to_args(), CallOptions::default())
            .and_then(|value| KeepResponse::from_value(&value).map_err(SyncError::from));
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, retryable = e.is_retryable(), "reconciliation call failed");
                let retryable = e.is_retryable();
                errors
                    .keep_errors
                    .extend(filtered.into_iter().map(|(entity_type, _)| {
                        if retryable {
                            KeepFailure::transient(entity_type, e.to_string())
                        } else {
                            KeepFailure::new(entity_type, e.to_string())
                        }
                    }));
                return 0;
            }
        };

        let ctx = ChangeContext::new(ChangeOrigin::Reconcile);
        let mut removed = 0;
        let mut advanced = Vec::new();
        for synced in response.synced {
            let ids: Vec<EntityId> = synced.remove_ids.iter().map(|id| EntityId::new(id.as_str())).collect();
            for id in &ids {
                self.cache.remove(&synced.entity_type, id, ctx);
            }
            match self.mirror.remove_many(&synced.entity_type, &ids) {
                Ok(()) => {
                    removed += ids.len();
                    advanced.push((synced.entity_type, synced.new_watermark));
                }
                Err(e) => errors
                    .keep_errors
                    .push(KeepFailure::new(synced.entity_type, e.to_string())),
            }
        }
        if let Err(e) = self.mirror.watermarks().set_many(&advanced) {
            tracing::error!(error = %e, "failed to advance watermarks");
            errors.keep_errors.extend(
                advanced
                    .into_iter()
                    .map(|(entity_type, _)| KeepFailure::new(entity_type, e.to_string())),
            );
        }

        errors.keep_errors.extend(
            response
                .errors
                .into_iter()
                .map(|e| KeepFailure::new(e.entity_type, e.error)),
        );
        removed
    }
}

/// Extracts a server-assigned id from an operation result: either the id
/// itself or a document carrying it.
fn assigned_id(result: &Value) -> Option<EntityId> {
    EntityId::from_value(result).or_else(|| result.get(ID_FIELD).and_then(EntityId::from_value))
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
