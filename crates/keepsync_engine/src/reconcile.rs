//! Remapping of client-assigned ids after replay.

use crate::cache::{ChangeContext, ChangeOrigin, ReactiveCache};
use crate::error::SyncResult;
use keepsync_core::{EntityId, MirrorStore, QueuedOperation, RetryConfig};
use std::sync::Arc;

/// Replaces a temporary id with the one the server assigned.
pub struct IdentifierReconciler {
    cache: Arc<dyn ReactiveCache>,
    mirror: Arc<MirrorStore>,
    retry: RetryConfig,
}

impl IdentifierReconciler {
    /// Creates a reconciler whose corrective deletes follow `retry`.
    pub fn new(cache: Arc<dyn ReactiveCache>, mirror: Arc<MirrorStore>, retry: RetryConfig) -> Self {
        Self {
            cache,
            mirror,
            retry,
        }
    }

    /// Drops the temporary document and rewrites every remaining operation
    /// that mentions `temporary`.
    ///
    /// Only exact value matches are replaced, at any depth of the
    /// arguments. Rewritten operations are persisted. Returns the number of
    /// operations rewritten; equal ids are a no-op.
    ///
    /// `remaining` is rewritten in place even when a storage step fails, so
    /// the rest of the replay always targets the assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror delete exhausts its retries or a
    /// rewritten operation cannot be persisted.
    pub fn reconcile(
        &self,
        entity_type: &str,
        remaining: &mut [QueuedOperation],
        temporary: &EntityId,
        assigned: &EntityId,
    ) -> SyncResult<usize> {
        if temporary == assigned {
            return Ok(0);
        }

        self.cache.remove(
            entity_type,
            temporary,
            ChangeContext::new(ChangeOrigin::Reconcile),
        );
        let removal = self
            .mirror
            .remove_with_retry(entity_type, temporary, &self.retry);

        let target = temporary.to_value();
        let replacement = assigned.to_value();
        let mut rewritten = 0;
        let mut persist_error = None;
        for op in remaining.iter_mut() {
            let replaced: usize = op
                .args
                .iter_mut()
                .map(|arg| arg.replace_value(&target, &replacement))
                .sum();
            if replaced == 0 {
                continue;
            }
            rewritten += 1;
            if let Err(e) = self.mirror.queue().update(op) {
                tracing::warn!(sequence_id = op.sequence_id, error = %e, "failed to persist rewritten operation");
                persist_error.get_or_insert(e);
            }
        }

        tracing::debug!(entity_type, %temporary, %assigned, rewritten, "reconciled identifier");
        removal?;
        match persist_error {
            Some(e) => Err(e.into()),
            None => Ok(rewritten),
        }
    }
}

impl std::fmt::Debug for IdentifierReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierReconciler")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
