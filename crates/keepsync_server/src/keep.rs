//! The reserved `_keep` reconciliation method.
//!
//! For every filtered type the client reports a watermark for, the handler
//! returns the ids of documents changed since that watermark that no longer
//! match the retention filter. Types without a watermark, or every type
//! when the request is empty, are bootstrapped with no removals and a
//! fresh watermark.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::source::DocumentSource;
use keepsync_core::{EntityId, Filter};
use keepsync_protocol::{KeepError, KeepRequest, KeepResponse, SyncedType};
use std::sync::Arc;

/// Answers reconciliation requests.
pub struct KeepHandler {
    config: ServerConfig,
    source: Arc<dyn DocumentSource>,
}

impl KeepHandler {
    /// Creates a handler.
    pub fn new(config: ServerConfig, source: Arc<dyn DocumentSource>) -> Self {
        Self { config, source }
    }

    /// The configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles one request on behalf of `identity`.
    ///
    /// Failures are reported per type; the call itself never fails.
    pub fn handle(&self, identity: Option<&EntityId>, request: &KeepRequest) -> KeepResponse {
        let now = self.config.now();
        let mut response = KeepResponse::default();

        for (name, policy) in self.config.filtered_types() {
            let Some(since) = request.watermark(name) else {
                tracing::debug!(entity_type = name, "bootstrapping watermark");
                response.synced.push(SyncedType {
                    entity_type: name.to_string(),
                    remove_ids: Vec::new(),
                    new_watermark: now,
                });
                continue;
            };

            let filter = match (policy.filter.needs_identity(), identity) {
                (false, _) => policy.filter.clone(),
                (true, Some(id)) => policy.filter.resolve(id),
                (true, None) => {
                    response
                        .errors
                        .push(KeepError::new(name, ServerError::NotAuthenticated.to_string()));
                    continue;
                }
            };
            let stale = Filter::And(vec![
                Filter::Nor(vec![filter]),
                Filter::gt(policy.sort.field.as_str(), since),
            ]);

            match self.source.find_ids(name, &stale) {
                Ok(ids) => {
                    tracing::debug!(entity_type = name, removed = ids.len(), "reconciled type");
                    response.synced.push(SyncedType {
                        entity_type: name.to_string(),
                        remove_ids: ids.into_iter().map(|id| id.as_str().to_string()).collect(),
                        new_watermark: now,
                    });
                }
                Err(e) => {
                    tracing::warn!(entity_type = name, error = %e, "reconciliation query failed");
                    response.errors.push(KeepError::new(name, e.to_string()));
                }
            }
        }
        response
    }
}

impl std::fmt::Debug for KeepHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
