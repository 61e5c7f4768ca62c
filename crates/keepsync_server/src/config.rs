//! Server configuration.

use keepsync_core::{now_millis, RetentionPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Configuration for the reconciliation endpoint.
///
/// Holds the retention policy of every kept entity type, as declared by the
/// application, and the clock stamping new watermarks.
#[derive(Clone)]
pub struct ServerConfig {
    kept: BTreeMap<String, RetentionPolicy>,
    clock: Clock,
}

impl ServerConfig {
    /// Creates a configuration with no kept types and the system clock.
    pub fn new() -> Self {
        Self {
            kept: BTreeMap::new(),
            clock: Arc::new(now_millis),
        }
    }

    /// Declares a kept entity type.
    pub fn with_kept(mut self, entity_type: impl Into<String>, policy: RetentionPolicy) -> Self {
        self.kept.insert(entity_type.into(), policy);
        self
    }

    /// Replaces the clock (milliseconds since the Unix epoch).
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Kept types whose filter is not trivial, in name order.
    pub fn filtered_types(&self) -> impl Iterator<Item = (&str, &RetentionPolicy)> {
        self.kept
            .iter()
            .filter(|(_, policy)| policy.is_filtered())
            .map(|(name, policy)| (name.as_str(), policy))
    }

    /// Current time according to the configured clock.
    pub fn now(&self) -> i64 {
        (self.clock)()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("kept", &self.kept)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_core::{Filter, OfflineConfig};

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.filtered_types().count(), 0);
        assert!(config.now() > 0);
    }

    #[test]
    fn config_builder() {
        let defaults = OfflineConfig::new();
        let config = ServerConfig::new()
            .with_kept("notes", defaults.default_policy())
            .with_kept("tasks", defaults.policy(Filter::eq("done", false)))
            .with_clock(|| 42);

        let filtered: Vec<&str> = config.filtered_types().map(|(name, _)| name).collect();
        assert_eq!(filtered, vec!["tasks"]);
        assert_eq!(config.now(), 42);
    }
}
