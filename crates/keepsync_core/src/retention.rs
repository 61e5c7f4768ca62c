//! Retention policies and the registry of kept entity types.

use crate::config::OfflineConfig;
use crate::error::{CoreError, CoreResult};
use crate::filter::Filter;
use keepsync_codec::Value;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Sort direction of a retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest values are the most wanted.
    Ascending,
    /// Largest values are the most wanted.
    Descending,
}

/// Field and direction deciding which documents are worth keeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Dotted field path.
    pub field: String,
    /// Which end of the ordering is kept.
    pub direction: SortDirection,
}

impl SortKey {
    /// Keeps the smallest values of `field`.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Keeps the largest values of `field`.
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    /// Returns `true` if `a` is less wanted than `b`.
    #[must_use]
    pub fn less_wanted(&self, a: &Value, b: &Value) -> bool {
        let ord = a.cmp_sort(b);
        match self.direction {
            SortDirection::Descending => ord == Ordering::Less,
            SortDirection::Ascending => ord == Ordering::Greater,
        }
    }
}

/// Filter, sort and limit rule for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Which documents are kept.
    pub filter: Filter,
    /// Which documents are evicted first.
    pub sort: SortKey,
    /// Maximum number of documents (`None` = unbounded).
    pub limit: Option<usize>,
}

impl RetentionPolicy {
    /// Replaces the sort key.
    #[must_use]
    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    /// Replaces the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Removes the limit.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Returns `true` if this policy takes part in reconciliation.
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        !self.filter.is_trivial()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    policy: RetentionPolicy,
    explicit: bool,
}

/// The set of entity types kept for offline use.
///
/// With `keep_all`, the first use of any type seeds it with the default
/// policy; an explicit [`keep`](Self::keep) replaces a seeded policy once.
/// The identity type is kept automatically under `keep_all`.
#[derive(Debug)]
pub struct RetentionRegistry {
    default: RetentionPolicy,
    keep_all: bool,
    identity_type: String,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl RetentionRegistry {
    /// Creates a registry from the global configuration.
    #[must_use]
    pub fn new(config: &OfflineConfig) -> Self {
        let registry = Self {
            default: config.default_policy(),
            keep_all: config.keep_all,
            identity_type: config.identity_type.clone(),
            entries: RwLock::new(BTreeMap::new()),
        };
        if registry.keep_all {
            registry.register_type(&config.identity_type);
        }
        registry
    }

    /// Keeps `name` with an explicit policy.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyKept`] if `name` was already kept
    /// explicitly.
    pub fn keep(&self, name: &str, policy: RetentionPolicy) -> CoreResult<()> {
        let mut entries = self.entries.write();
        if entries.get(name).is_some_and(|e| e.explicit) {
            return Err(CoreError::AlreadyKept {
                name: name.to_string(),
            });
        }
        tracing::debug!(entity_type = name, limit = ?policy.limit, "keeping entity type");
        entries.insert(
            name.to_string(),
            Entry {
                policy,
                explicit: true,
            },
        );
        Ok(())
    }

    /// Records that `name` exists; seeds the default policy under `keep_all`.
    pub fn register_type(&self, name: &str) {
        if !self.keep_all {
            return;
        }
        self.entries
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Entry {
                policy: self.default.clone(),
                explicit: false,
            });
    }

    /// Returns the policy of `name`, if it is kept.
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<RetentionPolicy> {
        self.entries.read().get(name).map(|e| e.policy.clone())
    }

    /// Returns `true` if `name` is kept.
    #[must_use]
    pub fn is_retained(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Names of every kept entity type, sorted.
    #[must_use]
    pub fn retained_types(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Kept entity types whose filter is not trivial.
    #[must_use]
    pub fn filtered_types(&self) -> Vec<(String, RetentionPolicy)> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.policy.is_filtered())
            .map(|(name, e)| (name.clone(), e.policy.clone()))
            .collect()
    }

    /// Returns `true` if an operation named `operation` may be queued.
    ///
    /// Under `keep_all` every operation is queueable. Otherwise the name,
    /// case-insensitively, must contain a kept type's name or that name
    /// without its last character (`insertTodo` matches `todos`).
    #[must_use]
    pub fn can_queue(&self, operation: &str) -> bool {
        if self.keep_all {
            return true;
        }
        let operation = operation.to_lowercase();
        self.entries.read().keys().any(|name| {
            let name = name.to_lowercase();
            let singular = name
                .char_indices()
                .last()
                .map_or("", |(at, _)| &name[..at]);
            operation.contains(&name) || (!singular.is_empty() && operation.contains(singular))
        })
    }

    /// Whether every type is kept with the default policy.
    #[must_use]
    pub fn keep_all(&self) -> bool {
        self.keep_all
    }

    /// Entity type holding identity documents.
    #[must_use]
    pub fn identity_type(&self) -> &str {
        &self.identity_type
    }

    /// The default policy.
    #[must_use]
    pub fn default_policy(&self) -> &RetentionPolicy {
        &self.default
    }
}
