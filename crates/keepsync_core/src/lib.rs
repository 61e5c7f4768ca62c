//! # keepsync core
//!
//! The persistent half of offline continuity.
//!
//! This crate provides:
//! - Entity identifiers and mirrored documents
//! - Filter predicates with an identity placeholder
//! - Retention policies and the registry of kept entity types
//! - The bounded [`MirrorStore`], the durable [`WriteQueue`] and
//!   per-type [`Watermarks`]
//! - [`OfflineConfig`] and [`RetryConfig`]
//!
//! Everything is stored through a [`keepsync_storage::StorageEngine`]; nothing
//! here knows about connectivity or the server.
//!
//! ## Example
//!
//! ```rust
//! use keepsync_core::{MirrorDocument, MirrorStore, OfflineConfig, RetentionRegistry, SortKey};
//! use keepsync_codec::Value;
//! use keepsync_storage::InMemoryEngine;
//! use std::sync::Arc;
//!
//! let config = OfflineConfig::new().with_sort(SortKey::descending("createdAt")).with_limit(2);
//! let registry = Arc::new(RetentionRegistry::new(&config));
//! registry.register_type("notes");
//!
//! let mirror = MirrorStore::new(Arc::new(InMemoryEngine::new()), registry);
//! for (id, at) in [("a", 1), ("b", 2), ("c", 3)] {
//!     let doc = MirrorDocument::new(id, vec![("createdAt", Value::Integer(at))]);
//!     mirror.put("notes", &doc, None).unwrap();
//! }
//! assert_eq!(mirror.count("notes").unwrap(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod document;
mod error;
mod filter;
mod id;
mod mirror;
mod queue;
mod retention;
mod watermark;

pub use config::{OfflineConfig, RetryConfig, DEFAULT_IDENTITY_TYPE};
pub use document::{MirrorDocument, ID_FIELD};
pub use error::{CoreError, CoreResult};
pub use filter::{Filter, Operand};
pub use id::{stringify_ids, EntityId, OBJECT_ID_KEY};
pub use mirror::{MirrorStore, PutOutcome};
pub use queue::{QueuedOperation, WriteQueue, QUEUE_STORE};
pub use retention::{RetentionPolicy, RetentionRegistry, SortDirection, SortKey};
pub use watermark::{Watermarks, WATERMARK_STORE};

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
