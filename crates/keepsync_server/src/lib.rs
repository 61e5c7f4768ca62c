//! # keepsync server
//!
//! Server side of keepsync reconciliation.
//!
//! This crate provides:
//! - [`MethodRegistry`]: named operations callable by clients, with the
//!   reserved `_keep` method always available
//! - [`KeepHandler`]: answers which retained documents a client must drop
//! - [`DocumentSource`]: read access to authoritative documents
//! - [`ServerConfig`]: kept types and the watermark clock
//!
//! # Reconciliation
//!
//! A client reports, per filtered entity type, when it last reconciled.
//! The server answers with the ids of documents changed since then that no
//! longer match the type's retention filter, plus a new watermark. A filter
//! may refer to the caller's identity; it is resolved per call.
//!
//! ```rust
//! use keepsync_core::{Filter, OfflineConfig};
//! use keepsync_protocol::{KeepRequest, KeepResponse, KEEP_METHOD};
//! use keepsync_server::{CallContext, KeepHandler, MemorySource, MethodRegistry, ServerConfig};
//! use std::sync::Arc;
//!
//! let config = ServerConfig::new()
//!     .with_kept("tasks", OfflineConfig::new().policy(Filter::eq_identity("owner")));
//! let registry = MethodRegistry::new(KeepHandler::new(config, Arc::new(MemorySource::new())));
//!
//! let value = registry
//!     .call(&CallContext::authenticated("u1"), KEEP_METHOD, &KeepRequest::default().to_args())
//!     .unwrap();
//! let response = KeepResponse::from_value(&value).unwrap();
//! assert_eq!(response.synced[0].entity_type, "tasks");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod keep;
mod registry;
mod source;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use keep::KeepHandler;
pub use registry::{CallContext, MethodRegistry};
pub use source::{DocumentSource, MemorySource};
