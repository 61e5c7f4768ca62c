//! # keepsync storage
//!
//! Storage engine trait and implementations for keepsync.
//!
//! This crate provides the lowest-level durability layer: a set of **named
//! key-value stores** with atomic per-store batches and an auto-increment
//! key generator. Engines do not interpret the bytes they hold; the core
//! crate owns every encoding.
//!
//! ## Design Principles
//!
//! - One engine instance is shared by every application instance on an origin
//! - Atomicity is scoped to a single store
//! - Must be `Send + Sync`
//!
//! ## Available Engines
//!
//! - [`InMemoryEngine`] - For testing and ephemeral sessions
//! - [`FileEngine`] - For persistent storage in a directory
//!
//! ## Example
//!
//! ```rust
//! use keepsync_storage::{InMemoryEngine, StorageEngine, WriteBatch};
//!
//! let engine = InMemoryEngine::new();
//! let mut batch = WriteBatch::new();
//! batch.put(b"n1".to_vec(), b"one".to_vec()).put(b"n2".to_vec(), b"two".to_vec());
//! engine.commit("notes", batch).unwrap();
//! assert_eq!(engine.count("notes").unwrap(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod file;
mod memory;

pub use engine::{decode_sequence_key, sequence_key, BatchOp, StorageEngine, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use file::FileEngine;
pub use memory::InMemoryEngine;
