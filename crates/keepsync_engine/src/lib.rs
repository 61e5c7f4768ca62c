//! # keepsync engine
//!
//! Offline continuity for a client application.
//!
//! This crate provides:
//! - The [`Transport`] and [`ReactiveCache`] seams the engine is driven
//!   through, with [`MockTransport`] and [`MemoryCache`] implementations
//! - The [`ChangeObserver`] mirroring cache changes into the
//!   [`keepsync_core::MirrorStore`]
//! - The [`BroadcastChannel`] keeping instances of one origin consistent
//! - The [`SyncOrchestrator`] replaying queued writes on reconnect and the
//!   [`IdentifierReconciler`] remapping temporary ids
//! - [`OfflineClient`], which wires all of the above together
//!
//! ## Data flow
//!
//! In steady state changes flow one way:
//! cache → change observer → mirror → broadcast → peer caches.
//!
//! On reconnect the flow reverses:
//! write queue → orchestrator → transport → reconciler → mirror and cache.
//!
//! ## Key Invariants
//!
//! - Queued operations replay in ascending sequence order, each exactly once
//! - At most one sync pass runs per instance
//! - Changes that came from the mirror or a peer are never written back
//! - The server is authoritative; local state is corrected, never merged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod broadcast;
mod cache;
mod client;
mod error;
mod observer;
mod orchestrator;
mod reconcile;
mod transport;

pub use broadcast::{apply_broadcast, BroadcastChannel, BroadcastHub, DEFAULT_BROADCAST_CAPACITY};
pub use cache::{
    CacheError, CacheObserver, CacheResult, ChangeContext, ChangeOrigin, MemoryCache,
    ObserverHandle, ReactiveCache,
};
pub use client::{CallOutcome, OfflineClient};
pub use error::{SyncError, SyncResult};
pub use observer::ChangeObserver;
pub use orchestrator::{
    DefaultErrorHandler, KeepFailure, ReplayError, SyncErrorHandler, SyncErrors, SyncOrchestrator,
    SyncReport, SyncState, SyncStats,
};
pub use reconcile::IdentifierReconciler;
pub use transport::{CallOptions, ConnectionStatus, MockTransport, Signal, Transport};
