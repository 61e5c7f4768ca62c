//! Transport abstraction for server calls and connectivity.

use crate::error::{SyncError, SyncResult};
use keepsync_codec::Value;
use keepsync_core::EntityId;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

/// Connection status reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Connected to the server.
    Connected,
    /// A connection attempt is in progress.
    Connecting,
    /// Disconnected.
    Offline,
}

impl ConnectionStatus {
    /// Returns true if writes must be captured locally.
    ///
    /// A connection attempt in progress does not count as offline.
    pub fn is_offline(self) -> bool {
        self == ConnectionStatus::Offline
    }
}

/// Connectivity and authentication, published together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Connection status.
    pub status: ConnectionStatus,
    /// Authenticated identity, if any.
    pub identity: Option<EntityId>,
}

impl Signal {
    /// An offline, anonymous signal.
    pub fn offline() -> Self {
        Self {
            status: ConnectionStatus::Offline,
            identity: None,
        }
    }
}

/// Options for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Do not let the transport retry the call on reconnect.
    pub no_retry: bool,
}

impl CallOptions {
    /// Options used when replaying queued operations.
    pub fn no_retry() -> Self {
        Self { no_retry: true }
    }
}

/// The authenticated RPC transport.
///
/// Implementations own the network layer; the engine only needs to invoke
/// named server operations and watch the connectivity signal.
pub trait Transport: Send + Sync {
    /// Invokes a named server operation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] when offline, or whatever the
    /// server reported.
    fn call(&self, name: &str, args: &[Value], options: CallOptions) -> SyncResult<Value>;

    /// Subscribes to the connectivity and identity signal.
    fn signal(&self) -> watch::Receiver<Signal>;

    /// Current connection status.
    fn status(&self) -> ConnectionStatus {
        let rx = self.signal();
        let status = rx.borrow().status;
        status
    }

    /// Current authenticated identity.
    fn identity(&self) -> Option<EntityId> {
        let rx = self.signal();
        let identity = rx.borrow().identity.clone();
        identity
    }
}

type Handler = Box<dyn Fn(&str, &[Value]) -> SyncResult<Value> + Send + Sync>;

/// A scriptable transport for testing.
///
/// Calls are recorded and answered by an installed handler; while the signal
/// says offline every call fails with [`SyncError::NotConnected`].
pub struct MockTransport {
    signal: watch::Sender<Signal>,
    handler: RwLock<Option<Handler>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockTransport {
    /// Creates an offline, anonymous mock transport.
    pub fn new() -> Self {
        let (signal, _) = watch::channel(Signal::offline());
        Self {
            signal,
            handler: RwLock::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Installs the call handler.
    pub fn set_handler(
        &self,
        handler: impl Fn(&str, &[Value]) -> SyncResult<Value> + Send + Sync + 'static,
    ) {
        *self.handler.write() = Some(Box::new(handler));
    }

    /// Sets the connection status.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.signal.send_modify(|s| s.status = status);
    }

    /// Sets the authenticated identity.
    pub fn set_identity(&self, identity: Option<EntityId>) {
        self.signal.send_modify(|s| s.identity = identity);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    /// Returns the names of every call made so far.
    pub fn call_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(n, _)| n.clone()).collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn call(&self, name: &str, args: &[Value], _options: CallOptions) -> SyncResult<Value> {
        if self.status().is_offline() {
            return Err(SyncError::NotConnected);
        }
        self.calls.lock().push((name.to_string(), args.to_vec()));
        match &*self.handler.read() {
            Some(handler) => handler(name, args),
            None => Err(SyncError::Server(format!("no handler for {name}"))),
        }
    }

    fn signal(&self) -> watch::Receiver<Signal> {
        self.signal.subscribe()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("signal", &*self.signal.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_signal() {
        let transport = MockTransport::new();
        let rx = transport.signal();
        assert!(transport.status().is_offline());

        transport.set_status(ConnectionStatus::Connected);
        transport.set_identity(Some(EntityId::new("u1")));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().identity, Some(EntityId::new("u1")));
        assert_eq!(transport.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn connecting_is_not_offline() {
        assert!(!ConnectionStatus::Connecting.is_offline());
        assert!(ConnectionStatus::Offline.is_offline());
    }

    #[test]
    fn offline_calls_fail() {
        let transport = MockTransport::new();
        transport.set_handler(|_, _| Ok(Value::Null));
        let err = transport.call("ping", &[], CallOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn online_calls_reach_handler() {
        let transport = MockTransport::new();
        transport.set_status(ConnectionStatus::Connected);
        transport.set_handler(|name, args| Ok(Value::Text(format!("{name}:{}", args.len()))));

        let result = transport
            .call("insertNote", &[Value::from("x")], CallOptions::no_retry())
            .unwrap();
        assert_eq!(result, Value::from("insertNote:1"));
        assert_eq!(transport.call_names(), vec!["insertNote"]);
    }
}
