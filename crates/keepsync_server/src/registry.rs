//! Named server operations.

use crate::error::{ServerError, ServerResult};
use crate::keep::KeepHandler;
use keepsync_codec::Value;
use keepsync_core::EntityId;
use keepsync_protocol::{KeepRequest, KEEP_METHOD};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-call context handed to methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    /// Authenticated caller, if any.
    pub identity: Option<EntityId>,
}

impl CallContext {
    /// Context of an authenticated caller.
    pub fn authenticated(identity: impl Into<EntityId>) -> Self {
        Self {
            identity: Some(identity.into()),
        }
    }

    /// Context of an anonymous caller.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

type Method = Box<dyn Fn(&CallContext, &[Value]) -> ServerResult<Value> + Send + Sync>;

/// Registry of callable server operations.
///
/// The reserved `_keep` name always dispatches to the [`KeepHandler`].
pub struct MethodRegistry {
    keep: KeepHandler,
    methods: RwLock<HashMap<String, Method>>,
}

impl MethodRegistry {
    /// Creates a registry whose `_keep` method is served by `keep`.
    pub fn new(keep: KeepHandler) -> Self {
        Self {
            keep,
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a method.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MethodExists`] if the name is taken or
    /// reserved.
    pub fn register(
        &self,
        name: &str,
        method: impl Fn(&CallContext, &[Value]) -> ServerResult<Value> + Send + Sync + 'static,
    ) -> ServerResult<()> {
        let mut methods = self.methods.write();
        if name == KEEP_METHOD || methods.contains_key(name) {
            return Err(ServerError::MethodExists(name.to_string()));
        }
        methods.insert(name.to_string(), Box::new(method));
        Ok(())
    }

    /// Returns true if `name` can be called.
    pub fn contains(&self, name: &str) -> bool {
        name == KEEP_METHOD || self.methods.read().contains_key(name)
    }

    /// Invokes a method.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownMethod`] for unregistered names, a
    /// protocol error for a malformed `_keep` request, or the method's own
    /// error.
    pub fn call(&self, ctx: &CallContext, name: &str, args: &[Value]) -> ServerResult<Value> {
        let result = self.dispatch(ctx, name, args);
        if let Err(e) = &result {
            if e.is_server_error() {
                tracing::error!(method = name, error = %e, "call failed");
            } else if e.is_client_error() {
                tracing::debug!(method = name, error = %e, "call rejected");
            } else {
                tracing::warn!(method = name, error = %e, "call failed");
            }
        }
        result
    }

    fn dispatch(&self, ctx: &CallContext, name: &str, args: &[Value]) -> ServerResult<Value> {
        if name == KEEP_METHOD {
            let request = KeepRequest::from_args(args)?;
            return Ok(self.keep.handle(ctx.identity.as_ref(), &request).to_value());
        }
        let methods = self.methods.read();
        let method = methods
            .get(name)
            .ok_or_else(|| ServerError::UnknownMethod(name.to_string()))?;
        tracing::trace!(method = name, "dispatching call");
        method(ctx, args)
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("MethodRegistry")
            .field("keep", &self.keep)
            .field("methods", &names)
            .finish()
    }
}
