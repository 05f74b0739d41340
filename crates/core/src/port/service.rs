// Capability Bundle Port
//
// A collaborator exposes its routes, permission patterns and parameter
// validators through this trait; the registry consumes the bundle once at
// startup and the service is never asked again.

use crate::domain::scope::Scope;
use crate::port::session::Session;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Named parameters handed to a handler, already validated.
pub type Params = Map<String, Value>;

pub type HandlerResult = std::result::Result<Value, crate::domain::error::RpcError>;

pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// One route body. Invocation returns the pending computation; the engine
/// decides when (and whether) it runs.
pub type Handler = Arc<dyn Fn(CallContext, Params) -> HandlerFuture + Send + Sync>;

/// Per-call context passed to every handler.
#[derive(Clone)]
pub struct CallContext {
    pub correlation_id: String,
    /// Absolute deadline, epoch seconds.
    pub deadline: i64,
    pub scope: Scope,
    pub session: Option<Arc<dyn Session>>,
}

impl CallContext {
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref().map(Session::id)
    }
}

/// Route declaration inside a capability bundle.
pub struct RouteDef {
    pub name: String,
    /// Accepted parameter names. Doubles as the allow-list enforced by the
    /// preparer and as the signature shown by `rpc.api`.
    pub params: Vec<String>,
    /// First line is shown by `rpc.api`.
    pub doc: Option<String>,
    pub handler: Handler,
}

impl RouteDef {
    pub fn new(name: &str, params: &[&str], handler: Handler) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            doc: None,
            handler,
        }
    }

    pub fn with_doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }
}

/// Box an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(CallContext, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx, params| Box::pin(f(ctx, params)))
}

/// Capability bundle registered into the method registry.
pub trait RpcService: Send + Sync {
    fn routes(&self) -> Vec<RouteDef>;

    /// Glob pattern -> required scope, matched against the short route name.
    /// Declaration order is significant: the first matching pattern wins,
    /// and an unmatched route requires `Scope::System`.
    fn permissions(&self) -> Vec<(String, Scope)> {
        Vec::new()
    }

    /// Short route name -> JSON schema for the params object.
    fn validators(&self) -> HashMap<String, Value> {
        HashMap::new()
    }
}
