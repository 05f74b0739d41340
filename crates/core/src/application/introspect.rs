// Built-in introspection service
//
// Registered under "rpc" through the same capability-bundle path as every
// other service. Holds a weak engine handle: the registry owns these
// handlers, and the engine owns the registry.

use crate::application::engine::EngineInner;
use crate::domain::error::RpcError;
use crate::domain::scope::Scope;
use crate::domain::JSONRPC;
use crate::port::service::{handler, CallContext, Params, RouteDef, RpcService};
use globset::Glob;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub(crate) struct IntrospectionService {
    inner: Weak<EngineInner>,
}

impl IntrospectionService {
    pub(crate) fn new(inner: Weak<EngineInner>) -> Self {
        Self { inner }
    }
}

impl RpcService for IntrospectionService {
    fn routes(&self) -> Vec<RouteDef> {
        let api = self.inner.clone();
        let status = self.inner.clone();
        let tasks = self.inner.clone();
        vec![
            RouteDef::new(
                "api",
                &["pattern"],
                handler(move |ctx, params| api_route(api.clone(), ctx, params)),
            )
            .with_doc("List RPC routes visible to the caller (you are here)."),
            RouteDef::new(
                "status",
                &[],
                handler(move |ctx, params| status_route(status.clone(), ctx, params)),
            )
            .with_doc("Engine status and configured limits."),
            RouteDef::new(
                "tasks",
                &[],
                handler(move |ctx, params| tasks_route(tasks.clone(), ctx, params)),
            )
            .with_doc("In-flight tasks with elapsed and remaining time."),
        ]
    }

    fn permissions(&self) -> Vec<(String, Scope)> {
        vec![
            ("api".to_string(), Scope::Guest),
            ("status".to_string(), Scope::System),
            ("tasks".to_string(), Scope::System),
        ]
    }

    fn validators(&self) -> HashMap<String, Value> {
        let mut validators = HashMap::new();
        validators.insert(
            "api".to_string(),
            json!({
                "type": "object",
                "properties": {"pattern": {"type": "string"}},
            }),
        );
        validators
    }
}

/// Route listing row.
#[derive(Debug, Serialize)]
struct RouteInfo {
    route: String,
    permission: &'static str,
    info: Option<String>,
    signature: Vec<String>,
}

fn engine(weak: &Weak<EngineInner>) -> Result<Arc<EngineInner>, RpcError> {
    weak.upgrade()
        .ok_or_else(|| RpcError::internal("engine is shutting down"))
}

async fn api_route(
    weak: Weak<EngineInner>,
    ctx: CallContext,
    params: Params,
) -> Result<Value, RpcError> {
    let inner = engine(&weak)?;
    let pattern = params.get("pattern").and_then(Value::as_str).unwrap_or("*");
    let matcher = Glob::new(pattern)
        .map_err(|e| RpcError::invalid_params(format!("invalid pattern: {e}")))?
        .compile_matcher();
    let registry = inner
        .registry
        .get()
        .ok_or_else(|| RpcError::internal("registry not initialized"))?;

    // Callers only see routes they could actually invoke.
    let routes: Vec<RouteInfo> = registry
        .iter()
        .filter(|(name, record)| {
            record.permission.level() >= ctx.scope.level() && matcher.is_match(name.as_str())
        })
        .map(|(name, record)| RouteInfo {
            route: name.clone(),
            permission: record.permission.name(),
            info: record
                .doc
                .as_deref()
                .and_then(|doc| doc.lines().next())
                .map(str::to_string),
            signature: record.params.clone(),
        })
        .collect();

    Ok(json!({
        "api": "jsonrpc",
        "version": JSONRPC,
        "spec": "https://www.jsonrpc.org/specification",
        "routes": routes,
    }))
}

async fn status_route(
    weak: Weak<EngineInner>,
    _ctx: CallContext,
    _params: Params,
) -> Result<Value, RpcError> {
    let inner = engine(&weak)?;
    let config = &inner.config;
    Ok(json!({
        "name": config.app_name,
        "debug": config.debug,
        "in_flight": inner.admission.in_flight(),
        "saturated": inner.admission.is_saturated(),
        "server_time": inner.clock.now_secs(),
        "max_parallel_tasks": config.max_parallel_tasks,
        "default_request_time": config.default_request_time,
        "max_request_time": config.max_request_time,
        "enable_permissions": config.enable_permissions,
    }))
}

async fn tasks_route(
    weak: Weak<EngineInner>,
    _ctx: CallContext,
    _params: Params,
) -> Result<Value, RpcError> {
    let inner = engine(&weak)?;
    let snapshot = inner.tasks.snapshot(inner.clock.now_secs());
    serde_json::to_value(snapshot).map_err(|e| RpcError::internal(e.to_string()))
}
