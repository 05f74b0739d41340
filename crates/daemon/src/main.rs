//! Relay RPC Engine - Composition Root
//!
//! Wires the engine with its collaborators and serves newline-delimited
//! JSON requests on stdin as a local operator console. Wire transports
//! (HTTP, WebSocket) bind the same `RpcEngine` from their own frontends.

use anyhow::Result;
use relay_core::domain::headers::HeaderMap;
use relay_core::port::service::{handler, RouteDef, RpcService};
use relay_core::{RpcEngine, Scope, ServerConfig};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Small diagnostic surface every deployment gets alongside `rpc.*`.
struct DiagnosticsService;

impl RpcService for DiagnosticsService {
    fn routes(&self) -> Vec<RouteDef> {
        vec![
            RouteDef::new("ping", &[], handler(|_ctx, _params| async { Ok(json!("pong")) }))
                .with_doc("Liveness probe."),
            RouteDef::new(
                "echo",
                &["value"],
                handler(|_ctx, params| async move {
                    Ok(params.get("value").cloned().unwrap_or(Value::Null))
                }),
            )
            .with_doc("Return the given value unchanged."),
        ]
    }

    fn permissions(&self) -> Vec<(String, Scope)> {
        vec![("*".to_string(), Scope::Guest)]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("Relay RPC engine v{} starting...", VERSION);

    let config = config_from_env();
    info!(
        max_parallel_tasks = config.max_parallel_tasks,
        default_request_time = config.default_request_time,
        max_request_time = config.max_request_time,
        enable_permissions = config.enable_permissions,
        "configuration loaded"
    );

    let engine = RpcEngine::builder(config)
        .register_service("sys", Arc::new(DiagnosticsService))
        .build()?;

    info!("Ready. Send one JSON request per line on stdin, Ctrl+C to stop");
    tokio::select! {
        result = serve_stdio(&engine) => {
            result?;
            info!("stdin closed, draining in-flight requests");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully...");
        }
    }

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), engine.drain()).await;
    info!("Relay RPC engine stopped");
    Ok(())
}

/// One JSON value per line: either a bare request/batch body, or
/// `{"headers": {..}, "body": ..}` to exercise header handling. Replies
/// are written one JSON object per line.
async fn serve_stdio(engine: &RpcEngine) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "discarding unparseable input line");
                continue;
            }
        };
        let (headers, body) = split_input(value);

        // The console runs with operator privileges and no client session.
        let reply = engine.call(body, &headers, None, Scope::System).await;

        let out = json!({ "headers": reply.headers, "body": reply.body });
        stdout.write_all(out.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn split_input(value: Value) -> (HeaderMap, Value) {
    if let Value::Object(map) = &value {
        if map.contains_key("body") {
            let headers = map
                .get("headers")
                .and_then(Value::as_object)
                .map(|h| {
                    h.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            return (headers, map["body"].clone());
        }
    }
    (HeaderMap::new(), value)
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("relay=info"))
        .expect("Failed to create env filter");

    match std::env::var("RELAY_LOG_FORMAT").as_deref() {
        Ok("json") => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

fn config_from_env() -> ServerConfig {
    let defaults = ServerConfig::default();
    ServerConfig {
        app_name: std::env::var("RELAY_APP_NAME").unwrap_or(defaults.app_name),
        max_parallel_tasks: env_parse("RELAY_MAX_PARALLEL_TASKS")
            .unwrap_or(defaults.max_parallel_tasks),
        default_request_time: env_parse("RELAY_DEFAULT_REQUEST_TIME")
            .unwrap_or(defaults.default_request_time),
        max_request_time: env_parse("RELAY_MAX_REQUEST_TIME").unwrap_or(defaults.max_request_time),
        enable_permissions: env_parse("RELAY_ENABLE_PERMISSIONS")
            .unwrap_or(defaults.enable_permissions),
        request_logs: env_parse("RELAY_REQUEST_LOGS").unwrap_or(defaults.request_logs),
        full_request_logs: env_parse("RELAY_FULL_REQUEST_LOGS")
            .unwrap_or(defaults.full_request_logs),
        debug: env_parse("RELAY_DEBUG").unwrap_or(defaults.debug),
        blacklist_routes: std::env::var("RELAY_BLACKLIST_ROUTES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.blacklist_routes),
        blacklist_scope: env_parse("RELAY_BLACKLIST_SCOPE").unwrap_or(defaults.blacklist_scope),
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
