// Batch execution: ordering, abort-on-error, notification filtering.

use relay_core::application::engine::{RpcEngine, RpcReply};
use relay_core::domain::envelope::{ResponseBody, ResultEnvelope};
use relay_core::domain::error::{ErrorKind, RpcError};
use relay_core::domain::headers::{names, HeaderMap};
use relay_core::port::service::{handler, RouteDef, RpcService};
use relay_core::{Scope, ServerConfig};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records which members actually ran, so skipped members are observable.
struct BatchService {
    executed: Arc<Mutex<Vec<String>>>,
    fail_count: Arc<AtomicUsize>,
}

impl BatchService {
    fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                executed: Arc::clone(&executed),
                fail_count: Arc::new(AtomicUsize::new(0)),
            },
            executed,
        )
    }
}

impl RpcService for BatchService {
    fn routes(&self) -> Vec<RouteDef> {
        let ok_executed = Arc::clone(&self.executed);
        let fail_executed = Arc::clone(&self.executed);
        let fail_count = Arc::clone(&self.fail_count);
        vec![
            // Completion timing varies with the payload; submission order
            // must still win.
            RouteDef::new(
                "work",
                &["tag", "delay_ms"],
                handler(move |_ctx, params| {
                    let executed = Arc::clone(&ok_executed);
                    async move {
                        let tag = params
                            .get("tag")
                            .and_then(Value::as_str)
                            .unwrap_or("?")
                            .to_string();
                        let delay = params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
                        if delay > 0 {
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                        executed.lock().unwrap().push(tag.clone());
                        Ok(json!(tag))
                    }
                }),
            ),
            RouteDef::new(
                "fail",
                &[],
                handler(move |_ctx, _params| {
                    let executed = Arc::clone(&fail_executed);
                    let count = Arc::clone(&fail_count);
                    async move {
                        executed.lock().unwrap().push("fail".to_string());
                        count.fetch_add(1, Ordering::SeqCst);
                        Err(RpcError::invalid_params("deliberate failure"))
                    }
                }),
            ),
        ]
    }

    fn permissions(&self) -> Vec<(String, Scope)> {
        vec![("*".to_string(), Scope::Guest)]
    }
}

fn engine() -> (RpcEngine, Arc<Mutex<Vec<String>>>) {
    let (service, executed) = BatchService::new();
    let engine = RpcEngine::builder(ServerConfig {
        request_logs: false,
        ..ServerConfig::default()
    })
    .register_service("batch", Arc::new(service))
    .build()
    .unwrap();
    (engine, executed)
}

fn batch(reply: &RpcReply) -> &[ResultEnvelope] {
    match reply.body.as_ref().expect("expected a body") {
        ResponseBody::Batch(members) => members,
        other => panic!("expected batch body, got {other:?}"),
    }
}

fn abort_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(names::ABORT_ON_ERROR.to_string(), "true".to_string());
    headers
}

fn work(id: i64, tag: &str, delay_ms: u64) -> Value {
    json!({"id": id, "method": "batch.work", "params": {"tag": tag, "delay_ms": delay_ms}})
}

#[tokio::test]
async fn test_results_preserve_submission_order() {
    let (engine, executed) = engine();
    let reply = engine
        .call(
            json!([work(1, "slow", 40), work(2, "fast", 1), work(3, "mid", 10)]),
            &HeaderMap::new(),
            None,
            Scope::Guest,
        )
        .await;

    let members = batch(&reply);
    let ids: Vec<_> = members.iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    assert_eq!(
        *executed.lock().unwrap(),
        vec!["slow".to_string(), "fast".to_string(), "mid".to_string()]
    );
}

#[tokio::test]
async fn test_abort_on_error_skips_unexecuted_members() {
    let (engine, executed) = engine();
    let reply = engine
        .call(
            json!([
                work(1, "first", 0),
                {"id": 2, "method": "batch.fail"},
                work(3, "third", 0),
            ]),
            &abort_headers(),
            None,
            Scope::Guest,
        )
        .await;

    let members = batch(&reply);
    assert_eq!(members.len(), 3);

    match &members[0] {
        ResultEnvelope::Success(s) => assert_eq!(s.result, json!("first")),
        other => panic!("member 1 should succeed, got {other:?}"),
    }
    match &members[1] {
        ResultEnvelope::Error(e) => {
            assert_eq!(e.id, Some(2));
            assert_eq!(e.error.kind, ErrorKind::InvalidParams);
        }
        other => panic!("member 2 should fail with its own error, got {other:?}"),
    }
    match &members[2] {
        ResultEnvelope::Error(e) => {
            assert_eq!(e.id, Some(3));
            assert_eq!(e.error.kind, ErrorKind::Aborted);
        }
        other => panic!("member 3 should be aborted, got {other:?}"),
    }

    // Member 3 never ran.
    assert_eq!(
        *executed.lock().unwrap(),
        vec!["first".to_string(), "fail".to_string()]
    );
}

#[tokio::test]
async fn test_without_abort_failures_stay_isolated() {
    let (engine, executed) = engine();
    let reply = engine
        .call(
            json!([
                work(1, "first", 0),
                {"id": 2, "method": "batch.fail"},
                work(3, "third", 0),
            ]),
            &HeaderMap::new(),
            None,
            Scope::Guest,
        )
        .await;

    let members = batch(&reply);
    assert_eq!(members.len(), 3);
    assert!(members[1].is_error());
    assert!(!members[2].is_error());
    assert_eq!(executed.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_batch_notifications_produce_no_entries() {
    let (engine, _) = engine();
    let reply = engine
        .call(
            json!([
                work(1, "a", 0),
                {"method": "batch.work", "params": {"tag": "quiet", "delay_ms": 0}},
                work(3, "c", 0),
            ]),
            &HeaderMap::new(),
            None,
            Scope::Guest,
        )
        .await;

    let members = batch(&reply);
    let ids: Vec<_> = members.iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec![Some(1), Some(3)]);
}

#[tokio::test]
async fn test_batch_of_notifications_returns_headers_only() {
    let (engine, _) = engine();
    let reply = engine
        .call(
            json!([
                {"method": "batch.work", "params": {"tag": "x", "delay_ms": 0}},
            ]),
            &HeaderMap::new(),
            None,
            Scope::Guest,
        )
        .await;
    assert!(reply.body.is_none());
    assert!(reply.headers.contains_key(names::CORRELATION_ID));
}

#[tokio::test]
async fn test_invalid_member_rejects_the_whole_batch_before_admission() {
    let (engine, executed) = engine();
    let reply = engine
        .call(
            json!([work(1, "a", 0), {"id": "bogus", "method": "batch.work"}]),
            &HeaderMap::new(),
            None,
            Scope::Guest,
        )
        .await;

    match reply.body.as_ref().unwrap() {
        ResponseBody::Single(ResultEnvelope::Error(e)) => {
            assert_eq!(e.error.kind, ErrorKind::InvalidRequest);
        }
        other => panic!("expected a single rejection, got {other:?}"),
    }
    assert!(executed.lock().unwrap().is_empty());
    assert_eq!(engine.in_flight(), 0);
}
