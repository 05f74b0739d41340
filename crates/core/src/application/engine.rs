// Execution Engine
//
// Admits prepared requests through the gate, runs them as independently
// scheduled tasks under their deadline, converts faults into structured
// results and composes the reply. One admission slot and one task-board
// entry per call or batch, both released on every outcome.

use crate::application::admission::{AdmissionGate, AdmissionPermit};
use crate::application::introspect::IntrospectionService;
use crate::application::prepare::{prepare, PrepareFailure, PreparedRequest};
use crate::application::registry::{MethodRegistry, RegistryBuilder};
use crate::application::tasks::{TaskBoard, TaskEntry};
use crate::config::ServerConfig;
use crate::domain::envelope::{RequestEnvelope, RequestId, ResponseBody, ResultEnvelope};
use crate::domain::error::{ErrorKind, RpcError};
use crate::domain::headers::{names, HeaderMap, RequestHeaders};
use crate::domain::scope::Scope;
use crate::error::Result;
use crate::port::service::{CallContext, HandlerFuture, RpcService};
use crate::port::session::{Session, SessionStore};
use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Composed reply for one call or batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub headers: HeaderMap,
    /// `None` for fire-and-forget and for batches with no reply-worthy
    /// members.
    pub body: Option<ResponseBody>,
}

/// Outcome of [`RpcEngine::dispatch`].
pub enum Dispatch {
    /// Rejected before admission, or scheduled without anything to wait
    /// for (fire-and-forget).
    Completed(RpcReply),
    /// Admitted and running; `join()` to wait, drop to detach.
    Scheduled(ScheduledCall),
}

/// Handle to an admitted request task. Dropping it detaches the task,
/// which keeps running to completion.
pub struct ScheduledCall {
    correlation_id: String,
    handle: JoinHandle<RpcReply>,
}

impl ScheduledCall {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the reply.
    pub async fn join(self) -> RpcReply {
        match self.handle.await {
            Ok(reply) => reply,
            Err(err) => {
                error!(
                    correlation_id = %self.correlation_id,
                    error = %err,
                    "request task failed"
                );
                let mut headers = HeaderMap::new();
                headers.insert(
                    names::CORRELATION_ID.to_string(),
                    self.correlation_id.clone(),
                );
                RpcReply {
                    headers,
                    body: Some(ResponseBody::Single(ResultEnvelope::error(
                        None,
                        RpcError::internal("Internal error"),
                    ))),
                }
            }
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: ServerConfig,
    pub(crate) registry: OnceLock<MethodRegistry>,
    pub(crate) admission: Arc<AdmissionGate>,
    pub(crate) tasks: Arc<TaskBoard>,
    pub(crate) sessions: Option<Arc<dyn SessionStore>>,
    pub(crate) clock: Arc<dyn TimeProvider>,
}

/// Collects services and collaborators during the single startup phase.
pub struct EngineBuilder {
    config: ServerConfig,
    services: Vec<(String, Arc<dyn RpcService>)>,
    session_store: Option<Arc<dyn SessionStore>>,
    clock: Arc<dyn TimeProvider>,
}

impl EngineBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            services: Vec::new(),
            session_store: None,
            clock: Arc::new(SystemTimeProvider),
        }
    }

    pub fn register_service(
        mut self,
        name: impl Into<String>,
        service: Arc<dyn RpcService>,
    ) -> Self {
        self.services.push((name.into(), service));
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn time_provider(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    /// Freeze the registry and assemble the engine. After this the route
    /// map never changes.
    pub fn build(self) -> Result<RpcEngine> {
        let config = self.config.normalized();
        if !config.enable_permissions {
            warn!("permission checks are disabled");
        }
        let inner = Arc::new(EngineInner {
            admission: Arc::new(AdmissionGate::new(config.max_parallel_tasks)),
            tasks: Arc::new(TaskBoard::new()),
            sessions: self.session_store,
            clock: self.clock,
            registry: OnceLock::new(),
            config,
        });

        let mut builder = RegistryBuilder::new(
            &inner.config.blacklist_routes,
            inner.config.blacklist_scope,
        )?;
        for (name, service) in &self.services {
            builder.register_service(name, service.as_ref())?;
        }
        // The built-in service goes through the same path as everyone else;
        // it sees the finished registry through a weak handle.
        let introspection = IntrospectionService::new(Arc::downgrade(&inner));
        builder.register_service("rpc", &introspection)?;
        let _ = inner.registry.set(builder.build());
        Ok(RpcEngine { inner })
    }
}

enum PreparedBody {
    Single(PreparedRequest),
    Batch(Vec<PreparedRequest>),
}

/// The engine. Cheap to clone; all clones share the same gate, registry
/// and task board.
#[derive(Clone)]
pub struct RpcEngine {
    inner: Arc<EngineInner>,
}

impl RpcEngine {
    pub fn builder(config: ServerConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Dispatch a single or batch request.
    ///
    /// Waits for an admission slot when the gate is saturated, then
    /// schedules an independent task and returns. Validation and
    /// permission failures are rejected here, before admission.
    pub async fn dispatch(
        &self,
        body: Value,
        headers: &HeaderMap,
        session: Option<Arc<dyn Session>>,
        scope: Scope,
    ) -> Dispatch {
        let inner = &self.inner;
        let now = inner.clock.now_secs();
        let req_headers = RequestHeaders::resolve(
            headers,
            now,
            inner.config.default_request_time,
            inner.config.max_request_time,
        );
        let ctx = CallContext {
            correlation_id: req_headers.correlation_id.clone(),
            deadline: req_headers.deadline,
            scope,
            session: session.clone(),
        };
        let registry = inner
            .registry
            .get()
            .expect("registry is set during build");

        let prepared = if let Value::Array(items) = body {
            let mut members = Vec::with_capacity(items.len());
            for (position, item) in items.into_iter().enumerate() {
                match prepare(registry, item, &ctx, inner.config.enable_permissions, position) {
                    Ok(member) => members.push(member),
                    Err(failure) => {
                        return Dispatch::Completed(rejected(&req_headers, &session, failure))
                    }
                }
            }
            PreparedBody::Batch(members)
        } else {
            match prepare(registry, body, &ctx, inner.config.enable_permissions, 0) {
                Ok(single) => PreparedBody::Single(single),
                Err(failure) => {
                    return Dispatch::Completed(rejected(&req_headers, &session, failure))
                }
            }
        };
        let requires_reply = match &prepared {
            PreparedBody::Single(member) => member.id.is_some(),
            PreparedBody::Batch(members) => members.iter().any(|m| m.id.is_some()),
        };

        let permit = Arc::clone(&inner.admission).acquire().await;
        inner.tasks.register(TaskEntry {
            correlation_id: req_headers.correlation_id.clone(),
            started: now,
            deadline: req_headers.deadline,
        });
        let slot = SlotGuard {
            _permit: permit,
            tasks: Arc::clone(&inner.tasks),
            correlation_id: req_headers.correlation_id.clone(),
        };

        let task_inner = Arc::clone(inner);
        let task_headers = req_headers.clone();
        let task_session = session.clone();
        let handle = tokio::spawn(async move {
            let _slot = slot;
            match prepared {
                PreparedBody::Single(member) => {
                    task_inner
                        .execute_single(member, &task_headers, task_session)
                        .await
                }
                PreparedBody::Batch(members) => {
                    task_inner
                        .execute_batch(members, &task_headers, task_session)
                        .await
                }
            }
        });

        if requires_reply {
            Dispatch::Scheduled(ScheduledCall {
                correlation_id: req_headers.correlation_id,
                handle,
            })
        } else {
            Dispatch::Completed(RpcReply {
                headers: response_headers(&req_headers.correlation_id, &session),
                body: None,
            })
        }
    }

    /// Dispatch and wait for the reply. Typical request/response usage.
    pub async fn call(
        &self,
        body: Value,
        headers: &HeaderMap,
        session: Option<Arc<dyn Session>>,
        scope: Scope,
    ) -> RpcReply {
        match self.dispatch(body, headers, session, scope).await {
            Dispatch::Completed(reply) => reply,
            Dispatch::Scheduled(scheduled) => scheduled.join().await,
        }
    }

    /// Wait until no request task holds an admission slot.
    pub async fn drain(&self) {
        self.inner.admission.drain().await;
    }

    pub fn in_flight(&self) -> usize {
        self.inner.admission.in_flight()
    }
}

impl EngineInner {
    async fn execute_single(
        &self,
        member: PreparedRequest,
        headers: &RequestHeaders,
        session: Option<Arc<dyn Session>>,
    ) -> RpcReply {
        let now = self.clock.now_secs();
        let budget = (headers.deadline - now).max(0) as u64;
        let run = self.execute_request(
            &headers.correlation_id,
            member.future,
            member.id,
            &member.envelope,
        );
        let result = match tokio::time::timeout(Duration::from_secs(budget), run).await {
            Ok(result) => result,
            Err(_) => ResultEnvelope::error(member.id, RpcError::request_timeout(headers.deadline)),
        };
        self.persist_session(&session).await;
        let body = if result.requires_reply() {
            Some(ResponseBody::Single(result))
        } else {
            None
        };
        RpcReply {
            headers: response_headers(&headers.correlation_id, &session),
            body,
        }
    }

    async fn execute_batch(
        &self,
        members: Vec<PreparedRequest>,
        headers: &RequestHeaders,
        session: Option<Arc<dyn Session>>,
    ) -> RpcReply {
        let mut results = Vec::new();
        let mut members = members.into_iter();
        while let Some(member) = members.next() {
            let now = self.clock.now_secs();
            let remaining = headers.deadline - now;
            if remaining <= 0 {
                // Shared deadline gone: nothing further runs.
                results.push(ResultEnvelope::error(
                    member.id,
                    RpcError::request_timeout(headers.deadline),
                ));
                results.extend(members.map(|m| {
                    ResultEnvelope::error(m.id, RpcError::request_timeout(headers.deadline))
                }));
                break;
            }
            let run = self.execute_request(
                &headers.correlation_id,
                member.future,
                member.id,
                &member.envelope,
            );
            match tokio::time::timeout(Duration::from_secs(remaining as u64), run).await {
                Ok(result) => {
                    let failed = result.is_error();
                    if result.requires_reply() {
                        results.push(result);
                    }
                    if headers.abort_on_error && failed {
                        // Remaining members are skipped, their futures
                        // dropped unpolled.
                        results.extend(
                            members.map(|m| ResultEnvelope::error(m.id, RpcError::aborted())),
                        );
                        break;
                    }
                }
                Err(_) => {
                    results.push(ResultEnvelope::error(
                        member.id,
                        RpcError::request_timeout(headers.deadline),
                    ));
                    results.extend(members.map(|m| {
                        ResultEnvelope::error(m.id, RpcError::request_timeout(headers.deadline))
                    }));
                    break;
                }
            }
        }
        self.persist_session(&session).await;
        let body = if results.is_empty() {
            None
        } else {
            Some(ResponseBody::Batch(results))
        };
        RpcReply {
            headers: response_headers(&headers.correlation_id, &session),
            body,
        }
    }

    /// Run one pending computation and convert every fault into a result.
    async fn execute_request(
        &self,
        correlation_id: &str,
        future: HandlerFuture,
        id: RequestId,
        envelope: &RequestEnvelope,
    ) -> ResultEnvelope {
        let full = self.config.full_request_logs;
        if self.config.request_logs {
            info!(
                correlation_id,
                request = %envelope.log_view(full),
                "rpc accepted"
            );
        }
        let fault = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(value)) => {
                if self.config.request_logs {
                    let result = if full { value.to_string() } else { "...".to_string() };
                    info!(
                        correlation_id,
                        request = %envelope.log_view(full),
                        result = %result,
                        "rpc finished"
                    );
                }
                return ResultEnvelope::success(id, value);
            }
            Ok(Err(err)) => err,
            Err(panic) => RpcError::internal(panic_message(panic)),
        };
        let client_error = if fault.kind == ErrorKind::InternalError {
            // Full detail stays server-side; the client gets a generic
            // message unless the server runs in a debug posture.
            error!(
                correlation_id,
                request = %envelope.log_view(full),
                error = %fault,
                "internal error"
            );
            let generic = RpcError::internal("Internal error");
            if self.config.debug {
                generic.with_data("detail", fault.message)
            } else {
                generic
            }
        } else {
            fault
        };
        info!(
            correlation_id,
            request = %envelope.log_view(full),
            error = %client_error,
            "rpc error"
        );
        ResultEnvelope::error(id, client_error)
    }

    async fn persist_session(&self, session: &Option<Arc<dyn Session>>) {
        let (Some(store), Some(session)) = (&self.sessions, session) else {
            return;
        };
        if session.stored() && session.changed() {
            if let Err(err) = store.save(Arc::clone(session)).await {
                error!(session_id = %session.id(), error = %err, "session persistence failed");
            }
        }
    }
}

/// Ties the admission slot and the task-board entry to the request task's
/// lifetime. Dropped on every exit path, including unwinds.
struct SlotGuard {
    _permit: AdmissionPermit,
    tasks: Arc<TaskBoard>,
    correlation_id: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.tasks.complete(&self.correlation_id);
    }
}

fn rejected(
    headers: &RequestHeaders,
    session: &Option<Arc<dyn Session>>,
    failure: PrepareFailure,
) -> RpcReply {
    RpcReply {
        headers: response_headers(&headers.correlation_id, session),
        body: Some(ResponseBody::Single(ResultEnvelope::error(
            failure.id,
            failure.error,
        ))),
    }
}

/// Response headers: correlation id when present, session id only for a
/// stored session that changed or was freshly loaded.
fn response_headers(correlation_id: &str, session: &Option<Arc<dyn Session>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !correlation_id.is_empty() {
        headers.insert(names::CORRELATION_ID.to_string(), correlation_id.to_string());
    }
    if let Some(session) = session {
        if session.stored() && (session.changed() || session.loaded()) {
            headers.insert(names::SESSION_ID.to_string(), session.id().to_string());
        }
    }
    headers
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
