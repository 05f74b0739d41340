// Request Preparer
//
// Turns one untrusted envelope into a pending computation, or into a
// tagged failure carrying the (possibly null) request id. Runs before
// admission: a rejected request never consumes a slot.

use crate::application::registry::MethodRegistry;
use crate::domain::envelope::{RequestEnvelope, RequestId};
use crate::domain::error::RpcError;
use crate::port::service::{CallContext, HandlerFuture};
use serde_json::{Map, Value};

/// A request that passed validation and is ready to execute.
pub struct PreparedRequest {
    pub id: RequestId,
    pub future: HandlerFuture,
    pub envelope: RequestEnvelope,
}

impl std::fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("id", &self.id)
            .field("future", &"<handler future>")
            .field("envelope", &self.envelope)
            .finish()
    }
}

/// Rejection produced before execution. `id` is echoed into the error
/// envelope so the client can correlate.
#[derive(Debug)]
pub struct PrepareFailure {
    pub id: RequestId,
    pub error: RpcError,
}

/// Validate an envelope, check permissions, validate params and invoke the
/// handler to obtain the pending computation.
///
/// `position` is the member index within a batch (0 for single requests);
/// it is attached to failures of id-less members so they stay attributable
/// even without an id.
pub fn prepare(
    registry: &MethodRegistry,
    body: Value,
    ctx: &CallContext,
    enforce_permissions: bool,
    position: usize,
) -> Result<PreparedRequest, PrepareFailure> {
    let mut body = match body {
        Value::Object(map) => map,
        _ => {
            return Err(fail(
                None,
                position,
                RpcError::invalid_request("Request must be an object"),
            ))
        }
    };

    let id = match body.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) if n.as_i64().is_some() => n.as_i64(),
        Some(_) => {
            return Err(fail(
                None,
                position,
                RpcError::invalid_request("Request \"id\" must be an integer or null"),
            ))
        }
    };

    let method = match body.get("method").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(fail(
                id,
                position,
                RpcError::invalid_request("Request \"method\" must be a string"),
            ))
        }
    };

    let record = match registry.lookup(&method) {
        Some(record) => record,
        None => return Err(fail(id, position, RpcError::method_not_found(&method))),
    };

    if enforce_permissions && !ctx.scope.covers(record.permission) {
        let granted = ctx.session.as_deref().is_some_and(|session| {
            session.grants(&method) || session.grants(&record.service_name)
        });
        if !granted {
            return Err(fail(id, position, RpcError::permission_denied(&method)));
        }
    }

    let params = match body.remove("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(fail(
                id,
                position,
                RpcError::invalid_params("Request \"params\" must be an object"),
            ))
        }
    };

    for key in params.keys() {
        if !record.params.iter().any(|accepted| accepted == key) {
            return Err(fail(
                id,
                position,
                RpcError::invalid_params(format!("unexpected parameter {key:?}")),
            ));
        }
    }

    if let Some(validator) = &record.validator {
        let instance = Value::Object(params.clone());
        if let Err(err) = validator.validate(&instance) {
            return Err(fail(id, position, RpcError::invalid_params(err.to_string())));
        }
    }

    let envelope = RequestEnvelope {
        id,
        method,
        params: params.clone(),
    };
    let future = (record.handler)(ctx.clone(), params);
    Ok(PreparedRequest {
        id,
        future,
        envelope,
    })
}

fn fail(id: RequestId, position: usize, error: RpcError) -> PrepareFailure {
    let error = if id.is_none() {
        error.with_data("position", position)
    } else {
        error
    };
    PrepareFailure { id, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::RegistryBuilder;
    use crate::domain::error::ErrorKind;
    use crate::domain::scope::Scope;
    use crate::port::service::{handler, RouteDef, RpcService};
    use crate::port::session::mocks::MockSession;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct MathService;

    impl RpcService for MathService {
        fn routes(&self) -> Vec<RouteDef> {
            vec![
                RouteDef::new(
                    "add",
                    &["a", "b"],
                    handler(|_ctx, params| async move {
                        let a = params.get("a").and_then(Value::as_i64).unwrap_or(0);
                        let b = params.get("b").and_then(Value::as_i64).unwrap_or(0);
                        Ok(json!(a + b))
                    }),
                ),
                RouteDef::new(
                    "reset",
                    &[],
                    handler(|_ctx, _params| async { Ok(Value::Null) }),
                ),
            ]
        }

        fn permissions(&self) -> Vec<(String, Scope)> {
            vec![("add".to_string(), Scope::Guest)]
        }

        fn validators(&self) -> HashMap<String, Value> {
            let mut validators = HashMap::new();
            validators.insert(
                "add".to_string(),
                json!({
                    "type": "object",
                    "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                    "required": ["a", "b"],
                }),
            );
            validators
        }
    }

    fn registry() -> MethodRegistry {
        let mut builder = RegistryBuilder::new(&[], Scope::System.level() - 1).unwrap();
        builder.register_service("math", &MathService).unwrap();
        builder.build()
    }

    fn ctx(scope: Scope) -> CallContext {
        CallContext {
            correlation_id: "test".to_string(),
            deadline: 2_000_000_000,
            scope,
            session: None,
        }
    }

    fn kind_of(failure: PrepareFailure) -> ErrorKind {
        failure.error.kind
    }

    #[tokio::test]
    async fn test_valid_request_yields_pending_computation() {
        let registry = registry();
        let prepared = prepare(
            &registry,
            json!({"id": 1, "method": "math.add", "params": {"a": 2, "b": 3}}),
            &ctx(Scope::Guest),
            true,
            0,
        )
        .unwrap();

        assert_eq!(prepared.id, Some(1));
        assert_eq!(prepared.envelope.method, "math.add");
        assert_eq!(prepared.future.await.unwrap(), json!(5));
    }

    #[test]
    fn test_non_object_body_is_invalid_request() {
        let failure = prepare(&registry(), json!([1, 2]), &ctx(Scope::System), true, 3).unwrap_err();
        assert_eq!(failure.id, None);
        assert_eq!(failure.error.kind, ErrorKind::InvalidRequest);
        assert_eq!(failure.error.data.as_ref().unwrap()["position"], json!(3));
    }

    #[test]
    fn test_non_integer_id_is_invalid_request() {
        let failure = prepare(
            &registry(),
            json!({"id": "seven", "method": "math.add"}),
            &ctx(Scope::System),
            true,
            0,
        )
        .unwrap_err();
        assert_eq!(kind_of(failure), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_absent_id_is_a_notification() {
        let registry = registry();
        let prepared = prepare(
            &registry,
            json!({"method": "math.add", "params": {"a": 1, "b": 1}}),
            &ctx(Scope::Guest),
            true,
            0,
        )
        .unwrap();
        assert_eq!(prepared.id, None);
    }

    #[test]
    fn test_unknown_method() {
        let failure = prepare(
            &registry(),
            json!({"id": 2, "method": "math.unknown"}),
            &ctx(Scope::System),
            true,
            0,
        )
        .unwrap_err();
        assert_eq!(failure.id, Some(2));
        assert_eq!(kind_of(failure), ErrorKind::MethodNotFound);
    }

    #[test]
    fn test_scope_check_rejects_guest_on_system_route() {
        let failure = prepare(
            &registry(),
            json!({"id": 1, "method": "math.reset"}),
            &ctx(Scope::Guest),
            true,
            0,
        )
        .unwrap_err();
        assert_eq!(kind_of(failure), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_session_grant_overrides_scope() {
        let registry = registry();
        for grant in ["math.reset", "math"] {
            let session: Arc<dyn crate::port::session::Session> =
                Arc::new(MockSession::new(Scope::Guest).with_grant(grant));
            let mut context = ctx(Scope::Guest);
            context.session = Some(session);
            assert!(prepare(
                &registry,
                json!({"id": 1, "method": "math.reset"}),
                &context,
                true,
                0,
            )
            .is_ok());
        }
    }

    #[test]
    fn test_enforcement_disabled_skips_permission_check() {
        assert!(prepare(
            &registry(),
            json!({"id": 1, "method": "math.reset"}),
            &ctx(Scope::Guest),
            false,
            0,
        )
        .is_ok());
    }

    #[test]
    fn test_unexpected_parameter_is_rejected() {
        let failure = prepare(
            &registry(),
            json!({"id": 1, "method": "math.add", "params": {"a": 1, "b": 2, "c": 3}}),
            &ctx(Scope::System),
            true,
            0,
        )
        .unwrap_err();
        assert_eq!(kind_of(failure), ErrorKind::InvalidParams);
    }

    #[test]
    fn test_validator_failure_is_invalid_params() {
        let failure = prepare(
            &registry(),
            json!({"id": 1, "method": "math.add", "params": {"a": "two", "b": 3}}),
            &ctx(Scope::System),
            true,
            0,
        )
        .unwrap_err();
        assert_eq!(kind_of(failure), ErrorKind::InvalidParams);
    }

    #[test]
    fn test_params_must_be_object() {
        let failure = prepare(
            &registry(),
            json!({"id": 1, "method": "math.add", "params": [1, 2]}),
            &ctx(Scope::System),
            true,
            0,
        )
        .unwrap_err();
        assert_eq!(kind_of(failure), ErrorKind::InvalidParams);
    }
}
