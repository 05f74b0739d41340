// Wire Error Taxonomy
//
// Request failures travel back to the client as tagged values, never as
// panics or transport faults. Only genuinely unexpected faults (handler
// panics) are converted, at the engine boundary, into `InternalError`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stable error-kind identifiers of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    MethodNotFound,
    PermissionDenied,
    InvalidParams,
    RequestTimeout,
    Aborted,
    InternalError,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::MethodNotFound => "MethodNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::InvalidParams => "InvalidParams",
            ErrorKind::RequestTimeout => "RequestTimeout",
            ErrorKind::Aborted => "Aborted",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried inside an error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a diagnostic field to the error payload.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorKind::MethodNotFound, "Method not found")
            .with_data("request_method", method)
    }

    /// Deliberately indistinguishable from an unknown route: a caller
    /// without access must not learn the route exists.
    pub fn permission_denied(method: &str) -> Self {
        Self::new(ErrorKind::PermissionDenied, "Method not found")
            .with_data("request_method", method)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn request_timeout(deadline: i64) -> Self {
        Self::new(ErrorKind::RequestTimeout, "Request timeout")
            .with_data("request_deadline", deadline)
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "Aborted")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_serializes_as_identifier() {
        let err = RpcError::request_timeout(1700000000);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], json!("RequestTimeout"));
        assert_eq!(value["message"], json!("Request timeout"));
        assert_eq!(value["data"]["request_deadline"], json!(1700000000));
    }

    #[test]
    fn test_data_omitted_when_empty() {
        let value = serde_json::to_value(RpcError::aborted()).unwrap();
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_permission_denied_masks_existence() {
        let denied = RpcError::permission_denied("auth.rotate");
        let missing = RpcError::method_not_found("auth.rotate");
        assert_eq!(denied.message, missing.message);
        assert_ne!(denied.kind, missing.kind);
    }
}
