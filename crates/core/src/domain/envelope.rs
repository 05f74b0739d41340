// Request / Response Envelopes

use crate::domain::error::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Client-chosen request id. `None` marks a notification: the request is
/// executed but no success reply is ever produced for it.
pub type RequestId = Option<i64>;

/// A request that survived shape validation.
///
/// Built by the preparer from untrusted JSON; handlers and logs see this
/// form, never the raw body.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    pub params: Map<String, Value>,
}

impl RequestEnvelope {
    /// Log view of the request. Params are replaced by `"..."` unless the
    /// server runs with full request logs.
    pub fn log_view(&self, full: bool) -> Value {
        let params: Value = if full {
            Value::Object(self.params.clone())
        } else {
            Value::String("...".to_string())
        };
        json!({ "id": self.id, "method": self.method, "params": params })
    }
}

/// `jsonrpc` marker field of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "2.0")]
    V2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    pub jsonrpc: Version,
    #[serde(default)]
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub jsonrpc: Version,
    #[serde(default)]
    pub id: RequestId,
    pub error: RpcError,
}

/// Exactly one of these exists per request that requires a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEnvelope {
    Success(SuccessEnvelope),
    Error(ErrorEnvelope),
}

impl ResultEnvelope {
    pub fn success(id: RequestId, result: Value) -> Self {
        ResultEnvelope::Success(SuccessEnvelope {
            jsonrpc: Version::V2,
            id,
            result,
        })
    }

    pub fn error(id: RequestId, error: RpcError) -> Self {
        ResultEnvelope::Error(ErrorEnvelope {
            jsonrpc: Version::V2,
            id,
            error,
        })
    }

    pub fn id(&self) -> RequestId {
        match self {
            ResultEnvelope::Success(s) => s.id,
            ResultEnvelope::Error(e) => e.id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResultEnvelope::Error(_))
    }

    /// A success for a notification is dropped; everything else is emitted.
    pub fn requires_reply(&self) -> bool {
        self.id().is_some() || self.is_error()
    }
}

/// Body of a reply: one envelope, or the surviving members of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Single(ResultEnvelope),
    Batch(Vec<ResultEnvelope>),
}
