// Domain model: envelopes, headers, scopes, wire errors.
// Pure data and pure functions - no runtime, no IO.

pub mod envelope;
pub mod error;
pub mod headers;
pub mod scope;

pub use envelope::{RequestEnvelope, RequestId, ResponseBody, ResultEnvelope};
pub use error::{ErrorKind, RpcError};
pub use headers::RequestHeaders;
pub use scope::Scope;

/// Protocol revision reported by `rpc.api`.
pub const JSONRPC: &str = "2.0";
