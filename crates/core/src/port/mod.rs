// Ports - interfaces the engine consumes or exposes.
// Implementations live with the collaborators, not here.

pub mod service;
pub mod session;
pub mod time_provider;

pub use service::{handler, CallContext, Handler, Params, RouteDef, RpcService};
pub use session::{Session, SessionStore};
pub use time_provider::{SystemTimeProvider, TimeProvider};
