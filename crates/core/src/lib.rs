// Relay Core - Request admission, dispatch and execution engine.
// NO transport and NO storage dependencies - collaborators plug in via ports.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use application::engine::{Dispatch, EngineBuilder, RpcEngine, RpcReply, ScheduledCall};
pub use config::ServerConfig;
pub use domain::error::{ErrorKind, RpcError};
pub use domain::scope::Scope;
pub use error::{EngineError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
