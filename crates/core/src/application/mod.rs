// Application services: admission, registry, preparation, execution.

pub mod admission;
pub mod engine;
pub mod introspect;
pub mod prepare;
pub mod registry;
pub mod tasks;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use engine::{Dispatch, EngineBuilder, RpcEngine, RpcReply, ScheduledCall};
pub use registry::{MethodRecord, MethodRegistry, RegistryBuilder};
pub use tasks::{TaskBoard, TaskEntry, TaskInfo};
