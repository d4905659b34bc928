//! The execution engine: runtime, durable contexts, promises, RPC, worker
//! status tracking and updates.

pub mod context;
pub mod engine;
pub mod error;
pub mod promise;
pub mod rpc;
pub mod status;
pub mod update;

pub use context::DurableContext;
pub use engine::{ComponentBuilder, Handler, HandlerFuture, Runtime};
pub use error::{ExecutionError, Result};
pub use promise::PromiseRegistry;
pub use rpc::{poll, FuturePoller, InvocationFuture, Pollable, RpcTarget};
pub use status::WorkerStatus;
pub use update::{LOAD_SNAPSHOT, SAVE_SNAPSHOT};
