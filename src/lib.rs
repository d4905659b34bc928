//! Ponos: Durable Execution Substrate for Stateful Workers
//!
//! `ponos` (πόνος, Greek for "toil") runs long-lived stateful workers on
//! top of an append-only operation log. Every externally visible effect a
//! worker performs is recorded; after a crash, restart or interruption the
//! worker is re-executed against its own log, substituting recorded results
//! instead of repeating side effects, until it reaches the point where it
//! left off.
//!
//! # Features
//!
//! - **Durable execution**: effects survive crashes; recovery replays the
//!   log instead of re-running side effects
//! - **Invocation deduplication**: exported calls carry idempotency keys
//!   and repeated keys return the recorded response
//! - **Retry with backoff**: transient failures retry on an exponential
//!   schedule, overridable per worker from inside worker code
//! - **Atomic regions**: bracketed spans re-execute from their start
//!   instead of resuming mid-way
//! - **Promises**: durable one-shot cells workers can await and external
//!   parties can complete
//! - **Worker-to-worker RPC**: blocking calls and non-blocking futures with
//!   poll-based multiplexing
//! - **Enumeration and oplog queries**: filtered worker listings and paged
//!   log inspection
//! - **Updates**: move a live worker to a new component version, validated
//!   by replay or carried over a state snapshot
//!
//! # Quick Start
//!
//! ```ignore
//! use ponos::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::new();
//!     let component = runtime
//!         .component("counter")
//!         .function("increment", |ctx, _payload| {
//!             Box::pin(async move {
//!                 let n: u64 = ctx
//!                     .durable("store::bump", || async { Ok(1u64) })
//!                     .await?;
//!                 Ok(serialize_value(&n)?)
//!             })
//!         })
//!         .build();
//!
//!     let worker = runtime
//!         .create_worker(component, "counter-1", vec![], vec![])
//!         .await?;
//!     let response = runtime.invoke(&worker, "increment", vec![]).await?;
//!     println!("{response:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`core`]: identifiers, retry and persistence policy, serialization
//! - [`oplog`]: the entry model, log storage, replay state, queries
//! - [`executor`]: the runtime, durable contexts, promises, RPC, updates
//! - [`services`]: metadata projection, filters and worker enumeration

pub mod core;
pub mod executor;
pub mod oplog;
pub mod services;

// Re-export commonly used types for convenience
pub use crate::core::{
    deserialize_value, serialize_value, stable_hash, ComponentId, EffectKind, Error as CoreError,
    OplogIndex, PersistenceLevel, PromiseId, Result as CoreResult, RetryPolicy, WorkerAddress,
    WorkerId,
};

pub use crate::oplog::{
    InMemoryOplog, LogLevel, Oplog, OplogCursor, OplogEntry, OplogError, OplogSearchCursor,
    ReplayState, Result as OplogResult, UpdateMode, WorkerInvocation,
};

pub use crate::executor::{
    poll, DurableContext, ExecutionError, FuturePoller, InvocationFuture, Pollable,
    PromiseRegistry, Result as ExecutionResult, RpcTarget, Runtime, WorkerStatus,
};

pub use crate::services::{
    FilterComparator, ScanCursor, StringFilterComparator, WorkerAllFilter, WorkerAnyFilter,
    WorkerMetadata, WorkerPage, WorkerPropertyFilter,
};

// Re-export dependencies used in public API so callers cannot end up with
// mismatched versions
pub use serde;
pub use tokio;
pub use uuid;

/// Prelude module for convenient glob imports
pub mod prelude {
    pub use crate::core::{
        deserialize_value, serialize_value, ComponentId, OplogIndex, PersistenceLevel, PromiseId,
        RetryPolicy, WorkerAddress, WorkerId,
    };
    pub use crate::executor::{
        poll, DurableContext, ExecutionError, FuturePoller, InvocationFuture, Pollable, RpcTarget,
        Runtime, WorkerStatus,
    };
    pub use crate::oplog::{OplogEntry, UpdateMode};
    pub use crate::services::{
        FilterComparator, ScanCursor, StringFilterComparator, WorkerAllFilter, WorkerAnyFilter,
        WorkerPropertyFilter,
    };
}
