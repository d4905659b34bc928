//! Foundation types and traits.
//!
//! This module hides decisions that are likely to change independently of the
//! engine: the serialization format for payload bytes, the identifier
//! representations, and the retry/persistence policy model.

mod error;
mod ids;
mod policy;
mod retry;
mod serialization;

pub use error::{Error, Result};
pub use ids::{ComponentId, OplogIndex, PromiseId, WorkerAddress, WorkerId};
pub use policy::{EffectKind, PersistenceLevel};
pub use retry::RetryPolicy;
pub use serialization::{deserialize_value, serialize_value, stable_hash};
