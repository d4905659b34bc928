//! Identifier types for components, workers, log positions and promises.
//!
//! All identifiers are plain data: cheap to clone, hashable, and serializable
//! so they can travel inside oplog entries and query results.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque 128-bit identifier of a component (a deployed unit of code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(Uuid);

impl ComponentId {
    /// Creates a fresh random component id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one worker: a component plus a worker name unique within it.
///
/// Durable workers carry a caller-chosen stable name; ephemeral workers get a
/// generated name that is never exposed as an addressing contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId {
    pub component_id: ComponentId,
    pub worker_name: String,
}

impl WorkerId {
    pub fn new(component_id: ComponentId, worker_name: impl Into<String>) -> Self {
        Self {
            component_id,
            worker_name: worker_name.into(),
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component_id, self.worker_name)
    }
}

/// Monotonically increasing position within one worker's oplog.
///
/// Indices start at [`OplogIndex::INITIAL`]; [`OplogIndex::NONE`] is the
/// sentinel for "before the first entry". Ordering is total per worker only;
/// no cross-worker ordering is implied.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct OplogIndex(u64);

impl OplogIndex {
    /// Sentinel position before the first entry.
    pub const NONE: OplogIndex = OplogIndex(0);
    /// Position of the first entry in any log.
    pub const INITIAL: OplogIndex = OplogIndex(1);

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The position immediately after this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// The position immediately before this one, saturating at NONE.
    pub fn previous(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for OplogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a promise by the worker that created it and the oplog position
/// of its creation entry.
///
/// The pair is stable across replay, which is what makes promises addressable
/// by external callers that never saw the worker's in-memory state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromiseId {
    pub worker_id: WorkerId,
    pub oplog_idx: OplogIndex,
}

impl PromiseId {
    pub fn new(worker_id: WorkerId, oplog_idx: OplogIndex) -> Self {
        Self {
            worker_id,
            oplog_idx,
        }
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.worker_id, self.oplog_idx)
    }
}

/// Addressing target for remote invocations.
///
/// A durable worker is addressed by component id plus name; an ephemeral
/// worker by component id alone (a fresh unnamed instance is created per
/// address resolution).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub component_id: ComponentId,
    pub worker_name: Option<String>,
}

impl WorkerAddress {
    /// Address of a durable (named) worker.
    pub fn durable(component_id: ComponentId, worker_name: impl Into<String>) -> Self {
        Self {
            component_id,
            worker_name: Some(worker_name.into()),
        }
    }

    /// Address of an ephemeral worker: a fresh instance per resolution.
    pub fn ephemeral(component_id: ComponentId) -> Self {
        Self {
            component_id,
            worker_name: None,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.worker_name {
            Some(name) => write!(f, "{}/{}", self.component_id, name),
            None => write!(f, "{}/<ephemeral>", self.component_id),
        }
    }
}
