//! The oplog entry model: a closed tagged union of every effect and control
//! event a worker can record.
//!
//! The variant set is deliberately a single `enum` consumed through
//! exhaustive `match` everywhere (replay, search, projection, compaction):
//! adding a new entry kind must force every consumer to be revisited.

use crate::core::{OplogIndex, RetryPolicy, WorkerAddress, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a [`OplogEntry::Log`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

/// How a pending worker update should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Dry-run replay the existing log against the target version; abort on
    /// any divergence.
    Automatic,
    /// Transfer state through the `save-snapshot` / `load-snapshot` exports.
    SnapshotBased,
}

/// A remote invocation recorded on the caller before dispatch.
///
/// The idempotency key is derived from the caller's identity and log
/// position, so a replayed caller re-sends the same key and the callee can
/// deduplicate delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInvocation {
    pub target: WorkerAddress,
    pub function_name: String,
    pub payload: Vec<u8>,
    pub idempotency_key: u64,
}

/// One immutable record in a worker's oplog.
///
/// Every variant carries its append timestamp. Entries are only ever removed
/// by compaction that preserves replay semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OplogEntry {
    /// The worker was created. Always the first entry.
    Create {
        timestamp: DateTime<Utc>,
        worker_id: WorkerId,
        component_version: u64,
        args: Vec<String>,
        env: Vec<(String, String)>,
    },
    /// A host-function call completed; its result is substituted on replay
    /// instead of re-executing the call.
    ImportedFunctionInvoked {
        timestamp: DateTime<Utc>,
        function_name: String,
        request: Vec<u8>,
        response: Vec<u8>,
    },
    /// An exported function started executing on this worker.
    ExportedFunctionInvoked {
        timestamp: DateTime<Utc>,
        function_name: String,
        request: Vec<u8>,
        idempotency_key: u64,
    },
    /// The in-flight exported function finished and its result was delivered.
    ExportedFunctionCompleted {
        timestamp: DateTime<Utc>,
        response: Vec<u8>,
    },
    /// The worker suspended waiting on a promise, RPC result or sleep.
    Suspend { timestamp: DateTime<Utc> },
    /// A permanent failure; the worker is `Failed` from here on.
    Error {
        timestamp: DateTime<Utc>,
        error: String,
    },
    /// Padding entry with no replay effect; left behind by compaction.
    NoOp { timestamp: DateTime<Utc> },
    /// Deliberate timeline rewind: entries in `[start, end)` are void for
    /// future replay.
    Jump {
        timestamp: DateTime<Utc>,
        start: OplogIndex,
        end: OplogIndex,
    },
    /// The worker was preempted externally. Always resumable.
    Interrupted { timestamp: DateTime<Utc> },
    /// The worker exited explicitly. Terminal.
    Exited { timestamp: DateTime<Utc> },
    /// The active retry policy was overridden mid-run.
    ChangeRetryPolicy {
        timestamp: DateTime<Utc>,
        new_policy: RetryPolicy,
    },
    /// Opens an atomic region: on recovery an unmatched begin discards the
    /// whole region for re-execution.
    BeginAtomicRegion { timestamp: DateTime<Utc> },
    /// Closes the atomic region opened at `begin_index`.
    EndAtomicRegion {
        timestamp: DateTime<Utc>,
        begin_index: OplogIndex,
    },
    /// Opens a remote-write bracket (only written under strict idempotence).
    BeginRemoteWrite { timestamp: DateTime<Utc> },
    /// Closes the remote-write bracket opened at `begin_index`.
    EndRemoteWrite {
        timestamp: DateTime<Utc>,
        begin_index: OplogIndex,
    },
    /// An outbound invocation was accepted but its completion is not yet
    /// recorded.
    PendingWorkerInvocation {
        timestamp: DateTime<Utc>,
        invocation: WorkerInvocation,
    },
    /// An update request was accepted and awaits application.
    PendingUpdate {
        timestamp: DateTime<Utc>,
        target_version: u64,
        mode: UpdateMode,
    },
    /// The worker now runs the target version.
    SuccessfulUpdate {
        timestamp: DateTime<Utc>,
        target_version: u64,
    },
    /// The update was aborted; the worker stays on its prior version.
    FailedUpdate {
        timestamp: DateTime<Utc>,
        target_version: u64,
        details: Option<String>,
    },
    /// The worker grew its memory by `delta` bytes.
    GrowMemory {
        timestamp: DateTime<Utc>,
        delta: u64,
    },
    /// A host resource was created.
    CreateResource {
        timestamp: DateTime<Utc>,
        resource_id: u64,
    },
    /// A host resource was dropped.
    DropResource {
        timestamp: DateTime<Utc>,
        resource_id: u64,
    },
    /// Debug metadata attached to a live resource.
    DescribeResource {
        timestamp: DateTime<Utc>,
        resource_id: u64,
        resource_name: String,
    },
    /// A log line emitted by the worker.
    Log {
        timestamp: DateTime<Utc>,
        level: LogLevel,
        context: String,
        message: String,
    },
    /// The worker was restarted and recovery replay began here.
    Restart { timestamp: DateTime<Utc> },
    /// A plugin was activated for this worker.
    ActivatePlugin {
        timestamp: DateTime<Utc>,
        plugin: String,
    },
    /// A plugin was deactivated for this worker.
    DeactivatePlugin {
        timestamp: DateTime<Utc>,
        plugin: String,
    },
}

impl OplogEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            OplogEntry::Create { timestamp, .. }
            | OplogEntry::ImportedFunctionInvoked { timestamp, .. }
            | OplogEntry::ExportedFunctionInvoked { timestamp, .. }
            | OplogEntry::ExportedFunctionCompleted { timestamp, .. }
            | OplogEntry::Suspend { timestamp }
            | OplogEntry::Error { timestamp, .. }
            | OplogEntry::NoOp { timestamp }
            | OplogEntry::Jump { timestamp, .. }
            | OplogEntry::Interrupted { timestamp }
            | OplogEntry::Exited { timestamp }
            | OplogEntry::ChangeRetryPolicy { timestamp, .. }
            | OplogEntry::BeginAtomicRegion { timestamp }
            | OplogEntry::EndAtomicRegion { timestamp, .. }
            | OplogEntry::BeginRemoteWrite { timestamp }
            | OplogEntry::EndRemoteWrite { timestamp, .. }
            | OplogEntry::PendingWorkerInvocation { timestamp, .. }
            | OplogEntry::PendingUpdate { timestamp, .. }
            | OplogEntry::SuccessfulUpdate { timestamp, .. }
            | OplogEntry::FailedUpdate { timestamp, .. }
            | OplogEntry::GrowMemory { timestamp, .. }
            | OplogEntry::CreateResource { timestamp, .. }
            | OplogEntry::DropResource { timestamp, .. }
            | OplogEntry::DescribeResource { timestamp, .. }
            | OplogEntry::Log { timestamp, .. }
            | OplogEntry::Restart { timestamp }
            | OplogEntry::ActivatePlugin { timestamp, .. }
            | OplogEntry::DeactivatePlugin { timestamp, .. } => *timestamp,
        }
    }

    /// Stable kind name, used by the search service and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            OplogEntry::Create { .. } => "create",
            OplogEntry::ImportedFunctionInvoked { .. } => "imported-function-invoked",
            OplogEntry::ExportedFunctionInvoked { .. } => "exported-function-invoked",
            OplogEntry::ExportedFunctionCompleted { .. } => "exported-function-completed",
            OplogEntry::Suspend { .. } => "suspend",
            OplogEntry::Error { .. } => "error",
            OplogEntry::NoOp { .. } => "no-op",
            OplogEntry::Jump { .. } => "jump",
            OplogEntry::Interrupted { .. } => "interrupted",
            OplogEntry::Exited { .. } => "exited",
            OplogEntry::ChangeRetryPolicy { .. } => "change-retry-policy",
            OplogEntry::BeginAtomicRegion { .. } => "begin-atomic-region",
            OplogEntry::EndAtomicRegion { .. } => "end-atomic-region",
            OplogEntry::BeginRemoteWrite { .. } => "begin-remote-write",
            OplogEntry::EndRemoteWrite { .. } => "end-remote-write",
            OplogEntry::PendingWorkerInvocation { .. } => "pending-worker-invocation",
            OplogEntry::PendingUpdate { .. } => "pending-update",
            OplogEntry::SuccessfulUpdate { .. } => "successful-update",
            OplogEntry::FailedUpdate { .. } => "failed-update",
            OplogEntry::GrowMemory { .. } => "grow-memory",
            OplogEntry::CreateResource { .. } => "create-resource",
            OplogEntry::DropResource { .. } => "drop-resource",
            OplogEntry::DescribeResource { .. } => "describe-resource",
            OplogEntry::Log { .. } => "log",
            OplogEntry::Restart { .. } => "restart",
            OplogEntry::ActivatePlugin { .. } => "activate-plugin",
            OplogEntry::DeactivatePlugin { .. } => "deactivate-plugin",
        }
    }

    /// Whether this entry is a hint: recorded for observability and
    /// projection, but never consumed as a substitution point during replay.
    pub fn is_hint(&self) -> bool {
        match self {
            OplogEntry::Suspend { .. }
            | OplogEntry::Error { .. }
            | OplogEntry::NoOp { .. }
            | OplogEntry::Interrupted { .. }
            | OplogEntry::Exited { .. }
            | OplogEntry::PendingWorkerInvocation { .. }
            | OplogEntry::PendingUpdate { .. }
            | OplogEntry::SuccessfulUpdate { .. }
            | OplogEntry::FailedUpdate { .. }
            | OplogEntry::GrowMemory { .. }
            | OplogEntry::CreateResource { .. }
            | OplogEntry::DropResource { .. }
            | OplogEntry::DescribeResource { .. }
            | OplogEntry::Log { .. }
            | OplogEntry::Restart { .. }
            | OplogEntry::ActivatePlugin { .. }
            | OplogEntry::DeactivatePlugin { .. } => true,
            OplogEntry::Create { .. }
            | OplogEntry::ImportedFunctionInvoked { .. }
            | OplogEntry::ExportedFunctionInvoked { .. }
            | OplogEntry::ExportedFunctionCompleted { .. }
            | OplogEntry::Jump { .. }
            | OplogEntry::ChangeRetryPolicy { .. }
            | OplogEntry::BeginAtomicRegion { .. }
            | OplogEntry::EndAtomicRegion { .. }
            | OplogEntry::BeginRemoteWrite { .. }
            | OplogEntry::EndRemoteWrite { .. } => false,
        }
    }
}

impl fmt::Display for OplogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}
