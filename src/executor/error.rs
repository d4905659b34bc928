use crate::core::{ComponentId, Error as CoreError, OplogIndex, WorkerId};
use crate::oplog::OplogError;
use thiserror::Error;

/// Execution engine error type.
///
/// Transient variants are retried per the active policy; everything else is
/// either a permanent failure or engine-internal control flow.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// A core serialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An oplog operation failed or the log is structurally corrupt.
    #[error("oplog error: {0}")]
    Oplog(#[from] OplogError),

    /// The addressed worker does not exist.
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// The component is not registered with this runtime.
    #[error("component not registered: {0}")]
    ComponentNotFound(ComponentId),

    /// The component version is not registered with this runtime.
    #[error("component {component} has no version {version}")]
    ComponentVersionNotFound { component: ComponentId, version: u64 },

    /// The target export does not exist on the component version.
    #[error("unknown function {function} on component {component} version {version}")]
    FunctionNotFound {
        component: ComponentId,
        version: u64,
        function: String,
    },

    /// A worker with this id already exists.
    #[error("worker already exists: {0}")]
    WorkerAlreadyExists(WorkerId),

    /// The worker code reported a transient failure; subject to retry.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The retry budget is exhausted; the worker is permanently failed.
    #[error("worker {worker} failed after {attempts} retries: {reason}")]
    AttemptsExhausted {
        worker: WorkerId,
        attempts: u32,
        reason: String,
    },

    /// The worker is in a terminal Failed state.
    #[error("worker {worker} is failed: {reason}")]
    WorkerFailed { worker: WorkerId, reason: String },

    /// The worker was preempted externally. Always resumable.
    #[error("worker {0} was interrupted")]
    Interrupted(WorkerId),

    /// The worker exited explicitly.
    #[error("worker {0} exited")]
    WorkerExited(WorkerId),

    /// Replay reached an entry that does not match what the code executed.
    #[error("replay diverged at {index}: code ran {expected}, log has {actual}")]
    ReplayDivergence {
        index: OplogIndex,
        expected: String,
        actual: String,
    },

    /// A remote write cannot be proven applied or not applied; fatal under
    /// strict idempotence, never retried.
    #[error("worker {worker} has an unterminated remote write at {index}; cannot safely resume")]
    UncertainRemoteWrite { worker: WorkerId, index: OplogIndex },

    /// An update could not be applied; the worker stays on its prior
    /// version.
    #[error("update of worker {worker} to version {target_version} failed: {details}")]
    UpdateFailed {
        worker: WorkerId,
        target_version: u64,
        details: String,
    },

    /// Internal control flow: the worker requested a replay jump.
    #[error("jump requested to {target}")]
    JumpRequested { target: OplogIndex },
}

impl ExecutionError {
    /// Whether this failure class is retried per the active retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::Handler(_) | ExecutionError::Core(_) | ExecutionError::Oplog(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
