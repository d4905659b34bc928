use crate::core::{Error as CoreError, OplogIndex, WorkerId};
use thiserror::Error;

/// Oplog layer error type.
///
/// Structural corruption of jump/atomic-region bookkeeping is rejected here,
/// at replay-state construction time, rather than being silently accepted.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OplogError {
    /// The worker has no oplog (it was never created here).
    #[error("no oplog for worker {0}")]
    NoSuchWorker(WorkerId),

    /// A core serialization error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An end marker references a begin index that is not open.
    #[error("unmatched end marker at {index}: begin {begin} is not an open region")]
    UnmatchedEndMarker { index: OplogIndex, begin: OplogIndex },

    /// A jump lands strictly inside an atomic region.
    #[error("jump at {index} targets {target}, inside the atomic region opened at {begin}")]
    JumpIntoAtomicRegion {
        index: OplogIndex,
        target: OplogIndex,
        begin: OplogIndex,
    },

    /// A jump region is empty or extends past the jump entry itself.
    #[error("invalid jump region at {index}: [{start}, {end})")]
    InvalidJumpRegion {
        index: OplogIndex,
        start: OplogIndex,
        end: OplogIndex,
    },
}

pub type Result<T> = std::result::Result<T, OplogError>;
