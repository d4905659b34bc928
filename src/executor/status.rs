//! Worker status state machine.

use crate::core::Error as CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a worker.
///
/// `Running`/`Idle` are active; `Suspended`/`Interrupted`/`Retrying` are
/// transient recoverable states; `Failed`/`Exited` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerStatus {
    Running,
    Idle,
    Suspended,
    Interrupted,
    Retrying,
    Failed,
    Exited,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Running => "RUNNING",
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Suspended => "SUSPENDED",
            WorkerStatus::Interrupted => "INTERRUPTED",
            WorkerStatus::Retrying => "RETRYING",
            WorkerStatus::Failed => "FAILED",
            WorkerStatus::Exited => "EXITED",
        }
    }

    /// Actively executing or ready to execute.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerStatus::Running | WorkerStatus::Idle)
    }

    /// Transient state recovery can resume from.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Suspended | WorkerStatus::Interrupted | WorkerStatus::Retrying
        )
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Failed | WorkerStatus::Exited)
    }
}

impl FromStr for WorkerStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(WorkerStatus::Running),
            "IDLE" => Ok(WorkerStatus::Idle),
            "SUSPENDED" => Ok(WorkerStatus::Suspended),
            "INTERRUPTED" => Ok(WorkerStatus::Interrupted),
            "RETRYING" => Ok(WorkerStatus::Retrying),
            "FAILED" => Ok(WorkerStatus::Failed),
            "EXITED" => Ok(WorkerStatus::Exited),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            WorkerStatus::Running,
            WorkerStatus::Idle,
            WorkerStatus::Suspended,
            WorkerStatus::Interrupted,
            WorkerStatus::Retrying,
            WorkerStatus::Failed,
            WorkerStatus::Exited,
        ] {
            assert_eq!(status.as_str().parse::<WorkerStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<WorkerStatus>().is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(WorkerStatus::Running.is_active());
        assert!(WorkerStatus::Idle.is_active());
        assert!(WorkerStatus::Suspended.is_recoverable());
        assert!(WorkerStatus::Interrupted.is_recoverable());
        assert!(WorkerStatus::Retrying.is_recoverable());
        assert!(WorkerStatus::Failed.is_terminal());
        assert!(WorkerStatus::Exited.is_terminal());
        assert!(!WorkerStatus::Failed.is_active());
    }
}
