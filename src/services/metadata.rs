//! Projected worker metadata, the unit served by enumeration.

use crate::core::{ComponentId, OplogIndex, RetryPolicy, WorkerId};
use crate::executor::engine::WorkerState;
use crate::executor::WorkerStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time projection of one worker's state.
///
/// Served from a lazily refreshed cache unless the reader asks for precise
/// values; see the enumeration service for the freshness contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetadata {
    pub worker_id: WorkerId,
    pub component_id: ComponentId,
    pub component_version: u64,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub status: WorkerStatus,
    pub retry_policy: RetryPolicy,
    /// Consecutive failed attempts of the current invocation.
    pub failed_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Index of the last oplog entry at projection time.
    pub last_oplog_index: OplogIndex,
    pub active_plugins: Vec<String>,
}

impl WorkerMetadata {
    pub(crate) fn from_state(
        worker_id: &WorkerId,
        state: &WorkerState,
        last_oplog_index: OplogIndex,
    ) -> Self {
        Self {
            worker_id: worker_id.clone(),
            component_id: state.component_id,
            component_version: state.component_version,
            args: state.args.clone(),
            env: state.env.clone(),
            status: state.status,
            retry_policy: state.retry_policy,
            failed_attempts: state.failed_attempts,
            last_error: state.last_error.clone(),
            created_at: state.created_at,
            last_oplog_index,
            active_plugins: state.active_plugins.clone(),
        }
    }

    /// Value of one environment variable, if set.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}
