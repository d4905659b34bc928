//! Worker updates: moving a live worker to a newer component version.
//!
//! Automatic mode proves the new code agrees with the worker's recorded
//! history by replaying every completed invocation against it in strict
//! mode, where any divergence or log overrun aborts the update. Snapshot
//! mode instead round-trips worker state through the component's
//! `save-snapshot` and `load-snapshot` exports.

use super::context::DurableContext;
use super::engine::Runtime;
use super::error::{ExecutionError, Result};
use crate::core::WorkerId;
use crate::oplog::{OplogEntry, ReplayState, UpdateMode};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Exported function invoked to capture state before a snapshot update.
pub const SAVE_SNAPSHOT: &str = "save-snapshot";
/// Exported function invoked to restore state after a snapshot update.
pub const LOAD_SNAPSHOT: &str = "load-snapshot";

struct CompletedInvocation {
    function_name: String,
    payload: Vec<u8>,
    effects: Vec<(crate::core::OplogIndex, OplogEntry)>,
    response: Vec<u8>,
}

impl Runtime {
    /// Updates `worker_id` to `target_version` of its component.
    ///
    /// On failure a `failed-update` entry is recorded and the worker keeps
    /// running its prior version; the error says why.
    pub async fn update_worker(
        &self,
        worker_id: &WorkerId,
        target_version: u64,
        mode: UpdateMode,
    ) -> Result<()> {
        let (component_id, current_version) = {
            let state = self
                .inner
                .workers
                .get(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            (state.component_id, state.component_version)
        };
        let latest = self.latest_component_version(component_id)?;
        if target_version > latest {
            return Err(ExecutionError::ComponentVersionNotFound {
                component: component_id,
                version: target_version,
            });
        }
        if target_version == current_version {
            return Ok(());
        }

        self.inner
            .oplog
            .append(
                worker_id,
                OplogEntry::PendingUpdate {
                    timestamp: Utc::now(),
                    target_version,
                    mode,
                },
            )
            .await?;

        let outcome = match mode {
            UpdateMode::Automatic => self.apply_automatic(worker_id, target_version).await,
            UpdateMode::SnapshotBased => self.apply_snapshot(worker_id, target_version).await,
        };

        match outcome {
            Ok(()) => {
                self.inner
                    .oplog
                    .append(
                        worker_id,
                        OplogEntry::SuccessfulUpdate {
                            timestamp: Utc::now(),
                            target_version,
                        },
                    )
                    .await?;
                if let Some(mut state) = self.inner.workers.get_mut(worker_id) {
                    state.component_version = target_version;
                }
                info!(worker = %worker_id, version = target_version, "worker updated");
                Ok(())
            }
            Err(err) => {
                let details = err.to_string();
                warn!(worker = %worker_id, version = target_version, error = %details,
                    "update failed; worker stays on prior version");
                self.inner
                    .oplog
                    .append(
                        worker_id,
                        OplogEntry::FailedUpdate {
                            timestamp: Utc::now(),
                            target_version,
                            details: Some(details.clone()),
                        },
                    )
                    .await?;
                Err(ExecutionError::UpdateFailed {
                    worker: worker_id.clone(),
                    target_version,
                    details,
                })
            }
        }
    }

    /// Validation replay: every completed invocation must re-execute
    /// cleanly and produce the recorded response under the new version.
    async fn apply_automatic(&self, worker_id: &WorkerId, target_version: u64) -> Result<()> {
        let (component_id, retry_policy, env, run_lock) = {
            let state = self
                .inner
                .workers
                .get(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            (
                state.component_id,
                state.retry_policy,
                state.env.clone(),
                state.run_lock.clone(),
            )
        };
        // No invocation may run while the history is validated.
        let _guard = run_lock.lock().await;

        let raw = self.inner.oplog.read_all(worker_id).await?;
        let state = ReplayState::new(raw)?;
        let (invocations, incomplete) = collect_invocations(state);
        if incomplete {
            return Err(ExecutionError::Handler(
                "worker has an incomplete invocation".to_string(),
            ));
        }

        for invocation in invocations {
            let handler =
                self.inner
                    .handler(&component_id, target_version, &invocation.function_name)?;

            let ctx = DurableContext::new(
                Arc::clone(&self.inner),
                worker_id.clone(),
                invocation.effects,
                retry_policy,
                env.clone(),
                true,
            );
            let response = handler(ctx, invocation.payload).await?;
            if response != invocation.response {
                return Err(ExecutionError::ReplayDivergence {
                    index: crate::core::OplogIndex::NONE,
                    expected: format!(
                        "recorded response of {} ({} bytes)",
                        invocation.function_name,
                        invocation.response.len()
                    ),
                    actual: format!("{} bytes", response.len()),
                });
            }
        }
        Ok(())
    }

    /// Snapshot round-trip: `save-snapshot` on the old version, then
    /// `load-snapshot` on the new one.
    async fn apply_snapshot(&self, worker_id: &WorkerId, target_version: u64) -> Result<()> {
        let snapshot = self.invoke(worker_id, SAVE_SNAPSHOT, Vec::new()).await?;

        let prior_version = {
            let mut state = self
                .inner
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            let prior = state.component_version;
            state.component_version = target_version;
            prior
        };

        match self.invoke(worker_id, LOAD_SNAPSHOT, snapshot).await {
            Ok(_) => Ok(()),
            Err(err) => {
                if let Some(mut state) = self.inner.workers.get_mut(worker_id) {
                    state.component_version = prior_version;
                }
                Err(err)
            }
        }
    }
}

/// Splits a replay-filtered log into completed invocations; the flag is set
/// when a trailing invocation has no completion.
fn collect_invocations(state: ReplayState) -> (Vec<CompletedInvocation>, bool) {
    let mut invocations = Vec::new();
    let mut current: Option<CompletedInvocation> = None;

    for (idx, entry) in state.into_entries() {
        match entry {
            OplogEntry::ExportedFunctionInvoked {
                function_name,
                request,
                ..
            } => {
                current = Some(CompletedInvocation {
                    function_name,
                    payload: request,
                    effects: Vec::new(),
                    response: Vec::new(),
                });
            }
            OplogEntry::ExportedFunctionCompleted { response, .. } => {
                if let Some(mut invocation) = current.take() {
                    invocation.response = response;
                    invocations.push(invocation);
                }
            }
            other => {
                if let Some(invocation) = current.as_mut() {
                    invocation.effects.push((idx, other));
                }
            }
        }
    }

    let incomplete = current.is_some();
    (invocations, incomplete)
}
