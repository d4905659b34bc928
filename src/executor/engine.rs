//! The runtime: component registry, worker lifecycle, and the invocation
//! loop that drives durable re-execution.

use super::context::DurableContext;
use super::error::{ExecutionError, Result};
use super::promise::PromiseRegistry;
use super::status::WorkerStatus;
use crate::core::{ComponentId, OplogIndex, RetryPolicy, WorkerAddress, WorkerId};
use crate::oplog::{
    InMemoryOplog, Oplog, OplogCursor, OplogEntry, OplogSearchCursor, ReplayState,
};
use crate::services::metadata::WorkerMetadata;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Boxed future returned by function handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>;

/// An exported function implementation.
pub type Handler = Arc<dyn Fn(DurableContext, Vec<u8>) -> HandlerFuture + Send + Sync>;

struct ComponentVersion {
    functions: HashMap<String, Handler>,
}

struct Component {
    name: String,
    versions: Vec<ComponentVersion>,
}

impl Component {
    fn latest_version(&self) -> u64 {
        self.versions.len() as u64 - 1
    }
}

/// Registers one version of a component's exported functions.
pub struct ComponentBuilder {
    runtime: Arc<RuntimeInner>,
    component_id: Option<ComponentId>,
    name: String,
    functions: HashMap<String, Handler>,
}

impl ComponentBuilder {
    /// Registers an exported function under `name`.
    pub fn function<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(DurableContext, Vec<u8>) -> HandlerFuture + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(handler));
        self
    }

    /// Finishes registration and returns the component id. Building on an
    /// existing component id adds the next version.
    pub fn build(self) -> ComponentId {
        let version = ComponentVersion {
            functions: self.functions,
        };
        match self.component_id {
            Some(id) => {
                let mut component = self
                    .runtime
                    .components
                    .get_mut(&id)
                    .expect("component disappeared during version registration");
                component.versions.push(version);
                let latest = component.latest_version();
                info!(component = %id, version = latest, "registered component version");
                id
            }
            None => {
                let id = ComponentId::new();
                self.runtime.components.insert(
                    id,
                    Component {
                        name: self.name.clone(),
                        versions: vec![version],
                    },
                );
                self.runtime.component_names.insert(self.name, id);
                info!(component = %id, "registered component");
                id
            }
        }
    }
}

pub(crate) struct WorkerState {
    pub(crate) component_id: ComponentId,
    pub(crate) component_version: u64,
    pub(crate) args: Vec<String>,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) status: WorkerStatus,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) failed_attempts: u32,
    pub(crate) last_error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) active_plugins: Vec<String>,
    pub(crate) cancel: CancellationToken,
    pub(crate) run_lock: Arc<Mutex<()>>,
}

pub(crate) struct RuntimeInner {
    pub(crate) oplog: Arc<dyn Oplog>,
    pub(crate) promises: PromiseRegistry,
    pub(crate) components: DashMap<ComponentId, Component>,
    pub(crate) component_names: DashMap<String, ComponentId>,
    pub(crate) workers: DashMap<WorkerId, WorkerState>,
    /// Lazily refreshed metadata, served by non-precise enumeration. Only
    /// worker creation and precise reads write it, so it observably lags.
    pub(crate) metadata_cache: DashMap<WorkerId, WorkerMetadata>,
}

impl RuntimeInner {
    pub(crate) fn set_status(&self, worker_id: &WorkerId, status: WorkerStatus) {
        if let Some(mut state) = self.workers.get_mut(worker_id) {
            state.status = status;
        }
    }

    /// Maps a logical address to a concrete worker id. Ephemeral addresses
    /// get a fresh single-use worker.
    pub(crate) fn resolve_address(&self, address: &WorkerAddress) -> WorkerId {
        let worker_name = match &address.worker_name {
            Some(name) => name.clone(),
            None => format!("ephemeral-{}", Uuid::new_v4()),
        };
        WorkerId {
            component_id: address.component_id,
            worker_name,
        }
    }

    pub(crate) fn handler(
        &self,
        component_id: &ComponentId,
        version: u64,
        function_name: &str,
    ) -> Result<Handler> {
        let component = self
            .components
            .get(component_id)
            .ok_or(ExecutionError::ComponentNotFound(*component_id))?;
        let component_version = component
            .versions
            .get(version as usize)
            .ok_or(ExecutionError::ComponentVersionNotFound {
                component: *component_id,
                version,
            })?;
        component_version
            .functions
            .get(function_name)
            .cloned()
            .ok_or_else(|| ExecutionError::FunctionNotFound {
                component: *component_id,
                version,
                function: function_name.to_string(),
            })
    }

    /// Reads the durable view of one invocation from the log: the index of
    /// its `exported-function-invoked` entry, the effect entries recorded
    /// after it, and its completion response if it already finished.
    async fn invocation_slice(
        &self,
        worker_id: &WorkerId,
        idempotency_key: u64,
    ) -> Result<Option<InvocationSlice>> {
        let raw = self.oplog.read_all(worker_id).await?;
        let state = ReplayState::new(raw)?;
        let entries = state.into_entries();

        let invoked_pos = entries.iter().position(|(_, e)| {
            matches!(e, OplogEntry::ExportedFunctionInvoked { idempotency_key: k, .. } if *k == idempotency_key)
        });
        let Some(pos) = invoked_pos else {
            return Ok(None);
        };
        let invoked_index = entries[pos].0;

        let mut effects = Vec::new();
        let mut completed = None;
        for (idx, entry) in entries.into_iter().skip(pos + 1) {
            match entry {
                OplogEntry::ExportedFunctionCompleted { response, .. } => {
                    completed = Some(response);
                    break;
                }
                // A later exported invocation means this one completed in a
                // compacted log; treat as boundary.
                OplogEntry::ExportedFunctionInvoked { .. } => break,
                other => effects.push((idx, other)),
            }
        }
        Ok(Some(InvocationSlice {
            invoked_index,
            effects,
            completed,
        }))
    }

    /// Runs one invocation to completion, driving the retry loop and
    /// replaying already-durable effects on each attempt.
    pub(crate) async fn run_invocation(
        self: &Arc<Self>,
        worker_id: &WorkerId,
        function_name: &str,
        payload: Vec<u8>,
        idempotency_key: u64,
    ) -> Result<Vec<u8>> {
        let (run_lock, cancel) = {
            let state = self
                .workers
                .get(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            match state.status {
                WorkerStatus::Failed => {
                    return Err(ExecutionError::WorkerFailed {
                        worker: worker_id.clone(),
                        reason: state.last_error.clone().unwrap_or_default(),
                    })
                }
                WorkerStatus::Exited => {
                    return Err(ExecutionError::WorkerExited(worker_id.clone()))
                }
                WorkerStatus::Interrupted => {
                    return Err(ExecutionError::Interrupted(worker_id.clone()))
                }
                _ => {}
            }
            (state.run_lock.clone(), state.cancel.clone())
        };

        // One invocation at a time per worker.
        let _guard = run_lock.lock().await;

        // Deduplicate under the lock: a concurrent duplicate may have
        // completed while this call waited.
        let existing = self.invocation_slice(worker_id, idempotency_key).await?;
        if let Some(slice) = &existing {
            if let Some(response) = &slice.completed {
                debug!(worker = %worker_id, key = idempotency_key,
                    "deduplicated completed invocation");
                return Ok(response.clone());
            }
        }
        if existing.is_none() {
            self.oplog
                .append(
                    worker_id,
                    OplogEntry::ExportedFunctionInvoked {
                        timestamp: Utc::now(),
                        function_name: function_name.to_string(),
                        request: payload.clone(),
                        idempotency_key,
                    },
                )
                .await?;
        }

        let (component_id, version, retry_policy, env) = {
            let state = self
                .workers
                .get(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            (
                state.component_id,
                state.component_version,
                state.retry_policy,
                state.env.clone(),
            )
        };
        let handler = self.handler(&component_id, version, function_name)?;

        let mut attempt: u32 = 0;
        loop {
            let raw = self.oplog.read_all(worker_id).await?;
            let state = ReplayState::new(raw)?;

            // A dead attempt inside a remote-write bracket means the write
            // may or may not have happened; never re-execute past that.
            if let Some(begin) = state.unterminated_remote_write() {
                self.set_status(worker_id, WorkerStatus::Failed);
                if let Some(mut st) = self.workers.get_mut(worker_id) {
                    st.last_error = Some("unterminated remote write".to_string());
                }
                return Err(ExecutionError::UncertainRemoteWrite {
                    worker: worker_id.clone(),
                    index: begin,
                });
            }

            // A dead attempt may have left an unmatched atomic begin. Void
            // the stale region with a jump so this attempt re-executes it
            // from the start instead of resuming mid-region.
            if let Some(begin) = state.atomic_restart_point() {
                let current = self.oplog.current_index(worker_id).await?;
                debug!(worker = %worker_id, begin = %begin,
                    "voiding unterminated atomic region before re-execution");
                self.oplog
                    .append(
                        worker_id,
                        OplogEntry::Jump {
                            timestamp: Utc::now(),
                            start: begin,
                            end: current.next(),
                        },
                    )
                    .await?;
            }

            let slice = self
                .invocation_slice(worker_id, idempotency_key)
                .await?
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            if let Some(response) = slice.completed {
                return Ok(response);
            }

            self.set_status(worker_id, WorkerStatus::Running);
            let ctx = DurableContext::new(
                self.clone(),
                worker_id.clone(),
                slice.effects,
                retry_policy,
                env.clone(),
                false,
            );

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    self.oplog
                        .append(worker_id, OplogEntry::Interrupted { timestamp: Utc::now() })
                        .await?;
                    self.set_status(worker_id, WorkerStatus::Interrupted);
                    return Err(ExecutionError::Interrupted(worker_id.clone()));
                }
                result = handler(ctx.clone(), payload.clone()) => result,
            };

            match outcome {
                Ok(response) => {
                    self.oplog
                        .append(
                            worker_id,
                            OplogEntry::ExportedFunctionCompleted {
                                timestamp: Utc::now(),
                                response: response.clone(),
                            },
                        )
                        .await?;
                    if let Some(mut state) = self.workers.get_mut(worker_id) {
                        state.status = WorkerStatus::Idle;
                        state.failed_attempts = 0;
                        state.last_error = None;
                    }
                    return Ok(response);
                }
                Err(ExecutionError::JumpRequested { target }) => {
                    // The log already carries the jump entry; rebuilding the
                    // slice voids the jumped span. Not a failed attempt.
                    debug!(worker = %worker_id, target = %target, "re-running after jump");
                    continue;
                }
                Err(ExecutionError::WorkerExited(_)) => {
                    self.oplog
                        .append(worker_id, OplogEntry::Exited { timestamp: Utc::now() })
                        .await?;
                    self.set_status(worker_id, WorkerStatus::Exited);
                    return Err(ExecutionError::WorkerExited(worker_id.clone()));
                }
                Err(err) if err.is_transient() => {
                    let reason = err.to_string();
                    self.oplog
                        .append(
                            worker_id,
                            OplogEntry::Error {
                                timestamp: Utc::now(),
                                error: reason.clone(),
                            },
                        )
                        .await?;

                    if !ctx.idempotence_mode() {
                        if let Some(begin) = ctx.open_remote_write() {
                            self.set_status(worker_id, WorkerStatus::Failed);
                            if let Some(mut state) = self.workers.get_mut(worker_id) {
                                state.last_error = Some(reason);
                            }
                            return Err(ExecutionError::UncertainRemoteWrite {
                                worker: worker_id.clone(),
                                index: begin,
                            });
                        }
                    }

                    attempt += 1;
                    if let Some(mut state) = self.workers.get_mut(worker_id) {
                        state.failed_attempts = attempt;
                        state.last_error = Some(reason.clone());
                    }
                    let policy = ctx.retry_policy();
                    match policy.jittered_delay_for_attempt(attempt) {
                        Some(delay) => {
                            warn!(worker = %worker_id, attempt, delay_ms = delay.as_millis() as u64,
                                error = %reason, "invocation failed, retrying");
                            self.set_status(worker_id, WorkerStatus::Retrying);
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    self.oplog
                                        .append(worker_id, OplogEntry::Interrupted {
                                            timestamp: Utc::now(),
                                        })
                                        .await?;
                                    self.set_status(worker_id, WorkerStatus::Interrupted);
                                    return Err(ExecutionError::Interrupted(worker_id.clone()));
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                        None => {
                            warn!(worker = %worker_id, attempts = attempt, error = %reason,
                                "retry budget exhausted, failing worker");
                            self.set_status(worker_id, WorkerStatus::Failed);
                            return Err(ExecutionError::AttemptsExhausted {
                                worker: worker_id.clone(),
                                attempts: attempt,
                                reason,
                            });
                        }
                    }
                }
                Err(err) => {
                    self.oplog
                        .append(
                            worker_id,
                            OplogEntry::Error {
                                timestamp: Utc::now(),
                                error: err.to_string(),
                            },
                        )
                        .await?;
                    self.set_status(worker_id, WorkerStatus::Failed);
                    if let Some(mut state) = self.workers.get_mut(worker_id) {
                        state.last_error = Some(err.to_string());
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Entry point for worker-to-worker calls: the target is created on
    /// demand so a durable address can be invoked before anyone explicitly
    /// created the worker behind it. A lazily created target inherits the
    /// caller's environment.
    pub(crate) async fn invoke_for_rpc(
        self: &Arc<Self>,
        target: &WorkerId,
        function_name: &str,
        payload: Vec<u8>,
        idempotency_key: u64,
        caller_env: Vec<(String, String)>,
    ) -> Result<Vec<u8>> {
        if !self.workers.contains_key(target) {
            self.create_worker_state(target.clone(), Vec::new(), caller_env)
                .await?;
        }
        self.run_invocation(target, function_name, payload, idempotency_key)
            .await
    }

    pub(crate) async fn create_worker_state(
        &self,
        worker_id: WorkerId,
        args: Vec<String>,
        env: Vec<(String, String)>,
    ) -> Result<()> {
        let component_version = {
            let component = self
                .components
                .get(&worker_id.component_id)
                .ok_or(ExecutionError::ComponentNotFound(worker_id.component_id))?;
            component.latest_version()
        };
        if self.workers.contains_key(&worker_id) {
            return Err(ExecutionError::WorkerAlreadyExists(worker_id));
        }

        self.oplog
            .append(
                &worker_id,
                OplogEntry::Create {
                    timestamp: Utc::now(),
                    worker_id: worker_id.clone(),
                    component_version,
                    args: args.clone(),
                    env: env.clone(),
                },
            )
            .await?;

        let state = WorkerState {
            component_id: worker_id.component_id,
            component_version,
            args,
            env,
            status: WorkerStatus::Idle,
            retry_policy: RetryPolicy::DEFAULT,
            failed_attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            active_plugins: Vec::new(),
            cancel: CancellationToken::new(),
            run_lock: Arc::new(Mutex::new(())),
        };
        let metadata = WorkerMetadata::from_state(&worker_id, &state, OplogIndex::INITIAL);
        self.workers.insert(worker_id.clone(), state);
        self.metadata_cache.insert(worker_id.clone(), metadata);
        info!(worker = %worker_id, version = component_version, "created worker");
        Ok(())
    }

    /// Fresh metadata straight from worker state and the log; refreshes the
    /// cache as a side effect.
    pub(crate) async fn precise_metadata(&self, worker_id: &WorkerId) -> Result<WorkerMetadata> {
        let last_index = self.oplog.current_index(worker_id).await?;
        let state = self
            .workers
            .get(worker_id)
            .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
        let metadata = WorkerMetadata::from_state(worker_id, &state, last_index);
        drop(state);
        self.metadata_cache
            .insert(worker_id.clone(), metadata.clone());
        Ok(metadata)
    }
}

struct InvocationSlice {
    #[allow(dead_code)]
    invoked_index: OplogIndex,
    effects: Vec<(OplogIndex, OplogEntry)>,
    completed: Option<Vec<u8>>,
}

/// The execution runtime. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime over an in-memory oplog with a single replica.
    pub fn new() -> Self {
        Self::with_oplog(Arc::new(InMemoryOplog::new()))
    }

    pub fn with_oplog(oplog: Arc<dyn Oplog>) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                oplog,
                promises: PromiseRegistry::new(),
                components: DashMap::new(),
                component_names: DashMap::new(),
                workers: DashMap::new(),
                metadata_cache: DashMap::new(),
            }),
        }
    }

    /// Starts registering a new component.
    pub fn component(&self, name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder {
            runtime: self.inner.clone(),
            component_id: None,
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    /// Starts registering the next version of an existing component.
    pub fn component_version(&self, component_id: ComponentId) -> ComponentBuilder {
        let name = self
            .inner
            .components
            .get(&component_id)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        ComponentBuilder {
            runtime: self.inner.clone(),
            component_id: Some(component_id),
            name,
            functions: HashMap::new(),
        }
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.inner.component_names.get(name).map(|id| *id)
    }

    /// Latest registered version of a component.
    pub fn latest_component_version(&self, component_id: ComponentId) -> Result<u64> {
        self.inner
            .components
            .get(&component_id)
            .map(|c| c.latest_version())
            .ok_or(ExecutionError::ComponentNotFound(component_id))
    }

    /// Creates a named worker pinned to the component's latest version.
    pub async fn create_worker(
        &self,
        component_id: ComponentId,
        worker_name: impl Into<String>,
        args: Vec<String>,
        env: Vec<(String, String)>,
    ) -> Result<WorkerId> {
        let worker_id = WorkerId {
            component_id,
            worker_name: worker_name.into(),
        };
        self.inner
            .create_worker_state(worker_id.clone(), args, env)
            .await?;
        Ok(worker_id)
    }

    /// Invokes an exported function, generating a fresh idempotency key.
    pub async fn invoke(
        &self,
        worker_id: &WorkerId,
        function_name: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let key = crate::core::stable_hash(Uuid::new_v4().as_bytes());
        self.invoke_with_key(worker_id, function_name, payload, key)
            .await
    }

    /// Invokes an exported function with a caller-supplied idempotency key.
    /// A repeated key returns the original response without re-executing.
    pub async fn invoke_with_key(
        &self,
        worker_id: &WorkerId,
        function_name: &str,
        payload: Vec<u8>,
        idempotency_key: u64,
    ) -> Result<Vec<u8>> {
        self.inner
            .run_invocation(worker_id, function_name, payload, idempotency_key)
            .await
    }

    /// Re-runs the last incomplete invocation, if any, substituting every
    /// already-durable effect. Used after a crash or restart.
    pub async fn recover_worker(&self, worker_id: &WorkerId) -> Result<Option<Vec<u8>>> {
        let raw = self.inner.oplog.read_all(worker_id).await?;
        if raw.is_empty() {
            return Err(ExecutionError::WorkerNotFound(worker_id.clone()));
        }
        let state = ReplayState::new(raw)?;

        // Locate the newest exported invocation with no completion after it.
        let mut pending: Option<(String, Vec<u8>, u64)> = None;
        for (_, entry) in state.entries() {
            match entry {
                OplogEntry::ExportedFunctionInvoked {
                    function_name,
                    request,
                    idempotency_key,
                    ..
                } => {
                    pending = Some((function_name.clone(), request.clone(), *idempotency_key));
                }
                OplogEntry::ExportedFunctionCompleted { .. } => {
                    pending = None;
                }
                _ => {}
            }
        }
        let Some((function_name, payload, key)) = pending else {
            self.inner.set_status(worker_id, WorkerStatus::Idle);
            return Ok(None);
        };

        info!(worker = %worker_id, function = %function_name, "recovering incomplete invocation");
        self.inner
            .oplog
            .append(worker_id, OplogEntry::Restart { timestamp: Utc::now() })
            .await?;
        if let Some(mut st) = self.inner.workers.get_mut(worker_id) {
            // A failed worker is given a fresh chance on explicit recovery.
            if st.status == WorkerStatus::Interrupted || st.status == WorkerStatus::Failed {
                st.status = WorkerStatus::Idle;
                st.cancel = CancellationToken::new();
            }
        }
        let response = self
            .inner
            .run_invocation(worker_id, &function_name, payload, key)
            .await?;
        Ok(Some(response))
    }

    /// Requests interruption: the running invocation stops at its next
    /// suspension point and the worker needs [`Runtime::resume`] to run
    /// again.
    pub fn interrupt(&self, worker_id: &WorkerId) -> Result<()> {
        let state = self
            .inner
            .workers
            .get(worker_id)
            .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
        state.cancel.cancel();
        drop(state);
        self.inner.set_status(worker_id, WorkerStatus::Interrupted);
        Ok(())
    }

    /// Clears an interruption and re-runs any incomplete invocation.
    pub async fn resume(&self, worker_id: &WorkerId) -> Result<Option<Vec<u8>>> {
        {
            let mut state = self
                .inner
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            if state.status != WorkerStatus::Interrupted
                && state.status != WorkerStatus::Suspended
            {
                return Err(ExecutionError::WorkerFailed {
                    worker: worker_id.clone(),
                    reason: format!("cannot resume from status {}", state.status),
                });
            }
            state.status = WorkerStatus::Idle;
            state.cancel = CancellationToken::new();
        }
        self.recover_worker(worker_id).await
    }

    pub fn worker_status(&self, worker_id: &WorkerId) -> Result<WorkerStatus> {
        self.inner
            .workers
            .get(worker_id)
            .map(|s| s.status)
            .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))
    }

    /// Deletes a worker and its entire oplog.
    pub async fn delete_worker(&self, worker_id: &WorkerId) -> Result<()> {
        self.inner
            .workers
            .remove(worker_id)
            .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
        self.inner.metadata_cache.remove(worker_id);
        self.inner.oplog.delete(worker_id).await?;
        info!(worker = %worker_id, "deleted worker");
        Ok(())
    }

    /// Completes a promise from outside any worker. Returns `true` on the
    /// first completion.
    pub fn complete_promise(&self, id: &crate::core::PromiseId, payload: Vec<u8>) -> bool {
        self.inner.promises.complete(id, payload)
    }

    /// Polls a promise without blocking.
    pub fn poll_promise(&self, id: &crate::core::PromiseId) -> Option<Vec<u8>> {
        self.inner.promises.poll(id)
    }

    /// Paged read over a worker's oplog.
    pub fn oplog_cursor(&self, worker_id: WorkerId, from: OplogIndex, page_size: usize) -> OplogCursor {
        OplogCursor::starting_at(self.inner.oplog.clone(), worker_id, from, page_size)
    }

    /// Paged text search over a worker's oplog.
    pub fn oplog_search(
        &self,
        worker_id: WorkerId,
        query: impl Into<String>,
        page_size: usize,
    ) -> OplogSearchCursor {
        OplogSearchCursor::new(
            self.inner.oplog.clone(),
            worker_id,
            query.into(),
            page_size,
        )
    }

    pub fn oplog(&self) -> Arc<dyn Oplog> {
        self.inner.oplog.clone()
    }

    /// Records plugin activation on the worker.
    pub async fn activate_plugin(&self, worker_id: &WorkerId, plugin: impl Into<String>) -> Result<()> {
        let plugin = plugin.into();
        {
            let mut state = self
                .inner
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            if !state.active_plugins.contains(&plugin) {
                state.active_plugins.push(plugin.clone());
            }
        }
        self.inner
            .oplog
            .append(
                worker_id,
                OplogEntry::ActivatePlugin {
                    timestamp: Utc::now(),
                    plugin,
                },
            )
            .await?;
        Ok(())
    }

    /// Records plugin deactivation on the worker.
    pub async fn deactivate_plugin(&self, worker_id: &WorkerId, plugin: &str) -> Result<()> {
        {
            let mut state = self
                .inner
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| ExecutionError::WorkerNotFound(worker_id.clone()))?;
            state.active_plugins.retain(|p| p != plugin);
        }
        self.inner
            .oplog
            .append(
                worker_id,
                OplogEntry::DeactivatePlugin {
                    timestamp: Utc::now(),
                    plugin: plugin.to_string(),
                },
            )
            .await?;
        Ok(())
    }
}
