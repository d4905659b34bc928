//! Durable execution context: the capability surface handed to worker code.
//!
//! This module hides the replay decision for every externally visible
//! effect: whether the next `durable` call substitutes a logged result or
//! executes live and appends. Worker code never observes which mode it is
//! in; identical control flow produces identical logs, and that is what
//! makes recovery idempotent.

use super::engine::RuntimeInner;
use super::error::{ExecutionError, Result};
use super::rpc::RpcTarget;
use super::status::WorkerStatus;
use crate::core::{
    deserialize_value, serialize_value, EffectKind, OplogIndex, PersistenceLevel, PromiseId,
    RetryPolicy, WorkerAddress, WorkerId,
};
use crate::oplog::{LogLevel, OplogEntry, ReplayState};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

// Well-known imported function names the engine itself records.
pub(crate) const PROMISE_CREATE: &str = "promise::create";
pub(crate) const PROMISE_AWAIT: &str = "promise::await";
pub(crate) const PROMISE_COMPLETE: &str = "promise::complete";
pub(crate) const PROMISE_DELETE: &str = "promise::delete";
pub(crate) const CLOCK_SLEEP: &str = "clock::sleep";
pub(crate) const RPC_INVOKE_AND_AWAIT: &str = "rpc::invoke-and-await";
pub(crate) const RPC_GET_RESULT: &str = "rpc::get-result";

/// Replay entries not yet consumed by the re-executing handler.
///
/// Strict consumption (`next_substitution`) walks non-hint entries in order
/// and is how divergence is detected; keyed consumption (`take_imported`)
/// serves effects whose retrieval order is legitimately caller-driven, such
/// as non-blocking RPC results.
struct ReplayBuffer {
    entries: Vec<(OplogIndex, OplogEntry)>,
    consumed: Vec<bool>,
    cursor: usize,
}

impl ReplayBuffer {
    fn new(entries: Vec<(OplogIndex, OplogEntry)>) -> Self {
        let consumed = vec![false; entries.len()];
        Self {
            entries,
            consumed,
            cursor: 0,
        }
    }

    fn is_lookahead_only(entry: &OplogEntry) -> bool {
        matches!(
            entry,
            OplogEntry::ImportedFunctionInvoked { function_name, .. }
                if function_name == RPC_GET_RESULT
        )
    }

    /// Next unconsumed substitution point, in log order.
    fn next_substitution(&mut self) -> Option<(OplogIndex, OplogEntry)> {
        while self.cursor < self.entries.len() {
            let pos = self.cursor;
            if self.consumed[pos] {
                self.cursor += 1;
                continue;
            }
            let (idx, entry) = &self.entries[pos];
            if entry.is_hint() || Self::is_lookahead_only(entry) {
                self.cursor += 1;
                continue;
            }
            self.consumed[pos] = true;
            self.cursor += 1;
            return Some((*idx, entry.clone()));
        }
        None
    }

    /// Consumes the first unconsumed imported-function entry matching name
    /// and request, wherever it sits.
    fn take_imported(&mut self, name: &str, request: &[u8]) -> Option<(OplogIndex, Vec<u8>)> {
        for pos in 0..self.entries.len() {
            if self.consumed[pos] {
                continue;
            }
            if let (
                idx,
                OplogEntry::ImportedFunctionInvoked {
                    function_name,
                    request: logged_request,
                    response,
                    ..
                },
            ) = &self.entries[pos]
            {
                if function_name == name && logged_request == request {
                    self.consumed[pos] = true;
                    return Some((*idx, response.clone()));
                }
            }
        }
        None
    }

    fn has_imported(&self, name: &str, request: &[u8]) -> bool {
        self.entries
            .iter()
            .zip(&self.consumed)
            .any(|((_, entry), consumed)| {
                !consumed
                    && matches!(entry, OplogEntry::ImportedFunctionInvoked {
                        function_name, request: logged, ..
                    } if function_name == name && logged == request)
            })
    }

    /// Consumes the first unconsumed entry matching the predicate, hints
    /// included. Used for resource entries, which are hints but must still
    /// yield deterministic ids.
    fn take_matching(
        &mut self,
        pred: impl Fn(&OplogEntry) -> bool,
    ) -> Option<(OplogIndex, OplogEntry)> {
        for pos in 0..self.entries.len() {
            if self.consumed[pos] {
                continue;
            }
            if pred(&self.entries[pos].1) {
                self.consumed[pos] = true;
                return Some(self.entries[pos].clone());
            }
        }
        None
    }

    /// True once every substitution point is consumed: appends are real
    /// effects from here on.
    fn is_live(&self) -> bool {
        self.entries
            .iter()
            .zip(&self.consumed)
            .all(|((_, entry), consumed)| *consumed || entry.is_hint())
    }
}

pub(crate) struct ContextInner {
    pub(crate) worker_id: WorkerId,
    pub(crate) runtime: Arc<RuntimeInner>,
    replay: Mutex<ReplayBuffer>,
    open_atomic: Mutex<Vec<OplogIndex>>,
    closed_atomic: Mutex<HashSet<u64>>,
    open_remote: Mutex<Vec<OplogIndex>>,
    closed_remote: Mutex<HashSet<u64>>,
    persistence: Mutex<PersistenceLevel>,
    idempotence: AtomicBool,
    retry_policy: Mutex<RetryPolicy>,
    resource_counter: AtomicU64,
    rpc_sequence: AtomicU64,
    strict_replay: bool,
    pub(crate) env: Vec<(String, String)>,
}

/// Per-invocation execution context, cheap to clone.
///
/// One context instance exists per invocation attempt; the engine rebuilds
/// it (with a fresh replay buffer read from the log) for every retry and
/// every recovery, which is exactly what makes re-execution idempotent.
#[derive(Clone)]
pub struct DurableContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl DurableContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        runtime: Arc<RuntimeInner>,
        worker_id: WorkerId,
        replay_entries: Vec<(OplogIndex, OplogEntry)>,
        retry_policy: RetryPolicy,
        env: Vec<(String, String)>,
        strict_replay: bool,
    ) -> Self {
        // Seed the resource counter past every id the log already used so
        // re-created resources never collide.
        let max_resource = replay_entries
            .iter()
            .filter_map(|(_, e)| match e {
                OplogEntry::CreateResource { resource_id, .. } => Some(*resource_id),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        Self {
            inner: Arc::new(ContextInner {
                worker_id,
                runtime,
                replay: Mutex::new(ReplayBuffer::new(replay_entries)),
                open_atomic: Mutex::new(Vec::new()),
                closed_atomic: Mutex::new(HashSet::new()),
                open_remote: Mutex::new(Vec::new()),
                closed_remote: Mutex::new(HashSet::new()),
                persistence: Mutex::new(PersistenceLevel::default()),
                idempotence: AtomicBool::new(true),
                retry_policy: Mutex::new(retry_policy),
                resource_counter: AtomicU64::new(max_resource),
                rpc_sequence: AtomicU64::new(0),
                strict_replay,
                env,
            }),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.inner.worker_id
    }

    /// Environment this worker was created with.
    pub fn env(&self) -> &[(String, String)] {
        &self.inner.env
    }

    /// Whether execution has crossed from replay into live mode.
    pub fn is_live(&self) -> bool {
        self.inner.replay.lock().expect("replay lock poisoned").is_live()
    }

    // ------------------------------------------------------------------
    // Durable host-function effects
    // ------------------------------------------------------------------

    /// Runs an externally observable host effect durably.
    ///
    /// On replay the logged result is substituted and `f` is never run; live
    /// the result is appended as an `imported-function-invoked` entry
    /// (subject to the persistence level), which is what makes the effect
    /// survive recovery exactly once.
    pub async fn durable<T, F, Fut>(&self, function_name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        self.durable_effect(function_name, EffectKind::WriteRemote, f)
            .await
    }

    /// Like [`DurableContext::durable`] for read-only local effects, which
    /// `PersistRemoteSideEffects` skips logging.
    pub async fn durable_local<T, F, Fut>(&self, function_name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        self.durable_effect(function_name, EffectKind::ReadLocal, f)
            .await
    }

    async fn durable_effect<T, F, Fut>(&self, function_name: &str, kind: EffectKind, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };

        if let Some((idx, entry)) = substituted {
            return match entry {
                OplogEntry::ImportedFunctionInvoked {
                    function_name: logged,
                    response,
                    ..
                } if logged == function_name => {
                    debug!(worker = %self.inner.worker_id, function = function_name, index = %idx,
                        "substituted imported function result from oplog");
                    Ok(deserialize_value(&response)?)
                }
                other => Err(self.divergence(idx, function_name, &other)),
            };
        }

        if self.inner.strict_replay {
            return Err(ExecutionError::ReplayDivergence {
                index: OplogIndex::NONE,
                expected: function_name.to_string(),
                actual: "end of recorded log".to_string(),
            });
        }

        let value = f().await.map_err(ExecutionError::Handler)?;
        let response = serialize_value(&value)?;
        let persist = {
            let level = self.inner.persistence.lock().expect("persistence lock poisoned");
            level.should_persist(kind)
        };
        if persist {
            self.append(OplogEntry::ImportedFunctionInvoked {
                timestamp: Utc::now(),
                function_name: function_name.to_string(),
                request: Vec::new(),
                response,
            })
            .await?;
        }
        Ok(value)
    }

    fn divergence(&self, index: OplogIndex, expected: &str, actual: &OplogEntry) -> ExecutionError {
        let actual = match actual {
            OplogEntry::ImportedFunctionInvoked { function_name, .. } => {
                format!("imported-function-invoked {function_name}")
            }
            other => other.kind().to_string(),
        };
        ExecutionError::ReplayDivergence {
            index,
            expected: expected.to_string(),
            actual,
        }
    }

    // ------------------------------------------------------------------
    // Atomic regions and remote-write brackets
    // ------------------------------------------------------------------

    /// Opens an atomic region: on failure everything from here is
    /// re-executed from the start rather than partially resumed.
    pub async fn mark_begin_operation(&self) -> Result<OplogIndex> {
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };

        let begin = match substituted {
            Some((idx, OplogEntry::BeginAtomicRegion { .. })) => idx,
            Some((idx, other)) => return Err(self.divergence(idx, "begin-atomic-region", &other)),
            None => {
                self.append(OplogEntry::BeginAtomicRegion {
                    timestamp: Utc::now(),
                })
                .await?
            }
        };
        self.inner
            .open_atomic
            .lock()
            .expect("atomic lock poisoned")
            .push(begin);
        Ok(begin)
    }

    /// Closes the atomic region opened at `begin`.
    ///
    /// Idempotent: closing an already-closed begin index is a no-op, which
    /// bounds the physical log growth of repeated retries and lets multiple
    /// code paths close the same region safely.
    pub async fn mark_end_operation(&self, begin: OplogIndex) -> Result<()> {
        {
            let closed = self.inner.closed_atomic.lock().expect("atomic lock poisoned");
            if closed.contains(&begin.as_u64()) {
                return Ok(());
            }
        }
        let was_open = {
            let mut open = self.inner.open_atomic.lock().expect("atomic lock poisoned");
            match open.iter().position(|b| *b == begin) {
                Some(pos) => {
                    open.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !was_open {
            warn!(worker = %self.inner.worker_id, begin = %begin,
                "mark_end_operation on a region that was never opened; ignoring");
            return Ok(());
        }

        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        match substituted {
            Some((_, OplogEntry::EndAtomicRegion { begin_index, .. })) if begin_index == begin => {}
            Some((idx, other)) => return Err(self.divergence(idx, "end-atomic-region", &other)),
            None => {
                self.append(OplogEntry::EndAtomicRegion {
                    timestamp: Utc::now(),
                    begin_index: begin,
                })
                .await?;
            }
        }
        self.inner
            .closed_atomic
            .lock()
            .expect("atomic lock poisoned")
            .insert(begin.as_u64());
        Ok(())
    }

    /// Opens a remote-write bracket. A no-op under at-least-once semantics;
    /// under strict idempotence a crash before the matching end makes the
    /// worker unrecoverable rather than risking a duplicate write.
    pub async fn begin_remote_write(&self) -> Result<OplogIndex> {
        if self.idempotence_mode() {
            return Ok(OplogIndex::NONE);
        }
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        let begin = match substituted {
            Some((idx, OplogEntry::BeginRemoteWrite { .. })) => idx,
            Some((idx, other)) => return Err(self.divergence(idx, "begin-remote-write", &other)),
            None => {
                self.append(OplogEntry::BeginRemoteWrite {
                    timestamp: Utc::now(),
                })
                .await?
            }
        };
        self.inner
            .open_remote
            .lock()
            .expect("remote lock poisoned")
            .push(begin);
        Ok(begin)
    }

    /// Closes the remote-write bracket opened at `begin`. Idempotent like
    /// [`DurableContext::mark_end_operation`].
    pub async fn end_remote_write(&self, begin: OplogIndex) -> Result<()> {
        if begin == OplogIndex::NONE {
            return Ok(());
        }
        {
            let closed = self.inner.closed_remote.lock().expect("remote lock poisoned");
            if closed.contains(&begin.as_u64()) {
                return Ok(());
            }
        }
        let was_open = {
            let mut open = self.inner.open_remote.lock().expect("remote lock poisoned");
            match open.iter().position(|b| *b == begin) {
                Some(pos) => {
                    open.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !was_open {
            warn!(worker = %self.inner.worker_id, begin = %begin,
                "end_remote_write on a bracket that was never opened; ignoring");
            return Ok(());
        }
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        match substituted {
            Some((_, OplogEntry::EndRemoteWrite { begin_index, .. })) if begin_index == begin => {}
            Some((idx, other)) => return Err(self.divergence(idx, "end-remote-write", &other)),
            None => {
                self.append(OplogEntry::EndRemoteWrite {
                    timestamp: Utc::now(),
                    begin_index: begin,
                })
                .await?;
            }
        }
        self.inner
            .closed_remote
            .lock()
            .expect("remote lock poisoned")
            .insert(begin.as_u64());
        Ok(())
    }

    /// Begin index of a still-open remote-write bracket, if any. The engine
    /// consults this after a failed attempt: under strict idempotence an
    /// open bracket means the failure is fatal, not retryable.
    pub(crate) fn open_remote_write(&self) -> Option<OplogIndex> {
        self.inner
            .open_remote
            .lock()
            .expect("remote lock poisoned")
            .first()
            .copied()
    }

    // ------------------------------------------------------------------
    // Policy
    // ------------------------------------------------------------------

    /// Overrides the active retry policy; logged so the override survives
    /// recovery.
    pub async fn set_retry_policy(&self, policy: RetryPolicy) -> Result<()> {
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        let effective = match substituted {
            Some((_, OplogEntry::ChangeRetryPolicy { new_policy, .. })) => new_policy,
            Some((idx, other)) => return Err(self.divergence(idx, "change-retry-policy", &other)),
            None => {
                self.append(OplogEntry::ChangeRetryPolicy {
                    timestamp: Utc::now(),
                    new_policy: policy,
                })
                .await?;
                policy
            }
        };
        *self.inner.retry_policy.lock().expect("policy lock poisoned") = effective;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        *self.inner.retry_policy.lock().expect("policy lock poisoned")
    }

    /// Sets the persistence level. In-memory only; takes effect from the
    /// next durable call.
    pub fn set_persistence_level(&self, level: PersistenceLevel) {
        *self.inner.persistence.lock().expect("persistence lock poisoned") = level;
    }

    pub fn persistence_level(&self) -> PersistenceLevel {
        *self.inner.persistence.lock().expect("persistence lock poisoned")
    }

    /// Switches between at-least-once (`true`, the default) and
    /// at-most-once (`false`) semantics for host effects.
    pub fn set_idempotence_mode(&self, idempotent: bool) {
        self.inner.idempotence.store(idempotent, Ordering::SeqCst);
    }

    pub fn idempotence_mode(&self) -> bool {
        self.inner.idempotence.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Promises
    // ------------------------------------------------------------------

    /// Creates a promise; its id is derived from the oplog position of the
    /// creation entry and is therefore stable across replay.
    pub async fn create_promise(&self) -> Result<PromiseId> {
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        let idx = match substituted {
            Some((
                idx,
                OplogEntry::ImportedFunctionInvoked { function_name, .. },
            )) if function_name == PROMISE_CREATE => idx,
            Some((idx, other)) => return Err(self.divergence(idx, PROMISE_CREATE, &other)),
            None => {
                self.append(OplogEntry::ImportedFunctionInvoked {
                    timestamp: Utc::now(),
                    function_name: PROMISE_CREATE.to_string(),
                    request: Vec::new(),
                    response: Vec::new(),
                })
                .await?
            }
        };
        Ok(self
            .inner
            .runtime
            .promises
            .register(&self.inner.worker_id, idx))
    }

    /// Suspends this worker until the promise is completed, returning the
    /// completion payload. A replayed await whose completion is already
    /// logged returns immediately without suspending.
    pub async fn await_promise(&self, id: &PromiseId) -> Result<Vec<u8>> {
        let request = serialize_value(id)?;
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        match substituted {
            Some((
                _,
                OplogEntry::ImportedFunctionInvoked {
                    function_name,
                    request: logged,
                    response,
                    ..
                },
            )) if function_name == PROMISE_AWAIT && logged == request => return Ok(response),
            Some((idx, other)) => return Err(self.divergence(idx, PROMISE_AWAIT, &other)),
            None => {}
        }
        if self.inner.strict_replay {
            return Err(ExecutionError::ReplayDivergence {
                index: OplogIndex::NONE,
                expected: PROMISE_AWAIT.to_string(),
                actual: "end of recorded log".to_string(),
            });
        }

        // Cooperative suspension point.
        self.append_hint(OplogEntry::Suspend {
            timestamp: Utc::now(),
        })
        .await?;
        self.inner
            .runtime
            .set_status(&self.inner.worker_id, WorkerStatus::Suspended);
        debug!(worker = %self.inner.worker_id, promise = %id, "suspended awaiting promise");

        let payload = self.inner.runtime.promises.await_completion(id).await;

        self.inner
            .runtime
            .set_status(&self.inner.worker_id, WorkerStatus::Running);
        self.append(OplogEntry::ImportedFunctionInvoked {
            timestamp: Utc::now(),
            function_name: PROMISE_AWAIT.to_string(),
            request,
            response: payload.clone(),
        })
        .await?;
        Ok(payload)
    }

    /// Completes a promise from inside worker code. Returns `true` on first
    /// completion, `false` when it was already completed.
    pub async fn complete_promise(&self, id: &PromiseId, payload: Vec<u8>) -> Result<bool> {
        let request = serialize_value(id)?;
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        match substituted {
            Some((
                _,
                OplogEntry::ImportedFunctionInvoked {
                    function_name,
                    request: logged,
                    response,
                    ..
                },
            )) if function_name == PROMISE_COMPLETE && logged == request => {
                return Ok(deserialize_value(&response)?);
            }
            Some((idx, other)) => return Err(self.divergence(idx, PROMISE_COMPLETE, &other)),
            None => {}
        }

        let won = self.inner.runtime.promises.complete(id, payload);
        self.append(OplogEntry::ImportedFunctionInvoked {
            timestamp: Utc::now(),
            function_name: PROMISE_COMPLETE.to_string(),
            request,
            response: serialize_value(&won)?,
        })
        .await?;
        Ok(won)
    }

    /// Deletes a promise's bookkeeping.
    pub async fn delete_promise(&self, id: &PromiseId) -> Result<()> {
        let request = serialize_value(id)?;
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        match substituted {
            Some((
                _,
                OplogEntry::ImportedFunctionInvoked {
                    function_name,
                    request: logged,
                    ..
                },
            )) if function_name == PROMISE_DELETE && logged == request => return Ok(()),
            Some((idx, other)) => return Err(self.divergence(idx, PROMISE_DELETE, &other)),
            None => {}
        }

        self.inner.runtime.promises.delete(id);
        self.append(OplogEntry::ImportedFunctionInvoked {
            timestamp: Utc::now(),
            function_name: PROMISE_DELETE.to_string(),
            request,
            response: Vec::new(),
        })
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timers, RPC, control
    // ------------------------------------------------------------------

    /// Durable sleep: an engine-issued suspension point. The worker is
    /// `Suspended` for the duration; replay skips the wait entirely.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let substituted = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.next_substitution()
        };
        match substituted {
            Some((_, OplogEntry::ImportedFunctionInvoked { function_name, .. }))
                if function_name == CLOCK_SLEEP =>
            {
                return Ok(())
            }
            Some((idx, other)) => return Err(self.divergence(idx, CLOCK_SLEEP, &other)),
            None => {}
        }
        if self.inner.strict_replay {
            return Err(ExecutionError::ReplayDivergence {
                index: OplogIndex::NONE,
                expected: CLOCK_SLEEP.to_string(),
                actual: "end of recorded log".to_string(),
            });
        }

        self.append_hint(OplogEntry::Suspend {
            timestamp: Utc::now(),
        })
        .await?;
        self.inner
            .runtime
            .set_status(&self.inner.worker_id, WorkerStatus::Suspended);
        tokio::time::sleep(duration).await;
        self.inner
            .runtime
            .set_status(&self.inner.worker_id, WorkerStatus::Running);

        self.append(OplogEntry::ImportedFunctionInvoked {
            timestamp: Utc::now(),
            function_name: CLOCK_SLEEP.to_string(),
            request: Vec::new(),
            response: serialize_value(&())?,
        })
        .await?;
        Ok(())
    }

    /// Builds a remote-call handle for the given worker address.
    pub fn rpc(&self, address: WorkerAddress) -> RpcTarget {
        RpcTarget::new(self.clone(), address)
    }

    /// Blocks until this worker's entries are durable on the requested
    /// replica count (capped at what is available).
    pub async fn commit(&self, min_replicas: u8) -> Result<()> {
        self.inner
            .runtime
            .oplog
            .commit(&self.inner.worker_id, min_replicas)
            .await?;
        Ok(())
    }

    /// Rewinds this worker's timeline: entries in `[target, now]` become
    /// void and replay continues from `target`.
    ///
    /// On success this returns the `JumpRequested` control error, which the
    /// handler must propagate with `?`; the engine catches it and re-runs
    /// the invocation against the rewound log.
    pub async fn jump(&self, target: OplogIndex) -> Result<()> {
        let current = self
            .inner
            .runtime
            .oplog
            .current_index(&self.inner.worker_id)
            .await?;
        let candidate = OplogEntry::Jump {
            timestamp: Utc::now(),
            start: target,
            end: current.next(),
        };

        // Structural validation before the jump is made real: a jump into
        // the middle of an atomic region is corruption, rejected here.
        let mut raw = self
            .inner
            .runtime
            .oplog
            .read_all(&self.inner.worker_id)
            .await?;
        raw.push((current.next(), candidate.clone()));
        ReplayState::new(raw)?;

        self.append(candidate).await?;
        Err(ExecutionError::JumpRequested { target })
    }

    /// Terminates this worker permanently. The handler must propagate the
    /// returned error with `?` (or `return Err(...)`).
    pub fn exit(&self) -> ExecutionError {
        ExecutionError::WorkerExited(self.inner.worker_id.clone())
    }

    // ------------------------------------------------------------------
    // Supplementary entries: memory, resources, logging
    // ------------------------------------------------------------------

    /// Records a memory growth hint.
    pub async fn grow_memory(&self, delta: u64) -> Result<()> {
        self.append_hint(OplogEntry::GrowMemory {
            timestamp: Utc::now(),
            delta,
        })
        .await
    }

    /// Creates a host resource and returns its id, stable across replay.
    pub async fn create_resource(&self) -> Result<u64> {
        let taken = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.take_matching(|e| matches!(e, OplogEntry::CreateResource { .. }))
        };
        if let Some((_, OplogEntry::CreateResource { resource_id, .. })) = taken {
            return Ok(resource_id);
        }
        let resource_id = self.inner.resource_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.append_hint(OplogEntry::CreateResource {
            timestamp: Utc::now(),
            resource_id,
        })
        .await?;
        Ok(resource_id)
    }

    /// Drops a host resource.
    pub async fn drop_resource(&self, resource_id: u64) -> Result<()> {
        let taken = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.take_matching(
                |e| matches!(e, OplogEntry::DropResource { resource_id: id, .. } if *id == resource_id),
            )
        };
        if taken.is_some() {
            return Ok(());
        }
        self.append_hint(OplogEntry::DropResource {
            timestamp: Utc::now(),
            resource_id,
        })
        .await
    }

    /// Attaches a debug name to a live resource.
    pub async fn describe_resource(&self, resource_id: u64, name: impl Into<String>) -> Result<()> {
        let taken = {
            let mut replay = self.inner.replay.lock().expect("replay lock poisoned");
            replay.take_matching(
                |e| matches!(e, OplogEntry::DescribeResource { resource_id: id, .. } if *id == resource_id),
            )
        };
        if taken.is_some() {
            return Ok(());
        }
        self.append_hint(OplogEntry::DescribeResource {
            timestamp: Utc::now(),
            resource_id,
            resource_name: name.into(),
        })
        .await
    }

    /// Emits a log entry into the oplog (suppressed during replay so
    /// repeated recovery never duplicates lines).
    pub async fn log(
        &self,
        level: LogLevel,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<()> {
        self.append_hint(OplogEntry::Log {
            timestamp: Utc::now(),
            level,
            context: context.into(),
            message: message.into(),
        })
        .await
    }

    // ------------------------------------------------------------------
    // Internals shared with the RPC layer
    // ------------------------------------------------------------------

    pub(crate) async fn append(&self, entry: OplogEntry) -> Result<OplogIndex> {
        // Validation-only replay must never extend the log; reaching an
        // append means the code ran past the recorded history.
        if self.inner.strict_replay {
            return Err(ExecutionError::ReplayDivergence {
                index: OplogIndex::NONE,
                expected: entry.kind().to_string(),
                actual: "end of recorded log".to_string(),
            });
        }
        Ok(self
            .inner
            .runtime
            .oplog
            .append(&self.inner.worker_id, entry)
            .await?)
    }

    /// Appends a hint entry, but only once execution is live: replayed
    /// spans already carry their hints.
    pub(crate) async fn append_hint(&self, entry: OplogEntry) -> Result<()> {
        if self.inner.strict_replay {
            return Ok(());
        }
        if self.is_live() {
            self.append(entry).await?;
        }
        Ok(())
    }

    pub(crate) fn next_rpc_sequence(&self) -> u64 {
        self.inner.rpc_sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn take_imported(&self, name: &str, request: &[u8]) -> Option<Vec<u8>> {
        self.inner
            .replay
            .lock()
            .expect("replay lock poisoned")
            .take_imported(name, request)
            .map(|(_, response)| response)
    }

    pub(crate) fn has_imported(&self, name: &str, request: &[u8]) -> bool {
        self.inner
            .replay
            .lock()
            .expect("replay lock poisoned")
            .has_imported(name, request)
    }

    pub(crate) fn is_strict_replay(&self) -> bool {
        self.inner.strict_replay
    }
}
