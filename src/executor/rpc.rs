//! Worker-to-worker calls, blocking and non-blocking.
//!
//! Every call carries an idempotency key derived from the caller's identity
//! and a per-context sequence number, so a replayed caller re-issues the
//! exact same key and the callee deduplicates instead of re-executing.

use super::context::{DurableContext, RPC_GET_RESULT, RPC_INVOKE_AND_AWAIT};
use super::error::{ExecutionError, Result};
use super::status::WorkerStatus;
use crate::core::{serialize_value, stable_hash, OplogIndex, WorkerAddress};
use crate::oplog::{OplogEntry, WorkerInvocation};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

/// Wire form of a remote call, also the dedupe-key input.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RpcRequest {
    target: WorkerAddress,
    function_name: String,
    payload: Vec<u8>,
    sequence: u64,
}

/// Handle for invoking functions on another worker.
///
/// Obtained from [`DurableContext::rpc`]. Durable addresses route every
/// call to the same named worker; ephemeral addresses get a fresh worker
/// per target resolution.
pub struct RpcTarget {
    ctx: DurableContext,
    address: WorkerAddress,
}

impl RpcTarget {
    pub(crate) fn new(ctx: DurableContext, address: WorkerAddress) -> Self {
        Self { ctx, address }
    }

    fn request(&self, function_name: &str, payload: &[u8]) -> Result<(Vec<u8>, u64)> {
        let request = RpcRequest {
            target: self.address.clone(),
            function_name: function_name.to_string(),
            payload: payload.to_vec(),
            sequence: self.ctx.next_rpc_sequence(),
        };
        let bytes = serialize_value(&request)?;
        let mut keyed = serialize_value(self.ctx.worker_id())?;
        keyed.extend_from_slice(&bytes);
        Ok((bytes, stable_hash(&keyed)))
    }

    /// Invokes `function_name` on the target and blocks until its result is
    /// available. On replay the logged result is substituted without
    /// touching the target.
    pub async fn invoke_and_await(&self, function_name: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let (request, idempotency_key) = self.request(function_name, &payload)?;

        if let Some(response) = self.ctx.take_imported(RPC_INVOKE_AND_AWAIT, &request) {
            debug!(caller = %self.ctx.worker_id(), function = function_name,
                "substituted rpc result from oplog");
            return Ok(response);
        }
        if self.ctx.is_strict_replay() {
            return Err(ExecutionError::ReplayDivergence {
                index: OplogIndex::NONE,
                expected: RPC_INVOKE_AND_AWAIT.to_string(),
                actual: "end of recorded log".to_string(),
            });
        }

        let invocation = WorkerInvocation {
            target: self.address.clone(),
            function_name: function_name.to_string(),
            payload: payload.clone(),
            idempotency_key,
        };
        self.ctx
            .append_hint(OplogEntry::PendingWorkerInvocation {
                timestamp: Utc::now(),
                invocation,
            })
            .await?;

        // The caller suspends for the duration of the remote call.
        self.ctx
            .append_hint(OplogEntry::Suspend {
                timestamp: Utc::now(),
            })
            .await?;
        let runtime = self.ctx.inner.runtime.clone();
        runtime.set_status(self.ctx.worker_id(), WorkerStatus::Suspended);

        let target = runtime.resolve_address(&self.address);
        let outcome = runtime
            .invoke_for_rpc(
                &target,
                function_name,
                payload,
                idempotency_key,
                self.ctx.inner.env.clone(),
            )
            .await;
        runtime.set_status(self.ctx.worker_id(), WorkerStatus::Running);
        let response = outcome?;

        self.ctx
            .append(OplogEntry::ImportedFunctionInvoked {
                timestamp: Utc::now(),
                function_name: RPC_INVOKE_AND_AWAIT.to_string(),
                request,
                response: response.clone(),
            })
            .await?;
        Ok(response)
    }

    /// Starts a call without waiting for it. The returned future is polled
    /// with [`poll`] or [`FuturePoller`] and consumed with
    /// [`InvocationFuture::get`].
    pub async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<InvocationFuture> {
        let (request, idempotency_key) = self.request(function_name, &payload)?;

        // Result already durable from a previous execution: the future is
        // born ready and never contacts the target.
        if self.ctx.has_imported(RPC_GET_RESULT, &request) {
            return Ok(InvocationFuture {
                slot: Arc::new(FutureSlot {
                    ctx: self.ctx.clone(),
                    request,
                    state: Mutex::new(SlotState::FromLog),
                    ready: Notify::new(),
                }),
            });
        }
        if self.ctx.is_strict_replay() {
            return Err(ExecutionError::ReplayDivergence {
                index: OplogIndex::NONE,
                expected: RPC_GET_RESULT.to_string(),
                actual: "end of recorded log".to_string(),
            });
        }

        let invocation = WorkerInvocation {
            target: self.address.clone(),
            function_name: function_name.to_string(),
            payload: payload.clone(),
            idempotency_key,
        };
        self.ctx
            .append_hint(OplogEntry::PendingWorkerInvocation {
                timestamp: Utc::now(),
                invocation,
            })
            .await?;

        let slot = Arc::new(FutureSlot {
            ctx: self.ctx.clone(),
            request,
            state: Mutex::new(SlotState::Pending),
            ready: Notify::new(),
        });

        let runtime = self.ctx.inner.runtime.clone();
        let target = runtime.resolve_address(&self.address);
        let function = function_name.to_string();
        let caller_env = self.ctx.inner.env.clone();
        let task_slot = slot.clone();
        tokio::spawn(async move {
            let outcome = runtime
                .invoke_for_rpc(&target, &function, payload, idempotency_key, caller_env)
                .await
                .map_err(|e| e.to_string());
            {
                let mut state = task_slot.state.lock().expect("slot lock poisoned");
                *state = SlotState::Ready(outcome);
            }
            task_slot.ready.notify_waiters();
        });

        Ok(InvocationFuture { slot })
    }

    /// Enqueues a call and forgets it: the caller only records that the
    /// invocation was durably handed off.
    pub async fn invoke_and_forget(&self, function_name: &str, payload: Vec<u8>) -> Result<()> {
        let fut = self.invoke(function_name, payload).await?;
        // Deliberately dropped; the spawned task still drives the call.
        drop(fut);
        Ok(())
    }
}

enum SlotState {
    /// Result is already in the replay buffer, keyed by request bytes.
    FromLog,
    Pending,
    Ready(std::result::Result<Vec<u8>, String>),
    Taken,
}

struct FutureSlot {
    ctx: DurableContext,
    request: Vec<u8>,
    state: Mutex<SlotState>,
    ready: Notify,
}

impl FutureSlot {
    fn is_ready(&self) -> bool {
        !matches!(
            *self.state.lock().expect("slot lock poisoned"),
            SlotState::Pending
        )
    }
}

/// A non-blocking invocation in flight.
pub struct InvocationFuture {
    slot: Arc<FutureSlot>,
}

impl InvocationFuture {
    /// Snapshot handle for one poll round. Pollables index into the slice
    /// passed to [`poll`]; they are not meaningful across rounds.
    pub fn subscribe(&self) -> Pollable {
        Pollable {
            slot: self.slot.clone(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }

    /// Takes the result if it is available, recording the retrieval in the
    /// caller's oplog. Returns `Ok(None)` while the call is still pending
    /// and after the result was already taken.
    pub async fn get(&self) -> Result<Option<Vec<u8>>> {
        let taken = {
            let mut state = self.slot.state.lock().expect("slot lock poisoned");
            match &*state {
                SlotState::Pending | SlotState::Taken => return Ok(None),
                SlotState::FromLog => {
                    *state = SlotState::Taken;
                    None
                }
                SlotState::Ready(_) => {
                    let prev = std::mem::replace(&mut *state, SlotState::Taken);
                    match prev {
                        SlotState::Ready(outcome) => Some(outcome),
                        _ => unreachable!(),
                    }
                }
            }
        };

        match taken {
            None => {
                // Replay path: consume the logged retrieval entry.
                let response = self
                    .slot
                    .ctx
                    .take_imported(RPC_GET_RESULT, &self.slot.request)
                    .ok_or_else(|| ExecutionError::ReplayDivergence {
                        index: OplogIndex::NONE,
                        expected: RPC_GET_RESULT.to_string(),
                        actual: "missing logged rpc result".to_string(),
                    })?;
                Ok(Some(response))
            }
            Some(Ok(response)) => {
                self.slot
                    .ctx
                    .append(OplogEntry::ImportedFunctionInvoked {
                        timestamp: Utc::now(),
                        function_name: RPC_GET_RESULT.to_string(),
                        request: self.slot.request.clone(),
                        response: response.clone(),
                    })
                    .await?;
                Ok(Some(response))
            }
            Some(Err(reason)) => Err(ExecutionError::Handler(reason)),
        }
    }
}

/// One-round readiness handle produced by [`InvocationFuture::subscribe`].
pub struct Pollable {
    slot: Arc<FutureSlot>,
}

/// Waits until at least one pollable is ready and returns the (zero-based)
/// positions of every ready pollable in `pollables`. The positions refer to
/// this call's slice only.
pub async fn poll(pollables: &[Pollable]) -> Vec<u32> {
    loop {
        let ready: Vec<u32> = pollables
            .iter()
            .enumerate()
            .filter(|(_, p)| p.slot.is_ready())
            .map(|(i, _)| i as u32)
            .collect();
        if !ready.is_empty() || pollables.is_empty() {
            return ready;
        }
        // Race-free wait: register the notification interest first, then
        // re-check readiness before sleeping on it.
        let mut notified: Vec<_> = pollables
            .iter()
            .map(|p| Box::pin(p.slot.ready.notified()))
            .collect();
        for fut in notified.iter_mut() {
            fut.as_mut().enable();
        }
        if pollables.iter().any(|p| p.slot.is_ready()) {
            continue;
        }
        std::future::poll_fn(|cx| {
            for fut in notified.iter_mut() {
                if fut.as_mut().poll(cx).is_ready() {
                    return std::task::Poll::Ready(());
                }
            }
            std::task::Poll::Pending
        })
        .await;
    }
}

/// Tracks labelled futures across repeated poll rounds.
///
/// Pollables from [`InvocationFuture::subscribe`] are only valid within one
/// [`poll`] call; this keeps a stable caller-chosen label attached to each
/// future so the round-to-round bookkeeping lives in one place.
#[derive(Default)]
pub struct FuturePoller {
    entries: Vec<(u32, InvocationFuture)>,
}

impl FuturePoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: u32, future: InvocationFuture) {
        self.entries.push((label, future));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs one poll round and returns the labels that became ready. The
    /// returned labels' futures stay registered until [`FuturePoller::take`]
    /// removes them.
    pub async fn poll_round(&self) -> Vec<u32> {
        let pollables: Vec<Pollable> = self.entries.iter().map(|(_, f)| f.subscribe()).collect();
        let ready = poll(&pollables).await;
        ready
            .into_iter()
            .map(|pos| self.entries[pos as usize].0)
            .collect()
    }

    /// Removes and returns the future registered under `label`.
    pub fn take(&mut self, label: u32) -> Option<InvocationFuture> {
        let pos = self.entries.iter().position(|(l, _)| *l == label)?;
        Some(self.entries.remove(pos).1)
    }
}
