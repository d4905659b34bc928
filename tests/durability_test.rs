//! Durable re-execution tests
//!
//! These tests verify that:
//! 1. Side effects run once even when the invocation is retried
//! 2. Repeated idempotency keys return the recorded response
//! 3. An unterminated atomic region is re-executed from its start
//! 4. A failed worker can be recovered without repeating effects
//! 5. An unterminated remote write under strict idempotence is fatal
//! 6. A replay jump voids the target span and re-executes it

use ponos::prelude::*;
use ponos::ExecutionError;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_jitter_factor: None,
    }
}

#[tokio::test]
async fn side_effects_survive_retries_exactly_once() {
    init_tracing();
    let runtime = Runtime::new();
    let handler_runs = Arc::new(AtomicU32::new(0));
    let charges = Arc::new(AtomicU32::new(0));

    let component = {
        let handler_runs = handler_runs.clone();
        let charges = charges.clone();
        runtime
            .component("billing")
            .function("charge", move |ctx, payload| {
                let handler_runs = handler_runs.clone();
                let charges = charges.clone();
                Box::pin(async move {
                    let run = handler_runs.fetch_add(1, Ordering::SeqCst) + 1;
                    ctx.set_retry_policy(fast_retries(5)).await?;
                    let amount: u64 = deserialize_value(&payload)
                        .map_err(|e| ExecutionError::Handler(e.to_string()))?;
                    let charged: u64 = ctx
                        .durable("payment::charge", || async move {
                            charges.fetch_add(1, Ordering::SeqCst);
                            Ok(amount)
                        })
                        .await?;
                    if run < 3 {
                        return Err(ExecutionError::Handler(format!(
                            "transient failure on run {run}"
                        )));
                    }
                    Ok(serialize_value(&charged)?)
                })
            })
            .build()
    };

    let worker = runtime
        .create_worker(component, "billing-1", vec![], vec![])
        .await
        .unwrap();

    let payload = serialize_value(&42u64).unwrap();
    let response = runtime
        .invoke_with_key(&worker, "charge", payload.clone(), 7)
        .await
        .unwrap();
    let charged: u64 = deserialize_value(&response).unwrap();

    assert_eq!(charged, 42);
    assert_eq!(handler_runs.load(Ordering::SeqCst), 3, "two retries expected");
    assert_eq!(
        charges.load(Ordering::SeqCst),
        1,
        "the remote charge must happen exactly once"
    );
    assert_eq!(runtime.worker_status(&worker).unwrap(), WorkerStatus::Idle);

    // Same idempotency key: the recorded response comes back without
    // re-running the handler.
    let again = runtime
        .invoke_with_key(&worker, "charge", payload, 7)
        .await
        .unwrap();
    assert_eq!(again, response);
    assert_eq!(handler_runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unterminated_atomic_region_is_re_executed() {
    init_tracing();
    let runtime = Runtime::new();
    let handler_runs = Arc::new(AtomicU32::new(0));
    let outside = Arc::new(AtomicU32::new(0));
    let inside = Arc::new(AtomicU32::new(0));

    let component = {
        let handler_runs = handler_runs.clone();
        let outside = outside.clone();
        let inside = inside.clone();
        runtime
            .component("ingest")
            .function("run", move |ctx, _payload| {
                let handler_runs = handler_runs.clone();
                let outside = outside.clone();
                let inside = inside.clone();
                Box::pin(async move {
                    let run = handler_runs.fetch_add(1, Ordering::SeqCst) + 1;
                    ctx.set_retry_policy(fast_retries(3)).await?;
                    let _: u32 = ctx
                        .durable("source::read", || async move {
                            Ok(outside.fetch_add(1, Ordering::SeqCst) + 1)
                        })
                        .await?;

                    let begin = ctx.mark_begin_operation().await?;
                    let _: u32 = ctx
                        .durable("batch::stage", || async move {
                            Ok(inside.fetch_add(1, Ordering::SeqCst) + 1)
                        })
                        .await?;
                    if run < 2 {
                        return Err(ExecutionError::Handler(
                            "crash inside atomic region".to_string(),
                        ));
                    }
                    ctx.mark_end_operation(begin).await?;
                    Ok(vec![])
                })
            })
            .build()
    };

    let worker = runtime
        .create_worker(component, "ingest-1", vec![], vec![])
        .await
        .unwrap();
    runtime.invoke(&worker, "run", vec![]).await.unwrap();

    assert_eq!(handler_runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        outside.load(Ordering::SeqCst),
        1,
        "effect before the region must be substituted on retry"
    );
    assert_eq!(
        inside.load(Ordering::SeqCst),
        2,
        "effect inside the discarded region must run again"
    );
}

#[tokio::test]
async fn failed_worker_recovers_without_repeating_effects() {
    init_tracing();
    let runtime = Runtime::new();
    let handler_runs = Arc::new(AtomicU32::new(0));
    let effects = Arc::new(AtomicU32::new(0));
    let allow_success = Arc::new(AtomicBool::new(false));

    let component = {
        let handler_runs = handler_runs.clone();
        let effects = effects.clone();
        let allow_success = allow_success.clone();
        runtime
            .component("orders")
            .function("place", move |ctx, _payload| {
                let handler_runs = handler_runs.clone();
                let effects = effects.clone();
                let allow_success = allow_success.clone();
                Box::pin(async move {
                    handler_runs.fetch_add(1, Ordering::SeqCst);
                    ctx.set_retry_policy(RetryPolicy::NONE).await?;
                    let order: u32 = ctx
                        .durable("inventory::reserve", || async move {
                            Ok(effects.fetch_add(1, Ordering::SeqCst) + 1)
                        })
                        .await?;
                    if !allow_success.load(Ordering::SeqCst) {
                        return Err(ExecutionError::Handler("downstream outage".to_string()));
                    }
                    Ok(serialize_value(&order)?)
                })
            })
            .build()
    };

    let worker = runtime
        .create_worker(component, "orders-1", vec![], vec![])
        .await
        .unwrap();

    let err = runtime.invoke(&worker, "place", vec![]).await.unwrap_err();
    assert!(matches!(err, ExecutionError::AttemptsExhausted { .. }));
    assert_eq!(runtime.worker_status(&worker).unwrap(), WorkerStatus::Failed);
    assert_eq!(effects.load(Ordering::SeqCst), 1);

    // The outage clears; recovery re-runs the incomplete invocation with
    // the reservation substituted from the log.
    allow_success.store(true, Ordering::SeqCst);
    let response = runtime.recover_worker(&worker).await.unwrap().unwrap();
    let order: u32 = deserialize_value(&response).unwrap();

    assert_eq!(order, 1);
    assert_eq!(effects.load(Ordering::SeqCst), 1, "reservation must not repeat");
    assert_eq!(handler_runs.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.worker_status(&worker).unwrap(), WorkerStatus::Idle);
}

#[tokio::test]
async fn unterminated_remote_write_is_fatal_under_strict_idempotence() {
    init_tracing();
    let runtime = Runtime::new();
    let writes = Arc::new(AtomicU32::new(0));

    let component = {
        let writes = writes.clone();
        runtime
            .component("ledger")
            .function("post", move |ctx, _payload| {
                let writes = writes.clone();
                Box::pin(async move {
                    ctx.set_retry_policy(fast_retries(5)).await?;
                    ctx.set_idempotence_mode(false);
                    let begin = ctx.begin_remote_write().await?;
                    writes.fetch_add(1, Ordering::SeqCst);
                    // Crash between the write and its end marker: the write
                    // may or may not have landed.
                    let _ = begin;
                    Err(ExecutionError::Handler("crashed mid-write".to_string()))
                })
            })
            .build()
    };

    let worker = runtime
        .create_worker(component, "ledger-1", vec![], vec![])
        .await
        .unwrap();

    let err = runtime.invoke(&worker, "post", vec![]).await.unwrap_err();
    assert!(
        matches!(err, ExecutionError::UncertainRemoteWrite { .. }),
        "got {err}"
    );
    assert_eq!(
        writes.load(Ordering::SeqCst),
        1,
        "the uncertain write must never be retried"
    );
    assert_eq!(runtime.worker_status(&worker).unwrap(), WorkerStatus::Failed);

    // Even explicit recovery refuses to run past the open bracket.
    let err = runtime.recover_worker(&worker).await.unwrap_err();
    assert!(matches!(err, ExecutionError::UncertainRemoteWrite { .. }));
}

#[tokio::test]
async fn jump_voids_the_target_span() {
    init_tracing();
    let runtime = Runtime::new();
    let reads = Arc::new(AtomicU32::new(0));
    let jumped = Arc::new(AtomicBool::new(false));

    let component = {
        let reads = reads.clone();
        let jumped = jumped.clone();
        runtime
            .component("replayer")
            .function("run", move |ctx, _payload| {
                let reads = reads.clone();
                let jumped = jumped.clone();
                Box::pin(async move {
                    let n: u32 = ctx
                        .durable("sensor::read", || async move {
                            Ok(reads.fetch_add(1, Ordering::SeqCst) + 1)
                        })
                        .await?;
                    if !jumped.swap(true, Ordering::SeqCst) {
                        // Entry layout: 1 = create, 2 = exported invocation,
                        // 3 = the sensor read. Rewind over the read.
                        ctx.jump(OplogIndex::from_u64(3)).await?;
                    }
                    Ok(serialize_value(&n)?)
                })
            })
            .build()
    };

    let worker = runtime
        .create_worker(component, "replayer-1", vec![], vec![])
        .await
        .unwrap();
    let response = runtime.invoke(&worker, "run", vec![]).await.unwrap();
    let n: u32 = deserialize_value(&response).unwrap();

    assert_eq!(n, 2, "the jumped-over read must have re-executed");
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}
