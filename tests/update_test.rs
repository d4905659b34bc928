//! Worker update tests
//!
//! These tests verify that:
//! 1. An automatic update succeeds when the new version replays the
//!    worker's history cleanly
//! 2. An automatic update is rejected when the new version diverges, and
//!    the worker stays on its prior version
//! 3. A snapshot-based update round-trips state through save-snapshot and
//!    load-snapshot

use ponos::prelude::*;
use ponos::ExecutionError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn automatic_update_validates_history() {
    init_tracing();
    let runtime = Runtime::new();

    let component = runtime
        .component("catalog")
        .function("lookup", |ctx, _payload| {
            Box::pin(async move {
                let price: u64 = ctx.durable("db::price", || async { Ok(100u64) }).await?;
                Ok(serialize_value(&price)?)
            })
        })
        .build();

    let worker = runtime
        .create_worker(component, "catalog-1", vec![], vec![])
        .await
        .unwrap();
    let response = runtime.invoke(&worker, "lookup", vec![]).await.unwrap();
    assert_eq!(deserialize_value::<u64>(&response).unwrap(), 100);

    // Version 1 keeps the same durable shape, so the recorded history
    // replays cleanly under it.
    runtime
        .component_version(component)
        .function("lookup", |ctx, _payload| {
            Box::pin(async move {
                let price: u64 = ctx.durable("db::price", || async { Ok(100u64) }).await?;
                Ok(serialize_value(&price)?)
            })
        })
        .build();

    runtime
        .update_worker(&worker, 1, UpdateMode::Automatic)
        .await
        .unwrap();

    let metadata = runtime
        .get_workers(component, None, true)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.worker_id == worker)
        .unwrap();
    assert_eq!(metadata.component_version, 1);

    // The update trail is durable.
    let mut search = runtime.oplog_search(worker.clone(), "successful-update", 50);
    assert!(search.get_next().await.unwrap().is_some());
}

#[tokio::test]
async fn divergent_automatic_update_is_rejected() {
    init_tracing();
    let runtime = Runtime::new();

    let component = runtime
        .component("catalog")
        .function("lookup", |ctx, _payload| {
            Box::pin(async move {
                let price: u64 = ctx.durable("db::price", || async { Ok(100u64) }).await?;
                Ok(serialize_value(&price)?)
            })
        })
        .build();

    let worker = runtime
        .create_worker(component, "catalog-1", vec![], vec![])
        .await
        .unwrap();
    runtime.invoke(&worker, "lookup", vec![]).await.unwrap();

    // Version 1 reads from a different durable call: its replay cannot
    // line up with the recorded history.
    runtime
        .component_version(component)
        .function("lookup", |ctx, _payload| {
            Box::pin(async move {
                let price: u64 = ctx.durable("cache::price", || async { Ok(100u64) }).await?;
                Ok(serialize_value(&price)?)
            })
        })
        .build();

    let err = runtime
        .update_worker(&worker, 1, UpdateMode::Automatic)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::UpdateFailed { .. }), "got {err}");

    // Still on version 0 and still invocable.
    let metadata = runtime
        .get_workers(component, None, true)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.worker_id == worker)
        .unwrap();
    assert_eq!(metadata.component_version, 0);
    runtime.invoke(&worker, "lookup", vec![]).await.unwrap();

    let mut search = runtime.oplog_search(worker.clone(), "failed-update", 50);
    assert!(search.get_next().await.unwrap().is_some());
}

#[tokio::test]
async fn snapshot_update_round_trips_state() {
    init_tracing();
    let runtime = Runtime::new();
    let loaded = Arc::new(AtomicU32::new(0));

    let component = runtime
        .component("session")
        .function("save-snapshot", |_ctx, _payload| {
            Box::pin(async move { Ok(serialize_value(&"session-state")?) })
        })
        .function("load-snapshot", |_ctx, _payload| {
            Box::pin(async move { Ok(vec![]) })
        })
        .build();

    let worker = runtime
        .create_worker(component, "session-1", vec![], vec![])
        .await
        .unwrap();

    // Version 1 accepts the snapshot and records what it received.
    {
        let loaded = loaded.clone();
        runtime
            .component_version(component)
            .function("save-snapshot", |_ctx, _payload| {
                Box::pin(async move { Ok(serialize_value(&"session-state")?) })
            })
            .function("load-snapshot", move |_ctx, payload| {
                let loaded = loaded.clone();
                Box::pin(async move {
                    let state: String = deserialize_value(&payload)?;
                    if state == "session-state" {
                        loaded.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(vec![])
                })
            })
            .build();
    }

    runtime
        .update_worker(&worker, 1, UpdateMode::SnapshotBased)
        .await
        .unwrap();

    assert_eq!(loaded.load(Ordering::SeqCst), 1, "snapshot must be loaded once");
    let metadata = runtime
        .get_workers(component, None, true)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.worker_id == worker)
        .unwrap();
    assert_eq!(metadata.component_version, 1);
}
