//! Enumeration and oplog query tests
//!
//! These tests verify that:
//! 1. Filters select workers by name glob, env and status
//! 2. Cached enumeration lags behind status changes; precise does not
//! 3. Paged enumeration walks the full worker set with a scan cursor
//! 4. The oplog cursor pages through entries in order
//! 5. Text search returns only matching entries

use ponos::prelude::*;
use ponos::ExecutionError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn fixture(runtime: &Runtime) -> (ComponentId, Vec<WorkerId>) {
    let component = runtime
        .component("fleet")
        .function("touch", |_ctx, _payload| Box::pin(async move { Ok(vec![]) }))
        .function("explode", |ctx, _payload| {
            Box::pin(async move {
                ctx.set_retry_policy(RetryPolicy::NONE).await?;
                Err(ExecutionError::Handler("boom".to_string()))
            })
        })
        .build();

    let mut workers = Vec::new();
    for (name, region) in [
        ("node-a", "eu-west-1"),
        ("node-b", "eu-west-1"),
        ("node-c", "us-east-1"),
    ] {
        let worker = runtime
            .create_worker(
                component,
                name,
                vec![],
                vec![("REGION".to_string(), region.to_string())],
            )
            .await
            .unwrap();
        workers.push(worker);
    }
    (component, workers)
}

#[tokio::test]
async fn filters_select_by_name_env_and_status() {
    init_tracing();
    let runtime = Runtime::new();
    let (component, _workers) = fixture(&runtime).await;

    let all = runtime.get_workers(component, None, true).await.unwrap();
    assert_eq!(all.len(), 3);

    let by_name = WorkerAnyFilter::new(vec![WorkerAllFilter::new(vec![
        WorkerPropertyFilter::Name {
            comparator: StringFilterComparator::Like,
            value: "node-*".to_string(),
        },
    ])]);
    assert_eq!(
        runtime
            .get_workers(component, Some(&by_name), true)
            .await
            .unwrap()
            .len(),
        3
    );

    let by_env = WorkerAnyFilter::new(vec![WorkerAllFilter::new(vec![
        WorkerPropertyFilter::Env {
            name: "REGION".to_string(),
            comparator: StringFilterComparator::Like,
            value: "eu-*".to_string(),
        },
    ])]);
    let eu = runtime
        .get_workers(component, Some(&by_env), true)
        .await
        .unwrap();
    assert_eq!(eu.len(), 2);
    assert!(eu.iter().all(|m| m.env_var("REGION") == Some("eu-west-1")));

    let idle = WorkerAnyFilter::new(vec![WorkerAllFilter::new(vec![
        WorkerPropertyFilter::Status {
            comparator: FilterComparator::Equal,
            value: WorkerStatus::Idle,
        },
    ])]);
    assert_eq!(
        runtime
            .get_workers(component, Some(&idle), true)
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn cached_enumeration_lags_behind_precise() {
    init_tracing();
    let runtime = Runtime::new();
    let (component, workers) = fixture(&runtime).await;

    let failed = &workers[0];
    let err = runtime.invoke(failed, "explode", vec![]).await.unwrap_err();
    assert!(matches!(err, ExecutionError::AttemptsExhausted { .. }));
    assert_eq!(runtime.worker_status(failed).unwrap(), WorkerStatus::Failed);

    // The cache still holds the snapshot taken at creation.
    let cached = runtime.get_workers(component, None, false).await.unwrap();
    let entry = cached
        .iter()
        .find(|m| m.worker_id == *failed)
        .expect("worker missing from cached listing");
    assert_eq!(entry.status, WorkerStatus::Idle, "cached view must lag");

    // A precise read sees the failure and refreshes the cache.
    let precise = runtime.get_workers(component, None, true).await.unwrap();
    let entry = precise.iter().find(|m| m.worker_id == *failed).unwrap();
    assert_eq!(entry.status, WorkerStatus::Failed);
    assert_eq!(entry.last_error.as_deref(), Some("handler failed: boom"));

    let cached = runtime.get_workers(component, None, false).await.unwrap();
    let entry = cached.iter().find(|m| m.worker_id == *failed).unwrap();
    assert_eq!(entry.status, WorkerStatus::Failed);
}

#[tokio::test]
async fn paged_enumeration_walks_the_worker_set() {
    init_tracing();
    let runtime = Runtime::new();
    let (component, _workers) = fixture(&runtime).await;

    let first = runtime
        .get_workers_paged(component, None, ScanCursor::start(), 2, true)
        .await
        .unwrap();
    assert_eq!(first.workers.len(), 2);
    let cursor = first.next.expect("a second page must exist");

    let second = runtime
        .get_workers_paged(component, None, cursor, 2, true)
        .await
        .unwrap();
    assert_eq!(second.workers.len(), 1);
    assert!(second.next.is_none());

    let mut names: Vec<String> = first
        .workers
        .iter()
        .chain(second.workers.iter())
        .map(|m| m.worker_id.worker_name.clone())
        .collect();
    names.sort();
    assert_eq!(names, ["node-a", "node-b", "node-c"]);
}

#[tokio::test]
async fn oplog_cursor_pages_in_order() {
    init_tracing();
    let runtime = Runtime::new();
    let (_component, workers) = fixture(&runtime).await;
    let worker = &workers[1];

    runtime.invoke(worker, "touch", vec![]).await.unwrap();

    let mut cursor = runtime.oplog_cursor(worker.clone(), OplogIndex::INITIAL, 2);
    let mut entries = Vec::new();
    while let Some(chunk) = cursor.get_next().await.unwrap() {
        assert!(chunk.len() <= 2);
        entries.extend(chunk);
    }

    let kinds: Vec<&str> = entries.iter().map(|(_, e)| e.kind()).collect();
    assert_eq!(
        kinds,
        [
            "create",
            "exported-function-invoked",
            "exported-function-completed"
        ]
    );
    // Indices are dense and increasing.
    for (expect, (idx, _)) in entries.iter().enumerate() {
        assert_eq!(idx.as_u64(), expect as u64 + 1);
    }
}

#[tokio::test]
async fn oplog_search_filters_entries() {
    init_tracing();
    let runtime = Runtime::new();
    let (_component, workers) = fixture(&runtime).await;
    let worker = &workers[2];

    runtime.invoke(worker, "touch", vec![]).await.unwrap();

    let mut search = runtime.oplog_search(worker.clone(), "exported-function", 10);
    let hits = search.get_next().await.unwrap().unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits
        .iter()
        .all(|(_, e)| e.kind().starts_with("exported-function")));

    let mut search = runtime.oplog_search(worker.clone(), "no-such-term-anywhere", 10);
    assert!(search.get_next().await.unwrap().is_none());
}
