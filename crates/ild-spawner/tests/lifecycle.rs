mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{MemoryStore, ScriptedSpawner, connect, id, server};
use ild_db::{LocalLocks, ServerLocks, ServerStatus};
use ild_spawner::graph::start_order;
use ild_spawner::{Error, Orchestrator, WaitOptions, wait_for_status};
use tokio_util::sync::CancellationToken;

/// 1 -> {2, 3}, 2 -> 4, 3 -> 4
fn diamond() -> Arc<MemoryStore> {
    let mut one = server(1);
    connect(&mut one, 2);
    connect(&mut one, 3);
    let mut two = server(2);
    connect(&mut two, 4);
    let mut three = server(3);
    connect(&mut three, 4);
    MemoryStore::with_servers([one, two, three, server(4)])
}

fn orchestrator(spawner: &Arc<ScriptedSpawner>, store: &Arc<MemoryStore>) -> Orchestrator {
    Orchestrator::new(spawner.clone(), store.clone(), Arc::new(LocalLocks::new()), 8)
}

fn fast_wait(timeout: Duration) -> WaitOptions {
    WaitOptions {
        timeout,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
    }
}

// ── Dependency order ────────────────────────────────────────────────

#[tokio::test]
async fn dependencies_come_first_and_once() {
    let store = diamond();

    let order = start_order(store.as_ref(), &store.server(id(1)), 8).await.unwrap();

    assert_eq!(order, vec![id(4), id(2), id(3)]);
}

#[tokio::test]
async fn cycles_are_reported_with_their_path() {
    let mut one = server(1);
    connect(&mut one, 2);
    let mut two = server(2);
    connect(&mut two, 3);
    let mut three = server(3);
    connect(&mut three, 2);
    let store = MemoryStore::with_servers([one, two, three]);

    let err = start_order(store.as_ref(), &store.server(id(1)), 8)
        .await
        .unwrap_err();

    match err {
        Error::DependencyCycle(path) => assert_eq!(path, vec![id(2), id(3), id(2)]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn chains_deeper_than_the_limit_fail() {
    let mut servers = Vec::new();
    for n in 1..=4 {
        let mut s = server(n);
        if n < 4 {
            connect(&mut s, n + 1);
        }
        servers.push(s);
    }
    let store = MemoryStore::with_servers(servers);
    let root = store.server(id(1));

    assert_eq!(
        start_order(store.as_ref(), &root, 3).await.unwrap(),
        vec![id(4), id(3), id(2)]
    );
    assert!(matches!(
        start_order(store.as_ref(), &root, 2).await,
        Err(Error::DependencyDepth { max: 2, .. })
    ));
}

// ── Orchestrator ────────────────────────────────────────────────────

#[tokio::test]
async fn start_brings_up_dependencies_then_the_server() {
    let store = diamond();
    let spawner = Arc::new(ScriptedSpawner::default());

    let status = orchestrator(&spawner, &store).start(id(1)).await.unwrap();

    assert_eq!(status, ServerStatus::Launching);
    assert_eq!(spawner.started(), vec![id(4), id(2), id(3), id(1)]);
    for n in 1..=4 {
        let s = store.server(id(n));
        assert_eq!(s.status, ServerStatus::Launching);
        assert!(s.config.docker.container_id.is_some());
    }
}

#[tokio::test]
async fn a_failed_dependency_stops_the_start() {
    let store = diamond();
    let spawner = Arc::new(ScriptedSpawner::default());
    spawner.fail_start.lock().unwrap().insert(id(2));

    let err = orchestrator(&spawner, &store).start(id(1)).await.unwrap_err();

    assert!(matches!(err, Error::MissingConfig(_)));
    assert_eq!(spawner.started(), vec![id(4), id(2)]);
    assert_eq!(store.server(id(2)).status, ServerStatus::Error);
    assert_eq!(store.server(id(1)).status, ServerStatus::Stopped);
}

#[tokio::test]
async fn stop_and_terminate_persist_stopped() {
    let mut running = server(1);
    running.status = ServerStatus::Running;
    running.config.docker.container_id = Some("cid".into());
    let store = MemoryStore::with_servers([running]);
    let spawner = Arc::new(ScriptedSpawner::default());
    let orchestrator = orchestrator(&spawner, &store);

    assert_eq!(orchestrator.stop(id(1)).await.unwrap(), ServerStatus::Stopped);
    assert_eq!(store.server(id(1)).status, ServerStatus::Stopped);

    orchestrator.terminate(id(1)).await.unwrap();
    assert!(store.server(id(1)).config.docker.container_id.is_none());
    assert_eq!(
        *spawner.calls.lock().unwrap(),
        vec![("stop", id(1)), ("terminate", id(1))]
    );
}

#[tokio::test]
async fn refresh_persists_only_changes() {
    let mut launching = server(1);
    launching.status = ServerStatus::Launching;
    let store = MemoryStore::with_servers([launching]);
    let spawner = Arc::new(ScriptedSpawner::with_statuses(&[ServerStatus::Running]));
    let orchestrator = orchestrator(&spawner, &store);

    assert_eq!(orchestrator.refresh_status(id(1)).await.unwrap(), ServerStatus::Running);
    assert_eq!(store.server(id(1)).status, ServerStatus::Running);
    assert_eq!(orchestrator.refresh_status(id(1)).await.unwrap(), ServerStatus::Running);
}

#[tokio::test]
async fn unknown_servers_are_store_errors() {
    let store = MemoryStore::with_servers([]);
    let spawner = Arc::new(ScriptedSpawner::default());

    let err = orchestrator(&spawner, &store).stop(id(9)).await.unwrap_err();

    assert!(matches!(err, Error::Store(_)));
    assert!(spawner.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn operations_wait_for_a_held_lock() {
    let store = MemoryStore::with_servers([server(1)]);
    let spawner = Arc::new(ScriptedSpawner::default());
    let locks = Arc::new(LocalLocks::new());
    let orchestrator = Orchestrator::new(spawner.clone(), store.clone(), locks.clone(), 8);

    let guard = locks.acquire(id(1)).await.unwrap();
    let task = tokio::spawn(async move { orchestrator.stop(id(1)).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(spawner.calls.lock().unwrap().is_empty());

    drop(guard);
    task.await.unwrap().unwrap();
    assert_eq!(*spawner.calls.lock().unwrap(), vec![("stop", id(1))]);
}

// ── Waiting ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn wait_returns_once_the_target_is_reached() {
    let spawner = ScriptedSpawner::with_statuses(&[
        ServerStatus::Launching,
        ServerStatus::Launching,
        ServerStatus::Running,
    ]);

    let status = wait_for_status(
        &spawner,
        &server(1),
        ServerStatus::Running,
        fast_wait(Duration::from_secs(60)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, ServerStatus::Running);
    assert_eq!(spawner.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn wait_stops_early_on_error() {
    let spawner = ScriptedSpawner::with_statuses(&[ServerStatus::Launching, ServerStatus::Error]);

    let status = wait_for_status(
        &spawner,
        &server(1),
        ServerStatus::Running,
        fast_wait(Duration::from_secs(60)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, ServerStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn wait_times_out() {
    let spawner = ScriptedSpawner::with_statuses(&[ServerStatus::Launching]);

    let err = wait_for_status(
        &spawner,
        &server(1),
        ServerStatus::Running,
        fast_wait(Duration::from_secs(5)),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(spawner.status_calls.load(Ordering::SeqCst) > 3);
}

#[tokio::test(start_paused = true)]
async fn wait_is_cancellable() {
    let spawner = ScriptedSpawner::with_statuses(&[ServerStatus::Launching]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let err = wait_for_status(
        &spawner,
        &server(1),
        ServerStatus::Running,
        fast_wait(Duration::from_secs(60)),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn orchestrator_wait_persists_the_final_status() {
    let mut launching = server(1);
    launching.status = ServerStatus::Launching;
    let store = MemoryStore::with_servers([launching]);
    let spawner = Arc::new(ScriptedSpawner::with_statuses(&[
        ServerStatus::Launching,
        ServerStatus::Running,
    ]));

    let status = orchestrator(&spawner, &store)
        .wait_until(
            id(1),
            ServerStatus::Running,
            fast_wait(Duration::from_secs(60)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(status, ServerStatus::Running);
    assert_eq!(store.server(id(1)).status, ServerStatus::Running);
}
