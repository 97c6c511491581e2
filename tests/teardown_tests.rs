/// Teardown tests
///
/// Run with: cargo test --test teardown_tests

mod registry_utils;

use registry_utils::{RecordingWarmUpEngine, dyn_conn};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tableroute::{ClusterRegistry, InMemoryConnection, RegionWarmUpEngine, RegistryError, RegistryProperties};

#[tokio::test]
async fn test_close_releases_every_connection() {
    let registry = ClusterRegistry::new();
    let c1 = InMemoryConnection::with_tables("mem://c1", ["a"]);
    let c2 = InMemoryConnection::with_tables("mem://c2", ["b"]);
    registry
        .initialize([("c1", dyn_conn(&c1)), ("c2", dyn_conn(&c2))], RegistryProperties::new())
        .await
        .unwrap();

    registry.close().await.unwrap();

    assert!(c1.is_closed());
    assert!(c2.is_closed());
    assert_eq!(c1.close_calls(), 1);
}

#[tokio::test]
async fn test_close_continues_past_failing_connection() {
    let registry = ClusterRegistry::new();
    let c1 = InMemoryConnection::new("mem://c1");
    let c2 = InMemoryConnection::new("mem://c2");
    let c3 = InMemoryConnection::new("mem://c3");
    c2.fail_close("socket reset by peer");
    registry
        .initialize(
            [("c1", dyn_conn(&c1)), ("c2", dyn_conn(&c2)), ("c3", dyn_conn(&c3))],
            RegistryProperties::new(),
        )
        .await
        .unwrap();

    let err = registry.close().await.unwrap_err();

    assert!(c1.is_closed());
    assert_eq!(c2.close_calls(), 1);
    assert!(c3.is_closed(), "third connection must still be closed");
    match &err {
        RegistryError::TeardownFailure { cluster, failed, source } => {
            assert_eq!(cluster, "c2");
            assert_eq!(*failed, 1);
            assert!(source.to_string().contains("socket reset by peer"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.source().is_some());
}

#[tokio::test]
async fn test_close_reports_first_of_several_failures() {
    let registry = ClusterRegistry::new();
    let c1 = InMemoryConnection::new("mem://c1");
    let c2 = InMemoryConnection::new("mem://c2");
    c1.fail_close("first");
    c2.fail_close("second");
    registry
        .initialize([("c1", dyn_conn(&c1)), ("c2", dyn_conn(&c2))], RegistryProperties::new())
        .await
        .unwrap();

    match registry.close().await.unwrap_err() {
        RegistryError::TeardownFailure { cluster, failed, source } => {
            assert_eq!(cluster, "c1");
            assert_eq!(failed, 2);
            assert!(source.to_string().contains("first"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_close_twice_is_noop() {
    let registry = ClusterRegistry::new();
    let c1 = InMemoryConnection::new("mem://c1");
    registry
        .initialize([("c1", dyn_conn(&c1))], RegistryProperties::new())
        .await
        .unwrap();

    registry.close().await.unwrap();
    registry.close().await.unwrap();
    assert_eq!(c1.close_calls(), 1);
}

#[tokio::test]
async fn test_close_cancels_outstanding_warm_up() {
    let engine = Arc::new(RegionWarmUpEngine::new());
    let registry = ClusterRegistry::with_warm_up_engine(engine.clone());
    let conn = InMemoryConnection::with_tables("mem://c1", ["a", "b", "c"]);
    let hold = conn.hold_warm_up().await;
    registry
        .initialize([("c1", dyn_conn(&conn))], RegistryProperties::new())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), registry.close())
        .await
        .expect("close must not wait for held warm-ups")
        .unwrap();
    drop(hold);

    assert_eq!(engine.stats().pending, 0);
    assert!(conn.warmed_tables().is_empty());
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_close_without_initialize() {
    let registry = ClusterRegistry::new();
    registry.close().await.unwrap();
    assert!(registry.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_during_initialize_releases_every_connection() {
    for iteration in 0..50u64 {
        let engine = RecordingWarmUpEngine::new();
        engine.slow_drain(Duration::from_millis(2));
        let registry = ClusterRegistry::with_warm_up_engine(engine.clone());
        let conns: Vec<Arc<InMemoryConnection>> = (0..6)
            .map(|i| InMemoryConnection::with_tables(format!("mem://c{}", i), [format!("t{}", i)]))
            .collect();
        let named: Vec<(String, _)> = conns
            .iter()
            .enumerate()
            .map(|(i, conn)| (format!("c{}", i), dyn_conn(conn)))
            .collect();

        let init = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .initialize(named, RegistryProperties::new().sync_warm_up(true))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(iteration % 8)).await;
        registry.close().await.unwrap();

        match init.await.unwrap() {
            Ok(()) | Err(RegistryError::RegistryClosed) => {}
            Err(other) => panic!("iteration {}: unexpected error: {other}", iteration),
        }
        assert!(
            registry.cluster_names().unwrap().is_empty(),
            "iteration {}: clusters left registered",
            iteration
        );
        for (i, conn) in conns.iter().enumerate() {
            assert!(conn.is_closed(), "iteration {}: connection c{} left open", iteration, i);
            assert_eq!(conn.close_calls(), 1);
        }
    }
}
