use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use sitecache::connection::{
    ConnectOptions, ConnectionError, ConnectionManager, ConnectionState, FailureMode,
    ManagerConfig,
};
use sitecache::store::{KvStore, LifecycleEvent, MemoryConnector, StoreError};

fn configured(connector: &MemoryConnector) -> ConnectionManager {
    let config = ManagerConfig {
        connect_timeout: Duration::from_millis(250),
        retry_base_delay: Duration::from_millis(10),
        ..ManagerConfig::default().with_default_url("memory://integration")
    };
    ConnectionManager::new(config, Arc::new(connector.clone()))
}

#[tokio::test]
async fn concurrent_get_client_connects_once() {
    let connector = MemoryConnector::new().with_latency(Duration::from_millis(40));
    let manager = configured(&connector);

    let results = join_all(
        (0..32).map(|_| manager.get_client("feed", None, ConnectOptions::default())),
    )
    .await;

    assert!(results.iter().all(|result| matches!(result, Ok(Some(_)))));
    assert_eq!(connector.connect_count(), 1);
    assert_eq!(manager.state("feed"), ConnectionState::Connected);
}

#[tokio::test]
async fn concurrent_waiters_share_a_failed_attempt() {
    let connector = MemoryConnector::new().with_latency(Duration::from_millis(10));
    connector.fail_next_connects(100);
    let manager = configured(&connector);

    let results = join_all(
        (0..8).map(|_| manager.get_client("feed", None, ConnectOptions::default())),
    )
    .await;

    for result in results {
        assert!(matches!(
            result,
            Err(ConnectionError::Exhausted { attempts: 3, .. })
        ));
    }
    assert_eq!(connector.connect_count(), 3);
}

#[tokio::test]
async fn hanging_operation_degrades_after_timeout() {
    let connector = MemoryConnector::new();
    let manager = configured(&connector);
    manager
        .get_client("feed", None, ConnectOptions::default())
        .await
        .expect("connect");
    let before = manager.get_stats("feed").expect("stats").timeouts;

    let started = Instant::now();
    let outcome = manager
        .with_timeout(
            "feed",
            "never_resolves",
            Some(Duration::from_millis(50)),
            |_client| std::future::pending::<Result<String, StoreError>>(),
        )
        .await
        .expect("degrade mode returns no error");
    let elapsed = started.elapsed();

    assert_eq!(outcome, None);
    assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "returned late: {elapsed:?}");
    assert_eq!(manager.get_stats("feed").expect("stats").timeouts, before + 1);
}

#[tokio::test]
async fn strict_mode_surfaces_operation_timeout() {
    let connector = MemoryConnector::new();
    let config = ManagerConfig::default()
        .with_default_url("memory://integration")
        .with_mode(FailureMode::Strict);
    let manager = ConnectionManager::new(config, Arc::new(connector));

    let outcome = manager
        .with_timeout(
            "feed",
            "never_resolves",
            Some(Duration::from_millis(20)),
            |_client| std::future::pending::<Result<String, StoreError>>(),
        )
        .await;

    match outcome {
        Err(ConnectionError::OperationTimeout { operation, .. }) => {
            assert_eq!(operation, "never_resolves")
        }
        other => panic!("expected operation timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_url_is_not_an_error() {
    let connector = MemoryConnector::new();
    let manager = ConnectionManager::new(ManagerConfig::default(), Arc::new(connector.clone()));

    let client = manager
        .get_client("x", None, ConnectOptions::default())
        .await
        .expect("no url configured is not an error");

    assert!(client.is_none());
    assert_eq!(connector.connect_count(), 0);
    assert_eq!(manager.state("x"), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_all_on_empty_manager_keeps_stats() {
    let connector = MemoryConnector::new();
    let manager = configured(&connector);

    let before = manager.get_all_stats();
    manager.disconnect_all().await;
    manager.shutdown().await;

    assert_eq!(manager.get_all_stats(), before);
    assert!(before.is_empty());
}

#[tokio::test]
async fn managed_client_survives_backend_hangup() {
    let connector = MemoryConnector::new();
    let manager = configured(&connector);
    let client = manager.managed("feed");

    client.set("greeting", "hello").await.expect("set");
    connector.emit(LifecycleEvent::End);

    assert_eq!(
        client.get("greeting").await.expect("get after reconnect").as_deref(),
        Some("hello")
    );
    assert_eq!(connector.connect_count(), 2);
    let stats = manager.get_stats("feed").expect("stats");
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.disconnects, 1);
}

#[tokio::test]
async fn reconnect_after_disconnect() {
    let connector = MemoryConnector::new();
    let manager = configured(&connector);

    let first = manager
        .get_client("feed", None, ConnectOptions::default())
        .await
        .expect("connect")
        .expect("client");
    manager.disconnect("feed").await;
    assert!(!first.is_open());

    let second = manager
        .get_client("feed", None, ConnectOptions::default())
        .await
        .expect("reconnect")
        .expect("client");
    assert!(second.is_open());
    assert_eq!(manager.get_stats("feed").map(|stats| stats.connects), Some(2));
}
