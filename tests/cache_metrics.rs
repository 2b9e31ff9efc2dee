use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use sitecache::cache::{CacheOptions, VersionedCache};
use sitecache::connection::{ConnectOptions, ConnectionManager, FailureMode, ManagerConfig};
use sitecache::infra::telemetry;
use sitecache::store::{LifecycleEvent, MemoryConnector, StoreError};

#[tokio::test]
async fn cache_and_connection_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let connector = MemoryConnector::new();
    connector.fail_next_connects(1);
    let config = ManagerConfig {
        default_url: Some("memory://metrics".to_string()),
        connect_timeout: Duration::from_millis(100),
        retry_base_delay: Duration::from_millis(5),
        ..Default::default()
    }
    .with_mode(FailureMode::Degrade);
    let manager = ConnectionManager::new(config, Arc::new(connector.clone()));

    // Connect (after one failed attempt), then time out an operation.
    let client = manager
        .get_client("metrics", None, ConnectOptions::default())
        .await
        .expect("connect succeeds on retry")
        .expect("client configured");
    let timed_out = manager
        .with_timeout(
            "metrics",
            "hang",
            Some(Duration::from_millis(10)),
            |_client| std::future::pending::<Result<(), StoreError>>(),
        )
        .await
        .expect("degrade mode swallows timeouts");
    assert_eq!(timed_out, None);

    // Hit, miss, heal and write through a cache.
    let cache: VersionedCache<Vec<u32>> =
        VersionedCache::new(CacheOptions::new("metrics", 2, 60), client);
    assert!(cache.set("numbers", &vec![1, 2, 3], None).await);
    assert_eq!(cache.get("numbers").await, Some(vec![1, 2, 3]));
    assert_eq!(cache.get("absent").await, None);
    connector.store().raw_set("metrics:v2:broken", "{");
    assert_eq!(cache.get("broken").await, None);

    // Backend signals.
    connector.emit(LifecycleEvent::Error("connection reset".to_string()));
    connector.emit(LifecycleEvent::End);
    for _ in 0..50 {
        if manager.get_stats("metrics").map(|stats| stats.disconnects) == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    manager.disconnect_all().await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "sitecache_connection_connect_total",
        "sitecache_connection_connect_failure_total",
        "sitecache_connection_disconnect_total",
        "sitecache_connection_error_total",
        "sitecache_connection_timeout_total",
        "sitecache_connection_connect_ms",
        "sitecache_cache_hit_total",
        "sitecache_cache_miss_total",
        "sitecache_cache_heal_total",
        "sitecache_cache_write_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
