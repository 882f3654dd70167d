use std::path::Path;
use std::time::Duration;

use pulse_collector::{build_service, serve_on};
use pulse_core::config::CollectorConfig;
use pulse_core::model::{Metric, MetricKind, MetricValue};
use pulse_core::storage::{DurableStorage, FileStorage};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn config(dir: &Path) -> CollectorConfig {
    CollectorConfig {
        address: "127.0.0.1:0".into(),
        grpc_address: String::new(),
        store_interval_secs: 0,
        file_storage_path: dir.join("metrics.json").display().to_string(),
        restore: true,
        database_path: String::new(),
        ..CollectorConfig::default()
    }
}

#[tokio::test]
async fn restores_snapshot_into_memory_backend() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let storage = FileStorage::new(&cfg.file_storage_path);
    storage.save_data(&[Metric::counter("hits", 10), Metric::gauge("cpu", 0.5)]).await.unwrap();

    let svc = build_service(&cfg).await.unwrap();
    assert_eq!(svc.get("hits", MetricKind::Counter).await.unwrap().value, MetricValue::Counter(10));
    assert_eq!(svc.get("cpu", MetricKind::Gauge).await.unwrap().value, MetricValue::Gauge(0.5));

    let cold = build_service(&CollectorConfig { restore: false, ..cfg }).await.unwrap();
    assert!(cold.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn sled_restarts_do_not_replay_counters() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CollectorConfig { database_path: dir.path().join("db").display().to_string(), ..config(dir.path()) };
    {
        let svc = build_service(&cfg).await.unwrap();
        svc.create_or_update(Metric::counter("hits", 10)).await.unwrap();
    }
    let snapshot = FileStorage::new(&cfg.file_storage_path).load_data().await.unwrap();
    assert_eq!(snapshot, vec![Metric::counter("hits", 10)]);

    for restart in 1..=2 {
        let svc = build_service(&cfg).await.unwrap();
        let hits = svc.get("hits", MetricKind::Counter).await.unwrap().value;
        assert_eq!(hits, MetricValue::Counter(10), "restart {restart}");
    }
}

#[tokio::test]
async fn shutdown_flushes_merged_state() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CollectorConfig { store_interval_secs: 300, ..config(dir.path()) };
    let storage = FileStorage::new(&cfg.file_storage_path);
    storage.save_data(&[Metric::counter("hits", 10)]).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_on(cfg, listener, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::builder().pool_max_idle_per_host(0).build().unwrap();
    let resp = client.post(format!("http://{addr}/update/counter/hits/5")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "15");
    drop(client);
    // interval mode: nothing written until the flusher ticks or the server stops
    assert_eq!(storage.load_data().await.unwrap(), vec![Metric::counter("hits", 10)]);

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), server).await.unwrap().unwrap().unwrap();
    assert_eq!(storage.load_data().await.unwrap(), vec![Metric::counter("hits", 15)]);
}
