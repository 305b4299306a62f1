// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end runs of the sidecar runtime with in-memory stores and a mock
//! user container.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dataflow_sidecar::store::{MemorySecretStore, MemoryStatusStore};
use dataflow_sidecar::{Config, SidecarRuntime};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SPEC: &str = r#"{
    "name": "main",
    "in": {"http": {}},
    "sources": [{"name": "web", "http": {}}],
    "sinks": [{"name": "out", "log": {}}]
}"#;

/// The output path is an empty regular file, which the reader sees as main
/// closing its output straight away.
fn config(spec: &str, main_url: &str, fifo_dir: &std::path::Path) -> Config {
    std::fs::write(fifo_dir.join("out"), b"").unwrap();
    let vars: HashMap<&str, String> = HashMap::from([
        ("DATAFLOW_STEP_SPEC", spec.to_string()),
        ("DATAFLOW_PIPELINE_NAME", "etl".to_string()),
        ("DATAFLOW_NAMESPACE", "prod".to_string()),
        ("DATAFLOW_REPLICA", "0".to_string()),
        ("DATAFLOW_UPDATE_INTERVAL", "50ms".to_string()),
        ("DATAFLOW_READY_POLL_INTERVAL", "10ms".to_string()),
        ("DATAFLOW_MAIN_URL", main_url.to_string()),
        ("DATAFLOW_FIFO_IN", fifo_dir.join("in").display().to_string()),
        ("DATAFLOW_FIFO_OUT", fifo_dir.join("out").display().to_string()),
    ]);
    let mut config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
    config.listen_addr = "127.0.0.1:0".parse().unwrap();
    config
}

async fn mock_main() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

async fn start(config: Config, status: Arc<MemoryStatusStore>) -> anyhow::Result<SidecarRuntime> {
    SidecarRuntime::builder()
        .config(config)
        .status_store(status)
        .secret_store(Arc::new(MemorySecretStore::new()))
        .shutdown_grace(Duration::from_secs(1))
        .build()?
        .start()
        .await
}

// ============================================================================
// Message flow
// ============================================================================

#[tokio::test]
async fn test_http_source_to_main_and_main_to_sinks() {
    let main = mock_main().await;
    let dir = tempfile::tempdir().unwrap();
    let status = Arc::new(MemoryStatusStore::new());
    let runtime = start(config(SPEC, &main.uri(), dir.path()), status.clone())
        .await
        .unwrap();
    assert!(runtime.is_running());

    let base = format!("http://{}", runtime.listen_addr());
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/sources/web", base))
        .body("to-main")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .post(format!("{}/messages", base))
        .body("from-main")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let delivered: Vec<_> = main
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/messages")
        .map(|r| r.body)
        .collect();
    assert_eq!(delivered, vec![b"to-main".to_vec()]);

    runtime.shutdown().await.unwrap();

    let patches = status.patches().await;
    let (step, last) = patches.last().unwrap();
    assert_eq!(step.to_string(), "prod/etl-main");
    let statuses = &last["status"];
    assert_eq!(statuses["sourceStatuses"]["web"]["lastMessage"]["data"], "to-main");
    assert_eq!(statuses["sourceStatuses"]["web"]["metrics"]["0"]["total"], 1);
    assert_eq!(statuses["sinkStatuses"]["out"]["lastMessage"]["data"], "from-main");
    assert_eq!(statuses["sinkStatuses"]["out"]["metrics"]["0"]["total"], 1);
}

#[tokio::test]
async fn test_cron_source_delivers_fire_times() {
    let main = mock_main().await;
    let dir = tempfile::tempdir().unwrap();
    let spec = r#"{
        "name": "main",
        "in": {"http": {}},
        "sources": [{"name": "tick", "cron": {"schedule": "@every 20ms"}}]
    }"#;
    let status = Arc::new(MemoryStatusStore::new());
    let runtime = start(config(spec, &main.uri(), dir.path()), status.clone())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let ticks = runtime.context().status.snapshot().sources["tick"].total();
    runtime.shutdown().await.unwrap();

    assert!(ticks >= 2, "expected several fires, got {}", ticks);
    let requests = main.received_requests().await.unwrap();
    let fire = requests
        .iter()
        .find(|r| r.url.path() == "/messages")
        .unwrap();
    let body = String::from_utf8(fire.body.clone()).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&body).is_ok(), "{}", body);
    assert!(body.ends_with('Z'));
}

// ============================================================================
// Status publishing
// ============================================================================

#[tokio::test]
async fn test_status_published_periodically_and_on_shutdown() {
    let main = mock_main().await;
    let dir = tempfile::tempdir().unwrap();
    let status = Arc::new(MemoryStatusStore::new());
    let runtime = start(config(SPEC, &main.uri(), dir.path()), status.clone())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let periodic = status.patches().await.len();
    assert_eq!(periodic, 1, "unchanged status is written once");

    runtime.shutdown().await.unwrap();
    assert_eq!(status.patches().await.len(), periodic + 1);
}

// ============================================================================
// Startup failures
// ============================================================================

#[tokio::test]
async fn test_port_in_use_fails_startup() {
    let main = mock_main().await;
    let dir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

    let mut config = config(SPEC, &main.uri(), dir.path());
    config.listen_addr = taken.local_addr().unwrap();

    let result = start(config, Arc::new(MemoryStatusStore::new())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_secret_lookup_failure_fails_startup() {
    let main = mock_main().await;
    let dir = tempfile::tempdir().unwrap();
    let spec = r#"{"name": "main", "sinks": [{"name": "out", "kafka": {"topic": "t"}}]}"#;

    let secrets = MemorySecretStore::new();
    secrets.set_failing(true);
    let result = SidecarRuntime::builder()
        .config(config(spec, &main.uri(), dir.path()))
        .status_store(Arc::new(MemoryStatusStore::new()))
        .secret_store(Arc::new(secrets))
        .build()
        .unwrap()
        .start()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_schedule_fails_startup() {
    let main = mock_main().await;
    let dir = tempfile::tempdir().unwrap();
    let spec = r#"{
        "name": "main",
        "sources": [{"name": "tick", "cron": {"schedule": "not a schedule"}}]
    }"#;

    let config = config(spec, &main.uri(), dir.path());
    let result = start(config, Arc::new(MemoryStatusStore::new())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_unreadable_output_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out-dir");
    std::fs::create_dir(&out).unwrap();

    // Main never becomes ready, so only the output reader can end startup.
    let mut config = config(SPEC, "http://127.0.0.1:1", dir.path());
    config.fifo_out = out;
    let status = Arc::new(MemoryStatusStore::new());

    let result = tokio::time::timeout(Duration::from_secs(3), start(config, status.clone()))
        .await
        .unwrap();
    let err = result.err().unwrap();
    assert!(err.to_string().contains("output-fifo failed"), "{}", err);
    assert_eq!(status.patches().await.len(), 1, "final status is published");
}

#[tokio::test]
async fn test_shutdown_during_startup_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = free.local_addr().unwrap();
    drop(free);

    let mut config = config(SPEC, "http://127.0.0.1:1", dir.path());
    config.listen_addr = addr;
    let status = Arc::new(MemoryStatusStore::new());
    let shutdown = CancellationToken::new();

    let starting = SidecarRuntime::builder()
        .config(config)
        .status_store(status.clone())
        .secret_store(Arc::new(MemorySecretStore::new()))
        .shutdown_grace(Duration::from_secs(1))
        .shutdown_token(shutdown.clone())
        .build()
        .unwrap()
        .start();
    let cancel_later = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(tokio::net::TcpStream::connect(addr).await.is_ok(), "listener is up");
        shutdown.cancel();
    };

    let (result, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(3), starting),
        cancel_later
    );
    let result = result.unwrap();
    assert!(result.is_err());
    assert_eq!(status.patches().await.len(), 1, "final status is published");
    assert!(tokio::net::TcpStream::connect(addr).await.is_err(), "listener is closed");
}

#[test]
fn test_builder_requires_stores() {
    let dir = tempfile::tempdir().unwrap();
    let result = SidecarRuntime::builder()
        .config(config(SPEC, "http://127.0.0.1:1", dir.path()))
        .build();
    assert!(result.is_err());
}
