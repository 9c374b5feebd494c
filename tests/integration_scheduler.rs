//! Integration tests for scheduler communication
//!
//! Tests the full flow: connect → register → launch → status updates,
//! using a mock scheduler WebSocket server and the real executor binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────
// Mock Scheduler
// ─────────────────────────────────────────────────────────────────

/// Mock scheduler server for testing
struct MockScheduler {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    messages_received: Arc<RwLock<Vec<String>>>,
}

impl MockScheduler {
    /// Start a mock scheduler server
    async fn start(launch_on_register: Option<serde_json::Value>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let messages_received = Arc::new(RwLock::new(Vec::new()));
        let messages_clone = messages_received.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        if let Ok((stream, _)) = accept_result {
                            let messages = messages_clone.clone();
                            let launch = launch_on_register.clone();
                            tokio::spawn(async move {
                                if let Ok(ws_stream) = accept_async(stream).await {
                                    handle_connection(ws_stream, messages, launch).await;
                                }
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            messages_received,
        }
    }

    /// Get the WebSocket URL for this mock scheduler
    fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get messages received by the scheduler
    fn messages(&self) -> Vec<String> {
        self.messages_received.read().clone()
    }
}

impl Drop for MockScheduler {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

fn envelope(payload: serde_json::Value) -> serde_json::Value {
    let mut env = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": { "major": 1, "minor": 0, "patch": 0 },
    });
    env.as_object_mut()
        .unwrap()
        .extend(payload.as_object().unwrap().clone());
    env
}

/// Handle a WebSocket connection in the mock scheduler
async fn handle_connection<S>(
    ws_stream: S,
    messages: Arc<RwLock<Vec<String>>>,
    launch_on_register: Option<serde_json::Value>,
) where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + SinkExt<WsMessage>
        + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        if let Ok(WsMessage::Text(text)) = msg {
            messages.write().push(text.clone());

            // Parse and respond to messages
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                if let Some(msg_type) = parsed.get("type").and_then(|t| t.as_str()) {
                    match msg_type {
                        "REGISTER" => {
                            let ack = envelope(serde_json::json!({
                                "type": "REGISTER_ACK",
                                "success": true,
                                "executor_id": format!("executor-{}", Uuid::new_v4()),
                                "heartbeat_interval_secs": 30,
                                "scheduler_version": { "major": 1, "minor": 0, "patch": 0 }
                            }));
                            let _ = write.send(WsMessage::Text(ack.to_string())).await;

                            if let Some(launch) = &launch_on_register {
                                let _ = write
                                    .send(WsMessage::Text(envelope(launch.clone()).to_string()))
                                    .await;
                            }
                        }
                        "HEARTBEAT" => {
                            let ack = envelope(serde_json::json!({
                                "type": "HEARTBEAT_ACK",
                                "accepted": true,
                                "next_heartbeat": (chrono::Utc::now()
                                    + chrono::Duration::seconds(30)).to_rfc3339(),
                            }));
                            let _ = write.send(WsMessage::Text(ack.to_string())).await;
                        }
                        "STATUS_UPDATE" => {
                            // Just record, no response needed
                        }
                        "SHUTDOWN" => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Protocol Message Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_register_message_format() {
    let register = envelope(serde_json::json!({
        "type": "REGISTER",
        "name": "Test Executor",
        "max_concurrent_tasks": 4,
        "executor_version": "0.1.0",
        "tags": ["test"]
    }));

    let json = serde_json::to_string(&register).unwrap();
    assert!(json.contains("REGISTER"));
    assert!(json.contains("Test Executor"));
}

#[test]
fn test_launch_task_message_format() {
    let launch = envelope(serde_json::json!({
        "type": "LAUNCH_TASK",
        "task_id": "task-456",
        "data": "{\"uid\":\"u1\",\"location\":\"K0\",\"temperature\":2,\"cooling_rate\":1,\"num_mutations\":1}"
    }));

    let json = serde_json::to_string(&launch).unwrap();
    assert!(json.contains("LAUNCH_TASK"));
    assert!(json.contains("task-456"));
    assert!(json.contains("num_mutations"));
}

#[test]
fn test_status_update_message_format() {
    let update = envelope(serde_json::json!({
        "type": "STATUS_UPDATE",
        "task_id": "task-456",
        "state": "FINISHED",
        "data": {
            "uid": "u1",
            "best_location": "K42",
            "fitness_score": 7.5
        },
        "metrics": {
            "execution_time_ms": 1500,
            "rounds": 3,
            "evaluations": 3
        }
    }));

    let json = serde_json::to_string(&update).unwrap();
    assert!(json.contains("STATUS_UPDATE"));
    assert!(json.contains("FINISHED"));
    assert!(json.contains("best_location"));
    assert!(json.contains("fitness_score"));
}

// ─────────────────────────────────────────────────────────────────
// Mock Scheduler Tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mock_scheduler_responds_to_register() {
    let scheduler = MockScheduler::start(None).await;
    let (ws_stream, _) = tokio_tungstenite::connect_async(scheduler.ws_url())
        .await
        .unwrap();
    let (mut write, mut read) = ws_stream.split();

    let register = envelope(serde_json::json!({
        "type": "REGISTER",
        "name": "Test Executor",
        "max_concurrent_tasks": 4,
        "executor_version": "0.1.0",
        "tags": []
    }));

    write
        .send(WsMessage::Text(register.to_string()))
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), read.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    if let WsMessage::Text(text) = response {
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "REGISTER_ACK");
        assert_eq!(parsed["success"], true);
        assert!(parsed["executor_id"].as_str().is_some());
    } else {
        panic!("Expected text message");
    }

    let messages = scheduler.messages();
    assert!(!messages.is_empty());
    assert!(messages[0].contains("REGISTER"));
}

#[tokio::test]
async fn test_mock_scheduler_heartbeat_flow() {
    let scheduler = MockScheduler::start(None).await;
    let (ws_stream, _) = tokio_tungstenite::connect_async(scheduler.ws_url())
        .await
        .unwrap();
    let (mut write, mut read) = ws_stream.split();

    let register = envelope(serde_json::json!({
        "type": "REGISTER",
        "name": "Test Executor",
        "max_concurrent_tasks": 4,
        "executor_version": "0.1.0",
        "tags": []
    }));
    write
        .send(WsMessage::Text(register.to_string()))
        .await
        .unwrap();
    let _ = read.next().await; // register ack

    let heartbeat = envelope(serde_json::json!({
        "type": "HEARTBEAT",
        "executor_id": "executor-test",
        "active_tasks": [],
        "finished_task_count": 0,
        "failed_task_count": 0,
        "uptime_secs": 60
    }));
    write
        .send(WsMessage::Text(heartbeat.to_string()))
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), read.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    if let WsMessage::Text(text) = response {
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "HEARTBEAT_ACK");
        assert_eq!(parsed["accepted"], true);
    } else {
        panic!("Expected text message");
    }
}

// ─────────────────────────────────────────────────────────────────
// End-to-End Executor Test
// ─────────────────────────────────────────────────────────────────

/// Kill the child process when the test ends, pass or fail
struct ChildGuard(std::process::Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Full loop: the real binary connects to the mock scheduler, registers,
/// receives a launch, runs the search, and reports RUNNING then FINISHED.
#[tokio::test]
async fn test_executor_end_to_end_against_mock_scheduler() {
    let launch = serde_json::json!({
        "type": "LAUNCH_TASK",
        "task_id": "task-e2e-1",
        "data": "{\"uid\":\"e2e\",\"location\":\"K0\",\"temperature\":3,\"cooling_rate\":1,\"num_mutations\":2}"
    });
    let scheduler = MockScheduler::start(Some(launch)).await;

    // Config pointing the executor at the mock
    let temp = tempfile::TempDir::new().unwrap();
    let cache_dir = temp.path().join("packages");
    let config_path = temp.path().join("executor.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[executor]
name = "E2E Test Executor"

[scheduler]
url = "{}"
reconnect_interval_ms = 500
max_reconnect_attempts = 5
heartbeat_interval_ms = 1000

[provisioning]
cache_dir = "{}"

[logging]
level = "error"
"#,
            scheduler.ws_url(),
            cache_dir.display()
        ),
    )
    .unwrap();

    let binary: PathBuf = assert_cmd::cargo::cargo_bin("magellan-executor");
    let child = std::process::Command::new(binary)
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("executor binary should start");
    let _guard = ChildGuard(child);

    // Wait for the status updates to arrive at the mock scheduler.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let (mut saw_running, mut saw_finished) = (false, false);
    while tokio::time::Instant::now() < deadline && !(saw_running && saw_finished) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        for text in scheduler.messages() {
            if text.contains("STATUS_UPDATE") && text.contains("task-e2e-1") {
                if text.contains("RUNNING") {
                    saw_running = true;
                }
                if text.contains("FINISHED") {
                    saw_finished = true;

                    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(parsed["data"]["uid"], "e2e");
                    assert_eq!(parsed["data"]["best_location"], "K0");
                    // 4 rounds (T = 3, 2, 1, 0) with 2 mutations each
                    assert_eq!(parsed["metrics"]["rounds"], 4);
                    assert_eq!(parsed["metrics"]["evaluations"], 8);
                }
            }
        }
    }

    assert!(saw_running, "never saw RUNNING update: {:?}", scheduler.messages());
    assert!(saw_finished, "never saw FINISHED update: {:?}", scheduler.messages());

    // The RUNNING update must precede FINISHED for the same task.
    let ordered: Vec<&'static str> = scheduler
        .messages()
        .iter()
        .filter(|t| t.contains("STATUS_UPDATE") && t.contains("task-e2e-1"))
        .map(|t| {
            if t.contains("\"RUNNING\"") {
                "running"
            } else {
                "terminal"
            }
        })
        .collect();
    assert_eq!(ordered.first(), Some(&"running"));
}
