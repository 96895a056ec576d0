//! Integration tests for the client attachment state machine: probe retry
//! cadence, clean teardown and reconnection after an unclean close.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use procbridge::client::{AttachmentClient, ClientConnectionState, ConsoleFrame};
use procbridge::config::ClientConfig;
use procbridge::gateway::{AppState, router};
use procbridge::relay::{SessionRegistry, run_relay};
use procbridge::supervisor::Supervisor;

fn client_config(server_url: &str, interval_ms: u64) -> ClientConfig {
    ClientConfig {
        server_url: server_url.to_string(),
        retry_interval_ms: interval_ms,
    }
}

fn not_live_body() -> serde_json::Value {
    serde_json::json!({
        "status": "ok",
        "processRunning": false,
        "message": "Process has not been started."
    })
}

fn live_body() -> serde_json::Value {
    serde_json::json!({
        "status": "ok",
        "processRunning": true,
        "message": "Process running (pid 7)."
    })
}

/// Bind a real bridge with a supervised process for attach tests
async fn start_bridge(script: &str) -> (Arc<Supervisor>, Arc<SessionRegistry>, u16) {
    let supervisor = Arc::new(Supervisor::new());
    let registry = Arc::new(SessionRegistry::new());
    let state = AppState::new(
        supervisor.clone(),
        registry.clone(),
        "http://localhost:3000",
    )
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    supervisor
        .start(
            "sh",
            &["-c".to_string(), script.to_string()],
            Path::new("."),
        )
        .await
        .unwrap();
    let events = supervisor.observe().await.unwrap();
    tokio::spawn(run_relay(events, registry.clone()));

    (supervisor, registry, port)
}

#[tokio::test]
async fn test_three_not_live_probes_then_attach_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(not_live_body()))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(live_body()))
        .mount(&server)
        .await;

    let client = Arc::new(AttachmentClient::new(&client_config(&server.uri(), 30)).unwrap());
    let mut states = client.state_watch();

    let (_command_tx, command_rx) = mpsc::unbounded_channel();
    let (frame_tx, _frame_rx) = mpsc::unbounded_channel::<ConsoleFrame>();
    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.run(command_rx, frame_tx).await })
    };

    // Exactly three not-live probes, then the fourth succeeds and the
    // client moves to Connecting.
    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ClientConnectionState::Connecting),
    )
    .await
    .unwrap()
    .unwrap();

    let probes = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/health")
        .count();
    assert_eq!(probes, 4);

    task.abort();
}

#[tokio::test]
async fn test_probe_network_failure_keeps_probing() {
    // Nothing listens here; every probe is a network error
    let client = Arc::new(AttachmentClient::new(&client_config("http://127.0.0.1:1", 20)).unwrap());
    let mut states = client.state_watch();

    let (_command_tx, command_rx) = mpsc::unbounded_channel();
    let (frame_tx, _frame_rx) = mpsc::unbounded_channel::<ConsoleFrame>();
    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.run(command_rx, frame_tx).await })
    };

    states
        .wait_for(|s| *s == ClientConnectionState::Probing)
        .await
        .unwrap();

    // Several retry intervals later the loop is still probing, not failed
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.state(), ClientConnectionState::Probing);

    task.abort();
}

#[tokio::test]
async fn test_clean_teardown_ends_loop_and_spares_process() {
    let (supervisor, _registry, port) = start_bridge("sleep 5").await;

    let client = Arc::new(
        AttachmentClient::new(&client_config(&format!("http://127.0.0.1:{}", port), 30)).unwrap(),
    );
    let mut states = client.state_watch();

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ConsoleFrame>();
    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.run(command_rx, frame_tx).await })
    };

    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ClientConnectionState::Attached),
    )
    .await
    .unwrap()
    .unwrap();

    // Greeting arrives as a classified lifecycle frame
    let greeting = timeout(Duration::from_secs(5), frame_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(greeting.text.contains("Connected to running process console"));

    // Deliberate client teardown: close the command channel
    drop(command_tx);

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(client.state(), ClientConnectionState::ClosedClean);

    // The supervised process is independent of any observer
    assert!(supervisor.current_state().is_running());
}

#[tokio::test]
async fn test_unclean_close_reenters_probing() {
    let (_supervisor, _registry, port) = start_bridge("sleep 1").await;

    let client = Arc::new(
        AttachmentClient::new(&client_config(&format!("http://127.0.0.1:{}", port), 50)).unwrap(),
    );
    let mut states = client.state_watch();

    let (_command_tx, command_rx) = mpsc::unbounded_channel();
    let (frame_tx, _frame_rx) = mpsc::unbounded_channel::<ConsoleFrame>();
    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.run(command_rx, frame_tx).await })
    };

    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ClientConnectionState::Attached),
    )
    .await
    .unwrap()
    .unwrap();

    // The process exits, the bridge force-closes the session: an unclean
    // disconnect that re-enters probing after the fixed interval.
    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ClientConnectionState::ClosedUnclean),
    )
    .await
    .unwrap()
    .unwrap();

    timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ClientConnectionState::Probing),
    )
    .await
    .unwrap()
    .unwrap();

    task.abort();
}
