//! Client Attachment State Machine
//!
//! Polls the bridge liveness endpoint, attaches over WebSocket, classifies
//! disconnect causes and re-enters the probe loop on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::gateway::{HEALTH_PATH, HealthResponse, WEBSOCKET_PATH};
use crate::supervisor::types::{DIAGNOSTIC_PREFIX, LIFECYCLE_ERROR_PREFIX, LIFECYCLE_INFO_PREFIX};

/// Connection state of the attachment loop
#[derive(Debug, Clone, PartialEq)]
pub enum ClientConnectionState {
    Idle,
    Probing,
    Connecting,
    Attached,
    ClosedClean,
    ClosedUnclean,
}

/// Error types for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("liveness probe error: {0}")]
    ProbeError(String),
    #[error("attachment error: {0}")]
    AttachError(String),
    #[error("invalid client configuration: {0}")]
    ConfigError(String),
}

/// Category of a received frame, derived from the wire prefix convention
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameKind {
    /// Raw process output
    Output,
    /// Process stderr, relayed with a diagnostic prefix
    Diagnostic,
    /// Informational lifecycle notice
    LifecycleInfo,
    /// Lifecycle failure notice
    LifecycleError,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameKind::Output => write!(f, "output"),
            FrameKind::Diagnostic => write!(f, "error"),
            FrameKind::LifecycleInfo => write!(f, "info"),
            FrameKind::LifecycleError => write!(f, "fail"),
        }
    }
}

/// One received frame with its display timestamp and classification
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleFrame {
    pub received_at: DateTime<Utc>,
    pub kind: FrameKind,
    pub text: String,
}

impl ConsoleFrame {
    /// Classify a raw frame by its prefix; the payload is otherwise plain text
    pub fn classify(raw: &str) -> Self {
        let (kind, text) = if let Some(rest) = raw.strip_prefix(DIAGNOSTIC_PREFIX) {
            (FrameKind::Diagnostic, rest.trim_start())
        } else if let Some(rest) = raw.strip_prefix(LIFECYCLE_INFO_PREFIX) {
            (FrameKind::LifecycleInfo, rest.trim_start())
        } else if let Some(rest) = raw.strip_prefix(LIFECYCLE_ERROR_PREFIX) {
            (FrameKind::LifecycleError, rest.trim_start())
        } else {
            (FrameKind::Output, raw)
        };

        Self {
            received_at: Utc::now(),
            kind,
            text: text.to_string(),
        }
    }
}

enum Disconnect {
    Clean,
    Unclean,
}

/// Attachment client driving the probe/connect/attach loop.
///
/// Only one probe/connect cycle runs at a time: a second call to `run`
/// while one is in flight is a no-op preserving the existing attempt.
pub struct AttachmentClient {
    health_url: String,
    ws_url: String,
    retry_interval: Duration,
    http: reqwest::Client,
    state_tx: watch::Sender<ClientConnectionState>,
    state_rx: watch::Receiver<ClientConnectionState>,
    in_flight: Arc<AtomicBool>,
}

impl AttachmentClient {
    /// Create a client from configuration
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = config.server_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(ClientError::ConfigError(format!(
                "server URL must be http(s): {}",
                config.server_url
            )));
        };

        let (state_tx, state_rx) = watch::channel(ClientConnectionState::Idle);

        Ok(Self {
            health_url: format!("{}{}", base, HEALTH_PATH),
            ws_url: format!("{}{}", ws_base, WEBSOCKET_PATH),
            retry_interval: Duration::from_millis(config.retry_interval_ms),
            http: reqwest::Client::new(),
            state_tx,
            state_rx,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Current state of the attachment loop
    pub fn state(&self) -> ClientConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel for state transitions
    pub fn state_watch(&self) -> watch::Receiver<ClientConnectionState> {
        self.state_rx.clone()
    }

    fn set_state(&self, state: ClientConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Issue one liveness query; `Ok(true)` means the process is live
    pub async fn probe_once(&self) -> Result<bool, ClientError> {
        let response = self
            .http
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| ClientError::ProbeError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::ProbeError(format!(
                "liveness query returned {}",
                response.status()
            )));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| ClientError::ProbeError(e.to_string()))?;

        debug!("Liveness probe: {}", health.message);
        Ok(health.process_running)
    }

    /// Run the attachment loop until a clean client-side teardown.
    ///
    /// Received frames are classified and delivered on `frames`; lines from
    /// `commands` are sent to the bridge one frame per line. Closing the
    /// command channel is the deliberate teardown that ends the loop; every
    /// other disconnect re-enters probing after the fixed retry interval.
    pub async fn run(
        &self,
        commands: mpsc::UnboundedReceiver<String>,
        frames: mpsc::UnboundedSender<ConsoleFrame>,
    ) -> Result<(), ClientError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Attachment cycle already in flight, ignoring");
            return Ok(());
        }

        let result = self.run_cycle(commands, frames).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle(
        &self,
        mut commands: mpsc::UnboundedReceiver<String>,
        frames: mpsc::UnboundedSender<ConsoleFrame>,
    ) -> Result<(), ClientError> {
        loop {
            self.set_state(ClientConnectionState::Probing);

            loop {
                match self.probe_once().await {
                    Ok(true) => break,
                    Ok(false) => debug!("Process not live yet, retrying"),
                    Err(e) => debug!("Liveness probe failed: {}", e),
                }
                tokio::time::sleep(self.retry_interval).await;
            }

            self.set_state(ClientConnectionState::Connecting);

            let ws = match connect_async(self.ws_url.as_str()).await {
                Ok((ws, _)) => ws,
                Err(e) => {
                    warn!("Attachment handshake failed: {}", e);
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            self.set_state(ClientConnectionState::Attached);
            info!("Attached to {}", self.ws_url);

            let (mut ws_tx, mut ws_rx) = ws.split();

            let disconnect = loop {
                tokio::select! {
                    message = ws_rx.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if frames.send(ConsoleFrame::classify(&text)).is_err() {
                                // Consumer gone: treat as deliberate teardown
                                break Disconnect::Clean;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break Disconnect::Unclean;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!("WebSocket error: {}", e);
                            break Disconnect::Unclean;
                        }
                    },
                    command = commands.recv() => match command {
                        Some(line) => {
                            if let Err(e) = ws_tx.send(Message::Text(line)).await {
                                warn!("Failed to send command: {}", e);
                                break Disconnect::Unclean;
                            }
                        }
                        None => break Disconnect::Clean,
                    },
                }
            };

            match disconnect {
                Disconnect::Clean => {
                    let _ = ws_tx.close().await;
                    self.set_state(ClientConnectionState::ClosedClean);
                    info!("Session closed by client");
                    return Ok(());
                }
                Disconnect::Unclean => {
                    self.set_state(ClientConnectionState::ClosedUnclean);
                    warn!("Session closed unexpectedly, re-entering probe loop");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }
}

/// Interactive console session: stdin lines become commands, received
/// frames are printed with their timestamp and category.
pub async fn run_attach(config: &ClientConfig) -> Result<()> {
    let client = AttachmentClient::new(config).context("Failed to create attachment client")?;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ConsoleFrame>();

    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if command_tx.send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            println!(
                "{} [{}] {}",
                frame.received_at.format("%H:%M:%S"),
                frame.kind,
                frame.text
            );
        }
    });

    client
        .run(command_rx, frame_tx)
        .await
        .context("Attachment loop failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(url: &str, interval_ms: u64) -> ClientConfig {
        ClientConfig {
            server_url: url.to_string(),
            retry_interval_ms: interval_ms,
        }
    }

    #[test]
    fn test_urls_derived_from_server_url() {
        let client = AttachmentClient::new(&test_config("http://127.0.0.1:9000/", 100)).unwrap();
        assert_eq!(client.health_url, "http://127.0.0.1:9000/health");
        assert_eq!(client.ws_url, "ws://127.0.0.1:9000/websocket");
    }

    #[test]
    fn test_https_maps_to_wss() {
        let client = AttachmentClient::new(&test_config("https://bridge.example", 100)).unwrap();
        assert_eq!(client.ws_url, "wss://bridge.example/websocket");
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = AttachmentClient::new(&test_config("ws://127.0.0.1:9000", 100));
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }

    #[test]
    fn test_initial_state_idle() {
        let client = AttachmentClient::new(&test_config("http://127.0.0.1:9000", 100)).unwrap();
        assert_eq!(client.state(), ClientConnectionState::Idle);
    }

    #[test]
    fn test_classify_raw_output() {
        let frame = ConsoleFrame::classify("Steve joined the game");
        assert_eq!(frame.kind, FrameKind::Output);
        assert_eq!(frame.text, "Steve joined the game");
    }

    #[test]
    fn test_classify_diagnostic() {
        let frame = ConsoleFrame::classify("[SERVER ERROR] out of memory");
        assert_eq!(frame.kind, FrameKind::Diagnostic);
        assert_eq!(frame.text, "out of memory");
    }

    #[test]
    fn test_classify_lifecycle_info() {
        let frame = ConsoleFrame::classify("[SERVER_INFO] Process stopped with code 0.");
        assert_eq!(frame.kind, FrameKind::LifecycleInfo);
        assert_eq!(frame.text, "Process stopped with code 0.");
    }

    #[test]
    fn test_classify_lifecycle_error() {
        let frame = ConsoleFrame::classify("[SERVER_ERROR] Failed to start process: missing");
        assert_eq!(frame.kind, FrameKind::LifecycleError);
        assert!(frame.text.starts_with("Failed to start"));
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op_while_in_flight() {
        // Unreachable probe target keeps the first cycle in Probing forever
        let client = Arc::new(
            AttachmentClient::new(&test_config("http://127.0.0.1:1", 50)).unwrap(),
        );

        let (_tx1, rx1) = mpsc::unbounded_channel();
        let (frame_tx1, _frame_rx1) = mpsc::unbounded_channel();
        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.run(rx1, frame_tx1).await })
        };

        let mut watch = client.state_watch();
        watch
            .wait_for(|s| *s == ClientConnectionState::Probing)
            .await
            .unwrap();

        let (_tx2, rx2) = mpsc::unbounded_channel();
        let (frame_tx2, _frame_rx2) = mpsc::unbounded_channel();
        client.run(rx2, frame_tx2).await.unwrap();

        // The original attempt is preserved
        assert_eq!(client.state(), ClientConnectionState::Probing);
        first.abort();
    }
}
