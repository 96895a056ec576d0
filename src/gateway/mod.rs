//! Transport Gateway
//!
//! One listening port multiplexing plain liveness queries and WebSocket
//! upgrade requests; everything else is rejected with a 404.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::relay::{SessionFrame, SessionRegistry, run_relay};
use crate::supervisor::Supervisor;
use crate::supervisor::types::LIFECYCLE_INFO_PREFIX;

/// Path answering liveness queries
pub const HEALTH_PATH: &str = "/health";

/// Path accepting WebSocket upgrades
pub const WEBSOCKET_PATH: &str = "/websocket";

/// Shared state handed to every gateway handler
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub registry: Arc<SessionRegistry>,
    allowed_origin: HeaderValue,
}

impl AppState {
    pub fn new(
        supervisor: Arc<Supervisor>,
        registry: Arc<SessionRegistry>,
        allowed_origin: &str,
    ) -> Result<Self> {
        let allowed_origin = HeaderValue::from_str(allowed_origin)
            .with_context(|| format!("Invalid allowed origin: {}", allowed_origin))?;

        Ok(Self {
            supervisor,
            registry,
            allowed_origin,
        })
    }
}

/// Liveness payload returned on the health path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub process_running: bool,
    pub message: String,
}

/// Build the gateway router for the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(WEBSOCKET_PATH, get(ws_handler))
        .fallback(not_found)
        // Non-GET requests on known paths are rejected outright too
        .method_not_allowed_fallback(not_found)
        .with_state(state)
}

/// Run the bridge: bind the listener, spawn the supervised process, wire the
/// relay loop and serve until the listener fails.
pub async fn run(config: &Config) -> Result<()> {
    let supervisor = Arc::new(Supervisor::new());
    let registry = Arc::new(SessionRegistry::new());
    let state = AppState::new(
        supervisor.clone(),
        registry.clone(),
        &config.server.allowed_origin,
    )?;

    let listener = TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.server.port))?;
    info!(
        "HTTP server listening on http://localhost:{}",
        config.server.port
    );
    info!(
        "WebSocket connections expected on ws://localhost:{}{}",
        config.server.port, WEBSOCKET_PATH
    );

    // Start the supervised process once the listener is up
    supervisor
        .start(
            &config.process.program,
            &config.process.args,
            Path::new(&config.process.working_dir),
        )
        .await?;

    let events = supervisor
        .observe()
        .await
        .context("Observe stream already consumed")?;
    tokio::spawn(run_relay(events, registry));

    axum::serve(listener, router(state))
        .await
        .context("Gateway server failed")?;
    Ok(())
}

/// Liveness query: side-effect-free snapshot of the supervisor state
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let process_state = state.supervisor.current_state();

    let body = HealthResponse {
        status: "ok".to_string(),
        process_running: process_state.is_running(),
        message: process_state.describe(),
    };

    let mut response = Json(body).into_response();
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, state.allowed_origin.clone());
    response
}

/// Any path other than health and websocket is rejected outright
async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

/// Drive one attached session until either side disconnects
async fn handle_session(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Synthesized lifecycle message describing the current state; it is
    // queued as part of registration so the live stream starts strictly
    // after it, and there is no history replay.
    let greeting = if state.supervisor.current_state().is_running() {
        format!(
            "{} Connected to running process console.",
            LIFECYCLE_INFO_PREFIX
        )
    } else {
        format!(
            "{} Process is not running or has stopped.",
            LIFECYCLE_INFO_PREFIX
        )
    };
    let (id, mut outbound_rx) = state
        .registry
        .register(Some(SessionFrame::Text(greeting)))
        .await;
    info!("Client attached as {}", id);

    // Writer task: drains this session's queue independently of the others
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match frame {
                SessionFrame::Text(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                SessionFrame::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                state
                    .registry
                    .route_inbound(id, text.as_str(), &state.supervisor)
                    .await;
            }
            Ok(Message::Close(_)) => {
                info!("{} sent close frame", id);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket error for {}: {}", id, e);
                break;
            }
        }
    }

    // Client disconnect never affects the supervised process
    state.registry.unregister(id).await;
    send_task.abort();
    info!("Client detached from {}", id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_payload_uses_camel_case() {
        let body = HealthResponse {
            status: "ok".to_string(),
            process_running: false,
            message: "Process has not been started.".to_string(),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["processRunning"], false);
        assert!(json.get("process_running").is_none());
    }

    #[test]
    fn test_health_payload_roundtrip() {
        let json = r#"{"status":"ok","processRunning":true,"message":"Process running (pid 7)."}"#;
        let parsed: HealthResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.process_running);
    }
}
