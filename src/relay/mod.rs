//! Session Registry and Broadcast Relay
//!
//! Tracks the set of attached sessions, fans Supervisor events out to every
//! session, and routes per-session commands back to the Supervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::supervisor::{OutboundEvent, Supervisor, SupervisorError};
use crate::supervisor::types::LIFECYCLE_ERROR_PREFIX;

/// Per-session outbound queue depth. A session that falls further behind
/// than this has frames dropped rather than stalling the relay.
pub const SESSION_QUEUE_CAPACITY: usize = 64;

/// Opaque handle identifying one attached session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Frame delivered to a session's transport writer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFrame {
    /// One text frame to forward to the client
    Text(String),
    /// Instruct the transport to close the connection
    Close,
}

struct SessionHandle {
    connected_at: DateTime<Utc>,
    tx: mpsc::Sender<SessionFrame>,
}

/// Concurrency-safe registry of attached sessions.
///
/// Broadcast iterates the active set under the registry lock with
/// non-blocking sends, so a session never receives a frame after its
/// `unregister` completes and a slow session cannot stall delivery
/// to the others.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a session to the active set and return its outbound frame queue.
    ///
    /// An optional greeting frame is enqueued before the session becomes
    /// visible to `broadcast`, so it is always the first frame the session
    /// receives and the live stream starts strictly after it.
    pub async fn register(
        &self,
        greeting: Option<SessionFrame>,
    ) -> (SessionId, mpsc::Receiver<SessionFrame>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);

        if let Some(frame) = greeting {
            // The queue is fresh and not yet shared; this cannot fail
            let _ = tx.try_send(frame);
        }

        let handle = SessionHandle {
            connected_at: Utc::now(),
            tx,
        };

        let mut sessions = self.sessions.lock().await;
        sessions.insert(id, handle);
        info!("Registered {} ({} active)", id, sessions.len());

        (id, rx)
    }

    /// Remove a session from the active set; idempotent
    pub async fn unregister(&self, id: SessionId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.remove(&id) {
            info!(
                "Unregistered {} (connected at {}, {} active)",
                id,
                handle.connected_at,
                sessions.len()
            );
        }
    }

    /// Number of currently attached sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Deliver an event to every currently registered session.
    ///
    /// Sends are non-blocking; a session whose queue is full has this
    /// frame dropped, a session whose transport is gone is removed.
    pub async fn broadcast(&self, event: &OutboundEvent) {
        let frame = event.frame();
        let mut sessions = self.sessions.lock().await;
        let mut closed = Vec::new();

        for (id, handle) in sessions.iter() {
            match handle.tx.try_send(SessionFrame::Text(frame.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Dropping frame for slow {}", id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            sessions.remove(&id);
            debug!("Removed {} with closed transport during broadcast", id);
        }
    }

    /// Send one frame to a single session. Returns false if the session
    /// is no longer registered or its queue is unavailable.
    pub async fn send_to(&self, id: SessionId, frame: SessionFrame) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(&id) {
            Some(handle) => handle.tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Forcibly close and unregister every session.
    ///
    /// Called after a terminal lifecycle event: a session with no backing
    /// process is meaningless.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        let count = sessions.len();
        for (_, handle) in sessions.drain() {
            let _ = handle.tx.try_send(SessionFrame::Close);
        }
        if count > 0 {
            info!("Forcibly closed {} sessions", count);
        }
    }

    /// Forward one session's command to the Supervisor's stdin.
    ///
    /// Supervisor errors are reported back to the originating session only,
    /// never broadcast.
    pub async fn route_inbound(&self, id: SessionId, raw: &str, supervisor: &Supervisor) {
        let command = raw.trim();
        debug!("Received command from {}: \"{}\"", id, command);

        match supervisor.send(command).await {
            Ok(()) => {}
            Err(SupervisorError::NotRunning) => {
                warn!("Command from {} while process not running", id);
                self.send_to(
                    id,
                    SessionFrame::Text(format!(
                        "{} Cannot send command: process is not running.",
                        LIFECYCLE_ERROR_PREFIX
                    )),
                )
                .await;
            }
            Err(e) => {
                warn!("Failed to forward command from {}: {}", id, e);
                self.send_to(
                    id,
                    SessionFrame::Text(format!(
                        "{} Failed to forward command: {}",
                        LIFECYCLE_ERROR_PREFIX, e
                    )),
                )
                .await;
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay loop wiring Supervisor output to session fan-out.
///
/// Consumes the observe stream of one process instance; on the terminal
/// lifecycle event it broadcasts the notice and then forcibly closes
/// every session.
pub async fn run_relay(
    mut events: mpsc::UnboundedReceiver<OutboundEvent>,
    registry: std::sync::Arc<SessionRegistry>,
) {
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        registry.broadcast(&event).await;

        if terminal {
            registry.close_all().await;
        }
    }
    debug!("Relay loop finished: observe stream closed");
}
