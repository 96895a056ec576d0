//! Supervised process data types and structures

use serde::{Deserialize, Serialize};

/// Wire prefix for stderr output relayed to sessions
pub const DIAGNOSTIC_PREFIX: &str = "[SERVER ERROR]";

/// Wire prefix for informational lifecycle notices
pub const LIFECYCLE_INFO_PREFIX: &str = "[SERVER_INFO]";

/// Wire prefix for lifecycle failure notices
pub const LIFECYCLE_ERROR_PREFIX: &str = "[SERVER_ERROR]";

/// State of the supervised process, owned and mutated only by the Supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessState {
    /// No start has been requested yet
    NotStarted,
    /// Spawn succeeded; streams are open
    Running { pid: u32 },
    /// Process terminated; terminal until a new start is requested
    Exited { code: i32 },
    /// Spawn itself failed; terminal until a new start is requested
    SpawnFailed { reason: String },
}

impl ProcessState {
    /// Whether the process is currently live
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }

    /// Whether a new start request would be honored from this state
    pub fn is_startable(&self) -> bool {
        !self.is_running()
    }

    /// Human-readable status line, used by the liveness endpoint
    pub fn describe(&self) -> String {
        match self {
            ProcessState::NotStarted => "Process has not been started.".to_string(),
            ProcessState::Running { pid } => format!("Process running (pid {}).", pid),
            ProcessState::Exited { code } => format!("Process exited with code {}.", code),
            ProcessState::SpawnFailed { reason } => {
                format!("Process failed to start: {}.", reason)
            }
        }
    }
}

/// Event produced by the Supervisor's observe stream
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// A line from the process's stdout
    ProcessOutput { text: String },
    /// A line from the process's stderr
    ProcessDiagnostic { text: String },
    /// A spawn failure or exit notice; `message` is the full wire text
    ProcessLifecycle { message: String },
}

impl OutboundEvent {
    /// Build an informational lifecycle event (exit notices)
    pub fn lifecycle_info(message: impl AsRef<str>) -> Self {
        OutboundEvent::ProcessLifecycle {
            message: format!("{} {}", LIFECYCLE_INFO_PREFIX, message.as_ref()),
        }
    }

    /// Build a failure lifecycle event (spawn failures)
    pub fn lifecycle_error(message: impl AsRef<str>) -> Self {
        OutboundEvent::ProcessLifecycle {
            message: format!("{} {}", LIFECYCLE_ERROR_PREFIX, message.as_ref()),
        }
    }

    /// Serialized wire form sent to sessions.
    /// The prefix convention is the only structure on the wire.
    pub fn frame(&self) -> String {
        match self {
            OutboundEvent::ProcessOutput { text } => text.clone(),
            OutboundEvent::ProcessDiagnostic { text } => {
                format!("{} {}", DIAGNOSTIC_PREFIX, text)
            }
            OutboundEvent::ProcessLifecycle { message } => message.clone(),
        }
    }

    /// Lifecycle events from the observe stream signal the end of the
    /// process instance and trigger forced closure of all sessions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboundEvent::ProcessLifecycle { .. })
    }
}

/// Error types for Supervisor operations
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("process is already running")]
    AlreadyRunning,
    #[error("process is not running")]
    NotRunning,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
