//! Process Supervisor owning the supervised process and its streams

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use super::types::{OutboundEvent, ProcessState, SupervisorError};

/// Supervisor for a single external long-running process.
///
/// Owns the process handle and all three streams exclusively; every other
/// component interacts with the process only through `send` and `observe`.
pub struct Supervisor {
    state_tx: watch::Sender<ProcessState>,
    state_rx: watch::Receiver<ProcessState>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<OutboundEvent>>>,
}

impl Supervisor {
    /// Create a new Supervisor with no process started
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ProcessState::NotStarted);

        Self {
            state_tx,
            state_rx,
            stdin: Arc::new(Mutex::new(None)),
            events: Mutex::new(None),
        }
    }

    /// Read-only snapshot of the current process state, never blocks
    pub fn current_state(&self) -> ProcessState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel for state transitions
    pub fn state_watch(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }

    /// Start the supervised process.
    ///
    /// Fails with `AlreadyRunning` if a process is live. A spawn failure is
    /// not an error: the state moves to `SpawnFailed` and a single lifecycle
    /// event is emitted on the observe stream, which then terminates.
    pub async fn start(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<(), SupervisorError> {
        // Serialize concurrent start attempts on the events slot; the guard
        // is held until the state transition below is published.
        let mut events_slot = self.events.lock().await;

        if self.current_state().is_running() {
            warn!("Start requested while process already running, skipping spawn");
            return Err(SupervisorError::AlreadyRunning);
        }

        info!("Starting supervised process: {} {:?}", program, args);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        *events_slot = Some(event_rx);

        let spawn_result = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawn_result {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn supervised process: {}", e);
                let _ = self.state_tx.send(ProcessState::SpawnFailed {
                    reason: e.to_string(),
                });
                let _ = event_tx.send(OutboundEvent::lifecycle_error(format!(
                    "Failed to start process: {}",
                    e
                )));
                return Ok(());
            }
        };

        let pid = child.id().unwrap_or(0);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        *self.stdin.lock().await = stdin;
        let _ = self.state_tx.send(ProcessState::Running { pid });
        info!("Supervised process running with pid {}", pid);

        // Stdout reader: one ProcessOutput event per line
        let out_tx = event_tx.clone();
        let out_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("Process stdout: {}", line);
                    if out_tx
                        .send(OutboundEvent::ProcessOutput { text: line })
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        // Stderr reader: one ProcessDiagnostic event per line
        let err_tx = event_tx.clone();
        let err_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("Process stderr: {}", line);
                    if err_tx
                        .send(OutboundEvent::ProcessDiagnostic { text: line })
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        // Waiter: drains both readers, reaps the process, emits the terminal
        // lifecycle event and closes the observe stream.
        let state_tx = self.state_tx.clone();
        let stdin_slot = self.stdin.clone();
        tokio::spawn(async move {
            let _ = out_task.await;
            let _ = err_task.await;

            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    error!("Failed to reap supervised process: {}", e);
                    -1
                }
            };

            stdin_slot.lock().await.take();
            let _ = state_tx.send(ProcessState::Exited { code });
            info!("Supervised process exited with code {}", code);

            let _ = event_tx.send(OutboundEvent::lifecycle_info(format!(
                "Process stopped with code {}.",
                code
            )));
        });

        Ok(())
    }

    /// Write one newline-terminated line to the process's stdin.
    ///
    /// Fails with `NotRunning` unless the state is `Running`. The stdin
    /// mutex serializes concurrent senders, so each call is an atomic
    /// line write.
    pub async fn send(&self, line: &str) -> Result<(), SupervisorError> {
        if !self.current_state().is_running() {
            return Err(SupervisorError::NotRunning);
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(SupervisorError::NotRunning)?;

        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        debug!("Forwarded command to process stdin: {}", line);
        Ok(())
    }

    /// Take the observe stream for the current process instance.
    ///
    /// The stream is produced once per `start` and is consumed by exactly
    /// one relay loop; it terminates after the terminal lifecycle event.
    pub async fn observe(&self) -> Option<mpsc::UnboundedReceiver<OutboundEvent>> {
        self.events.lock().await.take()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
