//! Attach session - the per-pid handshake and load exchange.
//!
//! # Handshake
//!
//! ```text
//!   already cancelled? ── yes ──▶ Cancelled
//!        │ no
//!        ▼
//!   socket exists? ── yes ──▶ AlreadyListening
//!        │ no
//!        ▼
//!   create .attach_pid<PID>, send SIGQUIT
//!        │
//!        ▼
//!   ┌─▶ sleep(poll_interval) ── cancelled ──▶ Cancelled
//!   │    │
//!   │    ▼
//!   │  socket exists? ── yes ──▶ Triggered { waited }
//!   │    │ no
//!   │    ▼
//!   └── elapsed > wait_budget? ── yes ──▶ Timeout
//! ```
//!
//! The trigger file is owned by a guard and removed on every exit path,
//! including the future being dropped mid-wait.
//!
//! # Load exchange
//!
//! One connection, one request, read until the target closes the stream,
//! then interpret the response. Nothing is retried.
//!
//! The response is read up to `MAX_RESPONSE_BYTES`.
//!
//! Two sessions for the same pid are not serialized against each other.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every failure is returned as `HandshakeError` or `LoadError`

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use jvmtool_core::{AttachChannelPaths, AttachConfig};
use jvmtool_protocol::{
    AgentLoadError, AttachRequest, AttachResponse, CommandResult, ProtocolError,
};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::reporter::{tracing_reporter, AttachEvent, SharedReporter};
use crate::signal::{OsSignaller, Signaller};
use crate::validator::ValidatedLibrary;

/// Largest load response accepted from a target.
pub const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

// ============================================================================
// States and Outcomes
// ============================================================================

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    WaitingForChannel,
    Connected,
    RequestSent,
    ResponseParsed,
    Succeeded,
    Failed,
}

impl SessionState {
    /// Returns true for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::WaitingForChannel => "waiting_for_channel",
            Self::Connected => "connected",
            Self::RequestSent => "request_sent",
            Self::ResponseParsed => "response_parsed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the control socket became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The socket existed before we did anything
    AlreadyListening,
    /// The target opened the socket after being signalled
    Triggered { waited: Duration },
}

// ============================================================================
// Error Types
// ============================================================================

/// Handshake failures. All are fatal for the attempt.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("cannot send SIGQUIT to process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("cannot create attach trigger {path} for process {pid}: {source}")]
    TriggerFile {
        pid: u32,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "unable to open socket file {socket}: target process {pid} did not respond within {}ms or HotSpot VM not loaded",
        .elapsed.as_millis()
    )]
    Timeout {
        pid: u32,
        socket: PathBuf,
        elapsed: Duration,
    },

    #[error("attach to process {pid} cancelled")]
    Cancelled { pid: u32 },
}

/// Load exchange failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("attach protocol error with process {pid}: {source}")]
    Protocol {
        pid: u32,
        #[source]
        source: ProtocolError,
    },

    #[error("process {pid}: {source}")]
    Agent {
        pid: u32,
        #[source]
        source: AgentLoadError,
    },

    #[error("process {pid} did not answer within {}ms", .after.as_millis())]
    Timeout { pid: u32, after: Duration },

    #[error("load into process {pid} cancelled")]
    Cancelled { pid: u32 },
}

impl LoadError {
    /// Returns the classified agent failure, if the target reported one.
    pub fn agent_error(&self) -> Option<&AgentLoadError> {
        match self {
            Self::Agent { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ============================================================================
// Trigger Guard
// ============================================================================

/// Owns the `.attach_pid<PID>` file and removes it on drop.
struct TriggerGuard {
    path: PathBuf,
}

impl TriggerGuard {
    /// Creates the trigger file. An existing file is reused.
    fn create(path: &Path) -> io::Result<Self> {
        std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for TriggerGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed attach trigger"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove attach trigger"),
        }
    }
}

// ============================================================================
// Attach Session
// ============================================================================

/// Drives one attach attempt against one pid.
pub struct AttachSession {
    paths: AttachChannelPaths,
    state: SessionState,
    wait_budget: Duration,
    poll_interval: Duration,
    response_timeout: Option<Duration>,
    signaller: Arc<dyn Signaller>,
    reporter: SharedReporter,
    cancel: CancellationToken,
}

impl AttachSession {
    /// Creates a session for `pid` with timings from `config`.
    #[must_use]
    pub fn new(pid: u32, config: &AttachConfig) -> Self {
        Self {
            paths: AttachChannelPaths::new(pid, &config.tmp_dir),
            state: SessionState::Idle,
            wait_budget: config.wait_budget(),
            poll_interval: config.poll_interval(),
            response_timeout: config.response_timeout(),
            signaller: Arc::new(OsSignaller),
            reporter: tracing_reporter(),
            cancel: CancellationToken::new(),
        }
    }

    /// Overrides the handshake timings.
    #[must_use]
    pub fn with_timing(mut self, wait_budget: Duration, poll_interval: Duration) -> Self {
        self.wait_budget = wait_budget;
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Ties the session to a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pid(&self) -> u32 {
        self.paths.pid()
    }

    pub fn paths(&self) -> &AttachChannelPaths {
        &self.paths
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.reporter.report(AttachEvent::StateChanged {
            pid: self.pid(),
            state,
        });
    }

    /// Makes sure the target's control socket exists, triggering the
    /// target's attach listener if needed.
    pub async fn check_socket(&mut self) -> Result<HandshakeOutcome, HandshakeError> {
        self.transition(SessionState::WaitingForChannel);
        let result = self.handshake().await;
        if result.is_err() {
            self.transition(SessionState::Failed);
        }
        result
    }

    async fn handshake(&self) -> Result<HandshakeOutcome, HandshakeError> {
        let pid = self.pid();
        let socket = self.paths.socket();

        if self.cancel.is_cancelled() {
            return Err(HandshakeError::Cancelled { pid });
        }

        if socket.exists() {
            debug!(pid, socket = %socket.display(), "Control socket already present");
            self.reporter.report(AttachEvent::ChannelReady {
                pid,
                waited: Duration::ZERO,
            });
            return Ok(HandshakeOutcome::AlreadyListening);
        }

        let trigger = self.paths.trigger();
        let _guard = TriggerGuard::create(trigger).map_err(|source| {
            HandshakeError::TriggerFile {
                pid,
                path: trigger.to_path_buf(),
                source,
            }
        })?;

        self.signaller
            .request_attach(pid)
            .map_err(|source| HandshakeError::Signal { pid, source })?;
        self.reporter.report(AttachEvent::Triggered {
            pid,
            trigger: trigger.to_path_buf(),
        });

        let start = Instant::now();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(HandshakeError::Cancelled { pid });
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let elapsed = start.elapsed();
            if socket.exists() {
                self.reporter.report(AttachEvent::ChannelReady {
                    pid,
                    waited: elapsed,
                });
                return Ok(HandshakeOutcome::Triggered { waited: elapsed });
            }

            if elapsed > self.wait_budget {
                return Err(HandshakeError::Timeout {
                    pid,
                    socket: socket.to_path_buf(),
                    elapsed,
                });
            }
        }
    }

    /// Asks the target to load `library`, passing `params` to its entry
    /// point.
    pub async fn load_agent(
        &mut self,
        library: &ValidatedLibrary,
        params: Option<&str>,
    ) -> Result<(), LoadError> {
        let result = self.exchange(library, params).await;
        self.transition(if result.is_ok() {
            SessionState::Succeeded
        } else {
            SessionState::Failed
        });
        result
    }

    async fn exchange(
        &mut self,
        library: &ValidatedLibrary,
        params: Option<&str>,
    ) -> Result<(), LoadError> {
        let pid = self.pid();
        let protocol = |source| LoadError::Protocol { pid, source };

        let path = library.path();
        let path_token = path.to_str().ok_or_else(|| {
            protocol(ProtocolError::InvalidToken {
                token: path.to_string_lossy().into_owned(),
            })
        })?;
        let request = AttachRequest::load_agent(path_token, params).map_err(protocol)?;

        let socket = self.paths.socket().to_path_buf();
        let mut stream = UnixStream::connect(&socket).await.map_err(|source| {
            protocol(ProtocolError::Connect {
                path: socket.clone(),
                source,
            })
        })?;
        self.transition(SessionState::Connected);

        stream
            .write_all(&request.encode())
            .await
            .map_err(|source| protocol(ProtocolError::Write { source }))?;
        self.transition(SessionState::RequestSent);
        debug!(pid, library = %path.display(), "Sent load request");

        let raw = self.read_response(&mut stream).await?;
        let response = AttachResponse::parse(&raw).map_err(protocol)?;
        self.transition(SessionState::ResponseParsed);
        debug!(
            pid,
            framing = ?response.framing(),
            status = response.enqueue_status(),
            result = ?response.command_result(),
            "Received load response"
        );

        match response.outcome().map_err(protocol)? {
            CommandResult::Success => Ok(()),
            CommandResult::Failed(source) => Err(LoadError::Agent { pid, source }),
        }
    }

    /// Reads until the target closes the stream or the size limit is hit.
    async fn read_response(&self, stream: &mut UnixStream) -> Result<Vec<u8>, LoadError> {
        let pid = self.pid();
        let read = async {
            let mut buf = Vec::new();
            stream
                .take(MAX_RESPONSE_BYTES + 1)
                .read_to_end(&mut buf)
                .await
                .map_err(|source| LoadError::Protocol {
                    pid,
                    source: ProtocolError::Read { source },
                })?;
            if buf.len() as u64 > MAX_RESPONSE_BYTES {
                return Err(LoadError::Protocol {
                    pid,
                    source: ProtocolError::ResponseTooLarge {
                        limit: MAX_RESPONSE_BYTES,
                    },
                });
            }
            Ok(buf)
        };

        let bounded = async {
            match self.response_timeout {
                Some(after) => tokio::time::timeout(after, read)
                    .await
                    .map_err(|_| LoadError::Timeout { pid, after })?,
                None => read.await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(LoadError::Cancelled { pid }),
            result = bounded => result,
        }
    }
}

impl fmt::Debug for AttachSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachSession")
            .field("pid", &self.pid())
            .field("state", &self.state)
            .field("wait_budget", &self.wait_budget)
            .field("poll_interval", &self.poll_interval)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_trigger_guard_removes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".attach_pid1");
        {
            let _guard = TriggerGuard::create(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_trigger_guard_reuses_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".attach_pid1");
        std::fs::write(&path, b"").unwrap();
        let guard = TriggerGuard::create(&path).unwrap();
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_new_session_is_idle() {
        let config = AttachConfig::with_tmp_dir("/tmp");
        let session = AttachSession::new(42, &config);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.pid(), 42);
        assert_eq!(session.paths().socket(), Path::new("/tmp/.java_pid42"));
        assert_eq!(session.wait_budget, Duration::from_secs(9));
        assert_eq!(session.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::WaitingForChannel.to_string(), "waiting_for_channel");
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::RequestSent.is_terminal());
    }

    #[test]
    fn test_timeout_message() {
        let err = HandshakeError::Timeout {
            pid: 7,
            socket: PathBuf::from("/tmp/.java_pid7"),
            elapsed: Duration::from_millis(10_000),
        };
        assert!(err.to_string().contains("within 10000ms"));
    }
}
