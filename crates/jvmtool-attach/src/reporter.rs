//! Attach progress reporting.
//!
//! Components never log through a global sink of their own. Each one is
//! handed an `Arc<dyn Reporter>` and emits [`AttachEvent`]s; the binary
//! uses [`TracingReporter`], embedders can collect events through a
//! [`ChannelReporter`], and tests usually pass [`NullReporter`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::SessionState;

/// Something observable that happened during discovery, validation or attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachEvent {
    /// A live candidate pid was found in the perf-data directory
    CandidateFound { pid: u32 },

    /// A marker named a pid that no longer exists
    CandidateDropped { pid: u32 },

    /// Probing a candidate failed; the scan went on without it
    CandidateFailed { pid: u32, reason: String },

    /// The session moved to a new state
    StateChanged { pid: u32, state: SessionState },

    /// The trigger file was created and `SIGQUIT` sent
    Triggered { pid: u32, trigger: PathBuf },

    /// The control socket is available
    ChannelReady { pid: u32, waited: Duration },

    /// A library passed validation
    LibraryAccepted { path: PathBuf },

    /// A library failed validation
    LibraryRejected { path: PathBuf, reason: String },
}

/// Receives attach events.
pub trait Reporter: Send + Sync {
    fn report(&self, event: AttachEvent);
}

/// Shared reporter handle passed to component constructors.
pub type SharedReporter = Arc<dyn Reporter>;

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: AttachEvent) {
        match event {
            AttachEvent::CandidateFound { pid } => debug!(pid, "Found candidate JVM"),
            AttachEvent::CandidateDropped { pid } => {
                debug!(pid, "Dropped stale perf-data marker")
            }
            AttachEvent::CandidateFailed { pid, reason } => {
                warn!(pid, reason = %reason, "Failed to probe candidate")
            }
            AttachEvent::StateChanged { pid, state } => {
                debug!(pid, state = %state, "Attach session state changed")
            }
            AttachEvent::Triggered { pid, trigger } => {
                info!(pid, trigger = %trigger.display(), "Sent attach trigger")
            }
            AttachEvent::ChannelReady { pid, waited } => {
                info!(pid, waited_ms = waited.as_millis() as u64, "Control socket ready")
            }
            AttachEvent::LibraryAccepted { path } => {
                info!(path = %path.display(), "Agent library validated")
            }
            AttachEvent::LibraryRejected { path, reason } => {
                warn!(path = %path.display(), reason = %reason, "Agent library rejected")
            }
        }
    }
}

/// Sends events to an unbounded channel.
///
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<AttachEvent>,
}

impl ChannelReporter {
    /// Creates a reporter and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AttachEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, event: AttachEvent) {
        let _ = self.sender.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: AttachEvent) {}
}

/// Returns the default reporter.
pub fn tracing_reporter() -> SharedReporter {
    Arc::new(TracingReporter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_reporter_delivers_in_order() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.report(AttachEvent::CandidateFound { pid: 1 });
        reporter.report(AttachEvent::CandidateDropped { pid: 2 });

        assert_eq!(rx.try_recv().unwrap(), AttachEvent::CandidateFound { pid: 1 });
        assert_eq!(rx.try_recv().unwrap(), AttachEvent::CandidateDropped { pid: 2 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_reporter_survives_closed_receiver() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.report(AttachEvent::CandidateFound { pid: 1 });
    }

    #[test]
    fn test_tracing_reporter_accepts_every_event() {
        let reporter = TracingReporter;
        reporter.report(AttachEvent::StateChanged {
            pid: 7,
            state: SessionState::Connected,
        });
        reporter.report(AttachEvent::ChannelReady {
            pid: 7,
            waited: Duration::from_millis(5),
        });
        reporter.report(AttachEvent::LibraryRejected {
            path: PathBuf::from("/x"),
            reason: "bad".to_string(),
        });
    }
}
