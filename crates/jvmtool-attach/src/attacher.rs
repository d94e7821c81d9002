//! Attach orchestration.
//!
//! [`Attacher::attach`] runs the full sequence for one target:
//!
//! 1. resolve the owning user
//! 2. confirm the pid is alive and has a perf-data marker for that user
//! 3. validate the agent library
//! 4. handshake, then load
//!
//! Validation always completes before the target is signalled.

use std::path::PathBuf;
use std::sync::Arc;

use jvmtool_core::{resolve_user, AttachConfig, UserError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::locator::{DiscoveryError, ProcessLocator};
use crate::reporter::{tracing_reporter, SharedReporter};
use crate::session::{AttachSession, HandshakeError, HandshakeOutcome, LoadError};
use crate::signal::{OsSignaller, Signaller};
use crate::validator::{AgentLibraryValidator, ValidatedLibrary, ValidationError};

/// Any failure of a full attach.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("process {pid} does not belong to user {user}")]
    NotOwnedByUser { pid: u32, user: String },

    #[error(transparent)]
    Probe(#[from] DiscoveryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// What to attach and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    pub pid: u32,
    /// Owning user; `None` means the current user
    pub user: Option<String>,
    pub library: PathBuf,
    pub params: Option<String>,
}

impl AttachTarget {
    pub fn new(pid: u32, library: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            user: None,
            library: library.into(),
            params: None,
        }
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }
}

/// Summary of a successful attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachReport {
    pub pid: u32,
    pub user: String,
    pub library: ValidatedLibrary,
    pub handshake: HandshakeOutcome,
}

/// Runs validated attaches with shared configuration and collaborators.
#[derive(Clone)]
pub struct Attacher {
    config: AttachConfig,
    locator: ProcessLocator,
    validator: AgentLibraryValidator,
    signaller: Arc<dyn Signaller>,
    reporter: SharedReporter,
    cancel: CancellationToken,
}

impl Attacher {
    #[must_use]
    pub fn new(config: AttachConfig) -> Self {
        let reporter = tracing_reporter();
        Self {
            locator: ProcessLocator::new(&config.tmp_dir).with_reporter(reporter.clone()),
            validator: AgentLibraryValidator::new().with_reporter(reporter.clone()),
            signaller: Arc::new(OsSignaller),
            reporter,
            cancel: CancellationToken::new(),
            config,
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: AgentLibraryValidator) -> Self {
        self.validator = validator.with_reporter(self.reporter.clone());
        self
    }

    /// Replaces the signaller for both probing and triggering.
    #[must_use]
    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.locator = self.locator.with_signaller(signaller.clone());
        self.signaller = signaller;
        self
    }

    /// Replaces the reporter of every component.
    #[must_use]
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.locator = self.locator.with_reporter(reporter.clone());
        self.validator = self.validator.with_reporter(reporter.clone());
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AttachConfig {
        &self.config
    }

    pub fn locator(&self) -> &ProcessLocator {
        &self.locator
    }

    pub fn validator(&self) -> &AgentLibraryValidator {
        &self.validator
    }

    /// Creates a session for `pid` sharing this attacher's collaborators.
    pub fn session(&self, pid: u32) -> AttachSession {
        AttachSession::new(pid, &self.config)
            .with_signaller(self.signaller.clone())
            .with_reporter(self.reporter.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Checks that `pid` is alive and belongs to `user`.
    pub fn check_target(&self, user: &str, pid: u32) -> Result<(), AttachError> {
        if !self.locator.probe(pid)?.exists() {
            return Err(AttachError::ProcessNotFound { pid });
        }
        if !self.locator.owns(user, pid) {
            return Err(AttachError::NotOwnedByUser {
                pid,
                user: user.to_string(),
            });
        }
        Ok(())
    }

    /// Validates the library and loads it into the target.
    pub async fn attach(&self, target: &AttachTarget) -> Result<AttachReport, AttachError> {
        let user = resolve_user(target.user.as_deref())?;
        self.check_target(&user, target.pid)?;

        let library = self.validator.validate(&target.library)?;

        let mut session = self.session(target.pid);
        let handshake = session.check_socket().await?;
        session
            .load_agent(&library, target.params.as_deref())
            .await?;

        info!(
            pid = target.pid,
            user = %user,
            library = %library.path().display(),
            "Agent loaded"
        );
        Ok(AttachReport {
            pid: target.pid,
            user,
            library,
            handshake,
        })
    }
}

impl std::fmt::Debug for Attacher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attacher")
            .field("config", &self.config)
            .field("locator", &self.locator)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
