//! Target discovery - finds running HotSpot JVMs owned by a user.
//!
//! Every HotSpot VM with perf-data enabled keeps a marker file named after
//! its pid in `<tmp>/hsperfdata_<user>/`. Markers outlive crashed VMs, so
//! each candidate is probed with signal 0 before it is reported.
//!
//! # Async Safety
//!
//! [`ProcessLocator::discover`] runs the directory scan via
//! `spawn_blocking`; [`ProcessLocator::scan`] is the blocking core.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-entry failures are collected in [`Discovery::errors`], never fatal

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jvmtool_core::{perf_data_dir, perf_data_marker, process_snapshot, resolve_user};
use jvmtool_core::{TargetProcess, UserError};
use thiserror::Error;
use tracing::debug;

use crate::reporter::{tracing_reporter, AttachEvent, SharedReporter};
use crate::signal::{Liveness, OsSignaller, Signaller};

// ============================================================================
// Error Types
// ============================================================================

/// A failure confined to one perf-data entry. The scan continues.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A directory entry could not be read
    #[error("failed to read entry in {dir}: {source}")]
    Entry {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The liveness probe failed with something other than ESRCH/EPERM
    #[error("failed to probe pid {pid}: {source}")]
    Probe {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// Failures that abort discovery.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error(transparent)]
    User(#[from] UserError),

    /// The perf-data directory exists but could not be listed
    #[error("failed to read {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The blocking scan task did not complete
    #[error("discovery task failed: {0}")]
    Task(String),
}

// ============================================================================
// Result Type
// ============================================================================

/// Outcome of one discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// The resolved owning user
    pub user: String,
    /// Live candidate pids
    pub pids: BTreeSet<u32>,
    /// Entries that could not be classified
    pub errors: Vec<DiscoveryError>,
}

// ============================================================================
// Process Locator
// ============================================================================

/// Enumerates live candidate target processes.
#[derive(Clone)]
pub struct ProcessLocator {
    tmp_dir: PathBuf,
    signaller: Arc<dyn Signaller>,
    reporter: SharedReporter,
}

impl ProcessLocator {
    /// Creates a locator over `tmp_dir` using real signals and tracing.
    #[must_use]
    pub fn new(tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            signaller: Arc::new(OsSignaller),
            reporter: tracing_reporter(),
        }
    }

    /// Replaces the signaller used for liveness probes.
    #[must_use]
    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    /// Replaces the event reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Returns the temp directory this locator scans.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Discovers live candidates without blocking the runtime.
    ///
    /// `user` of `None` means the effective user of this process.
    pub async fn discover(&self, user: Option<&str>) -> Result<Discovery, LocatorError> {
        let locator = self.clone();
        let user = user.map(str::to_string);
        tokio::task::spawn_blocking(move || locator.scan(user.as_deref()))
            .await
            .map_err(|e| LocatorError::Task(e.to_string()))?
    }

    /// Scans the perf-data directory of `user`.
    ///
    /// This performs blocking I/O and should be called via `spawn_blocking`.
    pub fn scan(&self, user: Option<&str>) -> Result<Discovery, LocatorError> {
        let user = resolve_user(user)?;
        let dir = perf_data_dir(&self.tmp_dir, &user);
        let mut discovery = Discovery {
            user,
            ..Discovery::default()
        };

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "No perf-data directory");
                return Ok(discovery);
            }
            Err(source) => return Err(LocatorError::ReadDir { path: dir, source }),
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    discovery.errors.push(DiscoveryError::Entry {
                        dir: dir.clone(),
                        source,
                    });
                    continue;
                }
            };

            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };

            match self.signaller.probe(pid) {
                Ok(Liveness::Gone) => {
                    self.reporter.report(AttachEvent::CandidateDropped { pid });
                }
                Ok(_) => {
                    self.reporter.report(AttachEvent::CandidateFound { pid });
                    discovery.pids.insert(pid);
                }
                Err(source) => {
                    self.reporter.report(AttachEvent::CandidateFailed {
                        pid,
                        reason: source.to_string(),
                    });
                    discovery.errors.push(DiscoveryError::Probe { pid, source });
                }
            }
        }

        debug!(
            user = %discovery.user,
            found = discovery.pids.len(),
            errors = discovery.errors.len(),
            "Discovery complete"
        );
        Ok(discovery)
    }

    /// Returns true if `pid` has a perf-data marker under `user`.
    pub fn owns(&self, user: &str, pid: u32) -> bool {
        perf_data_marker(&self.tmp_dir, user, pid).exists()
    }

    /// Probes a single pid.
    pub fn probe(&self, pid: u32) -> Result<Liveness, DiscoveryError> {
        self.signaller
            .probe(pid)
            .map_err(|source| DiscoveryError::Probe { pid, source })
    }

    /// Enriches pids with command lines and start times.
    ///
    /// Takes one process table snapshot for all pids.
    pub fn describe<'a>(
        &self,
        user: &str,
        pids: impl IntoIterator<Item = &'a u32>,
    ) -> Vec<TargetProcess> {
        let system = process_snapshot();
        pids.into_iter()
            .map(|pid| TargetProcess::from_snapshot(&system, *pid, user))
            .collect()
    }
}

impl std::fmt::Debug for ProcessLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLocator")
            .field("tmp_dir", &self.tmp_dir)
            .field("signaller", &self.signaller)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    use jvmtool_core::current_user;
    use tempfile::TempDir;

    use crate::reporter::{ChannelReporter, NullReporter};

    /// Answers probes from a fixed table; unknown pids are gone.
    #[derive(Debug, Default)]
    struct TableSignaller {
        table: HashMap<u32, Result<Liveness, i32>>,
    }

    impl Signaller for TableSignaller {
        fn probe(&self, pid: u32) -> io::Result<Liveness> {
            match self.table.get(&pid) {
                Some(Ok(liveness)) => Ok(*liveness),
                Some(Err(code)) => Err(io::Error::from_raw_os_error(*code)),
                None => Ok(Liveness::Gone),
            }
        }

        fn request_attach(&self, _pid: u32) -> io::Result<()> {
            Ok(())
        }
    }

    fn locator_with(temp: &TempDir, table: HashMap<u32, Result<Liveness, i32>>) -> ProcessLocator {
        ProcessLocator::new(temp.path())
            .with_signaller(Arc::new(TableSignaller { table }))
            .with_reporter(Arc::new(NullReporter))
    }

    fn marker_dir(temp: &TempDir) -> PathBuf {
        let dir = perf_data_dir(temp.path(), &current_user().unwrap());
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let locator = locator_with(&temp, HashMap::new());

        let discovery = locator.scan(None).unwrap();
        assert!(discovery.pids.is_empty());
        assert!(discovery.errors.is_empty());
        assert_eq!(discovery.user, current_user().unwrap());
    }

    #[test]
    fn test_filters_names_and_dead_pids() {
        let temp = TempDir::new().unwrap();
        let dir = marker_dir(&temp);
        for name in ["100", "200", "300", "not-a-pid", "12abc"] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let table = HashMap::from([
            (100, Ok(Liveness::Alive)),
            (200, Ok(Liveness::Restricted)),
            (300, Ok(Liveness::Gone)),
        ]);
        let discovery = locator_with(&temp, table).scan(None).unwrap();

        assert_eq!(discovery.pids, BTreeSet::from([100, 200]));
        assert!(discovery.errors.is_empty());
    }

    #[test]
    fn test_probe_error_recorded_and_scan_continues() {
        let temp = TempDir::new().unwrap();
        let dir = marker_dir(&temp);
        fs::write(dir.join("100"), b"").unwrap();
        fs::write(dir.join("400"), b"").unwrap();

        let table = HashMap::from([(100, Ok(Liveness::Alive)), (400, Err(libc::EINVAL))]);
        let discovery = locator_with(&temp, table).scan(None).unwrap();

        assert_eq!(discovery.pids, BTreeSet::from([100]));
        assert_eq!(discovery.errors.len(), 1);
        assert!(matches!(
            discovery.errors.first(),
            Some(DiscoveryError::Probe { pid: 400, .. })
        ));
    }

    #[test]
    fn test_pid_zero_marker_is_an_error_with_real_signals() {
        let temp = TempDir::new().unwrap();
        let dir = marker_dir(&temp);
        fs::write(dir.join("0"), b"").unwrap();
        fs::write(dir.join(std::process::id().to_string()), b"").unwrap();

        let locator = ProcessLocator::new(temp.path()).with_reporter(Arc::new(NullReporter));
        let discovery = locator.scan(None).unwrap();

        assert_eq!(discovery.pids, BTreeSet::from([std::process::id()]));
        assert!(matches!(
            discovery.errors.first(),
            Some(DiscoveryError::Probe { pid: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_user_is_fatal() {
        let temp = TempDir::new().unwrap();
        let locator = locator_with(&temp, HashMap::new());

        let result = locator.scan(Some("jvmtool-no-such-user-zz"));
        assert!(matches!(
            result,
            Err(LocatorError::User(UserError::UnknownUser { .. }))
        ));
    }

    #[test]
    fn test_owns_checks_marker() {
        let temp = TempDir::new().unwrap();
        let dir = marker_dir(&temp);
        fs::write(dir.join("100"), b"").unwrap();
        let user = current_user().unwrap();

        let locator = locator_with(&temp, HashMap::new());
        assert!(locator.owns(&user, 100));
        assert!(!locator.owns(&user, 101));
    }

    #[test]
    fn test_events_reported() {
        let temp = TempDir::new().unwrap();
        let dir = marker_dir(&temp);
        fs::write(dir.join("100"), b"").unwrap();

        let (reporter, mut rx) = ChannelReporter::new();
        let locator = locator_with(&temp, HashMap::from([(100, Ok(Liveness::Alive))]))
            .with_reporter(Arc::new(reporter));
        locator.scan(None).unwrap();

        assert_eq!(rx.try_recv().unwrap(), AttachEvent::CandidateFound { pid: 100 });
    }

    #[test]
    fn test_describe_self() {
        let temp = TempDir::new().unwrap();
        let locator = locator_with(&temp, HashMap::new());
        let pid = std::process::id();

        let targets = locator.describe("someone", &[pid]);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].pid, pid);
        assert_eq!(targets[0].owning_user, "someone");
        assert!(targets[0].started_at.is_some());
    }

    #[tokio::test]
    async fn test_discover_runs_scan() {
        let temp = TempDir::new().unwrap();
        let dir = marker_dir(&temp);
        fs::write(dir.join("100"), b"").unwrap();

        let locator = locator_with(&temp, HashMap::from([(100, Ok(Liveness::Alive))]));
        let discovery = locator.discover(None).await.unwrap();
        assert_eq!(discovery.pids, BTreeSet::from([100]));
    }
}
