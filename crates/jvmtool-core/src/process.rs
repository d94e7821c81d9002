//! Discovered JVM processes.

use std::ffi::OsStr;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tracing::debug;

/// A running process that is a candidate attach target.
///
/// Identity is `pid` + `owning_user`. A pid can be recycled by the OS at
/// any time, so a `TargetProcess` held across a wait must be re-checked
/// with [`TargetProcess::is_stale`] before it is acted upon. The attach
/// path itself re-checks a bare pid with a liveness probe and the
/// perf-data marker instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProcess {
    /// Process ID
    pub pid: u32,

    /// Account whose perf-data directory listed this process
    pub owning_user: String,

    /// Full command line, when the process table exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,

    /// Process start time, used to detect pid reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl TargetProcess {
    /// Creates a bare target with no process-table details.
    pub fn new(pid: u32, owning_user: impl Into<String>) -> Self {
        Self {
            pid,
            owning_user: owning_user.into(),
            command_line: None,
            started_at: None,
        }
    }

    /// Builds a target from a process table snapshot.
    ///
    /// Missing processes yield a bare target; the caller decides whether
    /// that matters.
    pub fn from_snapshot(system: &System, pid: u32, owning_user: impl Into<String>) -> Self {
        let mut target = Self::new(pid, owning_user);
        if let Some(process) = system.process(Pid::from_u32(pid)) {
            let args: Vec<String> = process.cmd().iter().map(lossy).collect();
            if !args.is_empty() {
                target.command_line = Some(args.join(" "));
            }
            target.started_at = start_time_to_utc(process.start_time());
        } else {
            debug!(pid, "Process not present in snapshot");
        }
        target
    }

    /// Returns true if the process is gone or the pid now names a
    /// different process.
    ///
    /// When no start time was recorded, only existence is checked.
    pub fn is_stale(&self) -> bool {
        let system = process_snapshot();
        let Some(process) = system.process(Pid::from_u32(self.pid)) else {
            debug!(pid = self.pid, "is_stale: process NOT FOUND");
            return true;
        };

        match self.started_at {
            Some(expected) => {
                let current = start_time_to_utc(process.start_time());
                let stale = current != Some(expected);
                if stale {
                    debug!(
                        pid = self.pid,
                        expected = %expected,
                        current = ?current,
                        "is_stale: start time MISMATCH - pid reused?"
                    );
                }
                stale
            }
            None => false,
        }
    }
}

impl fmt::Display for TargetProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command_line {
            Some(cmd) => write!(f, "{} {}", self.pid, cmd),
            None => write!(f, "{}", self.pid),
        }
    }
}

/// Takes a process table snapshot including command lines.
pub fn process_snapshot() -> System {
    System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::everything()))
}

fn lossy<S: AsRef<OsStr>>(arg: &S) -> String {
    arg.as_ref().to_string_lossy().into_owned()
}

fn start_time_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_command_line() {
        let mut target = TargetProcess::new(42, "alice");
        target.command_line = Some("java -jar app.jar".to_string());
        assert_eq!(target.to_string(), "42 java -jar app.jar");
    }

    #[test]
    fn test_display_without_command_line() {
        assert_eq!(TargetProcess::new(7, "bob").to_string(), "7");
    }

    #[test]
    fn test_snapshot_of_current_process() {
        let pid = std::process::id();
        let system = process_snapshot();
        let target = TargetProcess::from_snapshot(&system, pid, "me");
        assert_eq!(target.pid, pid);
        assert!(target.command_line.is_some());
        assert!(!target.is_stale());
    }

    #[test]
    fn test_missing_process_is_stale() {
        let target = TargetProcess::new(999_999_999, "me");
        assert!(target.is_stale());
    }

    #[test]
    fn test_start_time_mismatch_is_stale() {
        let pid = std::process::id();
        let mut target = TargetProcess::new(pid, "me");
        target.started_at = DateTime::from_timestamp(1, 0);
        assert!(target.is_stale());
    }

    #[test]
    fn test_serialize_skips_missing_fields() {
        let json = serde_json::to_string(&TargetProcess::new(1, "root")).unwrap();
        assert_eq!(json, r#"{"pid":1,"owning_user":"root"}"#);
    }
}
