//! Filesystem layout of the HotSpot attach mechanism.
//!
//! Everything lives directly under the system temp directory:
//!
//! ```text
//! <tmp>/.java_pid<PID>          control socket opened by the JVM
//! <tmp>/.attach_pid<PID>        trigger marker created by the attacher
//! <tmp>/hsperfdata_<user>/<PID> perf-data marker, used for discovery only
//! ```

use std::path::{Path, PathBuf};

/// Prefix of the control socket file name.
pub const SOCKET_FILE_PREFIX: &str = ".java_pid";

/// Prefix of the trigger marker file name.
pub const TRIGGER_FILE_PREFIX: &str = ".attach_pid";

/// Prefix of the per-user perf-data directory name.
pub const PERF_DATA_DIR_PREFIX: &str = "hsperfdata_";

/// The pair of paths used to attach to one process.
///
/// A pure function of the pid and the temp directory, so paths for
/// different pids never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachChannelPaths {
    pid: u32,
    socket: PathBuf,
    trigger: PathBuf,
}

impl AttachChannelPaths {
    /// Derives the paths for `pid` under `tmp_dir`.
    pub fn new(pid: u32, tmp_dir: impl AsRef<Path>) -> Self {
        let tmp_dir = tmp_dir.as_ref();
        Self {
            pid,
            socket: tmp_dir.join(format!("{SOCKET_FILE_PREFIX}{pid}")),
            trigger: tmp_dir.join(format!("{TRIGGER_FILE_PREFIX}{pid}")),
        }
    }

    /// Returns the target pid.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the control socket path.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Returns the trigger marker path.
    pub fn trigger(&self) -> &Path {
        &self.trigger
    }
}

/// Returns the perf-data directory for `user` (`<tmp>/hsperfdata_<user>`).
pub fn perf_data_dir(tmp_dir: impl AsRef<Path>, user: &str) -> PathBuf {
    tmp_dir.as_ref().join(format!("{PERF_DATA_DIR_PREFIX}{user}"))
}

/// Returns the perf-data marker for one process of `user`.
pub fn perf_data_marker(tmp_dir: impl AsRef<Path>, user: &str, pid: u32) -> PathBuf {
    perf_data_dir(tmp_dir, user).join(pid.to_string())
}
