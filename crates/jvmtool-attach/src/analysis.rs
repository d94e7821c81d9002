//! Serviceability analysis with the bundled native agent.
//!
//! The agent ships next to the binary as `<prefix>/lib/jvmtool-agent.<ext>`.
//! It is attached with `analysis=<kind>,duration=<secs>[,output=<path>]`
//! and, when no output path is given, writes `jvmtool_sa_<pid>*.log` files
//! into the temp directory. Each line carries a `[timestamp] ` prefix that
//! is stripped when the files are collected.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use jvmtool_core::TargetProcess;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::attacher::{AttachError, AttachReport, AttachTarget, Attacher};

/// Default analysis duration.
pub const DEFAULT_DURATION_SECS: u64 = 30;

/// File stem of the bundled agent library.
pub const AGENT_LIBRARY_STEM: &str = "jvmtool-agent";

/// Prefix of the agent's temporary result files.
pub const OUTPUT_FILE_PREFIX: &str = "jvmtool_sa_";

/// Extra time given to the agent to flush its results.
pub const RESULT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid analysis type: {kind}")]
    UnknownKind { kind: String },

    #[error("failed to get executable path: {0}")]
    Executable(#[source] io::Error),

    #[error("failed to read analysis output in {dir}: {source}")]
    Collect {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("process snapshot task failed: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Attach(#[from] AttachError),
}

/// What the agent should look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisKind {
    Memory,
    Thread,
    Class,
    Heap,
    #[default]
    All,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Memory,
        AnalysisKind::Thread,
        AnalysisKind::Class,
        AnalysisKind::Heap,
        AnalysisKind::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Thread => "thread",
            Self::Class => "class",
            Self::Heap => "heap",
            Self::All => "all",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AnalysisError::UnknownKind {
                kind: s.to_string(),
            })
    }
}

/// Parameters of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub kind: AnalysisKind,
    pub duration: Duration,
    pub output: Option<PathBuf>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            kind: AnalysisKind::All,
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            output: None,
        }
    }
}

impl AnalysisOptions {
    /// Agent parameter string.
    pub fn params(&self) -> String {
        let mut params = format!(
            "analysis={},duration={}",
            self.kind,
            self.duration.as_secs()
        );
        if let Some(output) = &self.output {
            params.push_str(&format!(",output={}", output.display()));
        }
        params
    }

    /// How long to wait before collecting temp-file results.
    ///
    /// `None` when the agent writes to an explicit output file instead.
    pub fn result_wait(&self) -> Option<Duration> {
        match self.output {
            Some(_) => None,
            None => Some(self.duration + RESULT_GRACE),
        }
    }
}

/// File name of the agent library for this platform.
pub fn agent_library_name() -> String {
    format!("{AGENT_LIBRARY_STEM}.{}", std::env::consts::DLL_EXTENSION)
}

/// Locates the agent relative to the running executable.
pub fn locate_native_agent() -> Result<PathBuf, AnalysisError> {
    let exe = std::env::current_exe().map_err(AnalysisError::Executable)?;
    Ok(native_agent_for(&exe))
}

/// `<exe_dir>/../lib/<agent>`, with the `..` resolved lexically.
pub fn native_agent_for(exe: &Path) -> PathBuf {
    let exe_dir = exe.parent().unwrap_or(Path::new("."));
    let prefix = match exe_dir.parent() {
        Some(prefix) => prefix.to_path_buf(),
        None => exe_dir.join(".."),
    };
    prefix.join("lib").join(agent_library_name())
}

/// An analysis the agent is running.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub report: AttachReport,
    /// The target as it was right after the attach
    pub target: TargetProcess,
}

impl AnalysisRun {
    /// Returns true if the target exited or its pid was reused since the
    /// attach. Takes a process table snapshot.
    pub fn target_replaced(&self) -> bool {
        self.target.is_stale()
    }
}

/// Attaches the bundled agent to `pid` with `options`.
pub async fn start_analysis(
    attacher: &Attacher,
    pid: u32,
    user: Option<&str>,
    options: &AnalysisOptions,
) -> Result<AnalysisRun, AnalysisError> {
    let agent = locate_native_agent()?;
    info!(
        pid,
        analysis = %options.kind,
        duration_secs = options.duration.as_secs(),
        agent = %agent.display(),
        "Starting SA analysis"
    );

    let mut target = AttachTarget::new(pid, agent).params(options.params());
    target.user = user.map(str::to_string);
    let report = attacher.attach(&target).await?;

    let locator = attacher.locator().clone();
    let owner = report.user.clone();
    let target = tokio::task::spawn_blocking(move || {
        locator.describe(&owner, std::iter::once(&pid)).pop()
    })
    .await
    .map_err(|e| AnalysisError::Snapshot(e.to_string()))?
    .unwrap_or_else(|| TargetProcess::new(pid, report.user.clone()));

    Ok(AnalysisRun { report, target })
}

/// One collected result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutput {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

/// Reads and removes the agent's temp-file results for `pid`.
///
/// Files are returned in name order. A file that cannot be read is skipped.
/// This performs blocking I/O and should be called via `spawn_blocking`.
pub fn collect_output(tmp_dir: &Path, pid: u32) -> Result<Vec<AnalysisOutput>, AnalysisError> {
    let stem = format!("{OUTPUT_FILE_PREFIX}{pid}");
    let entries = std::fs::read_dir(tmp_dir).map_err(|source| AnalysisError::Collect {
        dir: tmp_dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| is_output_file(name, &stem))
        })
        .collect();
    paths.sort();

    let mut outputs = Vec::with_capacity(paths.len());
    for path in paths {
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let lines = text.lines().map(|l| strip_timestamp(l).to_string()).collect();
                outputs.push(AnalysisOutput {
                    path: path.clone(),
                    lines,
                });
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error reading analysis output");
                continue;
            }
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Failed to remove analysis output");
        }
    }

    debug!(pid, files = outputs.len(), "Collected analysis output");
    Ok(outputs)
}

/// Matches `<stem>*.log` where the wildcard does not continue the pid.
fn is_output_file(name: &str, stem: &str) -> bool {
    name.strip_prefix(stem)
        .and_then(|rest| rest.strip_suffix(".log"))
        .is_some_and(|middle| !middle.starts_with(|c: char| c.is_ascii_digit()))
}

/// Removes the agent's `[timestamp] ` line prefix.
fn strip_timestamp(line: &str) -> &str {
    if line.len() > 21 && line.starts_with('[') {
        if let Some(rest) = line
            .find("] ")
            .filter(|idx| *idx < 25)
            .and_then(|idx| line.get(idx + 2..))
        {
            return rest;
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_kinds() {
        assert_eq!("memory".parse::<AnalysisKind>().unwrap(), AnalysisKind::Memory);
        assert_eq!("all".parse::<AnalysisKind>().unwrap(), AnalysisKind::All);
        assert!(matches!(
            "cpu".parse::<AnalysisKind>(),
            Err(AnalysisError::UnknownKind { .. })
        ));
        assert!("Memory".parse::<AnalysisKind>().is_err());
    }

    #[test]
    fn test_params_without_output() {
        let options = AnalysisOptions {
            kind: AnalysisKind::Heap,
            duration: Duration::from_secs(10),
            output: None,
        };
        assert_eq!(options.params(), "analysis=heap,duration=10");
        assert_eq!(options.result_wait(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_params_with_output() {
        let options = AnalysisOptions {
            output: Some(PathBuf::from("/var/tmp/report.txt")),
            ..AnalysisOptions::default()
        };
        assert_eq!(
            options.params(),
            "analysis=all,duration=30,output=/var/tmp/report.txt"
        );
        assert_eq!(options.result_wait(), None);
    }

    #[test]
    fn test_native_agent_location() {
        let agent = native_agent_for(Path::new("/opt/jvmtool/bin/jvmtool"));
        assert_eq!(
            agent,
            Path::new("/opt/jvmtool/lib").join(agent_library_name())
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_agent_library_name_linux() {
        assert_eq!(agent_library_name(), "jvmtool-agent.so");
    }

    #[test]
    fn test_strip_timestamp() {
        assert_eq!(
            strip_timestamp("[2025-01-01 12:00:00.123] Heap used: 12MB"),
            "Heap used: 12MB"
        );
        assert_eq!(strip_timestamp("[short] x"), "[short] x");
        let plain = "no timestamp on this line at all";
        assert_eq!(strip_timestamp(plain), plain);
    }

    #[test]
    fn test_output_file_matching() {
        assert!(is_output_file("jvmtool_sa_123.log", "jvmtool_sa_123"));
        assert!(is_output_file("jvmtool_sa_123_memory.log", "jvmtool_sa_123"));
        assert!(!is_output_file("jvmtool_sa_1234.log", "jvmtool_sa_123"));
        assert!(!is_output_file("jvmtool_sa_123.txt", "jvmtool_sa_123"));
    }

    #[test]
    fn test_collect_output_reads_and_removes() {
        let temp = TempDir::new().unwrap();
        let ours = temp.path().join("jvmtool_sa_42_a.log");
        let other = temp.path().join("jvmtool_sa_420.log");
        fs::write(&ours, "[2025-01-01 12:00:00.123] Threads: 12\nplain\n").unwrap();
        fs::write(&other, "not ours\n").unwrap();

        let outputs = collect_output(temp.path(), 42).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].lines, vec!["Threads: 12", "plain"]);
        assert!(!ours.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_collect_output_missing_dir() {
        let result = collect_output(Path::new("/nonexistent/jvmtool"), 1);
        assert!(matches!(result, Err(AnalysisError::Collect { .. })));
    }
}
