//! Attach configuration.
//!
//! Resolution order: built-in defaults, then a TOML file, then the
//! environment. Every field is optional in the file.
//!
//! ```toml
//! tmp_dir = "/tmp"
//! wait_budget_secs = 9
//! poll_interval_ms = 1000
//! response_timeout_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Environment variable overriding the temp directory.
pub const CONFIG_ENV_TMPDIR: &str = "JVMTOOL_TMPDIR";

/// Default handshake wait budget. The socket is polled until the elapsed
/// time exceeds this, so the wall-clock worst case is one poll longer.
pub const DEFAULT_WAIT_BUDGET_SECS: u64 = 9;

/// Default interval between control socket polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Configuration shared by discovery and attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    /// Directory holding the control sockets, trigger files and perf-data.
    pub tmp_dir: PathBuf,

    /// How long to wait for the control socket after signalling.
    pub wait_budget_secs: u64,

    /// How often to check for the control socket.
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for the load response; `None` waits until
    /// the target closes the connection or the attempt is cancelled.
    pub response_timeout_secs: Option<u64>,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir(),
            wait_budget_secs: DEFAULT_WAIT_BUDGET_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            response_timeout_secs: None,
        }
    }
}

impl AttachConfig {
    /// Creates a default config rooted at a specific temp directory.
    pub fn with_tmp_dir(tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            ..Self::default()
        }
    }

    /// Parses a config from TOML text.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Resolves the effective config.
    ///
    /// An explicit path must exist. Without one, the per-user file
    /// (`<config_dir>/jvmtool/config.toml`) is used when present.
    /// `JVMTOOL_TMPDIR` is applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    debug!(path = %path.display(), "Loading user config");
                    Self::load(&path)?
                }
                None => Self::default(),
            },
        };

        if let Some(tmp_dir) = std::env::var_os(CONFIG_ENV_TMPDIR) {
            if !tmp_dir.is_empty() {
                config.tmp_dir = PathBuf::from(tmp_dir);
            }
        }

        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.tmp_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tmp_dir".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the handshake wait budget.
    pub fn wait_budget(&self) -> Duration {
        Duration::from_secs(self.wait_budget_secs)
    }

    /// Returns the socket poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the response timeout, if any.
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_secs.map(Duration::from_secs)
    }
}

/// Returns `<config_dir>/jvmtool/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("jvmtool").join("config.toml"))
}
