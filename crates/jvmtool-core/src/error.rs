//! Error types for user resolution and configuration loading.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving an OS account. All of them are fatal.
#[derive(Error, Debug)]
pub enum UserError {
    /// No account with this name exists
    #[error("user does not exist: {name}")]
    UnknownUser { name: String },

    /// The name cannot be passed to the OS (embedded NUL byte)
    #[error("invalid user name: {name:?}")]
    InvalidName { name: String },

    /// The account database could not be queried
    #[error("failed to look up user {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The effective uid has no account entry
    #[error("current user check failed (uid {uid})")]
    NoCurrentUser { uid: u32 },
}

/// Result type for user resolution.
pub type UserResult<T> = Result<T, UserError>;

/// Errors raised while loading `AttachConfig` from disk.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for `AttachConfig`
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value parsed but is out of range
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_display() {
        let error = UserError::UnknownUser {
            name: "nobody-here".to_string(),
        };
        assert_eq!(error.to_string(), "user does not exist: nobody-here");
    }

    #[test]
    fn test_lookup_error_keeps_source() {
        let error = UserError::Lookup {
            name: "alice".to_string(),
            source: io::Error::from_raw_os_error(libc::EIO),
        };
        assert!(std::error::Error::source(&error).is_some());
        assert!(error.to_string().contains("alice"));
    }

    #[test]
    fn test_invalid_value_display() {
        let error = ConfigError::InvalidValue {
            field: "poll_interval_ms".to_string(),
            reason: "must be greater than zero".to_string(),
        };
        let display = error.to_string();
        assert!(display.contains("poll_interval_ms"));
        assert!(display.contains("greater than zero"));
    }
}
