//! Protocol and agent-load error types.
//!
//! A `ProtocolError` means the exchange itself failed and nothing is known
//! about the agent. An `AgentLoadError` means the target processed the
//! request and reported that the load failed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of the attach exchange itself.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The control socket could not be connected
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The request could not be written
    #[error("failed to write attach request: {source}")]
    Write {
        #[source]
        source: io::Error,
    },

    /// The response could not be read
    #[error("failed to read attach response: {source}")]
    Read {
        #[source]
        source: io::Error,
    },

    /// A request token contains the NUL delimiter
    #[error("request token contains a NUL byte: {token:?}")]
    InvalidToken { token: String },

    /// More arguments than the target accepts
    #[error("too many arguments: {count} (at most {max})")]
    TooManyArguments { count: usize, max: usize },

    /// The response exceeded the read limit
    #[error("attach response exceeds {limit} bytes")]
    ResponseTooLarge { limit: u64 },

    /// The target closed the connection without sending anything
    #[error("target VM did not respond")]
    EmptyResponse,

    /// The target refused or could not enqueue the request
    #[error("target rejected the request, enqueue status: {status}")]
    Rejected { status: String },

    /// The request was enqueued but no command result followed
    #[error("response carries no command result")]
    MissingResult,

    /// The command result is not a recognizable code or message
    #[error("malformed command result: {field:?}")]
    Malformed { field: String },
}

/// Load failures reported by the target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentLoadError {
    /// Code 100
    #[error("agent load failed, code 100: agent not found or manifest has no Agent-Class attribute")]
    NotFound,

    /// Code 101
    #[error("agent load failed, code 101: unable to add agent to the system class path")]
    ClassPath,

    /// Code 102
    #[error("agent load failed, code 102: no agentmain method or agentmain failed")]
    EntryPoint,

    /// Any other code or message, surfaced verbatim
    #[error("agent load failed: {message}")]
    Remote { message: String },
}

impl AgentLoadError {
    /// Returns the numeric code for the classified variants.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::NotFound => Some(100),
            Self::ClassPath => Some(101),
            Self::EntryPoint => Some(102),
            Self::Remote { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_load_codes() {
        assert_eq!(AgentLoadError::NotFound.code(), Some(100));
        assert_eq!(AgentLoadError::ClassPath.code(), Some(101));
        assert_eq!(AgentLoadError::EntryPoint.code(), Some(102));
        let remote = AgentLoadError::Remote {
            message: "-1".to_string(),
        };
        assert_eq!(remote.code(), None);
    }

    #[test]
    fn test_rejected_display() {
        let error = ProtocolError::Rejected {
            status: "1".to_string(),
        };
        assert!(error.to_string().contains("enqueue status: 1"));
    }

    #[test]
    fn test_remote_message_is_verbatim() {
        let error = AgentLoadError::Remote {
            message: "java.lang.IllegalStateException: boom".to_string(),
        };
        assert!(error.to_string().ends_with("java.lang.IllegalStateException: boom"));
    }
}
