//! Attach request encoding.
//!
//! A request is a sequence of tokens, each terminated by a NUL byte:
//!
//! ```text
//! 1\0load\0instrument\0false\0/path/to/agent.jar=opts\0
//! ```

use crate::error::ProtocolError;
use crate::version::ProtocolVersion;

/// Command that loads an agent library.
pub const LOAD_COMMAND: &str = "load";

/// Module the `load` command is addressed to.
pub const INSTRUMENT_MODULE: &str = "instrument";

/// Second `load` argument, an opaque protocol constant sent unchanged.
pub const LOAD_FLAG: &str = "false";

/// Most arguments a target reads per request.
pub const MAX_ARGUMENTS: usize = 3;

const DELIMITER: u8 = 0;

/// One request to the attach listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    version: ProtocolVersion,
    command: String,
    arguments: Vec<String>,
}

impl AttachRequest {
    /// Creates a request, checking the argument count and token contents.
    pub fn new(
        command: impl Into<String>,
        arguments: Vec<String>,
    ) -> Result<Self, ProtocolError> {
        if arguments.len() > MAX_ARGUMENTS {
            return Err(ProtocolError::TooManyArguments {
                count: arguments.len(),
                max: MAX_ARGUMENTS,
            });
        }

        let command = command.into();
        for token in std::iter::once(&command).chain(arguments.iter()) {
            if token.as_bytes().contains(&DELIMITER) {
                return Err(ProtocolError::InvalidToken {
                    token: token.clone(),
                });
            }
        }

        Ok(Self {
            version: ProtocolVersion::CURRENT,
            command,
            arguments,
        })
    }

    /// Builds the `load instrument false <library>[=<params>]` request.
    ///
    /// An empty parameter string is treated as absent.
    pub fn load_agent(library: &str, params: Option<&str>) -> Result<Self, ProtocolError> {
        let target = match params {
            Some(params) if !params.is_empty() => format!("{library}={params}"),
            _ => library.to_string(),
        };
        Self::new(
            LOAD_COMMAND,
            vec![INSTRUMENT_MODULE.to_string(), LOAD_FLAG.to_string(), target],
        )
    }

    /// Returns the protocol version.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Returns the command name.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the arguments.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Encodes the request into the single buffer written to the socket.
    pub fn encode(&self) -> Vec<u8> {
        let version = self.version.to_string();
        let mut buf = Vec::new();
        for token in std::iter::once(version.as_str())
            .chain(std::iter::once(self.command.as_str()))
            .chain(self.arguments.iter().map(String::as_str))
        {
            buf.extend_from_slice(token.as_bytes());
            buf.push(DELIMITER);
        }
        buf
    }
}
