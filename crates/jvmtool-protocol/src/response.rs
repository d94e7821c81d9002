//! Attach response parsing.
//!
//! Targets answer with up to two meaningful fields: an enqueue status and,
//! when the request was accepted, a command result. Depending on the JDK
//! the fields are NUL-delimited or newline-delimited, and the result may be
//! a bare code (`100`) or prefixed (`return code: 100`):
//!
//! ```text
//! 0\0 0\0                     NUL framing
//! 0\nreturn code: 100\n       line framing
//! 0\n-1\nsome message\n       raw message from the target
//! ```

use tracing::trace;

use crate::error::{AgentLoadError, ProtocolError};

/// Prefix newer targets put in front of the command result.
pub const RETURN_CODE_PREFIX: &str = "return code: ";

/// How the response fields were delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Fields separated by NUL bytes
    NulDelimited,
    /// Fields separated by newlines
    LineBased,
}

/// Outcome of the command once the target accepted the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// The agent loaded
    Success,
    /// The target reported a load failure
    Failed(AgentLoadError),
}

/// A parsed attach response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachResponse {
    framing: Framing,
    enqueue_status: String,
    command_result: Option<String>,
    detail: Vec<String>,
}

impl AttachResponse {
    /// Tokenizes a complete response payload.
    ///
    /// Fails only when there is no field at all; interpretation of the
    /// fields happens in [`AttachResponse::outcome`].
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let (framing, fields) = tokenize(raw);
        trace!(?framing, fields = fields.len(), "Tokenized attach response");

        let mut fields = fields.into_iter();
        let enqueue_status = fields.next().ok_or(ProtocolError::EmptyResponse)?;
        let command_result = fields.next();
        let detail = fields.collect();

        Ok(Self {
            framing,
            enqueue_status,
            command_result,
            detail,
        })
    }

    /// Returns the delimiter convention the payload used.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Returns the raw enqueue status field.
    pub fn enqueue_status(&self) -> &str {
        &self.enqueue_status
    }

    /// Returns the raw command result field, if present.
    pub fn command_result(&self) -> Option<&str> {
        self.command_result.as_deref()
    }

    /// Returns true if the target accepted and processed the request.
    pub fn is_enqueued(&self) -> bool {
        self.enqueue_status.parse::<i64>() == Ok(0)
    }

    /// Interprets the response.
    ///
    /// An enqueue failure is reported as `ProtocolError::Rejected` without
    /// looking at the command result.
    pub fn outcome(&self) -> Result<CommandResult, ProtocolError> {
        if !self.is_enqueued() {
            return Err(ProtocolError::Rejected {
                status: self.enqueue_status.clone(),
            });
        }

        let field = self
            .command_result
            .as_deref()
            .ok_or(ProtocolError::MissingResult)?;

        let code = result_code(field).ok_or_else(|| ProtocolError::Malformed {
            field: field.to_string(),
        })?;

        match code {
            "0" => Ok(CommandResult::Success),
            "100" => Ok(CommandResult::Failed(AgentLoadError::NotFound)),
            "101" => Ok(CommandResult::Failed(AgentLoadError::ClassPath)),
            "102" => Ok(CommandResult::Failed(AgentLoadError::EntryPoint)),
            other if other.starts_with('-') || other.parse::<i64>().is_ok() => {
                Ok(CommandResult::Failed(AgentLoadError::Remote {
                    message: self.remote_message(field),
                }))
            }
            _ => Err(ProtocolError::Malformed {
                field: field.to_string(),
            }),
        }
    }

    fn remote_message(&self, field: &str) -> String {
        std::iter::once(field)
            .chain(self.detail.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extracts the code from a command result field.
///
/// Accepts `return code: <code>` or a bare token starting with a digit or
/// `-`. Anything else has no code.
fn result_code(field: &str) -> Option<&str> {
    if let Some(rest) = field.strip_prefix(RETURN_CODE_PREFIX) {
        let rest = rest.trim();
        return rest.parse::<i64>().is_ok().then_some(rest);
    }
    let first = field.chars().next()?;
    (first == '-' || first.is_ascii_digit()).then_some(field)
}

/// Splits the payload into non-empty, trimmed fields.
///
/// NUL framing wins when it yields at least two fields; otherwise the
/// payload is read line by line, with any NULs treated as line breaks.
fn tokenize(raw: &[u8]) -> (Framing, Vec<String>) {
    let text = String::from_utf8_lossy(raw);

    let nul_fields = split_fields(&text, '\0');
    if nul_fields.len() >= 2 {
        return (Framing::NulDelimited, nul_fields);
    }

    let line_fields = split_fields(&text.replace('\0', "\n"), '\n');
    if line_fields.len() > nul_fields.len() || !text.contains('\0') {
        (Framing::LineBased, line_fields)
    } else {
        (Framing::NulDelimited, nul_fields)
    }
}

fn split_fields(text: &str, delimiter: char) -> Vec<String> {
    text.split(delimiter)
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}
