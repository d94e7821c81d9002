//! jvmtool protocol - the HotSpot attach wire format
//!
//! This crate provides the request encoder and the response tokenizer
//! used over a target JVM's `.java_pid<PID>` control socket:
//! - `request` - NUL-terminated token sequences sent to the target
//! - `response` - tolerant parsing of the enqueue status and command result
//! - `error` - protocol-level and agent-load failures

pub mod error;
pub mod request;
pub mod response;
pub mod version;

pub use error::{AgentLoadError, ProtocolError};
pub use request::{AttachRequest, INSTRUMENT_MODULE, LOAD_COMMAND, LOAD_FLAG, MAX_ARGUMENTS};
pub use response::{AttachResponse, CommandResult, Framing};
pub use version::ProtocolVersion;
