//! jvmtool attach - dynamic attach to running HotSpot JVMs
//!
//! This crate provides the attach machinery:
//! - `locator` - finds live JVMs from perf-data markers
//! - `session` - the signal-and-wait handshake and the load exchange
//! - `validator` - proves an agent library is an authentic build
//! - `attacher` - the validated attach sequence
//! - `analysis` - serviceability analysis with the bundled agent
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Attacher                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  ┌──────────────────┐  ┌────────────┐  │
//! │  │ ProcessLocator  │  │ AgentLibrary     │  │ Attach     │  │
//! │  │ (hsperfdata)    │  │ Validator        │─▶│ Session    │  │
//! │  └────────┬────────┘  └────────┬─────────┘  └─────┬──────┘  │
//! │           │                    │ Validated        │         │
//! │           │ probe              │ Library          │ socket  │
//! │           ▼                    ▼                  ▼         │
//! │  ┌─────────────────┐  ┌──────────────────┐  ┌────────────┐  │
//! │  │   Signaller     │  │ MetadataExtractor│  │ target JVM │  │
//! │  └─────────────────┘  └──────────────────┘  └────────────┘  │
//! │                                                             │
//! │        every component reports through Arc<dyn Reporter>    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Temporary files are cleaned up by guards, not by happy-path code

pub mod analysis;
pub mod attacher;
pub mod locator;
pub mod reporter;
pub mod session;
pub mod signal;
pub mod validator;

pub use analysis::{AnalysisError, AnalysisKind, AnalysisOptions, AnalysisRun};
pub use attacher::{AttachError, AttachReport, AttachTarget, Attacher};
pub use locator::{Discovery, DiscoveryError, LocatorError, ProcessLocator};
pub use reporter::{AttachEvent, ChannelReporter, NullReporter, Reporter, TracingReporter};
pub use session::{AttachSession, HandshakeError, HandshakeOutcome, LoadError, SessionState};
pub use signal::{Liveness, OsSignaller, Signaller};
pub use validator::{AgentLibraryValidator, BuildIdentity, ValidatedLibrary, ValidationError};
