//! jvmtool core - shared value types for attaching to running JVMs
//!
//! This crate provides the types shared between the attach machinery
//! (`jvmtool-attach`) and the command-line front end:
//! - `TargetProcess` - a discovered JVM and its identity
//! - `AttachChannelPaths` - the pid-derived socket and trigger paths
//! - `user` - OS account resolution
//! - `AttachConfig` - timing and filesystem configuration
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod paths;
pub mod process;
pub mod user;

// Re-exports for convenience
pub use config::{default_config_path, AttachConfig, CONFIG_ENV_TMPDIR};
pub use error::{ConfigError, UserError, UserResult};
pub use paths::{perf_data_dir, perf_data_marker, AttachChannelPaths};
pub use process::{process_snapshot, TargetProcess};
pub use user::{current_user, resolve_user, user_exists};
