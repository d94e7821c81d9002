//! jvmtool - list running JVMs and load agents into them
//!
//! # Usage
//!
//! ```text
//! jvmtool jps                                  # JVMs of the current user
//! jvmtool jps --user alice --json
//! jvmtool jattach --pid 12345 --agentpath /opt/agent/libagent.so
//! jvmtool sa --pid 12345 --analysis heap --duration 10
//! jvmtool verify --agentpath /opt/agent/libagent.so
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use jvmtool_attach::analysis::{self, AnalysisKind, AnalysisOptions, DEFAULT_DURATION_SECS};
use jvmtool_attach::{AgentLibraryValidator, AttachTarget, Attacher, ProcessLocator};
use jvmtool_core::{AttachConfig, TargetProcess};

// ============================================================================
// CLI Arguments
// ============================================================================

/// jvmtool - HotSpot dynamic attach from the command line
#[derive(Parser, Debug)]
#[command(name = "jvmtool", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to <config_dir>/jvmtool/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List Java processes for the current or specified user
    Jps {
        /// Owning user (defaults to the current user)
        #[arg(long)]
        user: Option<String>,

        /// Print JSON instead of "pid command" lines
        #[arg(long)]
        json: bool,
    },
    /// Load an agent library into a running JVM
    Jattach {
        #[arg(long)]
        pid: u32,

        #[arg(long)]
        user: Option<String>,

        /// Path of the agent library
        #[arg(long)]
        agentpath: PathBuf,

        /// Options passed to the agent
        #[arg(long)]
        agentparams: Option<String>,
    },
    /// Run a serviceability analysis with the bundled agent
    Sa {
        #[arg(long)]
        pid: u32,

        #[arg(long)]
        user: Option<String>,

        /// memory, thread, class, heap or all
        #[arg(long, default_value_t = AnalysisKind::All)]
        analysis: AnalysisKind,

        /// Analysis duration in seconds
        #[arg(long, default_value_t = DEFAULT_DURATION_SECS)]
        duration: u64,

        /// Write results to this file instead of printing them
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check that an agent library was built for this jvmtool
    Verify {
        #[arg(long)]
        agentpath: PathBuf,
    },
}

// ============================================================================
// Logging
// ============================================================================

fn init_logging(log_file: Option<&Path>, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut filter = EnvFilter::from_default_env();
    for target in ["jvmtool", "jvmtool_attach", "jvmtool_core", "jvmtool_protocol"] {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }

    match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Cancels `token` on Ctrl-C.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

// ============================================================================
// Commands
// ============================================================================

async fn jps(config: &AttachConfig, user: Option<&str>, json: bool) -> Result<()> {
    let locator = ProcessLocator::new(config.tmp_dir.clone());
    let discovery = locator.discover(user).await?;
    for error in &discovery.errors {
        warn!(error = %error, "Skipped entry");
    }

    let user = discovery.user.clone();
    let targets = tokio::task::spawn_blocking(move || {
        locator.describe(&discovery.user, &discovery.pids)
    })
    .await
    .context("Process table snapshot failed")?;

    println!("{}", render_targets(&targets, &user, json)?);
    Ok(())
}

/// Formats `jps` output. No candidates is an error.
fn render_targets(targets: &[TargetProcess], user: &str, json: bool) -> Result<String> {
    if targets.is_empty() {
        bail!("No Java processes found for user {user}");
    }
    if json {
        return Ok(serde_json::to_string_pretty(targets)?);
    }
    Ok(targets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n"))
}

async fn jattach(
    attacher: &Attacher,
    pid: u32,
    user: Option<String>,
    agentpath: PathBuf,
    agentparams: Option<String>,
) -> Result<()> {
    let mut target = AttachTarget::new(pid, agentpath);
    target.user = user;
    target.params = agentparams;

    let report = attacher.attach(&target).await?;
    println!(
        "Agent {} loaded into {}",
        report.library.path().display(),
        report.pid
    );
    Ok(())
}

async fn sa(
    attacher: &Attacher,
    cancel: &CancellationToken,
    pid: u32,
    user: Option<&str>,
    options: AnalysisOptions,
) -> Result<()> {
    let run = analysis::start_analysis(attacher, pid, user, &options).await?;

    let Some(wait) = options.result_wait() else {
        if let Some(output) = &options.output {
            println!(
                "Analysis running for {}s, results go to {}",
                options.duration.as_secs(),
                output.display()
            );
        }
        return Ok(());
    };

    info!(wait_secs = wait.as_secs(), "Waiting for analysis results");
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = cancel.cancelled() => bail!("Interrupted while waiting for analysis results"),
    }

    let recheck = run.clone();
    if tokio::task::spawn_blocking(move || recheck.target_replaced())
        .await
        .context("Process table snapshot failed")?
    {
        warn!(pid, "Target exited or its pid was reused during the analysis");
    }

    let tmp_dir = attacher.config().tmp_dir.clone();
    let outputs = tokio::task::spawn_blocking(move || analysis::collect_output(&tmp_dir, pid))
        .await
        .context("Result collection task failed")??;

    if outputs.is_empty() {
        warn!(pid, "No analysis output found");
        return Ok(());
    }

    println!("Analysis Results:");
    for output in outputs {
        debug!(path = %output.path.display(), lines = output.lines.len(), "Printing output");
        for line in output.lines {
            println!("{line}");
        }
    }
    Ok(())
}

fn verify(validator: &AgentLibraryValidator, agentpath: &Path) -> Result<()> {
    let library = validator.validate(agentpath)?;
    println!(
        "{}: OK (checksum {:#010x}, built for {})",
        library.path().display(),
        library.checksum(),
        validator.identity()
    );
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref(), args.verbose)?;

    let config = AttachConfig::resolve(args.config.as_deref()).context("Failed to load config")?;
    debug!(?config, "Effective config");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    let attacher = Attacher::new(config.clone()).with_cancellation(cancel.clone());

    match args.command {
        Command::Jps { user, json } => jps(&config, user.as_deref(), json).await,
        Command::Jattach {
            pid,
            user,
            agentpath,
            agentparams,
        } => jattach(&attacher, pid, user, agentpath, agentparams).await,
        Command::Sa {
            pid,
            user,
            analysis,
            duration,
            output,
        } => {
            let options = AnalysisOptions {
                kind: analysis,
                duration: Duration::from_secs(duration),
                output,
            };
            sa(&attacher, &cancel, pid, user.as_deref(), options).await
        }
        Command::Verify { agentpath } => verify(attacher.validator(), &agentpath),
    }
}
