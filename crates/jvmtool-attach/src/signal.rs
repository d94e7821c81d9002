//! Signalling target processes.
//!
//! The attach flow needs exactly two signals: signal 0 to probe whether a
//! pid is alive, and `SIGQUIT` to ask a HotSpot VM to start its attach
//! listener. Both go through the [`Signaller`] trait so tests can observe
//! the calls without touching real processes.

use std::fmt;
use std::io;

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists and accepts our signals
    Alive,
    /// The process exists but belongs to another privilege domain (`EPERM`)
    Restricted,
    /// No such process (`ESRCH`)
    Gone,
}

impl Liveness {
    /// Returns true unless the process is gone.
    pub fn exists(self) -> bool {
        !matches!(self, Liveness::Gone)
    }
}

/// Delivers signals to target processes.
pub trait Signaller: Send + Sync + fmt::Debug {
    /// Probes a pid with signal 0.
    fn probe(&self, pid: u32) -> io::Result<Liveness>;

    /// Asks the target VM to open its attach listener (`SIGQUIT`).
    fn request_attach(&self, pid: u32) -> io::Result<()>;
}

/// Signaller backed by `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignaller;

impl Signaller for OsSignaller {
    fn probe(&self, pid: u32) -> io::Result<Liveness> {
        match send(pid, 0) {
            Ok(()) => Ok(Liveness::Alive),
            Err(e) => match e.raw_os_error() {
                Some(libc::ESRCH) => Ok(Liveness::Gone),
                Some(libc::EPERM) => Ok(Liveness::Restricted),
                _ => Err(e),
            },
        }
    }

    fn request_attach(&self, pid: u32) -> io::Result<()> {
        send(pid, libc::SIGQUIT)
    }
}

/// Sends `signal` to a single process.
///
/// Pid 0 and values that do not fit a positive `pid_t` would address a
/// process group or every process, so they are rejected.
fn send(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let target = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("pid {pid} does not name a single process"),
            )
        })?;

    // SAFETY: kill has no memory-safety preconditions; target is positive.
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
