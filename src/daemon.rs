//! Detaching from the controlling terminal. Must run before the async
//! runtime or any other thread exists, since only the forking thread
//! survives a `fork`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[cfg(unix)]
    #[error("{step} failed: {source}")]
    Sys {
        step: &'static str,
        source: nix::Error,
    },
    #[cfg(unix)]
    #[error("failed to open /dev/null: {0}")]
    DevNull(#[from] std::io::Error),
    #[cfg(not(unix))]
    #[error("daemon mode is only supported on unix")]
    Unsupported,
}

#[cfg(unix)]
fn sys<T>(step: &'static str, result: nix::Result<T>) -> Result<T, DaemonError> {
    result.map_err(|source| DaemonError::Sys { step, source })
}

#[cfg(unix)]
fn fork_and_exit_parent() -> Result<(), DaemonError> {
    use nix::unistd::{fork, ForkResult};

    // SAFETY: called while the process is still single-threaded.
    match sys("fork", unsafe { fork() })? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => Ok(()),
    }
}

#[cfg(unix)]
fn redirect_stdio() -> Result<(), DaemonError> {
    use nix::unistd::dup2;
    use std::os::fd::AsRawFd;

    let null = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for fd in 0..=2 {
        sys("dup2", dup2(null.as_raw_fd(), fd))?;
    }
    Ok(())
}

/// Double fork with a new session in between, then reset umask, cwd and
/// stdio. Only the grandchild returns.
#[cfg(unix)]
pub fn daemonize() -> Result<(), DaemonError> {
    use nix::sys::signal::{signal, SigHandler, Signal};
    use nix::sys::stat::{umask, Mode};
    use nix::unistd::{chdir, setsid};

    fork_and_exit_parent()?;
    sys("setsid", setsid())?;
    // SAFETY: installs SIG_IGN, no handler code runs.
    sys("signal(SIGHUP)", unsafe {
        signal(Signal::SIGHUP, SigHandler::SigIgn)
    })?;
    fork_and_exit_parent()?;

    umask(Mode::empty());
    sys("chdir", chdir("/"))?;
    redirect_stdio()
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<(), DaemonError> {
    Err(DaemonError::Unsupported)
}
