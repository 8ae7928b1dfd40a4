//! Process-control wrappers: fork, immediate exit, reaping, signalling.
//!
//! Every forked branch in the workspace goes through [`fork`] and leaves
//! through [`exit_immediately`], so the unsafe surface lives here.

use leanbox_common::error::{LeanboxError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid};

/// Forks the calling process.
///
/// The child starts with a single thread. If the caller is multithreaded,
/// locks held by other threads (including the allocator's) stay locked in
/// the child, so leanbox drives its launches from single-threaded callers.
///
/// # Errors
///
/// Returns an error if `fork(2)` fails.
pub fn fork() -> Result<ForkResult> {
    // SAFETY: the child branches in this workspace only touch state they
    // own (pipes, paths, cgroup files) before exec'ing or calling
    // `exit_immediately`, and launches are driven from single-threaded
    // processes.
    unsafe { nix::unistd::fork() }.map_err(|e| LeanboxError::process("fork", e))
}

/// Terminates the calling process without running destructors, atexit
/// handlers, or flushing stdio buffers shared with the parent.
pub fn exit_immediately(code: i32) -> ! {
    // SAFETY: `_exit(2)` is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}

/// Blocks until `pid` changes state and checks the kernel reaped the
/// expected process.
///
/// # Errors
///
/// Returns an error if `waitpid(2)` fails, or
/// [`LeanboxError::InvariantViolation`] if another PID was reaped.
pub fn reap(pid: Pid) -> Result<WaitStatus> {
    let status = loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => {}
            other => break other.map_err(|e| LeanboxError::process("waitpid", e))?,
        }
    };
    if status.pid() != Some(pid) {
        return Err(LeanboxError::InvariantViolation {
            message: format!("waited for {pid}, reaped {:?}", status.pid()),
        });
    }
    Ok(status)
}

/// Sends `SIGKILL` to `pid`; a process that is already gone is not an error.
///
/// # Errors
///
/// Returns an error if `kill(2)` fails for any reason other than `ESRCH`.
pub fn force_kill(pid: Pid) -> Result<()> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            tracing::debug!(%pid, "process already gone");
            Ok(())
        }
        Err(e) => Err(LeanboxError::process("kill", e)),
    }
}

/// Returns `true` while `pid` exists (including as a zombie).
///
/// # Errors
///
/// Returns an error if probing fails for a reason other than `ESRCH`.
pub fn is_alive(pid: Pid) -> Result<bool> {
    match kill(pid, None) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(LeanboxError::process("kill", e)),
    }
}

/// Marks the calling process as child subreaper, so orphaned descendants
/// (such as double-forked instances) are reparented to it instead of init.
///
/// # Errors
///
/// Returns an error if `prctl(PR_SET_CHILD_SUBREAPER)` fails.
pub fn become_subreaper() -> Result<()> {
    nix::sys::prctl::set_child_subreaper(true).map_err(|e| LeanboxError::process("prctl", e))?;
    tracing::debug!("registered as child subreaper");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(nix::unistd::getpid()).expect("self is visible"));
    }

    #[test]
    fn reaping_a_non_child_fails() {
        let err = reap(Pid::from_raw(1)).unwrap_err();
        assert!(matches!(err, LeanboxError::Process { op: "waitpid", .. }));
    }

    #[test]
    fn killing_a_missing_process_is_tolerated() {
        // PIDs are capped well below i32::MAX on Linux.
        assert!(force_kill(Pid::from_raw(i32::MAX - 1)).is_ok());
    }
}
