//! Cached namespace sets kept alive by parked holder processes.
//!
//! Creating namespaces is the slowest step of a launch. [`acquire`] pays it
//! once: an intermediate process unshares UTS, PID, IPC and mount
//! namespaces and forks a holder, which becomes PID 1 of the new PID
//! namespace and parks until killed. Launches then [`join`] the holder's
//! namespaces, and [`release`] tears the set down.
//!
//! Handles are not reference-counted; the caller must know that no
//! instance still uses a handle before releasing it.

use std::path::{Path, PathBuf};

use leanbox_common::constants::INSTANCE_ABORT_CODE;
use leanbox_common::error::{LeanboxError, Result};
use nix::errno::Errno;
use nix::unistd::{ForkResult, Pid};

use crate::filesystem::mount::{mount_proc_view, proc_view_path, unmount_proc_view};
use crate::process;
use crate::rendezvous::{Channel, Release};

/// Sentinel reported by the intermediate when no holder could be started.
const HOLDER_FAILED: Pid = Pid::from_raw(-1);

/// A live holder process and the procfs view it mounted, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    holder: Pid,
    proc_view: Option<PathBuf>,
}

impl NamespaceHandle {
    /// Wraps a holder started elsewhere, for example by another leanbox
    /// process. The handle carries no procfs view.
    #[must_use]
    pub const fn from_holder(holder: Pid) -> Self {
        Self {
            holder,
            proc_view: None,
        }
    }

    /// Host PID of the holder process.
    #[must_use]
    pub const fn holder(&self) -> Pid {
        self.holder
    }

    /// Mount point of the holder's procfs view.
    #[must_use]
    pub fn proc_view(&self) -> Option<&Path> {
        self.proc_view.as_deref()
    }
}

/// Starts a holder in fresh namespaces and returns its handle.
///
/// When `root` is given, the holder mounts a procfs view of its PID
/// namespace at `<root>/proc` before reporting ready. The intermediate is
/// reaped before this returns; the holder is re-parented to the nearest
/// subreaper (see [`process::become_subreaper`]) or init.
///
/// # Errors
///
/// Returns an error if the channel or fork fails, or
/// [`LeanboxError::Rendezvous`] if the intermediate or holder failed to
/// start the namespace set.
pub fn acquire(root: Option<&Path>) -> Result<NamespaceHandle> {
    let report = Channel::<Pid>::open()?;
    match process::fork()? {
        ForkResult::Child => {
            let code = match run_intermediate(report, root) {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!(error = %e, "namespace intermediate failed");
                    INSTANCE_ABORT_CODE
                }
            };
            process::exit_immediately(code)
        }
        ForkResult::Parent { child } => {
            let received = report.into_receiver().recv();
            let status = process::reap(child)?;
            let holder = received?.ok_or_else(|| {
                LeanboxError::rendezvous(format!(
                    "namespace intermediate exited without reporting a holder ({status:?})"
                ))
            })?;
            if holder.as_raw() <= 0 {
                return Err(LeanboxError::rendezvous(format!(
                    "namespace holder failed to start ({status:?})"
                )));
            }
            let handle = NamespaceHandle {
                holder,
                proc_view: root.map(proc_view_path),
            };
            tracing::info!(%holder, proc_view = ?handle.proc_view, "namespace acquired");
            Ok(handle)
        }
    }
}

/// Body of the intermediate: unshare, fork the holder, report its PID.
fn run_intermediate(report: Channel<Pid>, root: Option<&Path>) -> Result<()> {
    let prepared = super::create_fresh().and_then(|()| Channel::<Release>::open());
    let ready = match prepared {
        Ok(ready) => ready,
        Err(e) => {
            report.send(&HOLDER_FAILED)?;
            return Err(e);
        }
    };

    match process::fork() {
        Ok(ForkResult::Child) => {
            drop(report);
            park_holder(ready, root)
        }
        Ok(ForkResult::Parent { child }) => {
            let outcome = ready.into_receiver().recv();
            let reported = if matches!(outcome, Ok(Some(Release))) {
                child
            } else {
                HOLDER_FAILED
            };
            report.send(&reported)?;
            match outcome {
                Ok(Some(Release)) => Ok(()),
                Ok(None) => {
                    let _ = process::reap(child);
                    Err(LeanboxError::rendezvous(
                        "namespace holder exited before signalling ready",
                    ))
                }
                Err(e) => {
                    let _ = process::force_kill(child);
                    let _ = process::reap(child);
                    Err(e)
                }
            }
        }
        Err(e) => {
            report.send(&HOLDER_FAILED)?;
            Err(e)
        }
    }
}

/// Body of the holder: mount the view, signal ready, park until killed.
fn park_holder(ready: Channel<Release>, root: Option<&Path>) -> ! {
    if let Some(root) = root {
        if let Err(e) = mount_proc_view(root) {
            tracing::error!(error = %e, "holder cannot mount procfs view");
            process::exit_immediately(INSTANCE_ABORT_CODE);
        }
    }
    if let Err(e) = ready.send(&Release) {
        tracing::error!(error = %e, "holder cannot signal ready");
        process::exit_immediately(INSTANCE_ABORT_CODE);
    }
    loop {
        nix::unistd::pause();
    }
}

/// Moves the calling process into the holder's namespaces.
///
/// Children forked afterwards start in the holder's PID namespace.
///
/// # Errors
///
/// Returns [`LeanboxError::NamespaceJoin`] if the holder is gone or a
/// namespace cannot be entered.
pub fn join(handle: &NamespaceHandle) -> Result<()> {
    super::enter(handle.holder)
}

/// Unmounts the handle's procfs view and kills its holder.
///
/// The holder mounts the view in its own mount namespace, so the caller
/// only sees it when the root sits on a shared mount that propagates back.
/// A recorded view that is not mounted in the caller's namespace is logged
/// and left to vanish with the holder's namespace.
///
/// A holder that already exited is not an error. The holder is reaped when
/// the caller is its parent (which is the case for a subreaper).
///
/// # Errors
///
/// Returns an error if the view cannot be unmounted, the holder cannot be
/// signalled, or reaping fails for a reason other than `ECHILD`.
pub fn release(handle: NamespaceHandle) -> Result<()> {
    if let Some(view) = &handle.proc_view {
        if !unmount_proc_view(view)? {
            tracing::warn!(
                view = %view.display(),
                "procfs view not mounted in this namespace, leaving it to the holder"
            );
        }
    }
    let holder = handle.holder;
    if !process::is_alive(holder)? {
        tracing::warn!(%holder, "namespace holder already gone");
    }
    process::force_kill(holder)?;
    match process::reap(holder) {
        Ok(status) => tracing::debug!(%holder, ?status, "namespace holder reaped"),
        Err(LeanboxError::Process { source, .. })
            if source.raw_os_error() == Some(Errno::ECHILD as i32) =>
        {
            tracing::debug!(%holder, "namespace holder is not our child");
        }
        Err(e) => return Err(e),
    }
    tracing::info!(%holder, "namespace released");
    Ok(())
}
