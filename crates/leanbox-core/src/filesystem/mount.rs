//! The procfs view mounted inside an instance root.

use std::fs;
use std::path::{Path, PathBuf};

use leanbox_common::error::{LeanboxError, Result};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};

/// Directory under an instance root where procfs is mounted.
pub const PROC_VIEW_DIR: &str = "proc";

/// Mount point of the procfs view for `root`.
#[must_use]
pub fn proc_view_path(root: &Path) -> PathBuf {
    root.join(PROC_VIEW_DIR)
}

/// Mounts a fresh procfs at `<root>/proc`, creating the directory if needed.
///
/// The view reflects the PID namespace of the calling process, so it is
/// mounted by the first process of that namespace.
///
/// # Errors
///
/// Returns [`LeanboxError::Io`] if the mount point cannot be created or the
/// mount fails.
pub fn mount_proc_view(root: &Path) -> Result<PathBuf> {
    let target = proc_view_path(root);
    fs::create_dir_all(&target).map_err(|e| LeanboxError::Io {
        path: target.clone(),
        source: e,
    })?;
    mount(
        Some("proc"),
        &target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| LeanboxError::Io {
        path: target.clone(),
        source: e.into(),
    })?;
    tracing::debug!(target = %target.display(), "procfs view mounted");
    Ok(target)
}

/// Lazily detaches the procfs view at `target`.
///
/// Returns `false` if there was nothing to detach: the target is not a
/// mount point in the caller's mount namespace (`EINVAL`) or its directory
/// is gone (`ENOENT`).
///
/// # Errors
///
/// Returns [`LeanboxError::Io`] for any other `umount2(2)` failure.
pub fn unmount_proc_view(target: &Path) -> Result<bool> {
    match umount2(target, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(target = %target.display(), "procfs view unmounted");
            Ok(true)
        }
        Err(Errno::EINVAL | Errno::ENOENT) => Ok(false),
        Err(e) => Err(LeanboxError::Io {
            path: target.to_path_buf(),
            source: e.into(),
        }),
    }
}
