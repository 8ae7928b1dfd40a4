//! Root confinement via `chdir(2)` + `chroot(".")`.

use std::path::Path;

use leanbox_common::error::{LeanboxError, Result};
use nix::unistd::{chdir, chroot};

/// Makes `root` the working directory and the filesystem root of the
/// calling process.
///
/// Changing directory first leaves no working directory outside the new
/// root. Requires `CAP_SYS_CHROOT`.
///
/// # Errors
///
/// Returns [`LeanboxError::Io`] if `root` cannot be entered, or
/// [`LeanboxError::Process`] if `chroot(2)` fails.
pub fn enter_root(root: &Path) -> Result<()> {
    chdir(root).map_err(|e| LeanboxError::Io {
        path: root.to_path_buf(),
        source: e.into(),
    })?;
    chroot(".").map_err(|e| LeanboxError::process("chroot", e))?;
    tracing::debug!(root = %root.display(), "root entered");
    Ok(())
}
