//! Linux namespace management for instance isolation.
//!
//! Instances are isolated in four namespaces: UTS, PID, IPC and mount.
//! They are either created fresh with `unshare(2)` or entered from a cached
//! holder process with `setns(2)` (see [`cache`]).

pub mod cache;

use std::fmt;
use std::fs::File;
use std::path::PathBuf;

use leanbox_common::error::{LeanboxError, Result};
use nix::sched::{CloneFlags, setns, unshare};
use nix::unistd::Pid;

/// A namespace kind leanbox isolates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Hostname and domain name.
    Uts,
    /// Process IDs.
    Pid,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Mount table.
    Mount,
}

impl NamespaceKind {
    /// The order in which a holder's namespaces are joined.
    ///
    /// The mount namespace comes last: once it is entered, `/proc` may no
    /// longer show the holder's reference files.
    pub const JOIN_ORDER: [Self; 4] = [Self::Uts, Self::Pid, Self::Ipc, Self::Mount];

    /// File name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Uts => "uts",
            Self::Pid => "pid",
            Self::Ipc => "ipc",
            Self::Mount => "mnt",
        }
    }

    /// The `CLONE_NEW*` flag selecting this namespace.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Mount => CloneFlags::CLONE_NEWNS,
        }
    }

    /// Reference file of this namespace for process `pid`.
    #[must_use]
    pub fn proc_path(self, pid: Pid) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/{}", self.proc_name()))
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Flags for every namespace kind leanbox isolates.
#[must_use]
pub fn isolation_flags() -> CloneFlags {
    NamespaceKind::JOIN_ORDER
        .iter()
        .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
}

/// Moves the calling process into fresh UTS, IPC and mount namespaces and
/// makes its next child the first process of a fresh PID namespace.
///
/// Must be called from a single-threaded process.
///
/// # Errors
///
/// Returns an error if `unshare(2)` fails, typically for lack of
/// `CAP_SYS_ADMIN`.
pub fn create_fresh() -> Result<()> {
    unshare(isolation_flags()).map_err(|e| LeanboxError::process("unshare", e))?;
    tracing::debug!("fresh namespaces created");
    Ok(())
}

/// Joins every namespace of `holder` in [`NamespaceKind::JOIN_ORDER`].
///
/// All reference files are opened before the first `setns(2)`, so entering
/// the mount namespace cannot hide a file still to be opened. Like
/// [`create_fresh`], the PID namespace only applies to children forked
/// afterwards.
///
/// # Errors
///
/// Returns [`LeanboxError::NamespaceJoin`] naming the kind and file that
/// could not be opened or joined.
pub fn enter(holder: Pid) -> Result<()> {
    let files = NamespaceKind::JOIN_ORDER
        .iter()
        .map(|&kind| {
            let path = kind.proc_path(holder);
            File::open(&path)
                .map(|file| (kind, file))
                .map_err(|e| join_error(holder, kind, path, e))
        })
        .collect::<Result<Vec<_>>>()?;

    for (kind, file) in &files {
        setns(file, kind.clone_flag())
            .map_err(|e| join_error(holder, *kind, kind.proc_path(holder), e.into()))?;
        tracing::trace!(%holder, %kind, "namespace joined");
    }
    tracing::debug!(%holder, "holder namespaces joined");
    Ok(())
}

fn join_error(holder: Pid, kind: NamespaceKind, path: PathBuf, source: std::io::Error) -> LeanboxError {
    LeanboxError::NamespaceJoin {
        holder: holder.as_raw(),
        kind: kind.proc_name(),
        path,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_order_ends_with_mount() {
        let names: Vec<_> = NamespaceKind::JOIN_ORDER.iter().map(|k| k.proc_name()).collect();
        assert_eq!(names, ["uts", "pid", "ipc", "mnt"]);
    }

    #[test]
    fn proc_path_points_into_procfs() {
        let path = NamespaceKind::Mount.proc_path(Pid::from_raw(42));
        assert_eq!(path, PathBuf::from("/proc/42/ns/mnt"));
    }

    #[test]
    fn isolation_flags_cover_all_kinds() {
        let flags = isolation_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWNS));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn entering_missing_holder_names_first_kind() {
        let err = enter(Pid::from_raw(i32::MAX - 1)).unwrap_err();
        match err {
            LeanboxError::NamespaceJoin { kind, path, .. } => {
                assert_eq!(kind, "uts");
                assert!(path.ends_with("ns/uts"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
