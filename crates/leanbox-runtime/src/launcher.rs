//! Forking instances into namespaces and cgroups.
//!
//! [`ContainerLauncher::setup`] returns twice, once in each process, as a
//! tagged [`Launch`]. On the launcher side the instance is already a member
//! of every controller of its template; on the instance side the process is
//! confined to its root and may run its workload.

use std::path::Path;

use leanbox_common::config::LeanboxConfig;
use leanbox_common::constants::INSTANCE_ABORT_CODE;
use leanbox_common::error::{LeanboxError, Result};
use leanbox_common::types::TemplateName;
use leanbox_core::cgroup::ResourceGroupManager;
use leanbox_core::filesystem::chroot;
use leanbox_core::namespace::{self, cache, cache::NamespaceHandle};
use leanbox_core::process;
use leanbox_core::rendezvous::{Channel, Release};
use nix::unistd::{ForkResult, Pid};

pub use leanbox_core::process::become_subreaper;

/// Which side of a launch the current process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// This process is the isolated instance.
    Instance,
    /// This process launched the instance `pid` (a host PID).
    Launcher {
        /// Host PID of the instance.
        pid: Pid,
    },
}

impl Launch {
    /// The instance PID on the launcher side.
    #[must_use]
    pub const fn instance_pid(self) -> Option<Pid> {
        match self {
            Self::Instance => None,
            Self::Launcher { pid } => Some(pid),
        }
    }
}

/// Launches instances of templates.
#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    groups: ResourceGroupManager,
}

impl ContainerLauncher {
    /// Creates a launcher for the configured cgroup hierarchy.
    #[must_use]
    pub fn new(config: &LeanboxConfig) -> Self {
        Self {
            groups: ResourceGroupManager::new(config),
        }
    }

    /// The group manager instances are registered with.
    #[must_use]
    pub const fn groups(&self) -> &ResourceGroupManager {
        &self.groups
    }

    /// Forks an instance of `name` confined to `root`.
    ///
    /// Without a handle the calling process moves into fresh namespaces;
    /// with one it joins the holder's. Either way this happens before the
    /// fork so the instance lands in the target PID namespace, and the
    /// caller stays in the new namespaces afterwards. The instance waits on
    /// a release byte that is only sent once its PID is registered in
    /// every controller.
    ///
    /// Returns [`Launch::Instance`] in the instance, which is by then
    /// chrooted. An instance that cannot enter its root, or whose launcher
    /// fails before releasing it, exits immediately with
    /// [`INSTANCE_ABORT_CODE`].
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be opened, namespaces cannot
    /// be created or joined, the fork fails, or registration fails. In the
    /// last case the instance has already been reaped.
    pub fn setup(
        &self,
        name: &TemplateName,
        root: &Path,
        namespace: Option<&NamespaceHandle>,
    ) -> Result<Launch> {
        let release = Channel::<Release>::open()?;
        match namespace {
            Some(handle) => cache::join(handle)?,
            None => namespace::create_fresh()?,
        }

        match process::fork()? {
            ForkResult::Parent { child } => {
                if let Err(e) = self.groups.register(name, child) {
                    drop(release);
                    let _ = process::reap(child);
                    return Err(e);
                }
                if let Err(e) = release.send(&Release) {
                    let _ = process::reap(child);
                    return Err(e);
                }
                tracing::debug!(%name, pid = %child, "instance registered and released");
                Ok(Launch::Launcher { pid: child })
            }
            ForkResult::Child => {
                let release = release.into_receiver();
                if let Err(e) = chroot::enter_root(root) {
                    tracing::error!(%name, error = %e, "instance cannot enter its root");
                    process::exit_immediately(INSTANCE_ABORT_CODE);
                }
                match release.recv() {
                    Ok(Some(Release)) => Ok(Launch::Instance),
                    Ok(None) => {
                        tracing::error!(%name, "launcher closed the channel without releasing");
                        process::exit_immediately(INSTANCE_ABORT_CODE)
                    }
                    Err(e) => {
                        tracing::error!(%name, error = %e, "instance release failed");
                        process::exit_immediately(INSTANCE_ABORT_CODE)
                    }
                }
            }
        }
    }

    /// Launches through an extra, short-lived process.
    ///
    /// An outer child runs [`Self::setup`], reports the instance PID and
    /// exits, so the namespace changes never touch the caller and, without
    /// a handle, the instance is PID 1 of its own PID namespace. The outer
    /// child is reaped here; the orphaned instance is re-parented to the
    /// nearest subreaper (see [`become_subreaper`]) or init.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel or fork fails,
    /// [`LeanboxError::Rendezvous`] if the outer child exited without
    /// reporting an instance, or [`LeanboxError::InvariantViolation`] if
    /// reaping returned a different PID.
    pub fn setup_double_forked(
        &self,
        name: &TemplateName,
        root: &Path,
        namespace: Option<&NamespaceHandle>,
    ) -> Result<Launch> {
        let report = Channel::<Pid>::open()?;
        match process::fork()? {
            ForkResult::Child => match self.setup(name, root, namespace) {
                Ok(Launch::Instance) => {
                    drop(report);
                    Ok(Launch::Instance)
                }
                Ok(Launch::Launcher { pid }) => {
                    let code = match report.send(&pid) {
                        Ok(()) => 0,
                        Err(e) => {
                            tracing::error!(%name, %pid, error = %e, "cannot report instance");
                            INSTANCE_ABORT_CODE
                        }
                    };
                    process::exit_immediately(code)
                }
                Err(e) => {
                    tracing::error!(%name, error = %e, "launch failed");
                    process::exit_immediately(INSTANCE_ABORT_CODE)
                }
            },
            ForkResult::Parent { child } => {
                let received = report.into_receiver().recv();
                let status = process::reap(child)?;
                let pid = received?.ok_or_else(|| {
                    LeanboxError::rendezvous(format!(
                        "launch of {name} reported no instance ({status:?})"
                    ))
                })?;
                tracing::info!(%name, %pid, root = %root.display(), "instance launched");
                Ok(Launch::Launcher { pid })
            }
        }
    }
}
