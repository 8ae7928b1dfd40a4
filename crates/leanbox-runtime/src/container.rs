//! Launcher-side handle to a running instance.

use leanbox_common::error::Result;
use leanbox_common::types::{RunState, TemplateName};
use leanbox_core::cgroup::freezer::PauseController;
use leanbox_core::process;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// An instance of a template, seen from the process that launched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInstance {
    template: TemplateName,
    pid: Pid,
}

impl ContainerInstance {
    /// Wraps the host PID returned by a launch.
    #[must_use]
    pub const fn new(template: TemplateName, pid: Pid) -> Self {
        Self { template, pid }
    }

    /// Template the instance belongs to.
    #[must_use]
    pub const fn template(&self) -> &TemplateName {
        &self.template
    }

    /// Host PID of the instance.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Freezer state of the instance's template.
    #[must_use]
    pub fn state(&self, freezer: &PauseController) -> RunState {
        freezer.state(&self.template)
    }

    /// Freezes the template and waits until it is fully paused.
    ///
    /// Pausing acts on the whole template, so sibling instances stop too.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer cannot be written or does not report
    /// [`RunState::Paused`] within its poll budget.
    pub fn pause(&self, freezer: &PauseController) -> Result<()> {
        freezer.pause(&self.template)?;
        freezer.await_state(&self.template, RunState::Paused)
    }

    /// Thaws the template and waits until it is running again.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer cannot be written or does not report
    /// [`RunState::Running`] within its poll budget.
    pub fn resume(&self, freezer: &PauseController) -> Result<()> {
        freezer.unpause(&self.template)?;
        freezer.await_state(&self.template, RunState::Running)
    }

    /// Sends `SIGKILL`; an instance that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    pub fn kill(&self) -> Result<()> {
        process::force_kill(self.pid)
    }

    /// Blocks until the instance exits and reaps it.
    ///
    /// The caller must be the instance's parent, which after a double fork
    /// means a subreaper.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(&self) -> Result<WaitStatus> {
        let status = process::reap(self.pid)?;
        tracing::debug!(template = %self.template, pid = %self.pid, ?status, "instance reaped");
        Ok(status)
    }
}

/// Whether a reaped instance exited on its own with status 0.
#[must_use]
pub const fn exited_cleanly(status: &WaitStatus) -> bool {
    matches!(status, WaitStatus::Exited(_, 0))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use leanbox_common::config::{LeanboxConfig, PollPolicy};
    use leanbox_core::cgroup::{Controller, ResourceGroupManager};
    use nix::sys::signal::Signal;

    use super::*;

    #[test]
    fn pause_and_resume_drive_the_template_freezer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LeanboxConfig {
            cgroup_root: dir.path().to_path_buf(),
            freezer_poll: PollPolicy::new(2, Duration::from_millis(1)),
            ..LeanboxConfig::default()
        };
        let name = TemplateName::new("t1").expect("name");
        let groups = ResourceGroupManager::new(&config);
        fs::create_dir_all(groups.template_dir(Controller::Freezer, &name)).expect("group");
        let freezer = PauseController::new(&config);
        let instance = ContainerInstance::new(name, nix::unistd::getpid());

        instance.pause(&freezer).expect("pause");
        assert_eq!(instance.state(&freezer), RunState::Paused);
        instance.resume(&freezer).expect("resume");
        assert_eq!(instance.state(&freezer), RunState::Running);
    }

    #[test]
    fn killing_a_gone_instance_is_tolerated() {
        let name = TemplateName::new("t1").expect("name");
        let instance = ContainerInstance::new(name, Pid::from_raw(i32::MAX - 1));
        instance.kill().expect("kill");
        assert!(instance.wait().is_err());
    }

    #[test]
    fn clean_exit_requires_status_zero() {
        let pid = Pid::from_raw(5);
        assert!(exited_cleanly(&WaitStatus::Exited(pid, 0)));
        assert!(!exited_cleanly(&WaitStatus::Exited(pid, 125)));
        assert!(!exited_cleanly(&WaitStatus::Signaled(pid, Signal::SIGKILL, false)));
    }
}
