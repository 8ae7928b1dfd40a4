//! Pausing and resuming templates through the freezer controller.
//!
//! Freezing is asynchronous: after `FROZEN` is written the kernel reports
//! `FREEZING` until every member is stopped, so callers that need a stable
//! state use [`PauseController::await_state`].

use std::path::PathBuf;

use leanbox_common::config::{LeanboxConfig, PollPolicy};
use leanbox_common::constants::FREEZER_STATE;
use leanbox_common::error::{LeanboxError, Result};
use leanbox_common::types::{RunState, TemplateName};

use super::{Controller, ResourceGroupManager, read_control, write_control};

/// Reads and writes `freezer.state` for templates.
#[derive(Debug, Clone)]
pub struct PauseController {
    groups: ResourceGroupManager,
    poll: PollPolicy,
}

impl PauseController {
    /// Creates a controller for the configured hierarchy and poll budget.
    #[must_use]
    pub fn new(config: &LeanboxConfig) -> Self {
        Self {
            groups: ResourceGroupManager::new(config),
            poll: config.freezer_poll,
        }
    }

    fn state_file(&self, name: &TemplateName) -> PathBuf {
        self.groups
            .template_dir(Controller::Freezer, name)
            .join(FREEZER_STATE)
    }

    /// Suspends every member of the template.
    ///
    /// Pausing a template with no members succeeds; the state belongs to the
    /// group, not to its occupants.
    ///
    /// # Errors
    ///
    /// Returns an error if `freezer.state` cannot be written in full.
    pub fn pause(&self, name: &TemplateName) -> Result<()> {
        self.request(name, RunState::Paused)
    }

    /// Resumes every member of the template.
    ///
    /// # Errors
    ///
    /// Returns an error if `freezer.state` cannot be written in full.
    pub fn unpause(&self, name: &TemplateName) -> Result<()> {
        self.request(name, RunState::Running)
    }

    fn request(&self, name: &TemplateName, target: RunState) -> Result<()> {
        let token = target
            .freezer_token()
            .ok_or_else(|| LeanboxError::InvariantViolation {
                message: format!("{target} cannot be requested from the freezer"),
            })?;
        write_control(Controller::Freezer, &self.state_file(name), token)?;
        tracing::debug!(%name, state = %target, "freezer state requested");
        Ok(())
    }

    /// Reads the template's current state.
    ///
    /// An unrecognised token is reported as [`RunState::Error`].
    ///
    /// # Errors
    ///
    /// Returns an error if `freezer.state` cannot be read.
    pub fn try_state(&self, name: &TemplateName) -> Result<RunState> {
        let token = read_control(Controller::Freezer, &self.state_file(name))?;
        Ok(RunState::from_freezer(&token))
    }

    /// Reads the template's current state, folding read failures into
    /// [`RunState::Error`].
    #[must_use]
    pub fn state(&self, name: &TemplateName) -> RunState {
        self.try_state(name).unwrap_or_else(|e| {
            tracing::warn!(%name, error = %e, "cannot read freezer state");
            RunState::Error
        })
    }

    /// Polls with the configured budget until the template reaches
    /// `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`LeanboxError::StateMismatch`] with the last observed state
    /// if the budget runs out.
    pub fn await_state(&self, name: &TemplateName, expected: RunState) -> Result<()> {
        self.await_state_with(name, expected, self.poll)
    }

    /// Polls with an explicit budget until the template reaches `expected`.
    ///
    /// Unreadable state counts as [`RunState::Error`]; the last read failure
    /// is logged once if the budget runs out.
    ///
    /// # Errors
    ///
    /// Returns [`LeanboxError::StateMismatch`] with the last observed state
    /// if the budget runs out.
    pub fn await_state_with(
        &self,
        name: &TemplateName,
        expected: RunState,
        policy: PollPolicy,
    ) -> Result<()> {
        let mut observed = RunState::Error;
        let mut last_failure = None;
        for attempt in 1..=policy.attempts {
            observed = match self.try_state(name) {
                Ok(state) => state,
                Err(e) => {
                    last_failure = Some(e);
                    RunState::Error
                }
            };
            if observed == expected {
                tracing::debug!(%name, state = %expected, attempt, "freezer state reached");
                return Ok(());
            }
            if attempt < policy.attempts {
                std::thread::sleep(policy.interval());
            }
        }
        if let Some(e) = last_failure {
            tracing::warn!(%name, error = %e, "cannot read freezer state");
        }
        Err(LeanboxError::StateMismatch {
            name: name.to_string(),
            expected,
            observed,
        })
    }
}
