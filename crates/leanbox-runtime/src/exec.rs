//! Workloads exec'd inside an instance.

use std::convert::Infallible;
use std::ffi::CString;

use leanbox_common::constants::{DEFAULT_EXEC_PATH, INSTANCE_ABORT_CODE};
use leanbox_common::error::{LeanboxError, Result};
use leanbox_core::process;

/// A program, its arguments and its environment, ready for `execve(2)`.
///
/// Strings are converted up front so nothing allocates between the fork
/// and the exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    program: CString,
    args: Vec<CString>,
    env: Vec<CString>,
}

impl Workload {
    /// Builds a workload from a command line; the first element is the
    /// program, resolved inside the instance root. The environment holds
    /// only [`DEFAULT_EXEC_PATH`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty or any element contains a
    /// NUL byte.
    pub fn new(command: &[String]) -> Result<Self> {
        let Some(program) = command.first() else {
            return Err(LeanboxError::Config {
                message: "workload command is empty".into(),
            });
        };
        Ok(Self {
            program: c_string(program)?,
            args: command.iter().map(|arg| c_string(arg)).collect::<Result<_>>()?,
            env: vec![c_string(DEFAULT_EXEC_PATH)?],
        })
    }

    /// Adds a `KEY=value` entry to the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or contains `=`, or if either
    /// part contains a NUL byte.
    pub fn with_env(mut self, key: &str, value: &str) -> Result<Self> {
        if key.is_empty() || key.contains('=') {
            return Err(LeanboxError::Config {
                message: format!("invalid environment key: {key:?}"),
            });
        }
        self.env.push(c_string(&format!("{key}={value}"))?);
        Ok(self)
    }

    /// The program path.
    #[must_use]
    pub fn program(&self) -> &CString {
        &self.program
    }

    /// The environment entries.
    #[must_use]
    pub fn env(&self) -> &[CString] {
        &self.env
    }

    /// Replaces the current process image with the workload.
    ///
    /// # Errors
    ///
    /// Only returns, with the `execve(2)` error, if the exec failed.
    pub fn exec(&self) -> Result<Infallible> {
        nix::unistd::execve(&self.program, &self.args, &self.env)
            .map_err(|e| LeanboxError::process("execve", e))
    }

    /// Execs the workload, exiting with [`INSTANCE_ABORT_CODE`] if that
    /// fails. Intended for the instance side of a launch.
    pub fn exec_or_abort(&self) -> ! {
        let Err(e) = self.exec();
        tracing::error!(program = ?self.program, error = %e, "workload exec failed");
        process::exit_immediately(INSTANCE_ABORT_CODE)
    }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| LeanboxError::Config {
        message: format!("NUL byte in workload string: {value:?}"),
    })
}
