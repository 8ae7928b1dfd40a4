//! Unified error type for the leanbox workspace.
//!
//! Variants are grouped by where the failure originates: on-disk cgroup and
//! namespace state, process control (fork, setns, chroot), the rendezvous
//! channels between launcher and instance, and freezer state checks.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RunState;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum LeanboxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Creating, writing or removing a cgroup file failed.
    #[error("cgroup {controller} error at {path}: {source}")]
    Cgroup {
        /// Controller hierarchy the path belongs to.
        controller: &'static str,
        /// Directory or control file involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A control file accepted fewer bytes than were written.
    #[error("short write to {path}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Control file that was written.
        path: PathBuf,
        /// Bytes accepted by the kernel.
        written: usize,
        /// Bytes that should have been accepted.
        expected: usize,
    },

    /// A process-control system call failed.
    #[error("{op} failed: {source}")]
    Process {
        /// Name of the failing operation (`fork`, `unshare`, `chroot`, ...).
        op: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Entering a cached namespace failed.
    #[error("cannot join {kind} namespace of holder {holder} via {path}: {source}")]
    NamespaceJoin {
        /// PID of the namespace holder process.
        holder: i32,
        /// Namespace kind (`uts`, `pid`, `ipc`, `mnt`).
        kind: &'static str,
        /// Namespace reference file.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A rendezvous channel could not be set up or was closed early.
    #[error("rendezvous failed: {message}")]
    Rendezvous {
        /// Description of the rendezvous failure.
        message: String,
    },

    /// The freezer did not reach the expected state.
    #[error("template {name} expected {expected}, observed {observed}")]
    StateMismatch {
        /// Template whose freezer was polled.
        name: String,
        /// State the caller waited for.
        expected: RunState,
        /// Last state observed.
        observed: RunState,
    },

    /// An internal invariant was broken; indicates a logic error.
    #[error("invariant violated: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl LeanboxError {
    /// Builds a [`LeanboxError::Process`] from any error convertible into
    /// [`std::io::Error`], such as `nix::Errno`.
    pub fn process(op: &'static str, source: impl Into<std::io::Error>) -> Self {
        Self::Process {
            op,
            source: source.into(),
        }
    }

    /// Builds a [`LeanboxError::Rendezvous`] from a message.
    pub fn rendezvous(message: impl Into<String>) -> Self {
        Self::Rendezvous {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LeanboxError>;
