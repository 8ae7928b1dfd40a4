//! Memory ceilings via the memory controller.

use std::path::Path;

use leanbox_common::constants::{BYTES_PER_MIB, MEMORY_LIMIT};
use leanbox_common::error::{LeanboxError, Result};

use super::{Controller, write_control};

/// Sets the hard memory limit of a group, in MiB.
///
/// # Errors
///
/// Returns an error if the byte count overflows or writing
/// `memory.limit_in_bytes` fails.
pub fn set_limit_mb(group: &Path, memory_mb: u64) -> Result<()> {
    let bytes = memory_mb
        .checked_mul(BYTES_PER_MIB)
        .ok_or_else(|| LeanboxError::Config {
            message: format!("memory ceiling of {memory_mb} MiB overflows"),
        })?;
    set_limit_bytes(group, bytes)
}

/// Sets the hard memory limit of a group, in bytes.
///
/// The kernel reclaims and then OOM-kills members that exceed it.
///
/// # Errors
///
/// Returns an error if writing `memory.limit_in_bytes` fails.
pub fn set_limit_bytes(group: &Path, bytes: u64) -> Result<()> {
    write_control(Controller::Memory, &group.join(MEMORY_LIMIT), &bytes.to_string())?;
    tracing::debug!(group = %group.display(), bytes, "memory limit set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mib_are_converted_to_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_limit_mb(dir.path(), 2).expect("set");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(MEMORY_LIMIT)).unwrap(),
            "2097152"
        );
    }

    #[test]
    fn overflowing_ceiling_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(set_limit_mb(dir.path(), u64::MAX).is_err());
        assert!(!dir.path().join(MEMORY_LIMIT).exists());
    }
}
