//! CPU and memory-node placement via the cpuset controller.
//!
//! In cgroup v1 a cpuset group accepts no tasks until both `cpuset.cpus`
//! and `cpuset.mems` are populated, so an unlimited range is written as a
//! copy of the parent's value rather than left empty.

use std::io::ErrorKind;
use std::path::Path;

use leanbox_common::constants::{CPUSET_CPUS, CPUSET_MEMS};
use leanbox_common::error::{LeanboxError, Result};
use leanbox_common::types::ResourceRange;

use super::{Controller, write_control};

/// Restricts the group at `group` to the given CPUs.
///
/// # Errors
///
/// Returns an error if `cpuset.cpus` cannot be written.
pub fn set_cpus(parent: &Path, group: &Path, cpus: ResourceRange) -> Result<()> {
    write_range(parent, group, CPUSET_CPUS, cpus)
}

/// Restricts the group at `group` to the given NUMA nodes.
///
/// # Errors
///
/// Returns an error if `cpuset.mems` cannot be written.
pub fn set_mems(parent: &Path, group: &Path, mems: ResourceRange) -> Result<()> {
    write_range(parent, group, CPUSET_MEMS, mems)
}

/// Writes both cpuset files of a template group.
pub(crate) fn apply(
    parent: &Path,
    group: &Path,
    cpus: ResourceRange,
    mems: ResourceRange,
) -> Result<()> {
    set_cpus(parent, group, cpus)?;
    set_mems(parent, group, mems)
}

/// Copies the parent's CPUs and memory nodes into `group`.
pub(crate) fn inherit(parent: &Path, group: &Path) -> Result<()> {
    apply(parent, group, ResourceRange::Unlimited, ResourceRange::Unlimited)
}

fn write_range(parent: &Path, group: &Path, file: &str, range: ResourceRange) -> Result<()> {
    let value = match range {
        ResourceRange::Bounded { .. } => range.to_string(),
        ResourceRange::Unlimited => match parent_value(parent, file)? {
            Some(value) => value,
            None => {
                tracing::debug!(parent = %parent.display(), file, "parent has no cpuset value, leaving unrestricted");
                return Ok(());
            }
        },
    };
    write_control(Controller::Cpuset, &group.join(file), &value)
}

fn parent_value(parent: &Path, file: &str) -> Result<Option<String>> {
    let path = parent.join(file);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let value = content.trim();
            Ok((!value.is_empty()).then(|| value.to_owned()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LeanboxError::Cgroup {
            controller: Controller::Cpuset.hierarchy(),
            path,
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_range_copies_parent_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = dir.path().join("child");
        std::fs::create_dir(&group).expect("group");
        std::fs::write(dir.path().join(CPUSET_CPUS), "0-7\n").expect("parent cpus");

        set_cpus(dir.path(), &group, ResourceRange::Unlimited).expect("set");

        assert_eq!(std::fs::read_to_string(group.join(CPUSET_CPUS)).unwrap(), "0-7");
    }

    #[test]
    fn empty_parent_value_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = dir.path().join("child");
        std::fs::create_dir(&group).expect("group");
        std::fs::write(dir.path().join(CPUSET_MEMS), "\n").expect("parent mems");

        set_mems(dir.path(), &group, ResourceRange::Unlimited).expect("set");

        assert!(!group.join(CPUSET_MEMS).exists());
    }

    #[test]
    fn bounded_range_ignores_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = dir.path().join("child");
        std::fs::create_dir(&group).expect("group");
        std::fs::write(dir.path().join(CPUSET_CPUS), "0-47").expect("parent cpus");

        set_cpus(dir.path(), &group, ResourceRange::Bounded { start: 2, end: 5 }).expect("set");

        assert_eq!(std::fs::read_to_string(group.join(CPUSET_CPUS)).unwrap(), "2-5");
    }
}
