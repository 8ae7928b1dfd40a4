//! Cgroups v1 resource-group management.
//!
//! leanbox owns one group, named by the configured prefix, under every
//! controller hierarchy at `<cgroup_root>/<controller>/<prefix>`. Each
//! template is a subgroup of that group in every hierarchy, and each
//! instance is registered by writing its PID into every subgroup's
//! `cgroup.procs`.

pub mod cpuset;
pub mod freezer;
pub mod memory;

use std::fmt;
use std::fs::{self, DirBuilder, File};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use leanbox_common::config::LeanboxConfig;
use leanbox_common::constants::CGROUP_PROCS;
use leanbox_common::error::{LeanboxError, Result};
use leanbox_common::types::{TemplateName, TemplateSpec};
use nix::unistd::Pid;

/// Permissions for group directories (`rwxr-xr-x`).
const GROUP_DIR_MODE: u32 = 0o755;

/// A cgroup v1 controller hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Controller {
    /// Huge page usage.
    Hugetlb,
    /// Perf event monitoring scope.
    PerfEvent,
    /// Network class and priority tagging.
    NetClsPrio,
    /// Process count.
    Pids,
    /// Device access.
    Devices,
    /// Suspend and resume.
    Freezer,
    /// CPU scheduling and accounting.
    CpuAcct,
    /// CPU and memory-node placement.
    Cpuset,
    /// Block I/O.
    Blkio,
    /// Memory usage.
    Memory,
    /// The named `systemd` hierarchy.
    Systemd,
}

impl Controller {
    /// Every controller, in the order groups are created and joined.
    pub const ALL: [Self; 11] = [
        Self::Hugetlb,
        Self::PerfEvent,
        Self::NetClsPrio,
        Self::Pids,
        Self::Devices,
        Self::Freezer,
        Self::CpuAcct,
        Self::Cpuset,
        Self::Blkio,
        Self::Memory,
        Self::Systemd,
    ];

    /// Directory of the hierarchy under the cgroup mount point.
    #[must_use]
    pub const fn hierarchy(self) -> &'static str {
        match self {
            Self::Hugetlb => "hugetlb",
            Self::PerfEvent => "perf_event",
            Self::NetClsPrio => "net_cls,net_prio",
            Self::Pids => "pids",
            Self::Devices => "devices",
            Self::Freezer => "freezer",
            Self::CpuAcct => "cpu,cpuacct",
            Self::Cpuset => "cpuset",
            Self::Blkio => "blkio",
            Self::Memory => "memory",
            Self::Systemd => "systemd",
        }
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hierarchy())
    }
}

/// Creates and removes leanbox's groups and writes template limits.
///
/// The manager holds no open handles; every call works directly on the
/// cgroup filesystem, which is shared global state. Operations on the same
/// template name must be serialized by the caller.
#[derive(Debug, Clone)]
pub struct ResourceGroupManager {
    root: PathBuf,
    prefix: String,
}

impl ResourceGroupManager {
    /// Creates a manager for the configured mount point and prefix.
    #[must_use]
    pub fn new(config: &LeanboxConfig) -> Self {
        Self {
            root: config.cgroup_root.clone(),
            prefix: config.group_prefix.clone(),
        }
    }

    /// Root directory of a controller hierarchy.
    #[must_use]
    pub fn hierarchy_dir(&self, controller: Controller) -> PathBuf {
        self.root.join(controller.hierarchy())
    }

    /// leanbox's group in a controller hierarchy.
    #[must_use]
    pub fn group_dir(&self, controller: Controller) -> PathBuf {
        self.hierarchy_dir(controller).join(&self.prefix)
    }

    /// A template's subgroup in a controller hierarchy.
    #[must_use]
    pub fn template_dir(&self, controller: Controller, name: &TemplateName) -> PathBuf {
        self.group_dir(controller).join(name.as_str())
    }

    /// Creates leanbox's group under every controller.
    ///
    /// Groups that already exist are left alone. The cpuset group inherits
    /// the hierarchy root's CPUs and memory nodes so templates beneath it
    /// can accept tasks.
    ///
    /// # Errors
    ///
    /// Returns an error naming the controller and path if a directory cannot
    /// be created or the cpuset values cannot be copied.
    pub fn init(&self) -> Result<()> {
        for controller in Controller::ALL {
            create_group_dir(controller, &self.group_dir(controller))?;
        }
        cpuset::inherit(
            &self.hierarchy_dir(Controller::Cpuset),
            &self.group_dir(Controller::Cpuset),
        )?;
        tracing::info!(root = %self.root.display(), prefix = %self.prefix, "cgroup groups initialized");
        Ok(())
    }

    /// Removes leanbox's group from every controller.
    ///
    /// Groups that do not exist are skipped. Fails while templates remain.
    ///
    /// # Errors
    ///
    /// Returns an error naming the controller and path if a directory cannot
    /// be removed.
    pub fn deinit(&self) -> Result<()> {
        for controller in Controller::ALL {
            remove_group_dir(controller, &self.group_dir(controller))?;
        }
        tracing::info!(root = %self.root.display(), prefix = %self.prefix, "cgroup groups removed");
        Ok(())
    }

    /// Creates a template's subgroups and writes its limits.
    ///
    /// # Errors
    ///
    /// Returns an error if a subgroup cannot be created or a limit cannot
    /// be written.
    pub fn add_template(&self, name: &TemplateName, spec: &TemplateSpec) -> Result<()> {
        for controller in Controller::ALL {
            create_group_dir(controller, &self.template_dir(controller, name))?;
        }
        cpuset::apply(
            &self.group_dir(Controller::Cpuset),
            &self.template_dir(Controller::Cpuset, name),
            spec.cpus,
            spec.numa_nodes,
        )?;
        let memory_mb = spec.memory_limit_mb();
        if let Some(memory_mb) = memory_mb {
            memory::set_limit_mb(&self.template_dir(Controller::Memory, name), memory_mb)?;
        }
        tracing::info!(
            %name,
            cpus = %spec.cpus,
            numa = %spec.numa_nodes,
            memory_mb = ?memory_mb,
            "template created"
        );
        Ok(())
    }

    /// Removes a template's subgroups. Missing subgroups are skipped.
    ///
    /// The kernel refuses to remove a group that still has members, so all
    /// instances of the template must have been reaped first.
    ///
    /// # Errors
    ///
    /// Returns an error naming the controller and path if a subgroup exists
    /// but cannot be removed.
    pub fn remove_template(&self, name: &TemplateName) -> Result<()> {
        for controller in Controller::ALL {
            remove_group_dir(controller, &self.template_dir(controller, name))?;
        }
        tracing::info!(%name, "template removed");
        Ok(())
    }

    /// Adds `pid` to the template's subgroup in every controller.
    ///
    /// # Errors
    ///
    /// Returns an error at the first controller whose `cgroup.procs` cannot
    /// be written; earlier controllers keep the membership.
    pub fn register(&self, name: &TemplateName, pid: Pid) -> Result<()> {
        let value = pid.as_raw().to_string();
        for controller in Controller::ALL {
            let procs = self.template_dir(controller, name).join(CGROUP_PROCS);
            write_control(controller, &procs, &value)?;
        }
        tracing::debug!(%name, %pid, "process registered in every controller");
        Ok(())
    }

    /// Lists the PIDs in a template's subgroup of one controller.
    ///
    /// # Errors
    ///
    /// Returns an error if `cgroup.procs` cannot be read or contains
    /// something other than PIDs.
    pub fn members(&self, name: &TemplateName, controller: Controller) -> Result<Vec<Pid>> {
        let procs = self.template_dir(controller, name).join(CGROUP_PROCS);
        read_control(controller, &procs)?
            .split_whitespace()
            .map(|pid| {
                pid.parse::<i32>().map(Pid::from_raw).map_err(|e| LeanboxError::Config {
                    message: format!("unexpected entry {pid:?} in {}: {e}", procs.display()),
                })
            })
            .collect()
    }
}

fn create_group_dir(controller: Controller, path: &Path) -> Result<()> {
    match DirBuilder::new().mode(GROUP_DIR_MODE).create(path) {
        Ok(()) => {
            tracing::debug!(%controller, path = %path.display(), "group created");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(LeanboxError::Cgroup {
            controller: controller.hierarchy(),
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn remove_group_dir(controller: Controller, path: &Path) -> Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => {
            tracing::debug!(%controller, path = %path.display(), "group removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LeanboxError::Cgroup {
            controller: controller.hierarchy(),
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `value` to a control file in a single `write(2)`.
pub(crate) fn write_control(controller: Controller, path: &Path, value: &str) -> Result<()> {
    let cgroup_err = |source| LeanboxError::Cgroup {
        controller: controller.hierarchy(),
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(cgroup_err)?;
    let written = file.write(value.as_bytes()).map_err(cgroup_err)?;
    if written != value.len() {
        return Err(LeanboxError::ShortWrite {
            path: path.to_path_buf(),
            written,
            expected: value.len(),
        });
    }
    tracing::debug!(%controller, path = %path.display(), value, "control file written");
    Ok(())
}

/// Reads a control file.
pub(crate) fn read_control(controller: Controller, path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| LeanboxError::Cgroup {
        controller: controller.hierarchy(),
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use leanbox_common::types::ResourceRange;

    use super::*;

    fn manager(root: &Path) -> ResourceGroupManager {
        let config = LeanboxConfig {
            cgroup_root: root.to_path_buf(),
            ..LeanboxConfig::default()
        };
        ResourceGroupManager::new(&config)
    }

    fn snapshot(root: &Path) -> BTreeSet<PathBuf> {
        fn walk(dir: &Path, out: &mut BTreeSet<PathBuf>) {
            for entry in fs::read_dir(dir).expect("read_dir") {
                let path = entry.expect("entry").path();
                if path.is_dir() {
                    walk(&path, out);
                }
                let _ = out.insert(path);
            }
        }
        let mut out = BTreeSet::new();
        walk(root, &mut out);
        out
    }

    fn fake_hierarchies(root: &Path) {
        for controller in Controller::ALL {
            fs::create_dir_all(root.join(controller.hierarchy())).expect("hierarchy");
        }
    }

    #[test]
    fn init_creates_group_per_controller_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());

        groups.init().expect("first init");
        groups.init().expect("second init");

        for controller in Controller::ALL {
            assert!(groups.group_dir(controller).is_dir(), "{controller} group missing");
        }
    }

    #[test]
    fn init_reports_controller_of_failing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        // No hierarchies mounted: the very first controller fails.
        let err = manager(&dir.path().join("missing")).init().unwrap_err();
        match err {
            LeanboxError::Cgroup { controller, .. } => assert_eq!(controller, "hugetlb"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn init_copies_root_cpuset_into_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let cpuset_root = dir.path().join("cpuset");
        fs::write(cpuset_root.join("cpuset.cpus"), "0-47\n").expect("cpus");
        fs::write(cpuset_root.join("cpuset.mems"), "0-1\n").expect("mems");

        let groups = manager(dir.path());
        groups.init().expect("init");

        let group = groups.group_dir(Controller::Cpuset);
        assert_eq!(fs::read_to_string(group.join("cpuset.cpus")).unwrap(), "0-47");
        assert_eq!(fs::read_to_string(group.join("cpuset.mems")).unwrap(), "0-1");
    }

    #[test]
    fn template_lifecycle_restores_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let before = snapshot(dir.path());

        let groups = manager(dir.path());
        let name = TemplateName::new("t1").expect("name");
        groups.init().expect("init");
        groups.add_template(&name, &TemplateSpec::unlimited()).expect("add");
        for controller in Controller::ALL {
            assert!(groups.template_dir(controller, &name).is_dir());
        }
        groups.remove_template(&name).expect("remove");
        groups.deinit().expect("deinit");

        assert_eq!(snapshot(dir.path()), before);
    }

    #[test]
    fn add_template_writes_limits() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        groups.init().expect("init");

        let name = TemplateName::new("limited").expect("name");
        let spec = TemplateSpec::unlimited()
            .with_memory_mb(128)
            .with_cpus(ResourceRange::Bounded { start: 0, end: 3 })
            .with_numa_nodes(ResourceRange::Bounded { start: 0, end: 0 });
        groups.add_template(&name, &spec).expect("add");

        let cpuset = groups.template_dir(Controller::Cpuset, &name);
        assert_eq!(fs::read_to_string(cpuset.join("cpuset.cpus")).unwrap(), "0-3");
        assert_eq!(fs::read_to_string(cpuset.join("cpuset.mems")).unwrap(), "0-0");
        let memory = groups.template_dir(Controller::Memory, &name);
        assert_eq!(
            fs::read_to_string(memory.join("memory.limit_in_bytes")).unwrap(),
            "134217728"
        );
    }

    #[test]
    fn unlimited_template_writes_nothing_without_parent_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        groups.init().expect("init");

        let name = TemplateName::new("free").expect("name");
        groups.add_template(&name, &TemplateSpec::unlimited()).expect("add");

        let cpuset = groups.template_dir(Controller::Cpuset, &name);
        assert!(!cpuset.join("cpuset.cpus").exists());
        assert!(!groups.template_dir(Controller::Memory, &name).join("memory.limit_in_bytes").exists());
    }

    #[test]
    fn template_from_file_with_zero_memory_and_inverted_cpus_restricts_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        groups.init().expect("init");

        let spec: TemplateSpec = serde_json::from_str(
            r#"{"cpus":{"bounded":{"start":5,"end":1}},"memory_mb":0,"numa_nodes":"unlimited"}"#,
        )
        .expect("spec");
        let name = TemplateName::new("lax").expect("name");
        groups.add_template(&name, &spec).expect("add");

        let cpuset = groups.template_dir(Controller::Cpuset, &name);
        assert!(!cpuset.join("cpuset.cpus").exists());
        let memory = groups.template_dir(Controller::Memory, &name);
        assert!(!memory.join("memory.limit_in_bytes").exists());
    }

    #[test]
    fn zero_memory_in_struct_literal_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        groups.init().expect("init");

        let spec = TemplateSpec {
            memory_mb: Some(0),
            ..TemplateSpec::unlimited()
        };
        let name = TemplateName::new("zero").expect("name");
        groups.add_template(&name, &spec).expect("add");

        let memory = groups.template_dir(Controller::Memory, &name);
        assert!(!memory.join("memory.limit_in_bytes").exists());
    }

    #[test]
    fn removing_missing_template_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        let name = TemplateName::new("ghost").expect("name");
        groups.remove_template(&name).expect("idempotent remove");
        groups.deinit().expect("idempotent deinit");
    }

    #[test]
    fn remove_surfaces_non_missing_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        groups.init().expect("init");
        let name = TemplateName::new("busy").expect("name");
        groups.add_template(&name, &TemplateSpec::unlimited()).expect("add");
        // A stray file makes the directory non-empty, like a populated group.
        fs::write(groups.template_dir(Controller::Hugetlb, &name).join("stray"), "x").expect("stray");

        let err = groups.remove_template(&name).unwrap_err();
        assert!(matches!(err, LeanboxError::Cgroup { controller: "hugetlb", .. }));
    }

    #[test]
    fn register_writes_pid_to_every_controller() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        groups.init().expect("init");
        let name = TemplateName::new("t1").expect("name");
        groups.add_template(&name, &TemplateSpec::unlimited()).expect("add");

        groups.register(&name, Pid::from_raw(4321)).expect("register");

        for controller in Controller::ALL {
            let members = groups.members(&name, controller).expect("members");
            assert_eq!(members, vec![Pid::from_raw(4321)], "{controller}");
        }
    }

    #[test]
    fn register_into_missing_template_names_first_controller() {
        let dir = tempfile::tempdir().expect("tempdir");
        fake_hierarchies(dir.path());
        let groups = manager(dir.path());
        let name = TemplateName::new("absent").expect("name");
        let err = groups.register(&name, Pid::from_raw(1)).unwrap_err();
        assert!(matches!(err, LeanboxError::Cgroup { controller: "hugetlb", .. }));
    }
}
