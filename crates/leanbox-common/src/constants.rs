//! System-wide constants and default paths.

/// Mount point of the cgroup v1 controller hierarchies.
pub const CGROUP_V1_PATH: &str = "/sys/fs/cgroup";

/// Name of the group created under every controller hierarchy.
pub const DEFAULT_GROUP_PREFIX: &str = "leanbox";

/// Environment variable overriding the cgroup mount point.
pub const ENV_CGROUP_ROOT: &str = "LEANBOX_CGROUP_ROOT";

/// Environment variable overriding the group prefix.
pub const ENV_GROUP_PREFIX: &str = "LEANBOX_GROUP_PREFIX";

/// Per-group file listing member process IDs.
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// Allowed CPUs of a cpuset group.
pub const CPUSET_CPUS: &str = "cpuset.cpus";

/// Allowed memory (NUMA) nodes of a cpuset group.
pub const CPUSET_MEMS: &str = "cpuset.mems";

/// Hard memory ceiling of a memory group.
pub const MEMORY_LIMIT: &str = "memory.limit_in_bytes";

/// Freezer state file of a freezer group.
pub const FREEZER_STATE: &str = "freezer.state";

/// Freezer token written to suspend a group.
pub const FREEZER_FROZEN: &str = "FROZEN";

/// Freezer token reported while a group is being suspended.
pub const FREEZER_FREEZING: &str = "FREEZING";

/// Freezer token written to resume a group.
pub const FREEZER_THAWED: &str = "THAWED";

/// Bytes per MiB, used to convert template memory ceilings.
pub const BYTES_PER_MIB: u64 = 1024 * 1024;

/// `PATH` handed to workloads started inside an instance.
pub const DEFAULT_EXEC_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Exit code of an instance that could not be isolated or released.
pub const INSTANCE_ABORT_CODE: i32 = 125;
