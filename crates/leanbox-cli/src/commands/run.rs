//! `leanbox run` — launch one instance and supervise it.
//!
//! Sets up everything an instance needs (groups, template, a cached
//! namespace with a procfs view), launches the command inside it, exercises
//! a pause and resume, waits for the command to exit and tears down.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use leanbox_common::config::LeanboxConfig;
use leanbox_common::types::{TemplateName, TemplateSpec};
use leanbox_core::cgroup::ResourceGroupManager;
use leanbox_core::cgroup::freezer::PauseController;
use leanbox_core::namespace::cache::{self, NamespaceHandle};
use leanbox_runtime::container::ContainerInstance;
use leanbox_runtime::exec::Workload;
use leanbox_runtime::launcher::{ContainerLauncher, Launch, become_subreaper};

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Template to create and launch into.
    pub name: TemplateName,

    /// Root directory of the instance.
    pub rootfs: PathBuf,

    /// Absolute path of the program inside the root, then its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Memory ceiling of the template in MiB; 0 leaves memory unrestricted.
    #[arg(long, default_value_t = 0)]
    pub memory_mb: u64,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if setup, the launch, the pause round trip or teardown
/// fails.
pub fn execute(args: RunArgs, config: &LeanboxConfig) -> anyhow::Result<()> {
    let workload = Workload::new(&args.command)?;
    become_subreaper()?;

    let groups = ResourceGroupManager::new(config);
    groups.init().context("initializing cgroup groups")?;
    let spec = TemplateSpec::unlimited().with_memory_mb(args.memory_mb);
    groups
        .add_template(&args.name, &spec)
        .with_context(|| format!("creating template {}", args.name))?;
    let handle = cache::acquire(Some(&args.rootfs)).context("acquiring namespace")?;

    let outcome = supervise(&args, config, &handle, &workload);

    super::teardown(&groups, &args.name, handle)?;
    outcome
}

fn supervise(
    args: &RunArgs,
    config: &LeanboxConfig,
    handle: &NamespaceHandle,
    workload: &Workload,
) -> anyhow::Result<()> {
    let launcher = ContainerLauncher::new(config);
    let pid = match launcher.setup_double_forked(&args.name, &args.rootfs, Some(handle))? {
        Launch::Instance => workload.exec_or_abort(),
        Launch::Launcher { pid } => pid,
    };
    let instance = ContainerInstance::new(args.name.clone(), pid);
    output::report(&format!("launched {} as pid {pid}", args.name));

    let freezer = PauseController::new(config);
    let round_trip = instance
        .pause(&freezer)
        .context("pausing instance")
        .and_then(|()| instance.resume(&freezer).context("resuming instance"));
    if let Err(e) = round_trip {
        let _ = freezer.unpause(&args.name);
        instance.kill()?;
        let _ = instance.wait()?;
        return Err(e);
    }

    let status = instance.wait()?;
    output::report(&format!("instance {pid} {}", output::format_status(&status)));
    Ok(())
}
