//! `leanbox bench` — launch throughput benchmark.
//!
//! Repeatedly double-fork launches an instance into one cached namespace
//! and waits for it to exit. Failed launches are counted; a launch that
//! reaps the wrong process aborts the run.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use leanbox_common::config::LeanboxConfig;
use leanbox_common::error::LeanboxError;
use leanbox_common::types::{TemplateName, TemplateSpec};
use leanbox_core::cgroup::ResourceGroupManager;
use leanbox_core::namespace::cache::{self, NamespaceHandle};
use leanbox_core::process;
use leanbox_runtime::container::{ContainerInstance, exited_cleanly};
use leanbox_runtime::exec::Workload;
use leanbox_runtime::launcher::{ContainerLauncher, Launch, become_subreaper};

use crate::output;
use crate::stats::BenchStats;

/// Arguments for the `bench` command.
#[derive(Args, Debug)]
pub struct BenchArgs {
    /// How long to run, in seconds.
    pub seconds: u64,

    /// Template to launch into.
    #[arg(long, default_value = "test")]
    pub name: TemplateName,

    /// Root directory of every instance.
    #[arg(long, default_value = ".")]
    pub rootfs: PathBuf,

    /// Print the final summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Program (inside the root) and arguments each instance execs; without
    /// one, instances exit immediately.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `bench` command.
///
/// # Errors
///
/// Returns an error if setup or teardown fails, or if a launch breaks an
/// invariant.
pub fn execute(args: BenchArgs, config: &LeanboxConfig) -> anyhow::Result<()> {
    let workload = if args.command.is_empty() {
        output::report("running without a command, instances exit immediately");
        None
    } else {
        output::report(&format!(
            "running in {} with command: {}",
            args.rootfs.display(),
            args.command.join(" ")
        ));
        Some(Workload::new(&args.command)?)
    };
    output::report(&format!(
        "running for {} second(s), template {}",
        args.seconds, args.name
    ));

    become_subreaper()?;
    let groups = ResourceGroupManager::new(config);
    groups.init().context("initializing cgroup groups")?;
    groups
        .add_template(&args.name, &TemplateSpec::unlimited())
        .with_context(|| format!("creating template {}", args.name))?;
    let handle = cache::acquire(None).context("acquiring namespace")?;

    let mut stats = BenchStats::start();
    let outcome = run_loop(&args, config, &handle, workload.as_ref(), &mut stats);

    super::teardown(&groups, &args.name, handle)?;
    outcome?;

    let summary = stats.summary();
    if args.json {
        output::report(&serde_json::to_string_pretty(&summary)?);
    } else {
        output::report(&output::format_summary("start", &summary));
    }
    Ok(())
}

fn run_loop(
    args: &BenchArgs,
    config: &LeanboxConfig,
    handle: &NamespaceHandle,
    workload: Option<&Workload>,
    stats: &mut BenchStats,
) -> anyhow::Result<()> {
    let launcher = ContainerLauncher::new(config);
    let duration = Duration::from_secs(args.seconds);
    loop {
        let started = Instant::now();
        match launch_once(&launcher, args, handle, workload) {
            Ok(()) => stats.record_success(started.elapsed()),
            Err(e @ LeanboxError::InvariantViolation { .. }) => {
                tracing::error!(error = %e, "launch broke an invariant, aborting");
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!(error = %e, "launch failed");
                stats.record_failure();
            }
        }
        if let Some(report) = stats.interval_report() {
            output::report(&output::format_interval("start", &report));
        }
        if stats.elapsed() > duration {
            return Ok(());
        }
    }
}

fn launch_once(
    launcher: &ContainerLauncher,
    args: &BenchArgs,
    handle: &NamespaceHandle,
    workload: Option<&Workload>,
) -> leanbox_common::error::Result<()> {
    match launcher.setup_double_forked(&args.name, &args.rootfs, Some(handle))? {
        Launch::Instance => match workload {
            Some(workload) => workload.exec_or_abort(),
            None => process::exit_immediately(0),
        },
        Launch::Launcher { pid } => {
            let status = ContainerInstance::new(args.name.clone(), pid).wait()?;
            if !exited_cleanly(&status) {
                tracing::debug!(%pid, ?status, "instance ended abnormally");
            }
            Ok(())
        }
    }
}
