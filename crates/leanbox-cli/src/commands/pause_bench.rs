//! `leanbox pause-bench` — pause and unpause round-trip benchmark.
//!
//! Launches one instance whose command serves a Unix socket at
//! `<rootfs>/uds.socket`: for every byte it reads, it writes one back.
//! Each iteration thaws the template, exchanges one byte with the instance
//! and freezes the template again.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
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
use crate::stats::BenchStats;

/// Socket the instance listens on, relative to its root.
pub const SOCKET_NAME: &str = "uds.socket";

/// Pause between connection attempts while the instance starts up.
const CONNECT_RETRY: Duration = Duration::from_millis(10);

/// Arguments for the `pause-bench` command.
#[derive(Args, Debug)]
pub struct PauseBenchArgs {
    /// How long to run, in seconds.
    pub seconds: u64,

    /// Template to launch into.
    pub name: TemplateName,

    /// Root directory of the instance; the socket is created inside it.
    pub rootfs: PathBuf,

    /// Absolute path of the serving program inside the root, then its
    /// arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// How long to wait for the instance to start listening, in seconds.
    #[arg(long, default_value_t = 5)]
    pub connect_timeout: u64,

    /// Print the final summary as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `pause-bench` command.
///
/// # Errors
///
/// Returns an error if setup, the connection, the byte exchange or
/// teardown fails.
pub fn execute(args: PauseBenchArgs, config: &LeanboxConfig) -> anyhow::Result<()> {
    let workload = Workload::new(&args.command)?;
    become_subreaper()?;

    let groups = ResourceGroupManager::new(config);
    groups.init().context("initializing cgroup groups")?;
    groups
        .add_template(&args.name, &TemplateSpec::unlimited())
        .with_context(|| format!("creating template {}", args.name))?;
    let handle = cache::acquire(Some(&args.rootfs)).context("acquiring namespace")?;

    let mut stats = BenchStats::start();
    let outcome = launch_and_measure(&args, config, &handle, &workload, &mut stats);

    super::teardown(&groups, &args.name, handle)?;
    outcome?;

    let summary = stats.summary();
    if args.json {
        output::report(&serde_json::to_string_pretty(&summary)?);
    } else {
        output::report(&output::format_summary("pause/unpause", &summary));
    }
    Ok(())
}

fn launch_and_measure(
    args: &PauseBenchArgs,
    config: &LeanboxConfig,
    handle: &NamespaceHandle,
    workload: &Workload,
    stats: &mut BenchStats,
) -> anyhow::Result<()> {
    let launcher = ContainerLauncher::new(config);
    let pid = match launcher.setup_double_forked(&args.name, &args.rootfs, Some(handle))? {
        Launch::Instance => workload.exec_or_abort(),
        Launch::Launcher { pid } => pid,
    };
    let instance = ContainerInstance::new(args.name.clone(), pid);
    output::report(&format!("launched {} as pid {pid}", args.name));

    let freezer = PauseController::new(config);
    let socket = args.rootfs.join(SOCKET_NAME);
    let measured = connect_with_retry(&socket, Duration::from_secs(args.connect_timeout))
        .and_then(|mut stream| measure(args, &freezer, &mut stream, stats));

    let stopped = stop_instance(&freezer, &instance);
    measured.and(stopped)
}

/// Thaws the template so `SIGKILL` can land, then kills and reaps the
/// instance. The kill and reap happen even if thawing fails.
fn stop_instance(freezer: &PauseController, instance: &ContainerInstance) -> anyhow::Result<()> {
    let thawed = freezer
        .unpause(instance.template())
        .context("thawing template before teardown");
    instance.kill()?;
    let status = instance.wait()?;
    tracing::debug!(pid = %instance.pid(), ?status, "serving instance reaped");
    thawed
}

fn measure(
    args: &PauseBenchArgs,
    freezer: &PauseController,
    stream: &mut UnixStream,
    stats: &mut BenchStats,
) -> anyhow::Result<()> {
    let duration = Duration::from_secs(args.seconds);
    loop {
        let started = Instant::now();
        match round_trip(&args.name, freezer, stream) {
            Ok(()) => stats.record_success(started.elapsed()),
            Err(RoundTrip::Freezer(e)) => {
                tracing::warn!(error = %e, "freezer transition failed");
                stats.record_failure();
            }
            Err(RoundTrip::Socket(e)) => {
                return Err(e).context("exchanging a byte with the instance");
            }
        }
        if let Some(report) = stats.interval_report() {
            output::report(&output::format_interval("pause/unpause", &report));
        }
        if stats.elapsed() > duration {
            return Ok(());
        }
    }
}

#[derive(Debug)]
enum RoundTrip {
    Freezer(leanbox_common::error::LeanboxError),
    Socket(std::io::Error),
}

fn round_trip(
    name: &TemplateName,
    freezer: &PauseController,
    stream: &mut UnixStream,
) -> Result<(), RoundTrip> {
    freezer.unpause(name).map_err(RoundTrip::Freezer)?;
    let mut byte = [0_u8; 1];
    stream.write_all(&byte).map_err(RoundTrip::Socket)?;
    stream.read_exact(&mut byte).map_err(RoundTrip::Socket)?;
    freezer.pause(name).map_err(RoundTrip::Freezer)
}

/// Connects to `path`, retrying until the instance listens or `timeout`
/// passes.
fn connect_with_retry(path: &Path, timeout: Duration) -> anyhow::Result<UnixStream> {
    let deadline = Instant::now() + timeout;
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => {
                tracing::debug!(socket = %path.display(), "connected to instance");
                return Ok(stream);
            }
            Err(e) if Instant::now() < deadline => {
                tracing::trace!(socket = %path.display(), error = %e, "instance not listening yet");
                std::thread::sleep(CONNECT_RETRY);
            }
            Err(e) => bail!("instance never listened on {}: {e}", path.display()),
        }
    }
}
