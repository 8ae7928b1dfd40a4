//! CLI command definitions and dispatch.

pub mod bench;
pub mod deinit;
pub mod init;
pub mod pause_bench;
pub mod run;
pub mod template;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use leanbox_common::config::LeanboxConfig;
use leanbox_common::constants::{ENV_CGROUP_ROOT, ENV_GROUP_PREFIX};
use leanbox_common::types::TemplateName;
use leanbox_core::cgroup::ResourceGroupManager;
use leanbox_core::namespace::cache::{self, NamespaceHandle};

/// leanbox — lean containers launched into cached namespaces.
#[derive(Parser, Debug)]
#[command(name = "leanbox", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file; missing fields take defaults.
    #[arg(long, global = true, env = "LEANBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mount point of the cgroup v1 hierarchies.
    #[arg(long, global = true, env = ENV_CGROUP_ROOT)]
    pub cgroup_root: Option<PathBuf>,

    /// Group created under every controller for leanbox's templates.
    #[arg(long, global = true, env = ENV_GROUP_PREFIX)]
    pub prefix: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Resolves the configuration: file (or defaults), then flags and
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is
    /// invalid.
    pub fn resolve_config(&self) -> anyhow::Result<LeanboxConfig> {
        let mut config = match &self.config {
            Some(path) => LeanboxConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => LeanboxConfig::default(),
        };
        if let Some(root) = &self.cgroup_root {
            config.cgroup_root.clone_from(root);
        }
        if let Some(prefix) = &self.prefix {
            config.group_prefix.clone_from(prefix);
        }
        config.validate()?;
        tracing::debug!(?config, "configuration resolved");
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create leanbox's group under every cgroup controller.
    Init(init::InitArgs),
    /// Remove leanbox's group from every cgroup controller.
    Deinit(deinit::DeinitArgs),
    /// Create or remove templates.
    Template(template::TemplateArgs),
    /// Launch one instance running a command, pause and resume it, and wait
    /// for it to exit.
    Run(run::RunArgs),
    /// Measure launch throughput for a fixed duration.
    Bench(bench::BenchArgs),
    /// Measure pause and unpause round trips against a serving instance.
    PauseBench(pause_bench::PauseBenchArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be resolved or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    match cli.command {
        Command::Init(args) => init::execute(&args, &config),
        Command::Deinit(args) => deinit::execute(&args, &config),
        Command::Template(args) => template::execute(args, &config),
        Command::Run(args) => run::execute(args, &config),
        Command::Bench(args) => bench::execute(args, &config),
        Command::PauseBench(args) => pause_bench::execute(args, &config),
    }
}

/// Releases a command's namespace, then removes its template.
///
/// Both steps run even if the first fails, so a busy template never
/// strands a parked holder.
///
/// # Errors
///
/// Returns the release error if there is one, otherwise the removal error.
pub(crate) fn teardown(
    groups: &ResourceGroupManager,
    name: &TemplateName,
    handle: NamespaceHandle,
) -> anyhow::Result<()> {
    let released = cache::release(handle).context("releasing namespace");
    let removed = groups
        .remove_template(name)
        .with_context(|| format!("removing template {name}"));
    match (released, removed) {
        (Err(e), Err(also)) => {
            tracing::error!(%name, error = %format!("{also:#}"), "template left behind");
            Err(e)
        }
        (released, removed) => released.and(removed),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command as Process;

    use clap::CommandFactory;
    use leanbox_common::types::TemplateSpec;
    use leanbox_core::cgroup::Controller;
    use leanbox_core::process;
    use nix::unistd::Pid;

    use super::*;

    fn spawn_holder() -> Pid {
        let child = Process::new("sleep").arg("30").spawn().expect("spawn sleep");
        Pid::from_raw(i32::try_from(child.id()).expect("pid fits"))
    }

    #[test]
    fn teardown_kills_holder_even_when_template_is_busy() {
        let dir = tempfile::tempdir().expect("tempdir");
        for controller in Controller::ALL {
            std::fs::create_dir_all(dir.path().join(controller.hierarchy())).expect("hierarchy");
        }
        let config = LeanboxConfig {
            cgroup_root: dir.path().to_path_buf(),
            ..LeanboxConfig::default()
        };
        let groups = ResourceGroupManager::new(&config);
        groups.init().expect("init");
        let name = TemplateName::new("busy").expect("name");
        groups.add_template(&name, &TemplateSpec::unlimited()).expect("add");
        // A leftover entry keeps the first subgroup from being removed.
        std::fs::write(groups.template_dir(Controller::Hugetlb, &name).join("stray"), "x")
            .expect("stray");

        let holder = spawn_holder();
        let err = teardown(&groups, &name, NamespaceHandle::from_holder(holder)).unwrap_err();

        assert!(format!("{err:#}").contains("removing template busy"));
        assert!(!process::is_alive(holder).expect("liveness"));
    }

    #[test]
    fn teardown_succeeds_when_both_steps_do() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LeanboxConfig {
            cgroup_root: dir.path().to_path_buf(),
            ..LeanboxConfig::default()
        };
        let groups = ResourceGroupManager::new(&config);
        let name = TemplateName::new("gone").expect("name");

        let holder = spawn_holder();
        teardown(&groups, &name, NamespaceHandle::from_holder(holder)).expect("teardown");
        assert!(!process::is_alive(holder).expect("liveness"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "leanbox",
            "--cgroup-root",
            "/tmp/cg",
            "--prefix",
            "bench",
            "init",
        ])
        .expect("parse");
        let config = cli.resolve_config().expect("config");
        assert_eq!(config.cgroup_root, PathBuf::from("/tmp/cg"));
        assert_eq!(config.group_prefix, "bench");
    }

    #[test]
    fn config_file_is_loaded_before_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("leanbox.json");
        std::fs::write(&path, r#"{ "cgroup_root": "/from/file", "group_prefix": "file" }"#)
            .expect("write");
        let cli = Cli::try_parse_from([
            "leanbox",
            "--config",
            path.to_str().unwrap(),
            "--prefix",
            "flag",
            "deinit",
        ])
        .expect("parse");
        let config = cli.resolve_config().expect("config");
        assert_eq!(config.cgroup_root, PathBuf::from("/from/file"));
        assert_eq!(config.group_prefix, "flag");
    }

    #[test]
    fn invalid_prefix_is_rejected() {
        let cli = Cli::try_parse_from(["leanbox", "--prefix", "a/b", "init"]).expect("parse");
        assert!(cli.resolve_config().is_err());
    }
}
