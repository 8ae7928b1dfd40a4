//! `leanbox template` — create or remove templates.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};
use leanbox_common::config::LeanboxConfig;
use leanbox_common::types::{ResourceRange, TemplateName, TemplateSpec};
use leanbox_core::cgroup::ResourceGroupManager;

/// Arguments for the `template` command.
#[derive(Args, Debug)]
pub struct TemplateArgs {
    /// Template action.
    #[command(subcommand)]
    pub action: TemplateAction,
}

/// Template actions.
#[derive(Subcommand, Debug)]
pub enum TemplateAction {
    /// Create a template's subgroups and write its limits.
    Add(AddArgs),
    /// Remove a template's subgroups; its instances must be gone.
    Remove {
        /// Template name.
        name: TemplateName,
    },
}

/// Arguments for `template add`.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Template name, used as the subgroup directory name.
    pub name: TemplateName,

    /// CPUs as `start-end`, a single id, or `unlimited`.
    #[arg(long, default_value = "unlimited")]
    pub cpus: ResourceRange,

    /// NUMA nodes as `start-end`, a single id, or `unlimited`.
    #[arg(long, default_value = "unlimited")]
    pub numa: ResourceRange,

    /// Memory ceiling in MiB; 0 leaves memory unrestricted.
    #[arg(long, default_value_t = 0)]
    pub memory_mb: u64,

    /// Read the limits from a JSON template spec instead of the flags.
    #[arg(long, conflicts_with_all = ["cpus", "numa", "memory_mb"])]
    pub spec: Option<PathBuf>,
}

impl AddArgs {
    fn template_spec(&self) -> anyhow::Result<TemplateSpec> {
        if let Some(path) = &self.spec {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            return serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()));
        }
        Ok(TemplateSpec::unlimited()
            .with_cpus(self.cpus)
            .with_numa_nodes(self.numa)
            .with_memory_mb(self.memory_mb))
    }
}

/// Executes the `template` command.
///
/// # Errors
///
/// Returns an error if the `--spec` file cannot be read or the cgroup tree
/// cannot be changed.
pub fn execute(args: TemplateArgs, config: &LeanboxConfig) -> anyhow::Result<()> {
    let groups = ResourceGroupManager::new(config);
    match args.action {
        TemplateAction::Add(add) => {
            let spec = add.template_spec()?;
            groups
                .add_template(&add.name, &spec)
                .with_context(|| format!("creating template {}", add.name))
        }
        TemplateAction::Remove { name } => groups
            .remove_template(&name)
            .with_context(|| format!("removing template {name}")),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::commands::{Cli, Command};

    fn add_args(argv: &[&str]) -> AddArgs {
        let cli = Cli::try_parse_from(argv).expect("parse");
        match cli.command {
            Command::Template(TemplateArgs {
                action: TemplateAction::Add(add),
            }) => add,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flags_build_the_template_spec() {
        let add = add_args(&[
            "leanbox", "template", "add", "t1", "--cpus", "0-3", "--memory-mb", "128",
        ]);
        let spec = add.template_spec().expect("spec");
        assert_eq!(spec.cpus, ResourceRange::Bounded { start: 0, end: 3 });
        assert_eq!(spec.numa_nodes, ResourceRange::Unlimited);
        assert_eq!(spec.memory_mb, Some(128));
    }

    #[test]
    fn spec_file_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t1.json");
        std::fs::write(
            &path,
            r#"{ "cpus": "unlimited", "memory_mb": 64, "numa_nodes": { "bounded": { "start": 0, "end": 1 } } }"#,
        )
        .expect("write");
        let add = add_args(&["leanbox", "template", "add", "t1", "--spec", path.to_str().unwrap()]);
        let spec = add.template_spec().expect("spec");
        assert_eq!(spec.memory_mb, Some(64));
        assert_eq!(spec.numa_nodes, ResourceRange::Bounded { start: 0, end: 1 });
    }

    #[test]
    fn add_and_remove_against_a_fake_hierarchy() {
        let dir = tempfile::tempdir().expect("tempdir");
        for controller in leanbox_core::cgroup::Controller::ALL {
            std::fs::create_dir_all(dir.path().join(controller.hierarchy())).expect("hierarchy");
        }
        let config = LeanboxConfig {
            cgroup_root: dir.path().to_path_buf(),
            ..LeanboxConfig::default()
        };
        ResourceGroupManager::new(&config).init().expect("init");

        let add = add_args(&["leanbox", "template", "add", "t1", "--memory-mb", "32"]);
        execute(
            TemplateArgs {
                action: TemplateAction::Add(add),
            },
            &config,
        )
        .expect("add");
        let memory = dir.path().join("memory/leanbox/t1/memory.limit_in_bytes");
        assert_eq!(std::fs::read_to_string(&memory).unwrap(), "33554432");
        // Real control files vanish with the group; a fake one must go first.
        std::fs::remove_file(&memory).expect("drop fake control file");

        let name = TemplateName::new("t1").expect("name");
        execute(
            TemplateArgs {
                action: TemplateAction::Remove { name },
            },
            &config,
        )
        .expect("remove");
        assert!(!dir.path().join("memory/leanbox/t1").exists());
    }
}
