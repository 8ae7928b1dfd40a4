//! `leanbox init` — create leanbox's group under every controller.

use anyhow::Context;
use clap::Args;
use leanbox_common::config::LeanboxConfig;
use leanbox_core::cgroup::ResourceGroupManager;

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {}

/// Executes the `init` command.
///
/// # Errors
///
/// Returns an error if a group cannot be created.
pub fn execute(_args: &InitArgs, config: &LeanboxConfig) -> anyhow::Result<()> {
    ResourceGroupManager::new(config)
        .init()
        .context("initializing cgroup groups")
}
