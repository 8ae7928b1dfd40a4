//! `leanbox deinit` — remove leanbox's group from every controller.

use anyhow::Context;
use clap::Args;
use leanbox_common::config::LeanboxConfig;
use leanbox_core::cgroup::ResourceGroupManager;

/// Arguments for the `deinit` command.
#[derive(Args, Debug)]
pub struct DeinitArgs {}

/// Executes the `deinit` command.
///
/// # Errors
///
/// Returns an error if a group still has templates or cannot be removed.
pub fn execute(_args: &DeinitArgs, config: &LeanboxConfig) -> anyhow::Result<()> {
    ResourceGroupManager::new(config)
        .deinit()
        .context("removing cgroup groups")
}
