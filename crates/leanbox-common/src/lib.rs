//! # leanbox-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the leanbox workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and does not link against `nix`, so kernel error codes are
//! converted to [`std::io::Error`] before they reach [`error::LeanboxError`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
