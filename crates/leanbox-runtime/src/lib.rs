//! Lean container launches for the leanbox runtime.
//!
//! A launch forks an instance into fresh or cached namespaces, confines it
//! to a root directory, and holds it on a rendezvous channel until its PID
//! is registered in every cgroup controller of its template.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod container;
pub mod exec;
pub mod launcher;
