//! # leanbox-core
//!
//! Low-level Linux isolation primitives for lean containers.
//!
//! This crate provides safe abstractions over:
//! - **Cgroups v1**: per-controller groups, template subgroups, cpuset and
//!   memory limits, and the freezer used to pause and resume templates.
//! - **Namespaces**: creating and joining UTS, PID, IPC and mount
//!   namespaces, and a cache of parked holder processes that keep a
//!   namespace set alive between launches.
//! - **Filesystem**: `chroot` into an instance root and the procfs view
//!   mounted inside it.
//! - **Rendezvous**: typed one-shot pipes that sequence a parent and a
//!   forked child.
//!
//! All unsafe system calls are encapsulated in [`process`] with
//! `// SAFETY:` documentation. Linux only.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod process;
pub mod rendezvous;
