//! Filesystem isolation for instances.
//!
//! Instances are confined with `chroot(2)` into their root directory; a
//! namespace holder can additionally mount a procfs view inside that root
//! so the instance sees the processes of its own PID namespace.

pub mod chroot;
pub mod mount;
