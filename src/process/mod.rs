//! Host abstraction: process information, temp-dir resolution, namespace
//! entry and liveness probes.
//!
//! The platform-specific parts are confined to two operations: the
//! process-info query and namespace entry. Linux reads `/proc`; the BSD
//! family goes through `sysctl` and has no namespaces to enter.

use std::path::Path;

use nix::{sys::signal::kill, unistd::Pid};

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
mod bsd;
#[cfg(target_os = "linux")]
mod linux;

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub use bsd::{enter_namespace, process_info, tmp_path};
#[cfg(target_os = "linux")]
pub use linux::{enter_namespace, process_info, tmp_path};

/// Credentials and in-namespace identity of an attach target.
#[derive(Debug, Clone, Copy)]
pub struct ProcessInfo {
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
    /// PID as the target sees itself inside its own PID namespace; equal
    /// to the host PID outside containers.
    pub ns_pid: i32,
}

/// Namespace kinds entered before an attach, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Net,
    Ipc,
    Mnt,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Net => "net",
            Namespace::Ipc => "ipc",
            Namespace::Mnt => "mnt",
        }
    }
}

/// Outcome of a namespace entry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceEntry {
    /// Already in the target's namespace.
    NoChange,
    /// The calling thread adopted the target's namespace.
    Switched,
}

/// Probes the process with the null signal; alive means the probe
/// succeeds.
pub fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Whether the file at `path` is owned by the effective UID of the
/// calling context.
///
/// Some mounted filesystems silently remap ownership of created files;
/// the JVM refuses to trust a trigger file it does not own, so the client
/// checks before relying on one.
pub fn file_owned_by_self(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.uid() == nix::unistd::geteuid().as_raw(),
        Err(_) => false,
    }
}
