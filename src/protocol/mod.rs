//! Wire protocols spoken with the target JVM.
//!
//! [`hotspot`] implements the trigger-and-connect protocol over a Unix
//! domain socket; [`openj9`] the TCP rendezvous with shared-filesystem
//! handshake. [`translator`] maps the neutral verb+args command model to
//! the OpenJ9 `ATTACH_*` strings.

use std::path::{Path, PathBuf};

pub mod hotspot;
pub mod openj9;
pub mod translator;

/// Raw result of one protocol exchange: the JVM-reported status and the
/// response text, decoded as received.
#[derive(Debug)]
pub struct WireResponse {
    pub code: i32,
    pub output: String,
}

/// Whether `path` exists and is a Unix domain socket.
pub(crate) fn check_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.file_type().is_socket(),
        Err(_) => false,
    }
}

/// An OpenJ9 JVM advertises itself through its per-PID `attachInfo` file.
pub(crate) fn is_openj9(tmp_path: &Path, ns_pid: i32) -> bool {
    tmp_path
        .join(crate::ipc::OPENJ9_ATTACH_DIR)
        .join(ns_pid.to_string())
        .join("attachInfo")
        .exists()
}

/// Removes the wrapped file when dropped, success or failure. Removal
/// errors are ignored: the file may already be gone because the JVM
/// consumed it.
pub(crate) struct AutoDropFile(PathBuf);

impl AutoDropFile {
    pub(crate) fn guard(path: PathBuf) -> Self {
        AutoDropFile(path)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for AutoDropFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
