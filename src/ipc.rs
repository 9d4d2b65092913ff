//! File-lock and System V IPC primitives.
//!
//! The OpenJ9 rendezvous is mediated through a shared filesystem tree:
//! advisory whole-file locks serialize co-tenant attach clients, and a
//! one-slot System V semaphore anchored at
//! `<tmp>/.com_ibm_tools_attach/_notifier` wakes the JVM's attach threads.

use std::{
    fs::{DirBuilder, File, OpenOptions},
    io,
    os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt},
    os::unix::io::AsRawFd,
    path::Path,
};

/// Directory under the temporary path where OpenJ9 keeps its attach
/// artifacts, shared with the JVM and any co-tenant attach clients.
pub(crate) const OPENJ9_ATTACH_DIR: &str = ".com_ibm_tools_attach";

/// Project id mixed into the notifier semaphore key.
const NOTIFIER_PROJ_ID: i32 = 0xa1;

/// An exclusive advisory lock on a whole file.
///
/// Acquired before any state-mutating phase that races other attach
/// clients. Dropping the handle unlocks then closes, so every exit path
/// releases exactly what it acquired.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Opens (creating if necessary, mode 0666) the file at `path` and
    /// blocks until an exclusive lock is granted. The parent directory is
    /// created with mode 0755 when missing.
    pub fn acquire_exclusive(path: &Path) -> io::Result<FileLock> {
        if let Some(parent) = path.parent() {
            DirBuilder::new().recursive(true).mode(0o755).create(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o666)
            .open(path)?;

        // SAFETY: flock is a standard POSIX call; the fd is valid and owned
        // by `file` for the duration of the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // SAFETY: same fd as acquired; unlock before the File closes it.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Derives a System V IPC key from `path` and `proj_id`, creating the file
/// empty when it does not exist.
///
/// The composition is `(proj<<24) | ((st_dev & 0xff)<<16) | (st_ino & 0xffff)`,
/// matching `ftok(3)`. The key is lossy and recomputed on each use; a
/// recreated file may hash to a different key.
pub fn ftok(path: &Path, proj_id: i32) -> io::Result<libc::key_t> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            File::create(path)?;
            std::fs::metadata(path)?
        }
        Err(err) => return Err(err),
    };

    let key = ((proj_id as u32 & 0xff) << 24)
        | ((meta.dev() as u32 & 0xff) << 16)
        | (meta.ino() as u32 & 0xffff);
    Ok(key as libc::key_t)
}

/// Performs `count` operations of `value` on the one-slot notifier
/// semaphore under `tmp_path`, getting or creating it with mode 0666.
///
/// Negative values use `IPC_NOWAIT`; failures of individual operations
/// are swallowed. `count == 0` is a no-op.
pub fn sem_op(tmp_path: &Path, value: i16, count: usize) -> io::Result<()> {
    if count == 0 {
        return Ok(());
    }

    let notifier = tmp_path.join(OPENJ9_ATTACH_DIR).join("_notifier");
    let key = ftok(&notifier, NOTIFIER_PROJ_ID)?;

    // SAFETY: semget has no memory arguments; a negative return is an error.
    let sem_id = unsafe { libc::semget(key, 1, 0o666 | libc::IPC_CREAT) };
    if sem_id < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut op = libc::sembuf {
        sem_num: 0,
        sem_op: value,
        sem_flg: if value < 0 {
            libc::IPC_NOWAIT as libc::c_short
        } else {
            0
        },
    };

    for _ in 0..count {
        // SAFETY: `op` is a valid sembuf for the whole call. A failed op
        // is ignored.
        unsafe {
            libc::semop(sem_id, &mut op, 1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_ftok_creates_and_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("_notifier");
        assert!(!path.exists());

        let key1 = ftok(&path, 0xa1).unwrap();
        assert!(path.exists());
        let key2 = ftok(&path, 0xa1).unwrap();
        assert_eq!(key1, key2);

        let meta = std::fs::metadata(&path).unwrap();
        let expected = ((0xa1u32 & 0xff) << 24)
            | ((meta.dev() as u32 & 0xff) << 16)
            | (meta.ino() as u32 & 0xffff);
        assert_eq!(key1, expected as libc::key_t);

        // A different project id yields a different key.
        assert_ne!(ftok(&path, 0x42).unwrap(), key1);
    }

    #[test]
    fn test_lock_excludes_and_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("_attachlock");

        let lock = FileLock::acquire_exclusive(&path).unwrap();

        // A second open file description cannot take the lock while held.
        let probe = OpenOptions::new().write(true).open(&path).unwrap();
        let rc = unsafe { libc::flock(probe.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(rc, -1);

        drop(lock);
        let rc = unsafe { libc::flock(probe.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(rc, 0);
        unsafe {
            libc::flock(probe.as_raw_fd(), libc::LOCK_UN);
        }
    }

    #[test]
    fn test_sem_op_zero_count_is_noop() {
        let dir = TempDir::new().unwrap();
        sem_op(dir.path(), 1, 0).unwrap();
        // No notifier file is created for a no-op.
        assert!(!dir.path().join(OPENJ9_ATTACH_DIR).join("_notifier").exists());
    }

    #[test]
    fn test_sem_op_post_and_consume() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(OPENJ9_ATTACH_DIR)).unwrap();

        sem_op(dir.path(), 1, 2).unwrap();
        sem_op(dir.path(), -1, 2).unwrap();

        // Remove the kernel object so test runs do not accumulate semaphores.
        let notifier = dir.path().join(OPENJ9_ATTACH_DIR).join("_notifier");
        let key = ftok(&notifier, 0xa1).unwrap();
        let sem_id = unsafe { libc::semget(key, 1, 0o666) };
        assert!(sem_id >= 0);
        unsafe {
            libc::semctl(sem_id, 0, libc::IPC_RMID);
        }
    }
}
