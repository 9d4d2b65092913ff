//! Linux host backend: `/proc` parsing and namespace entry.

use std::{
    fs::File,
    io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use nix::sched::{setns, CloneFlags};

use super::{Namespace, NamespaceEntry, ProcessInfo};

/// Reads `/proc/<pid>/status` for the effective UID/GID and the namespace
/// PID.
///
/// On kernels older than 4.1 the `NStgid:` field is absent and the
/// namespace PID is recovered by scanning the target's own view of
/// `/proc`.
pub fn process_info(pid: i32) -> io::Result<ProcessInfo> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status"))?;
    let (uid, gid, ns_pid) = parse_status(&status);

    Ok(ProcessInfo {
        uid,
        gid,
        ns_pid: ns_pid.unwrap_or_else(|| alt_lookup_ns_pid(pid)),
    })
}

/// Extracts `(euid, egid, nspid)` from the content of a status file. The
/// effective ids are the second values of `Uid:`/`Gid:`; the namespace PID
/// is the last (innermost) value of `NStgid:` when present.
fn parse_status(content: &str) -> (u32, u32, Option<i32>) {
    let mut uid = 0;
    let mut gid = 0;
    let mut ns_pid = None;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("Uid:") => {
                if let Some(euid) = fields.nth(1) {
                    uid = euid.parse().unwrap_or(0);
                }
            }
            Some("Gid:") => {
                if let Some(egid) = fields.nth(1) {
                    gid = egid.parse().unwrap_or(0);
                }
            }
            Some("NStgid:") => {
                ns_pid = fields.last().and_then(|last| last.parse().ok());
            }
            _ => {}
        }
    }

    (uid, gid, ns_pid)
}

/// Finds the container PID on kernels that do not export `NStgid`.
///
/// When the target lives in another PID namespace, every numeric entry of
/// `/proc/<pid>/root/proc` is a candidate; `/proc/<n>/sched` ends its
/// first line with the host PID, which identifies the match.
fn alt_lookup_ns_pid(pid: i32) -> i32 {
    if let (Ok(self_ns), Ok(target_ns)) = (
        std::fs::metadata("/proc/self/ns/pid"),
        std::fs::metadata(format!("/proc/{pid}/ns/pid")),
    ) {
        if self_ns.ino() == target_ns.ino() {
            return pid;
        }
    }

    let proc_root = PathBuf::from(format!("/proc/{pid}/root/proc"));
    let entries = match std::fs::read_dir(&proc_root) {
        Ok(entries) => entries,
        Err(_) => return pid,
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(|c: char| c.is_ascii_digit() && c != '0') {
            continue;
        }

        let sched = proc_root.join(name).join("sched");
        if let Ok(content) = std::fs::read_to_string(&sched) {
            if let Some(first_line) = content.lines().next() {
                if parse_sched_host_pid(first_line) == Some(pid) {
                    if let Ok(ns_pid) = name.parse() {
                        return ns_pid;
                    }
                }
            }
        }
    }

    pid
}

/// Parses the host PID out of the first line of `/proc/<pid>/sched`, which
/// looks like `java (1234, #threads: 12)`.
fn parse_sched_host_pid(line: &str) -> Option<i32> {
    let after_paren = &line[line.rfind('(')? + 1..];
    let number = after_paren.split(',').next()?.trim();
    number.parse().ok()
}

/// The temporary directory the target JVM uses: its own view of `/tmp`
/// when reachable through `/proc/<pid>/root`, else the host `/tmp`.
pub fn tmp_path(pid: i32) -> PathBuf {
    let path = PathBuf::from(format!("/proc/{pid}/root/tmp"));
    if std::fs::metadata(&path).is_ok() {
        path
    } else {
        PathBuf::from("/tmp")
    }
}

/// Moves the calling thread into the target's namespace of the given kind.
///
/// Namespace membership is per-thread kernel state: the caller must stay
/// on the same OS thread for the rest of the attach.
pub fn enter_namespace(pid: i32, ns: Namespace) -> io::Result<NamespaceEntry> {
    let self_path = format!("/proc/self/ns/{}", ns.as_str());
    let target_path = format!("/proc/{pid}/ns/{}", ns.as_str());

    let self_meta = std::fs::metadata(&self_path)?;
    let target_meta = std::fs::metadata(&target_path)?;
    if self_meta.ino() == target_meta.ino() {
        return Ok(NamespaceEntry::NoChange);
    }

    let ns_file = File::open(Path::new(&target_path))?;
    setns(&ns_file, CloneFlags::empty())
        .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;

    Ok(NamespaceEntry::Switched)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_FIXTURE: &str = "\
Name:\tjava
Umask:\t0022
State:\tS (sleeping)
Tgid:\t4321
Pid:\t4321
PPid:\t1
Uid:\t1000\t1001\t1000\t1000
Gid:\t2000\t2001\t2000\t2000
NStgid:\t4321\t17
Threads:\t42
";

    #[test]
    fn test_parse_status() {
        let (uid, gid, ns_pid) = parse_status(STATUS_FIXTURE);
        assert_eq!(uid, 1001);
        assert_eq!(gid, 2001);
        assert_eq!(ns_pid, Some(17));
    }

    #[test]
    fn test_parse_status_without_nstgid() {
        let stripped: String = STATUS_FIXTURE
            .lines()
            .filter(|line| !line.starts_with("NStgid:"))
            .map(|line| format!("{line}\n"))
            .collect();
        let (uid, gid, ns_pid) = parse_status(&stripped);
        assert_eq!(uid, 1001);
        assert_eq!(gid, 2001);
        assert_eq!(ns_pid, None);
    }

    #[test]
    fn test_parse_sched_host_pid() {
        assert_eq!(
            parse_sched_host_pid("java (1234, #threads: 12)"),
            Some(1234)
        );
        assert_eq!(
            parse_sched_host_pid("weird (name) (77, #threads: 1)"),
            Some(77)
        );
        assert_eq!(parse_sched_host_pid("no parenthesis here"), None);
        assert_eq!(parse_sched_host_pid("(not a number,)"), None);
    }
}
