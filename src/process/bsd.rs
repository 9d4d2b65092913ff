//! BSD-family host backend (macOS, FreeBSD): `sysctl`-based process info.
//!
//! No PID or mount namespaces exist here, so the namespace PID is the host
//! PID and namespace entry is always a no-op.

use std::{io, path::PathBuf};

use super::{Namespace, NamespaceEntry, ProcessInfo};

/// Queries `{CTL_KERN, KERN_PROC, KERN_PROC_PID, pid}` for the target's
/// credentials.
pub fn process_info(pid: i32) -> io::Result<ProcessInfo> {
    let mut mib: [libc::c_int; 4] = [libc::CTL_KERN, libc::KERN_PROC, libc::KERN_PROC_PID, pid];
    let mut kinfo: libc::kinfo_proc = unsafe { std::mem::zeroed() };
    let mut size = std::mem::size_of::<libc::kinfo_proc>();

    // SAFETY: mib and kinfo outlive the call; size is in/out and starts at
    // the buffer capacity.
    let rc = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            &mut kinfo as *mut _ as *mut libc::c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 || size == 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(ProcessInfo {
        uid: effective_uid(&kinfo),
        gid: effective_gid(&kinfo),
        ns_pid: pid,
    })
}

#[cfg(target_os = "macos")]
fn effective_uid(kinfo: &libc::kinfo_proc) -> u32 {
    kinfo.kp_eproc.e_ucred.cr_uid
}

#[cfg(target_os = "macos")]
fn effective_gid(kinfo: &libc::kinfo_proc) -> u32 {
    kinfo.kp_eproc.e_pcred.p_svgid
}

#[cfg(target_os = "freebsd")]
fn effective_uid(kinfo: &libc::kinfo_proc) -> u32 {
    kinfo.ki_uid
}

#[cfg(target_os = "freebsd")]
fn effective_gid(kinfo: &libc::kinfo_proc) -> u32 {
    kinfo.ki_groups[0]
}

/// macOS uses the per-user `$TMPDIR`; FreeBSD always `/tmp`.
#[cfg(target_os = "macos")]
pub fn tmp_path(_pid: i32) -> PathBuf {
    std::env::var_os("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

#[cfg(target_os = "freebsd")]
pub fn tmp_path(_pid: i32) -> PathBuf {
    PathBuf::from("/tmp")
}

pub fn enter_namespace(_pid: i32, _ns: Namespace) -> io::Result<NamespaceEntry> {
    Ok(NamespaceEntry::NoChange)
}
