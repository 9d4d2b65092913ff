//! Attach client: public types and the coordinator that sequences one
//! attach operation.
//!
//! Namespace membership and effective credentials are per-thread kernel
//! state on Linux, so every attach runs to completion on its own
//! dedicated OS thread, which is retired afterwards. Attaches to
//! different PIDs may run in parallel on separate threads.

use std::{fmt, path::PathBuf, time::Duration};

use nix::unistd::{setgid, setuid, Gid, Uid};

use crate::{
    cancellation::CancellationToken,
    error::{AttachError, Error, Result},
    process::{self, Namespace, NamespaceEntry},
    protocol::{self, hotspot, openj9},
};

/// Loads a native agent library or Java agent.
pub const CMD_LOAD: &str = "load";
/// Requests a thread dump.
pub const CMD_THREAD_DUMP: &str = "threaddump";
/// Creates a heap dump file.
pub const CMD_DUMP_HEAP: &str = "dumpheap";
/// Shows the heap histogram.
pub const CMD_INSPECT_HEAP: &str = "inspectheap";
/// Shows a heap and thread summary.
pub const CMD_DATA_DUMP: &str = "datadump";
/// Executes a jcmd command.
pub const CMD_JCMD: &str = "jcmd";
/// Prints the JVM system properties.
pub const CMD_PROPERTIES: &str = "properties";
/// Prints the agent-specific properties.
pub const CMD_AGENT_PROPERTIES: &str = "agentProperties";
/// Modifies a manageable VM flag.
pub const CMD_SET_FLAG: &str = "setflag";
/// Prints a specific VM flag.
pub const CMD_PRINT_FLAG: &str = "printflag";

/// Detected JVM implementation of the attach target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JvmType {
    /// Oracle HotSpot or OpenJDK.
    HotSpot,
    /// IBM / Eclipse OpenJ9.
    OpenJ9,
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JvmType::HotSpot => f.write_str("HotSpot"),
            JvmType::OpenJ9 => f.write_str("OpenJ9"),
        }
    }
}

/// Result of a JVM attach operation.
#[derive(Debug, Clone)]
pub struct Response {
    /// Return code of the JVM operation, 0 on success. A non-zero code is
    /// a successful attach reporting a failed command.
    pub code: i32,
    /// Response text, decoded as received.
    pub output: String,
    /// Which JVM implementation answered.
    pub jvm_type: JvmType,
}

/// Attach behavior configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Stream the JVM response to this process's stdout as it arrives.
    pub print_output: bool,
    /// Overrides temporary-directory discovery (like the `JATTACH_PATH`
    /// environment variable).
    pub tmp_path: Option<PathBuf>,
    /// Deadline applied to socket waits and the pre-handshake reads.
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            print_output: false,
            tmp_path: None,
            timeout: Duration::from_secs(6),
        }
    }
}

/// JVM attach client.
#[derive(Debug, Default)]
pub struct Client {
    options: Options,
}

impl Client {
    /// Creates a client with default options.
    pub fn new() -> Client {
        Client::default()
    }

    /// Creates a client with custom options.
    pub fn with_options(options: Options) -> Client {
        Client { options }
    }

    /// Sends `command` with `args` to the JVM with PID `pid` and returns
    /// its response.
    pub fn attach(&self, pid: i32, command: &str, args: &[&str]) -> Result<Response> {
        self.attach_cancellable(pid, command, args, CancellationToken::new())
    }

    /// Like [`attach`](Client::attach), but the wait phases abort when
    /// `cancel` fires. Once SIGQUIT has been sent, cancellation only
    /// stops the client from waiting.
    pub fn attach_cancellable(
        &self,
        pid: i32,
        command: &str,
        args: &[&str],
        cancel: CancellationToken,
    ) -> Result<Response> {
        let command = command.to_owned();
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        let options = self.options.clone();

        // The attach mutates thread-affine kernel state (namespaces,
        // credentials); it gets a thread of its own which is never reused.
        let worker = std::thread::Builder::new()
            .name(format!("jattach-{pid}"))
            .spawn(move || {
                async_io::block_on(run_attach(pid, &command, &args, &options, &cancel))
            })
            .map_err(|err| {
                AttachError::new(
                    "attach",
                    pid,
                    Error::protocol_io("failed to spawn attach thread", err),
                )
            })?;

        worker.join().unwrap_or_else(|_| {
            Err(AttachError::new(
                "attach",
                pid,
                Error::protocol("attach thread panicked"),
            ))
        })
    }

    /// Loads a native agent library into the target JVM. With `absolute`
    /// the path is taken as-is; otherwise it is searched for in
    /// `java.library.path`.
    pub fn load_agent(
        &self,
        pid: i32,
        agent_path: &str,
        absolute: bool,
        options: &str,
    ) -> Result<Response> {
        let absolute = if absolute { "true" } else { "false" };
        let mut args = vec![agent_path, absolute];
        if !options.is_empty() {
            args.push(options);
        }
        self.attach(pid, CMD_LOAD, &args)
    }

    /// Loads a Java agent jar through the `instrument` library.
    pub fn load_java_agent(&self, pid: i32, jar_path: &str, options: &str) -> Result<Response> {
        let mut instrument_args = jar_path.to_owned();
        if !options.is_empty() {
            instrument_args.push('=');
            instrument_args.push_str(options);
        }
        self.attach(pid, CMD_LOAD, &["instrument", "false", &instrument_args])
    }

    /// Requests a thread dump.
    pub fn thread_dump(&self, pid: i32) -> Result<Response> {
        self.attach(pid, CMD_THREAD_DUMP, &[])
    }

    /// Dumps the heap to `path` (resolved by the target JVM).
    pub fn heap_dump(&self, pid: i32, path: &str) -> Result<Response> {
        self.attach(pid, CMD_DUMP_HEAP, &[path])
    }

    /// Shows the heap class histogram.
    pub fn inspect_heap(&self, pid: i32) -> Result<Response> {
        self.attach(pid, CMD_INSPECT_HEAP, &[])
    }

    /// Shows a heap and thread summary.
    pub fn data_dump(&self, pid: i32) -> Result<Response> {
        self.attach(pid, CMD_DATA_DUMP, &[])
    }

    /// Executes a jcmd command.
    pub fn jcmd(&self, pid: i32, command: &str, args: &[&str]) -> Result<Response> {
        let mut jcmd_args = vec![command];
        jcmd_args.extend_from_slice(args);
        self.attach(pid, CMD_JCMD, &jcmd_args)
    }

    /// Retrieves the JVM system properties.
    pub fn properties(&self, pid: i32) -> Result<Response> {
        self.attach(pid, CMD_PROPERTIES, &[])
    }

    /// Retrieves the agent properties.
    pub fn agent_properties(&self, pid: i32) -> Result<Response> {
        self.attach(pid, CMD_AGENT_PROPERTIES, &[])
    }

    /// Modifies a manageable VM flag.
    pub fn set_flag(&self, pid: i32, flag: &str, value: &str) -> Result<Response> {
        self.attach(pid, CMD_SET_FLAG, &[flag, value])
    }

    /// Prints a specific VM flag.
    pub fn print_flag(&self, pid: i32, flag: &str) -> Result<Response> {
        self.attach(pid, CMD_PRINT_FLAG, &[flag])
    }
}

/// One-shot attach with default options.
pub fn attach(pid: i32, command: &str, args: &[&str]) -> Result<Response> {
    Client::new().attach(pid, command, args)
}

/// The coordinator: runs the whole attach sequence on the current
/// (dedicated) thread.
async fn run_attach(
    pid: i32,
    command: &str,
    args: &[String],
    options: &Options,
    cancel: &CancellationToken,
) -> Result<Response> {
    // Broken sockets must surface as write errors, not kill the process.
    ignore_sigpipe();

    let info = process::process_info(pid)
        .map_err(|err| AttachError::new("get_process_info", pid, Error::ProcessNotFound(err.to_string())))?;

    // Net and ipc first, mnt last: once the mount view changes, /proc
    // paths mean the target's filesystem. Failures are diagnostics only.
    let mut mnt_switched = false;
    for ns in [Namespace::Net, Namespace::Ipc, Namespace::Mnt] {
        match process::enter_namespace(pid, ns) {
            Ok(NamespaceEntry::Switched) => {
                if ns == Namespace::Mnt {
                    mnt_switched = true;
                }
            }
            Ok(NamespaceEntry::NoChange) => {}
            Err(err) => {
                log::warn!("failed to enter {} namespace of {pid}: {err}", ns.as_str());
            }
        }
    }

    // The HotSpot security model requires the peer to carry the JVM's own
    // credentials. Group first: dropping the user first would forfeit the
    // right to change groups.
    setgid(Gid::from_raw(info.gid))
        .map_err(|errno| AttachError::new("setgid", pid, Error::PermissionDenied(errno)))?;
    setuid(Uid::from_raw(info.uid))
        .map_err(|errno| AttachError::new("setuid", pid, Error::PermissionDenied(errno)))?;

    let tmp_path = resolve_tmp_path(options.tmp_path.clone(), pid);

    let jvm_type = if protocol::is_openj9(&tmp_path, info.ns_pid) {
        JvmType::OpenJ9
    } else {
        JvmType::HotSpot
    };
    log::debug!("attaching to pid {pid} (nspid {}) as {jvm_type}", info.ns_pid);

    let wire = match jvm_type {
        JvmType::OpenJ9 => {
            openj9::attach(
                info.ns_pid,
                &tmp_path,
                command,
                args,
                options.print_output,
                options.timeout,
            )
            .await
        }
        JvmType::HotSpot => {
            hotspot::attach(
                pid,
                info.ns_pid,
                &tmp_path,
                mnt_switched,
                command,
                args,
                options.print_output,
                options.timeout,
                cancel,
            )
            .await
        }
    }
    .map_err(|err| AttachError::new("attach", pid, err))?;

    Ok(Response {
        code: wire.code,
        output: wire.output,
        jvm_type,
    })
}

/// Temp-path resolution: explicit option, then `JATTACH_PATH`, then the
/// target's own view of `/tmp`.
fn resolve_tmp_path(override_path: Option<PathBuf>, pid: i32) -> PathBuf {
    if let Some(path) = override_path {
        return path;
    }
    if let Some(path) = std::env::var_os("JATTACH_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    process::tmp_path(pid)
}

fn ignore_sigpipe() {
    // SAFETY: installing SIG_IGN for SIGPIPE is async-signal-safe and
    // idempotent; the disposition is process-wide.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
