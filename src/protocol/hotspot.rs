//! HotSpot / OpenJDK attach protocol.
//!
//! The JVM does not listen by default: the client drops a trigger file
//! where the JVM looks for it, sends SIGQUIT, and polls for the Unix
//! domain socket the JVM then binds at `<tmp>/.java_pid<nspid>`. The
//! request is a NUL-framed version + verb + three argument slots; the
//! response starts with a decimal status line followed by the body.

use std::{
    fs::OpenOptions,
    io::Write as _,
    os::unix::{fs::OpenOptionsExt, net::UnixStream},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_io::{Async, Timer};
use futures::{select, AsyncReadExt, AsyncWriteExt, FutureExt};
use nix::{
    errno::Errno,
    sys::signal::{kill, Signal::SIGQUIT},
    unistd::Pid,
};

use crate::{
    cancellation::CancellationToken,
    error::Error,
    process,
    protocol::{check_socket, AutoDropFile, WireResponse},
};

/// Polling starts at 20ms and grows by 20ms per iteration, capped here.
const MAX_POLL_DELAY: Duration = Duration::from_millis(500);
const POLL_STEP: Duration = Duration::from_millis(20);

/// Performs the HotSpot attach sequence and returns the JVM's response.
#[allow(clippy::too_many_arguments)]
pub async fn attach(
    pid: i32,
    ns_pid: i32,
    tmp_path: &Path,
    mnt_switched: bool,
    command: &str,
    args: &[String],
    print_output: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<WireResponse, Error> {
    let socket_path = tmp_path.join(format!(".java_pid{ns_pid}"));

    if !check_socket(&socket_path) {
        start_attach_mechanism(pid, ns_pid, tmp_path, mnt_switched, &socket_path, timeout, cancel)
            .await?;
    }

    let mut conn = Async::<UnixStream>::connect(&socket_path)
        .await
        .map_err(|err| Error::connection_io("could not connect to the attach socket", err))?;

    if print_output {
        println!("Connected to remote JVM");
    }

    let request = encode_request(command, args);
    conn.write_all(&request)
        .await
        .map_err(|err| Error::protocol_io("error writing command", err))?;

    read_response(&mut conn, command, args, print_output).await
}

/// Creates the trigger file, signals the JVM and polls for the socket.
///
/// The trigger file is unlinked when this returns, success or failure.
async fn start_attach_mechanism(
    pid: i32,
    ns_pid: i32,
    tmp_path: &Path,
    mnt_switched: bool,
    socket_path: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    // The path prefix must be valid in the client's current mount view:
    // after a mount-namespace switch, /proc/<nspid> is the target.
    let path_pid = if mnt_switched { ns_pid } else { pid };
    let primary = PathBuf::from(format!("/proc/{path_pid}/cwd/.attach_pid{ns_pid}"));

    let _trigger = match create_trigger_file(primary) {
        Ok(trigger) => trigger,
        Err(_) => {
            let fallback = tmp_path.join(format!(".attach_pid{ns_pid}"));
            create_trigger_file(fallback).map_err(|err| {
                Error::connection_io("failed to create attach trigger file", err)
            })?
        }
    };

    // Always the host PID; the namespace PID means nothing to our kernel.
    kill(Pid::from_raw(pid), SIGQUIT).map_err(|errno| match errno {
        Errno::ESRCH => Error::ProcessNotFound(format!("no process with pid {pid}")),
        Errno::EPERM => Error::PermissionDenied(errno),
        _ => Error::connection(format!("failed to send SIGQUIT: {errno}")),
    })?;

    let deadline = Instant::now() + timeout;
    let mut delay = POLL_STEP;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Timeout(
                "attach cancelled while waiting for the socket".to_owned(),
            ));
        }

        if check_socket(socket_path) {
            return Ok(());
        }

        if !process::is_alive(pid) {
            return Err(Error::ProcessNotFound(format!(
                "process {pid} died while waiting for the attach socket"
            )));
        }

        if Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "timeout waiting for {} to appear",
                socket_path.display()
            )));
        }

        let mut tick = Timer::after(delay).fuse();
        let mut cancelled = cancel.cancelled().fuse();
        select! {
            _ = tick => {}
            () = cancelled => {}
        }

        delay = (delay + POLL_STEP).min(MAX_POLL_DELAY);
    }
}

/// Creates a trigger file the JVM will trust: mode 0660 and owned by the
/// current effective UID. Some mounted filesystems silently remap the
/// owner, in which case the file is unlinked and the error sends the
/// caller to the fallback location.
fn create_trigger_file(path: PathBuf) -> std::io::Result<AutoDropFile> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o660)
        .open(&path)?;
    let trigger = AutoDropFile::guard(path);
    if !process::file_owned_by_self(trigger.path()) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "trigger file ownership was remapped",
        ));
    }
    Ok(trigger)
}

/// Encodes a request: `"1\0" verb "\0" slot1 "\0" slot2 "\0" slot3 "\0"`.
fn encode_request(command: &str, args: &[String]) -> Vec<u8> {
    let slots = pack_args(command, args);

    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(b"1");
    buf.push(0);
    buf.extend_from_slice(command.as_bytes());
    buf.push(0);
    for slot in &slots {
        buf.extend_from_slice(slot.as_bytes());
        buf.push(0);
    }
    buf
}

/// Packs arguments into the three wire slots.
///
/// `jcmd` takes at most two: the subcommand, then everything else joined
/// with spaces. Other verbs fill the slots in order, with arguments past
/// the third joined into the last slot.
fn pack_args(command: &str, args: &[String]) -> [String; 3] {
    let mut slots: [String; 3] = Default::default();

    if command == "jcmd" && args.len() > 1 {
        slots[0] = args[0].clone();
        slots[1] = args[1..].join(" ");
    } else if args.len() > 3 {
        slots[0] = args[0].clone();
        slots[1] = args[1].clone();
        slots[2] = args[2..].join(" ");
    } else {
        for (slot, arg) in slots.iter_mut().zip(args) {
            slot.clone_from(arg);
        }
    }

    slots
}

/// Reads the full response, echoing it to stdout when streaming is on,
/// and derives the status code.
async fn read_response(
    conn: &mut Async<UnixStream>,
    command: &str,
    args: &[String],
    print_output: bool,
) -> Result<WireResponse, Error> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let read = conn
            .read(&mut chunk)
            .await
            .map_err(|err| Error::protocol_io("error reading response", err))?;
        if read == 0 {
            break;
        }
        if print_output {
            if data.is_empty() {
                print!("JVM response code = ");
            }
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(&chunk[..read]);
            let _ = stdout.flush();
        }
        data.extend_from_slice(&chunk[..read]);
    }

    if data.is_empty() {
        return Err(Error::protocol("unexpected EOF reading response"));
    }
    if print_output {
        println!();
    }

    let output = String::from_utf8_lossy(&data).into_owned();

    let first_line = output.lines().next().unwrap_or("");
    let mut code: i32 = first_line.trim().parse().map_err(|_| {
        Error::protocol(format!("malformed status line {first_line:?}"))
    })?;

    if command == "load" {
        code = parse_load_code(code, &output);

        if code != 0 && !print_output {
            // Surface the JVM's explanation the way the interactive tool
            // would have.
            if let Some(idx) = output.find('\n') {
                eprint!("{}", &output[idx + 1..]);
            } else if let Some(agent) = args.first() {
                eprintln!("Target JVM failed to load {agent}");
            }
        }
    }

    Ok(WireResponse { code, output })
}

/// Extracts the real `Agent_OnAttach` result for the `load` verb, which
/// the first-line code does not reflect on any modern JDK.
///
/// JDK 9+ writes `return code: <n>` on the second line, JDK 8 the bare
/// integer, and JDK 21+ always reports 0 first and puts an error message
/// on the second line instead.
fn parse_load_code(first_line_code: i32, output: &str) -> i32 {
    if first_line_code != 0 {
        return first_line_code;
    }

    let second_line = output.lines().nth(1).map(str::trim).unwrap_or("");

    if let Some(rest) = second_line.strip_prefix("return code: ") {
        rest.trim().parse().unwrap_or(-1)
    } else if second_line.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        second_line.parse().unwrap_or(-1)
    } else if !second_line.is_empty() {
        -1
    } else {
        first_line_code
    }
}
