//! OpenJ9 attach protocol.
//!
//! Roles are inverted compared to HotSpot: the client binds a TCP
//! listener, publishes its port and a one-time authentication key in the
//! target's `replyInfo` file, wakes the JVM through the notifier
//! semaphore, and waits for the JVM to connect back. All mutations of the
//! shared `.com_ibm_tools_attach` tree happen under the global attach
//! lock; every resource is released in reverse acquisition order on every
//! exit path.

use std::{
    fs::OpenOptions,
    io::Write as _,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    os::unix::fs::{DirBuilderExt, OpenOptionsExt},
    path::Path,
    pin::pin,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_io::{Async, Timer};
use futures::{select, AsyncReadExt, AsyncWriteExt, FutureExt};

use crate::{
    error::Error,
    ipc::{self, FileLock, OPENJ9_ATTACH_DIR},
    protocol::{translator::translate, AutoDropFile, WireResponse},
};

/// Kernel-side deadline on the inbound connection from the JVM.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on simultaneously locked notification files. Directories past the
/// cap are silently left unlocked.
const MAX_NOTIFICATION_FILES: usize = 256;

/// Length of the auth preamble: `"ATTACH_CONNECTED " <16 hex> " "` plus
/// the NUL every string on this protocol ends with.
const AUTH_MESSAGE_LEN: usize = 35;

/// Performs the OpenJ9 attach sequence and returns the JVM's response.
pub async fn attach(
    ns_pid: i32,
    tmp_path: &Path,
    command: &str,
    args: &[String],
    print_output: bool,
    timeout: Duration,
) -> Result<WireResponse, Error> {
    let attach_dir = tmp_path.join(OPENJ9_ATTACH_DIR);

    // Locals drop in reverse declaration order, which is exactly the
    // release order the shared tree requires.
    let _attach_lock = FileLock::acquire_exclusive(&attach_dir.join("_attachlock"))
        .map_err(|err| Error::connection_io("could not acquire attach lock", err))?;

    let listener = create_attach_listener()
        .map_err(|err| Error::connection_io("failed to create attach socket", err))?;
    let port = listener
        .get_ref()
        .local_addr()
        .map_err(|err| Error::connection_io("failed to read listener address", err))?
        .port();

    let key = random_key();

    let reply_info_path = attach_dir.join(ns_pid.to_string()).join("replyInfo");
    let _reply_info = write_reply_info(&reply_info_path, port, key)
        .map_err(|err| Error::connection_io("could not write replyInfo", err))?;

    let notification_locks = lock_notification_files(&attach_dir);

    let _wake = SemWake::post(tmp_path, notification_locks.len());

    let mut conn = accept_jvm(&listener, key, timeout).await?;

    if print_output {
        println!("Connected to remote JVM");
    }

    let translated = translate(command, args);
    write_command(&mut conn, &translated)
        .await
        .map_err(|err| Error::protocol_io("error writing command", err))?;

    let response = read_response(&mut conn, &translated, print_output).await?;

    // No explicit detach when the agreed status is 1.
    if response.code != 1 {
        detach(&mut conn).await;
    }

    Ok(response)
}

/// Binds an ephemeral TCP listener, IPv6 `[::]:0` first, IPv4 `0.0.0.0:0`
/// as fallback.
fn create_attach_listener() -> std::io::Result<Async<TcpListener>> {
    match Async::<TcpListener>::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))) {
        Ok(listener) => Ok(listener),
        Err(_) => Async::<TcpListener>::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))),
    }
}

/// 64-bit one-time authentication key: a timestamp spread by the
/// MurmurHash64A multiplier, XOR-ed with fresh random bytes. If the
/// random draw fails the time-derived key is used alone.
fn random_key() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();
    let mut key = nanos.wrapping_mul(0xc6a4_a793_5bd1_e995);

    let mut random = [0u8; 8];
    if getrandom::getrandom(&mut random).is_ok() {
        key ^= u64::from_le_bytes(random);
    }

    key
}

/// Writes `replyInfo` (mode 0600): the key as 16 lowercase hex chars,
/// then the listen port, each on its own line. The file is removed when
/// the returned guard drops.
fn write_reply_info(path: &Path, port: u16, key: u64) -> std::io::Result<AutoDropFile> {
    if let Some(parent) = path.parent() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    write!(file, "{key:016x}\n{port}\n")?;

    Ok(AutoDropFile::guard(path.to_owned()))
}

/// Takes the `attachNotificationSync` lock of every per-PID directory
/// under the attach tree, up to the cap. The count of locks held is the
/// number of semaphore posts the JVMs expect.
fn lock_notification_files(attach_dir: &Path) -> Vec<FileLock> {
    let mut locks = Vec::new();

    let entries = match std::fs::read_dir(attach_dir) {
        Ok(entries) => entries,
        Err(_) => return locks,
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(|c: char| ('1'..='9').contains(&c)) {
            continue;
        }
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let sync_path = attach_dir.join(name).join("attachNotificationSync");
        if let Ok(lock) = FileLock::acquire_exclusive(&sync_path) {
            locks.push(lock);
        }

        if locks.len() >= MAX_NOTIFICATION_FILES {
            break;
        }
    }

    locks
}

/// Posts `+count` to the notifier semaphore on construction and `-count`
/// on drop. Wake failures are diagnostics, never fatal.
struct SemWake<'a> {
    tmp_path: &'a Path,
    count: usize,
}

impl<'a> SemWake<'a> {
    fn post(tmp_path: &'a Path, count: usize) -> Self {
        if let Err(err) = ipc::sem_op(tmp_path, 1, count) {
            log::warn!("failed to notify attach semaphore: {err}");
        }
        SemWake { tmp_path, count }
    }
}

impl Drop for SemWake<'_> {
    fn drop(&mut self) {
        if let Err(err) = ipc::sem_op(self.tmp_path, -1, self.count) {
            log::debug!("failed to rewind attach semaphore: {err}");
        }
    }
}

/// Waits for the JVM's inbound connection and validates the 35-byte
/// authentication preamble `"ATTACH_CONNECTED " <key> " "`.
async fn accept_jvm(
    listener: &Async<TcpListener>,
    key: u64,
    timeout: Duration,
) -> Result<Async<TcpStream>, Error> {
    let mut accept = pin!(listener.accept().fuse());
    let mut deadline = Timer::after(ACCEPT_TIMEOUT).fuse();

    let (mut conn, _addr) = select! {
        accepted = accept => accepted
            .map_err(|err| Error::connection_io("JVM did not connect", err))?,
        _ = deadline => {
            return Err(Error::Timeout(
                "JVM did not connect within the accept deadline".to_owned(),
            ));
        }
    };

    let mut auth = [0u8; AUTH_MESSAGE_LEN];
    {
        let mut read_auth = pin!(conn.read_exact(&mut auth).fuse());
        let mut read_deadline = Timer::after(timeout).fuse();
        select! {
            read = read_auth => read.map_err(|err| {
                Error::protocol_io("JVM connection was prematurely closed", err)
            })?,
            _ = read_deadline => {
                return Err(Error::Timeout(
                    "timed out reading the authentication handshake".to_owned(),
                ));
            }
        }
    }

    let expected = format!("ATTACH_CONNECTED {key:016x} \0");
    if auth.as_slice() != expected.as_bytes() {
        return Err(Error::connection("unexpected JVM response"));
    }

    Ok(conn)
}

/// Sends a NUL-terminated command string.
async fn write_command(conn: &mut Async<TcpStream>, command: &str) -> std::io::Result<()> {
    let mut data = Vec::with_capacity(command.len() + 1);
    data.extend_from_slice(command.as_bytes());
    data.push(0);
    conn.write_all(&data).await
}

/// Reads the NUL-terminated reply into a doubling buffer and derives the
/// status from the translated verb.
async fn read_response(
    conn: &mut Async<TcpStream>,
    translated: &str,
    print_output: bool,
) -> Result<WireResponse, Error> {
    let mut buf = vec![0u8; 8192];
    let mut len = 0;

    loop {
        let read = conn
            .read(&mut buf[len..])
            .await
            .map_err(|err| Error::protocol_io("error reading response", err))?;
        if read == 0 {
            return Err(Error::protocol("unexpected EOF reading response"));
        }
        len += read;

        if buf[len - 1] == 0 {
            break;
        }
        if len == buf.len() {
            buf.resize(buf.len() * 2, 0);
        }
    }

    let body = String::from_utf8_lossy(&buf[..len - 1]).into_owned();
    let mut code = 0;

    if translated.starts_with("ATTACH_LOADAGENT") {
        if !body.starts_with("ATTACH_ACK") {
            code = -1;
            // `ATTACH_ERR AgentInitializationException` carries the real
            // Agent_OnAttach result after the exception name.
            if body.starts_with("ATTACH_ERR AgentInitializationException") {
                code = body
                    .get(39..)
                    .map(str::trim)
                    .and_then(|rest| rest.parse().ok())
                    .unwrap_or(-1);
            }
        }
    } else if translated.starts_with("ATTACH_DIAGNOSTICS:") && print_output {
        if let Some(idx) = body.find("openj9_diagnostics.string_result=") {
            let result = &body[idx + "openj9_diagnostics.string_result=".len()..];
            println!("{}", unescape(result));
            return Ok(WireResponse {
                code,
                output: result.to_owned(),
            });
        }
    }

    if print_output {
        println!("{body}");
    }

    Ok(WireResponse { code, output: body })
}

/// Un-escapes the Java Properties sequences OpenJ9 uses in diagnostic
/// string results. The replacement order is fixed.
fn unescape(escaped: &str) -> String {
    let trimmed = escaped.strip_suffix('\n').unwrap_or(escaped);
    trimmed
        .replace("\\f", "\x0c")
        .replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
        .replace("\\\\", "\\")
}

/// Tells the JVM the client is done and drains its acknowledgement.
/// Failures are ignored: the peer may already be gone.
async fn detach(conn: &mut Async<TcpStream>) {
    let _ = write_command(conn, "ATTACH_DETACHED").await;

    let mut buf = [0u8; 256];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                if buf[read - 1] == 0 {
                    break;
                }
            }
        }
    }
}
