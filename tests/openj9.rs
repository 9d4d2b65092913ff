//! End-to-end OpenJ9 scenarios against a simulated JVM.
//!
//! The double plays the JVM side of the rendezvous: it waits for the
//! client to publish `replyInfo`, connects to the advertised port,
//! authenticates with (or without) the advertised key, and answers the
//! translated command. The attach target is the test process itself.

use std::{
    io::{Read, Write},
    net::{Ipv4Addr, Ipv6Addr, TcpStream},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::Mutex,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use jattach::{Client, Error, JvmType, Options};
use tempfile::TempDir;

static ATTACH_PROCESS_TEST_MUTEX: Mutex<()> = Mutex::new(());

const ATTACH_DIR: &str = ".com_ibm_tools_attach";

/// Marks the test process as an OpenJ9 JVM under `tmp` and returns its
/// per-PID attach directory.
fn seed_attach_info(tmp: &Path, pid: u32) -> PathBuf {
    let pid_dir = tmp.join(ATTACH_DIR).join(pid.to_string());
    std::fs::create_dir_all(&pid_dir).unwrap();
    std::fs::write(pid_dir.join("attachInfo"), b"").unwrap();
    pid_dir
}

/// Waits for `replyInfo` to be fully written and returns `(key, port)`.
fn read_reply_info(pid_dir: &Path) -> (u64, u16) {
    let path = pid_dir.join("replyInfo");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(Instant::now() < deadline, "replyInfo never appeared");
        if let Ok(content) = std::fs::read_to_string(&path) {
            let mut lines = content.lines();
            if let (Some(key_line), Some(port_line)) = (lines.next(), lines.next()) {
                if let (Ok(key), Ok(port)) =
                    (u64::from_str_radix(key_line, 16), port_line.parse())
                {
                    return (key, port);
                }
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn connect_back(port: u16) -> TcpStream {
    TcpStream::connect((Ipv6Addr::LOCALHOST, port))
        .or_else(|_| TcpStream::connect((Ipv4Addr::LOCALHOST, port)))
        .unwrap()
}

fn read_until_nul(stream: &mut TcpStream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if byte[0] == 0 {
                    break;
                }
                data.push(byte[0]);
            }
        }
    }
    data
}

/// Simulates the JVM side: honest when `honest_key`, otherwise
/// authenticating with a zero key.
fn spawn_jvm_double(
    pid_dir: PathBuf,
    honest_key: bool,
    expect_cmd: &'static [u8],
    reply: &'static [u8],
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let (key, port) = read_reply_info(&pid_dir);
        let mut stream = connect_back(port);
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let auth_key = if honest_key { key } else { 0 };
        stream
            .write_all(format!("ATTACH_CONNECTED {auth_key:016x} \0").as_bytes())
            .unwrap();

        if !honest_key {
            // The client must hang up on us.
            let mut probe = [0u8; 1];
            assert!(matches!(stream.read(&mut probe), Ok(0) | Err(_)));
            return;
        }

        assert_eq!(read_until_nul(&mut stream), expect_cmd);
        stream.write_all(reply).unwrap();
        stream.write_all(&[0]).unwrap();

        // Drain the detach notice; the client closes afterwards.
        let detached = read_until_nul(&mut stream);
        assert_eq!(detached, b"ATTACH_DETACHED");
    })
}

fn client_for(tmp: &Path) -> Client {
    Client::with_options(Options {
        tmp_path: Some(tmp.to_owned()),
        ..Options::default()
    })
}

/// Removes the kernel semaphore keyed off this tempdir's notifier file so
/// test runs do not accumulate System V objects.
fn remove_notifier_semaphore(tmp: &Path) {
    let notifier = tmp.join(ATTACH_DIR).join("_notifier");
    let Ok(meta) = std::fs::metadata(&notifier) else {
        return;
    };
    let key = ((0xa1u32 & 0xff) << 24)
        | ((meta.dev() as u32 & 0xff) << 16)
        | (meta.ino() as u32 & 0xffff);
    unsafe {
        let sem_id = libc::semget(key as libc::key_t, 1, 0o666);
        if sem_id >= 0 {
            libc::semctl(sem_id, 0, libc::IPC_RMID);
        }
    }
}

fn assert_attach_lock_released(tmp: &Path) {
    use std::os::unix::io::AsRawFd;

    let lock_path = tmp.join(ATTACH_DIR).join("_attachlock");
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&lock_path)
        .unwrap();
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    assert_eq!(rc, 0, "_attachlock still held");
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// S4: full rendezvous round-trip with a diagnostics command.
#[test]
fn test_diagnostics_round_trip() {
    let _attach_test = ATTACH_PROCESS_TEST_MUTEX.lock().unwrap();
    let tmp = TempDir::new().unwrap();
    let pid = std::process::id();
    let pid_dir = seed_attach_info(tmp.path(), pid);

    let double = spawn_jvm_double(
        pid_dir.clone(),
        true,
        b"ATTACH_DIAGNOSTICS:VM.version",
        b"openj9_diagnostics.string_result=OpenJ9 0.40",
    );

    let response = client_for(tmp.path())
        .attach(pid as i32, jattach::CMD_JCMD, &["VM.version"])
        .unwrap();
    double.join().unwrap();

    assert_eq!(response.jvm_type, JvmType::OpenJ9);
    assert_eq!(response.code, 0);
    assert!(response
        .output
        .contains("openj9_diagnostics.string_result=OpenJ9 0.40"));

    assert!(!pid_dir.join("replyInfo").exists());
    assert_attach_lock_released(tmp.path());
    remove_notifier_semaphore(tmp.path());
}

// S5: a peer that cannot prove knowledge of the key is rejected, and
// everything acquired up to that point is released.
#[test]
fn test_auth_mismatch_is_rejected() {
    let _attach_test = ATTACH_PROCESS_TEST_MUTEX.lock().unwrap();
    let tmp = TempDir::new().unwrap();
    let pid = std::process::id();
    let pid_dir = seed_attach_info(tmp.path(), pid);

    let double = spawn_jvm_double(pid_dir.clone(), false, b"", b"");

    let err = client_for(tmp.path())
        .attach(pid as i32, jattach::CMD_PROPERTIES, &[])
        .unwrap_err();
    double.join().unwrap();

    assert_eq!(err.op(), "attach");
    assert!(matches!(err.cause(), Error::ConnectionFailed { .. }), "{err}");

    assert!(!pid_dir.join("replyInfo").exists());
    assert_attach_lock_released(tmp.path());
    remove_notifier_semaphore(tmp.path());
}

// A peer that connects but never authenticates only stalls the client for
// the configured timeout, not forever.
#[test]
fn test_auth_read_is_bounded() {
    let _attach_test = ATTACH_PROCESS_TEST_MUTEX.lock().unwrap();
    let tmp = TempDir::new().unwrap();
    let pid = std::process::id();
    let pid_dir = seed_attach_info(tmp.path(), pid);

    let double = std::thread::spawn(move || {
        let (_key, port) = read_reply_info(&pid_dir);
        let stream = connect_back(port);
        // Say nothing until the client gives up.
        std::thread::sleep(Duration::from_secs(2));
        drop(stream);
    });

    let client = Client::with_options(Options {
        tmp_path: Some(tmp.path().to_owned()),
        timeout: Duration::from_millis(300),
        ..Options::default()
    });

    let started = Instant::now();
    let err = client
        .attach(pid as i32, jattach::CMD_PROPERTIES, &[])
        .unwrap_err();
    double.join().unwrap();

    assert!(matches!(err.cause(), Error::Timeout(_)), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_attach_lock_released(tmp.path());
    remove_notifier_semaphore(tmp.path());
}
