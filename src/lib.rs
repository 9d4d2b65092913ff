//! Jattach sends diagnostic commands to a running JVM on the same host through the Dynamic
//! Attach mechanism, and returns the JVM's textual response together with its status code.
//!
//! Two JVM families are supported, each with its own wire protocol, and both work for ordinary
//! processes as well as Linux-container-confined ones:
//!
//! ## HotSpot / OpenJDK
//!
//! The client triggers the JVM's attach listener and connects to it:
//!
//! * a `.attach_pid<pid>` trigger file is created where the JVM looks for it (its working
//!   directory, falling back to its `/tmp`)
//! * `SIGQUIT` tells the JVM to check for the trigger file and bind a UNIX socket at
//!   `<tmp>/.java_pid<pid>`
//! * the client polls for the socket, connects, and exchanges one NUL-framed request/response
//!
//! ## OpenJ9
//!
//! Roles are inverted: the client binds a TCP listener, publishes its port and a one-time key
//! in the JVM's `replyInfo` file, wakes the JVM through a System V semaphore, and the JVM
//! connects back and authenticates before the command is sent.
//!
//! ## Example
//!
//! ```no_run
//! let response = jattach::attach(4321, jattach::CMD_JCMD, &["VM.version"])?;
//! println!("[{}] code={}", response.jvm_type, response.code);
//! println!("{}", response.output);
//! # Ok::<(), jattach::AttachError>(())
//! ```
//!
//! Attaching requires the client to adopt the target's credentials and, for containers, its
//! namespaces; both are per-thread kernel state, so each attach runs on a dedicated OS thread
//! owned by the library for the duration of the call.

mod cancellation;
mod client;
mod error;
mod ipc;
mod process;
mod protocol;

pub use cancellation::CancellationToken;
pub use client::{
    attach, Client, JvmType, Options, Response, CMD_AGENT_PROPERTIES, CMD_DATA_DUMP,
    CMD_DUMP_HEAP, CMD_INSPECT_HEAP, CMD_JCMD, CMD_LOAD, CMD_PRINT_FLAG, CMD_PROPERTIES,
    CMD_SET_FLAG, CMD_THREAD_DUMP,
};
pub use error::{AttachError, Error, Result};
