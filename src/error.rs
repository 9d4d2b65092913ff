//! Error taxonomy for attach operations.
//!
//! Every failure escaping the crate is an [`AttachError`]: the operation
//! name, the target PID, and a classified [`Error`] cause. Inner failures
//! stay reachable through [`std::error::Error::source`] so callers can
//! match on the kind programmatically.

use std::io;

use thiserror::Error;

/// Classified attach failure.
///
/// A JVM return code ≠ 0 is *not* an error: the attach succeeded and the
/// command failed, which is reported through [`Response::code`].
///
/// [`Response::code`]: crate::Response::code
#[derive(Debug, Error)]
pub enum Error {
    /// The target PID is not visible, or it died while the client was
    /// waiting for it.
    #[error("process not found: {0}")]
    ProcessNotFound(String),

    /// The target's effective UID/GID could not be adopted, or a signal
    /// was refused.
    #[error("permission denied: {0}")]
    PermissionDenied(#[source] nix::Error),

    /// Neither protocol's rendezvous artifacts appeared for this process.
    ///
    /// Not produced by the attach engine itself (an unresponsive target
    /// surfaces as [`Error::Timeout`]); front-ends probing for JVM
    /// artifacts report it.
    #[error("not a Java process")]
    NotJavaProcess,

    /// Establishing the rendezvous failed: socket connect or accept
    /// failed, a rendezvous file could not be written, or the handshake
    /// byte pattern did not match.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The HotSpot socket did not appear before the deadline, the OpenJ9
    /// accept deadline fired, or the wait was cancelled.
    #[error("{0}")]
    Timeout(String),

    /// Reserved for `load`-specific response handling in front-ends; the
    /// engine reports a failed agent load as a successful attach with a
    /// non-zero [`Response::code`].
    ///
    /// [`Response::code`]: crate::Response::code
    #[error("target JVM failed to load the agent (code {0})")]
    AgentLoadFailed(i32),

    /// Framing or parsing failed, or the peer closed the stream
    /// prematurely.
    #[error("protocol error: {reason}")]
    ProtocolError {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },
}

impl Error {
    pub(crate) fn connection(reason: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn connection_io(reason: impl Into<String>, source: io::Error) -> Self {
        Error::ConnectionFailed {
            reason: reason.into(),
            source: Some(source),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Error::ProtocolError {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn protocol_io(reason: impl Into<String>, source: io::Error) -> Self {
        Error::ProtocolError {
            reason: reason.into(),
            source: Some(source),
        }
    }
}

/// Error returned by attach operations, wrapping the classified cause
/// with the operation name and the target PID.
#[derive(Debug, Error)]
#[error("jattach: {op} (pid={pid}): {source}")]
pub struct AttachError {
    op: &'static str,
    pid: i32,
    #[source]
    source: Error,
}

impl AttachError {
    pub(crate) fn new(op: &'static str, pid: i32, source: Error) -> Self {
        AttachError { op, pid, source }
    }

    /// The operation that failed.
    pub fn op(&self) -> &str {
        self.op
    }

    /// The target PID.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// The classified cause.
    pub fn cause(&self) -> &Error {
        &self.source
    }
}

pub type Result<T> = std::result::Result<T, AttachError>;
