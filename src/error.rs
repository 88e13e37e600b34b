// Jackson Coxson
//! Crate-wide error taxonomy.
//!
//! Mirrors the layering `spec.md` §7 describes: low-level command failures
//! (C1), device-operation failures carrying an optional [`Remedy`] (C4),
//! and a few protocol-specific variants for the GDB-RSP (C7) and
//! Web Inspector (C9/C10) channels. Composed into one top-level
//! [`OrchestratorError`] the way the teacher's `IdeviceError` composes
//! transport/TLS/plist failures into one flat enum, except layered instead
//! of flat so a caller can match on "this was a command problem" versus
//! "this was a device problem" without string-sniffing.

use std::path::PathBuf;

use crate::command::{Command, CommandResult};
use crate::model::Udid;

/// Recovery hint attached to a [`DeviceError`].
///
/// A remedy is *never* applied automatically by the layer that raises the
/// error — per spec.md §9, it is a hint consumed by a caller-supplied
/// retry handler (see [`crate::retry`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Remedy {
    DismissDialog,
    ReinstallApp,
    RestartDevice,
}

/// All device-operation failures (C4).
#[derive(thiserror::Error, Debug)]
#[error("device {udid} error: {message}")]
pub struct DeviceError {
    pub udid: Udid,
    pub message: String,
    #[source]
    pub cause: Option<Box<OrchestratorError>>,
    pub remedy: Option<Remedy>,
}

/// Compares identity, not cause chains — `cause` wraps [`OrchestratorError`],
/// which carries non-comparable sources like `std::io::Error`. Used by
/// [`crate::retry::Retrier`] to recognise a handler that raises back the
/// same error it was given.
impl PartialEq for DeviceError {
    fn eq(&self, other: &Self) -> bool {
        self.udid == other.udid && self.message == other.message && self.remedy == other.remedy
    }
}

impl DeviceError {
    pub fn new(udid: Udid, message: impl Into<String>) -> Self {
        Self {
            udid,
            message: message.into(),
            cause: None,
            remedy: None,
        }
    }

    pub fn with_remedy(mut self, remedy: Remedy) -> Self {
        self.remedy = Some(remedy);
        self
    }

    pub fn with_cause(mut self, cause: OrchestratorError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Failures raised by the command engine (C1).
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("failed to start `{0:?}`")]
    StartFailure(Command, #[source] std::io::Error),

    #[error("`{0:?}` exited without satisfying its success predicate: {}", .1.stderr())]
    CommandFailure(Command, CommandResult),

    #[error("command timed out before exit")]
    Timeout,

    #[error("operation was cancelled")]
    Cancellation,

    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Failures raised by the GDB remote serial protocol client (C7).
#[derive(thiserror::Error, Debug)]
pub enum DebugProxyError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("unexpected reply to `{sent}`: `{got}`")]
    UnexpectedReply { sent: String, got: String },

    #[error("no ack received within the allotted reads")]
    NoAck,

    #[error("app reported a crash (T packet): {0}")]
    RemoteCrash(String),

    #[error("read buffer overflowed the bound")]
    BufferOverflow,

    #[error("read timed out")]
    Timeout,

    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Failures raised by the Web Inspector framing/client layer (C9/C10).
#[derive(thiserror::Error, Debug)]
pub enum InspectorError {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("plist codec error")]
    Plist(#[from] plist::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("accessed an undeclared field `{0}` for selector `{1}`")]
    UndefinedProperty(&'static str, &'static str),

    #[error("unknown selector string `{0}`")]
    UnknownSelector(String),

    #[error("sendMessage called before startListening, or after close")]
    NotStarted,

    #[error("startListening called twice")]
    AlreadyStarted,

    #[error("close called twice")]
    AlreadyClosed,
}

/// The developer-disk-image resolver's failure modes (C8).
#[derive(thiserror::Error, Debug)]
pub enum DevImageError {
    #[error("no candidate directory under {root:?} matched version {version} with a prefix of at least 2 tokens")]
    NoMatch { root: PathBuf, version: String },

    #[error("directory {0:?} does not contain exactly one .dmg and one .signature file")]
    MalformedImageDir(PathBuf),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Top-level error composing every failure domain in the crate.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum OrchestratorError {
    #[error("command engine error")]
    Command(#[from] CommandError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("debug proxy error")]
    DebugProxy(#[from] DebugProxyError),

    #[error("web inspector error")]
    Inspector(#[from] InspectorError),

    #[error("developer disk image resolution error")]
    DevImage(#[from] DevImageError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("plist codec error")]
    Plist(#[from] plist::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Extracts the [`Remedy`] carried by a [`DeviceError`], if any.
    pub fn remedy(&self) -> Option<Remedy> {
        match self {
            OrchestratorError::Device(e) => e.remedy,
            _ => None,
        }
    }
}
