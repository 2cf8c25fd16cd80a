use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error taxonomy for the call-control layer.
///
/// Each variant maps to one failure domain named in the design notes:
/// usage/config errors abort startup, protocol/auth/hunt failures are
/// per-call and recoverable, callback errors are logged and swallowed
/// (except the fatal-exit sentinel), and programmer errors indicate an
/// invariant the code itself is supposed to guarantee.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Bad CLI arguments or an unrecognized `--long=value` flag.
    #[error("usage error: {0}")]
    UsageError(String),
    /// A config file is present but malformed, or a required key is missing.
    #[error("config error: {0}")]
    ConfigError(String),
    /// A peer sent a message this implementation cannot act on.
    #[error("protocol error: {0}")]
    ProtocolError(String),
    /// RADIUS or digest authentication rejected the request.
    #[error("auth failure: {0}")]
    AuthFailure(String),
    /// Every route in the hunt list was exhausted without success.
    #[error("hunt failure: all routes exhausted ({attempted} attempted)")]
    HuntFailure { attempted: usize },
    /// A user-supplied callback panicked or returned an error; logged and
    /// the call proceeds unless `fatal` is set, in which case the
    /// dispatcher loop is told to stop.
    #[error("callback error: {message}")]
    CallbackError { message: String, fatal: bool },
    /// An invariant the code is supposed to maintain was violated. Always
    /// a bug, never a runtime condition a caller can recover from.
    #[error("programmer error: {0}")]
    ProgrammerError(String),
}

impl DomainError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DomainError::CallbackError { fatal: true, .. })
    }
}

/// Canonical category for a call-leg failure, independent of the message
/// text. Used for accounting disconnect-cause mapping and for deciding
/// whether a route is worth retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport-level failure (no response, connection refused).
    Transport,
    /// Peer returned a final non-2xx SIP response.
    SipFailure,
    /// Authentication/authorization was rejected.
    Auth,
    /// A configured timer (no-reply, no-progress, group, session) fired.
    Timeout,
    /// The call was torn down by an explicit local or remote BYE/CANCEL.
    Disconnected,
    /// Catch-all for conditions that do not fit the above.
    Uncategorized,
}

/// Structured per-call error, following the same `kind`/`message`/`detail`
/// shape used throughout this workspace for anything that needs to be both
/// pattern-matched on and displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(ref detail) = self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}
