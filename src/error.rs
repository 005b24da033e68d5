//! Canonical error and result types for the crate.
//!
//! Failures are classified by kind rather than by source type: the handler
//! recovers recoverable kinds internally by cycling through redirect/retry,
//! and surfaces every non-recoverable kind exactly once through the user
//! callback. No error unwinds through a callback boundary.

use std::io;

use thiserror::Error;

use crate::protocol::ServerErrorCode;

/// Failure taxonomy for request lifecycle operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A required subsystem is absent (for example, no transport).
    #[error("subsystem unavailable: {0}")]
    Uninitialized(&'static str),
    /// Caller-supplied input is malformed or exceeds protocol limits.
    #[error("invalid argument: {0}")]
    InvalidArgs(String),
    /// Transport-reported I/O failure; recoverable when the request still
    /// qualifies for a retry.
    #[error("socket error: {0}")]
    Socket(String),
    /// Malformed or unexpected frame; never recoverable.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Server-originated error response; recoverability is per-code.
    #[error("server error [{code}]: {message}")]
    Server {
        /// Wire value of the server error code.
        code: u32,
        /// Diagnostic text supplied by the server.
        message: String,
    },
    /// The request's absolute deadline passed.
    #[error("request deadline exceeded")]
    Timeout,
    /// The redirect budget for this request is exhausted.
    #[error("redirect limit reached")]
    RedirectLimitReached,
    /// A redirect whose target denotes a local path. Not a failure; routed
    /// to the local-file collaborator when one is configured.
    #[error("redirected to local path: {0}")]
    LocalRedirect(String),
    /// A redirect response carried an URL that could not be parsed.
    #[error("invalid redirect URL: {0}")]
    InvalidRedirectUrl(String),
    /// The requested operation is valid but unsupported in this context.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Build a server error from the decoded `kXR_error` body.
    #[must_use]
    pub fn server(code: u32, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// The typed server error code, when this is a recognised server error.
    #[must_use]
    pub fn server_code(&self) -> Option<ServerErrorCode> {
        match self {
            Self::Server { code, .. } => ServerErrorCode::from_wire(*code),
            _ => None,
        }
    }

    /// Whether the failure may be recovered by retrying the request at
    /// another endpoint.
    ///
    /// Only transport failures and a subset of server error codes qualify;
    /// protocol errors, timeouts and argument errors never do.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Socket(_) => true,
            Self::Server { .. } => self
                .server_code()
                .is_some_and(ServerErrorCode::is_recoverable),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self { Self::Socket(value.to_string()) }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
