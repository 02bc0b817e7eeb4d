//! The error taxonomy exposed by the client, matching the failure modes a
//! caller can actually distinguish and act on.

use std::time::Duration;

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A local validation failure; no RPC was attempted.
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),

    /// The transport could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// An RPC or the health gate did not complete within its deadline.
    /// `None` when the sidecar reported `DEADLINE_EXCEEDED` directly, since a
    /// `tonic::Status` carries no elapsed-time information to report.
    #[error("deadline exceeded: {0:?}")]
    DeadlineExceeded(Option<Duration>),

    /// The sidecar returned a gRPC error status.
    #[error("sidecar error [{code:?}]: {message}")]
    Sidecar {
        code: tonic::Code,
        message: String,
        details: Vec<u8>,
    },

    /// An operation was attempted against a closed or not-yet-active
    /// subscription.
    #[error("stream is not active")]
    StreamInactive,

    /// The stream was terminated by a cancellation signal.
    #[error("stream cancelled")]
    StreamCancelled,

    /// A crypto response stream had a sequence gap or ended prematurely.
    #[error("crypto stream error: {0}")]
    CryptoStream(String),

    /// A save/delete/transaction operation failed on the sidecar.
    #[error("state error: {0}")]
    State(#[source] Box<Error>),

    /// `unlock` failed for a reason other than lock contention.
    #[error("lock error: {0}")]
    Lock(String),
}

impl Error {
    pub fn argument_invalid(msg: impl Into<String>) -> Self {
        Self::ArgumentInvalid(msg.into())
    }

    /// True when this error represents the sidecar status `ABORTED`, the
    /// status used for an etag mismatch on a conditional write. Looks
    /// through `Error::State`, since state operations wrap their underlying
    /// sidecar error rather than surfacing it directly.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        match self {
            Error::Sidecar {
                code: tonic::Code::Aborted,
                ..
            } => true,
            Error::State(inner) => inner.is_aborted(),
            _ => false,
        }
    }

    /// True when this error represents the sidecar status `UNIMPLEMENTED`.
    #[must_use]
    pub fn is_unimplemented(&self) -> bool {
        matches!(
            self,
            Error::Sidecar {
                code: tonic::Code::Unimplemented,
                ..
            }
        )
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::DeadlineExceeded => Error::DeadlineExceeded(None),
            tonic::Code::Cancelled => Error::StreamCancelled,
            code => Error::Sidecar {
                code,
                message: status.message().to_owned(),
                details: status.details().to_vec(),
            },
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
