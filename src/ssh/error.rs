// ABOUTME: Caller-facing SSH error type with stable numeric codes.
// ABOUTME: Transport failures are translated here; no engine error type leaks past it.

use super::options::SshOption;
use crate::transport::{ErrorCode, TransportError};
use std::io;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An option value rejected before it reached the transport.
    #[error("invalid value for {option}: {reason}")]
    Configuration { option: SshOption, reason: String },

    /// Any failure reported by the transport.
    #[error("SSH error {code}: {message}")]
    Protocol { code: i32, message: String },
}

/// Error category for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Option value has the wrong kind or is out of range.
    Configuration,
    /// The transport or the remote refused or failed an operation, or a
    /// buffer window did not fit its buffer.
    Protocol,
    /// Operation on a disconnected session or a closed channel.
    ResourceMisuse,
}

impl Error {
    pub(crate) fn configuration(option: SshOption, reason: impl Into<String>) -> Self {
        Error::Configuration {
            option,
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Protocol {
            code: code.as_i32(),
            message: message.into(),
        }
    }

    pub(crate) fn session_released() -> Self {
        Self::protocol(ErrorCode::InvalidHandle, "session has been disconnected")
    }

    pub(crate) fn channel_closed() -> Self {
        Self::protocol(ErrorCode::InvalidHandle, "channel is closed")
    }

    pub(crate) fn out_of_range(offset: usize, length: usize, capacity: usize) -> Self {
        Self::protocol(
            ErrorCode::InvalidArgument,
            format!(
                "window {}..{} exceeds buffer of {} bytes",
                offset,
                offset.saturating_add(length),
                capacity
            ),
        )
    }

    /// Numeric code. Configuration errors report `InvalidArgument`.
    pub fn code(&self) -> i32 {
        match self {
            Error::Configuration { .. } => ErrorCode::InvalidArgument.as_i32(),
            Error::Protocol { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Configuration { reason, .. } => reason,
            Error::Protocol { message, .. } => message,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Protocol { code, .. } if *code == ErrorCode::InvalidHandle.as_i32() => {
                ErrorKind::ResourceMisuse
            }
            Error::Protocol { .. } => ErrorKind::Protocol,
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Protocol {
            code: err.code.as_i32(),
            message: err.message,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind() {
            ErrorKind::Configuration => io::ErrorKind::InvalidInput,
            ErrorKind::ResourceMisuse => io::ErrorKind::NotConnected,
            ErrorKind::Protocol if err.code() == ErrorCode::TimedOut.as_i32() => {
                io::ErrorKind::TimedOut
            }
            ErrorKind::Protocol => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
