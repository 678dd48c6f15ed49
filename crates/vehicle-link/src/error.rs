//! Error types for the vehicle link.
//!
//! Each concern owns a small `thiserror` enum; [`Error`] gathers them for
//! callers that only want one type to propagate.

use std::path::PathBuf;
use std::time::Duration;

use crate::codec::MessageKind;

/// Failure reported by a [`Transport`](crate::gate::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint went away between the readiness check and the write.
    #[error("transport endpoint detached")]
    Detached,
    /// The underlying write failed.
    #[error("transport write failed: {0}")]
    Write(String),
}

/// Failure decoding a wire frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("unknown direction {0}")]
    UnknownDirection(u8),
}

/// Outcome classification for a protocol exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// No channel is bound, or the bound channel is not attached.
    #[error("channel not ready")]
    ChannelNotReady,
    #[error("send failed: {0}")]
    SendFailed(#[from] TransportError),
    /// No matching response arrived within the wait budget.
    #[error("{kind} timed out after {waited:?}")]
    Timeout { kind: MessageKind, waited: Duration },
    /// The remote answered with a nonzero return code.
    #[error("{kind} rejected by remote with code {code}")]
    RemoteRejected { kind: MessageKind, code: u8 },
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),
}

impl ProtocolError {
    /// Remote return code carried by a rejection, if any.
    #[must_use]
    pub const fn remote_code(&self) -> Option<u8> {
        match self {
            Self::RemoteRejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Logging initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Rejected input to the dummy hardware backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DummyError {
    #[error("invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: u32 },
}

/// Top-level error for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Dummy(#[from] DummyError),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Self::Protocol(ProtocolError::SendFailed(err))
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Self::Protocol(ProtocolError::MalformedFrame(err))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_converts_to_send_failed() {
        let err: ProtocolError = TransportError::Detached.into();
        assert_eq!(err, ProtocolError::SendFailed(TransportError::Detached));
    }

    #[test]
    fn rejected_message_names_kind_and_code() {
        let err = ProtocolError::RemoteRejected {
            kind: MessageKind::Control,
            code: 7,
        };
        assert_eq!(err.to_string(), "CONTROL rejected by remote with code 7");
    }

    #[test]
    fn frame_error_lifts_into_top_level() {
        let err: Error = FrameError::UnknownKind(42).into();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MalformedFrame(FrameError::UnknownKind(42)))
        ));
    }
}
