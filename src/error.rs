//! Error taxonomy of the RPC layer.
//!
//! A caller can tell three situations apart:
//!
//! - [`SyncError::Transport`]: the peer could not be reached or the connection
//!   broke mid-exchange (reset, truncated frame, pool exhausted).
//! - [`SyncError::Protocol`]: bytes arrived but could not be interpreted
//!   (unknown opcode, bad frame length, malformed payload). The connection is
//!   not reused.
//! - [`SyncError::Application`]: the peer ran the operation and it failed. The
//!   exchange completed cleanly; the connection goes back to its pool.
use std::io;

use thiserror::Error;

use crate::{codec::CodecError, pool::PoolError, remote::RemoteError};

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame truncated: connection closed mid-message")]
    Truncated,

    #[error("not connected")]
    NotConnected,

    #[error("could not resolve address '{0}'")]
    Unresolved(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Codec(CodecError),

    #[error("invalid frame length {0}")]
    InvalidFrameLength(i32),

    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("invalid response status {0}")]
    InvalidStatus(i32),

    #[error("invalid content length {0}")]
    InvalidContentLength(i64),

    #[error("unexpected {0}")]
    Unexpected(&'static str),

    #[error("unsupported protocol version {0}")]
    Version(i32),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("remote error: {0}")]
    Application(#[from] RemoteError),
}

impl SyncError {
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, SyncError::Protocol(_))
    }

    /// The peer's error, when the failure is an application error.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Application(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for SyncError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::Eof => TransportError::Truncated.into(),
            CodecError::Io(e) => TransportError::Io(e).into(),
            other => ProtocolError::Codec(other).into(),
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(value: io::Error) -> Self {
        TransportError::Io(value).into()
    }
}

impl From<PoolError> for SyncError {
    fn from(value: PoolError) -> Self {
        TransportError::Pool(value).into()
    }
}

impl From<SyncError> for io::Error {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Application(remote) => remote.into(),
            SyncError::Transport(TransportError::Io(e)) => e,
            SyncError::Protocol(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::remote::RemoteErrorKind;

    use super::*;

    #[test]
    fn eof_is_truncation() {
        let err: SyncError = CodecError::Eof.into();

        assert!(matches!(
            err,
            SyncError::Transport(TransportError::Truncated)
        ));
    }

    #[test]
    fn malformed_payload_is_protocol_error() {
        let err: SyncError = CodecError::InvalidBool(9).into();

        assert!(err.is_protocol());
        assert!(!err.is_transport());
    }

    #[test]
    fn application_error_exposes_remote() {
        let err: SyncError = RemoteError::new(RemoteErrorKind::NotFound, "gone").into();

        assert_eq!(err.remote().map(|r| r.message()), Some("gone"));
        assert_eq!(io::Error::from(err).kind(), io::ErrorKind::NotFound);
    }
}
