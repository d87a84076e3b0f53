use crate::{error::ProtocolError, remote::RemoteError};

use super::frame::{ResponseHeader, Status};

/// One part of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Payload bytes, left in the buffer the part was read into.
    Data,
    /// Cumulative progress reported by the peer.
    Progress(u64),
    /// The operation failed; no data parts follow.
    Error(RemoteError),
}

/// Where a client-side exchange stands.
///
/// ```text
/// Idle -> SentRequest -> AwaitingHeader -+-> AwaitingBody ------> Complete
///                                        +-> Streaming ---------> Complete | Raise
///                                        +-> AwaitingErrorBody -> Raise
/// ```
///
/// Only `Complete` and `Raise` leave the connection in a known state. An
/// exchange abandoned anywhere else has unread (or unwritten) bytes on the
/// wire and its connection must be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    SentRequest,
    AwaitingHeader,
    AwaitingBody,
    AwaitingErrorBody,
    Streaming,
    Complete,
    Raise,
}

impl ExchangeState {
    /// The request envelope has been written.
    pub fn sent(self) -> Result<Self, ProtocolError> {
        self.expect(ExchangeState::Idle, ExchangeState::SentRequest)
    }

    /// The request has been flushed to the peer.
    pub fn flushed(self) -> Result<Self, ProtocolError> {
        self.expect(ExchangeState::SentRequest, ExchangeState::AwaitingHeader)
    }

    pub fn header(self, header: &ResponseHeader) -> Result<Self, ProtocolError> {
        if self != ExchangeState::AwaitingHeader {
            return Err(ProtocolError::Unexpected("response header"));
        }
        Ok(match (header.status, header.is_streamed()) {
            (Status::Error, _) => ExchangeState::AwaitingErrorBody,
            (Status::Ok, true) => ExchangeState::Streaming,
            (Status::Ok, false) => ExchangeState::AwaitingBody,
        })
    }

    /// The body, or the finish marker of a stream, has been consumed.
    pub fn body_read(self) -> Result<Self, ProtocolError> {
        match self {
            ExchangeState::AwaitingBody | ExchangeState::Streaming => Ok(ExchangeState::Complete),
            ExchangeState::AwaitingErrorBody => Ok(ExchangeState::Raise),
            _ => Err(ProtocolError::Unexpected("response body")),
        }
    }

    /// An error part and the finish marker after it have been consumed.
    pub fn stream_failed(self) -> Result<Self, ProtocolError> {
        self.expect(ExchangeState::Streaming, ExchangeState::Raise)
    }

    /// Whether the connection can go back to its pool.
    pub fn is_clean(self) -> bool {
        matches!(self, ExchangeState::Complete | ExchangeState::Raise)
    }

    fn expect(self, from: ExchangeState, to: ExchangeState) -> Result<Self, ProtocolError> {
        if self == from {
            Ok(to)
        } else {
            Err(ProtocolError::Unexpected("exchange transition"))
        }
    }
}
