use crate::{codec::CodecError, error::ProtocolError};

/// Zero-length frame closing a request or a streamed response.
pub const FINISH_MARKER: i32 = 0;

/// Content length announcing a streamed response body.
pub const STREAMED: i64 = -1;

/// Sent with `CONNECT`; the server refuses any other value.
pub const PROTOCOL_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl TryFrom<i32> for Status {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Error),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }
}

/// Fixed prefix of every response: `i32` status, `i64` content length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: Status,
    pub content_length: i64,
}

impl ResponseHeader {
    pub fn ok(content_length: i64) -> Self {
        Self {
            status: Status::Ok,
            content_length,
        }
    }

    pub fn streamed() -> Self {
        Self::ok(STREAMED)
    }

    pub fn error(content_length: i64) -> Self {
        Self {
            status: Status::Error,
            content_length,
        }
    }

    pub fn is_streamed(&self) -> bool {
        self.content_length == STREAMED
    }

    /// Size of a fixed body; `None` when the body is streamed.
    pub fn body_len(&self) -> Option<usize> {
        usize::try_from(self.content_length).ok()
    }
}

/// Leading tag byte of a streamed response part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Data = 0,
    Progress = 1,
    Error = 2,
}

impl TryFrom<u8> for PartKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(PartKind::Data),
            1 => Ok(PartKind::Progress),
            2 => Ok(PartKind::Error),
            tag => Err(CodecError::InvalidTag { what: "part", tag }),
        }
    }
}
