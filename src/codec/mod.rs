//! Byte sink/source adapters.
//!
//! Every wire codec is written once against [`ByteSink`] and [`ByteSource`],
//! which only know how to move primitive values. Three adapters let the same
//! codecs run over any medium:
//!
//! - [`PooledBuffer`](crate::pool::PooledBuffer): in-memory, used to build and
//!   parse frame payloads.
//! - [`ChannelSink`]/[`ChannelSource`]: a buffer attached to one half of a
//!   socket, flushed and refilled on demand.
//! - [`StreamSink`]/[`StreamSource`]: unbuffered, over any `Write`/`Read`.
//!
//! All integers are big-endian. Variable-length values carry an `i32` length
//! prefix.
mod buffer;
mod channel;
mod stream;

use std::{io, string::FromUtf8Error};

use thiserror::Error;

use crate::item::EmptyPathError;

pub use channel::{ChannelSink, ChannelSource};
pub use stream::{StreamSink, StreamSource};

/// Upper bound on a single length-prefixed field.
pub const MAX_FIELD_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    Eof,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),

    #[error("negative length {0}")]
    NegativeLength(i32),

    #[error("negative size {0}")]
    NegativeSize(i64),

    #[error("length {len} exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },

    #[error("string is not valid utf-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },

    #[error("sync item has an empty relative path")]
    EmptyPath,
}

impl From<EmptyPathError> for CodecError {
    fn from(_: EmptyPathError) -> Self {
        CodecError::EmptyPath
    }
}

impl CodecError {
    /// Whether the failure came from the underlying medium rather than the
    /// bytes themselves.
    pub fn is_transport(&self) -> bool {
        matches!(self, CodecError::Eof | CodecError::Io(_))
    }
}

/// Somewhere primitive values can be written.
pub trait ByteSink {
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError>;

    fn flush(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_raw(&[value])
    }

    fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.write_u8(u8::from(value))
    }

    fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.write_raw(&value.to_be_bytes())
    }

    fn write_i64(&mut self, value: i64) -> Result<(), CodecError> {
        self.write_raw(&value.to_be_bytes())
    }

    /// Writes `bytes` behind an `i32` length prefix.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = i32::try_from(bytes.len()).map_err(|_| CodecError::TooLarge {
            len: bytes.len(),
            limit: i32::MAX as usize,
        })?;
        self.write_i32(len)?;
        self.write_raw(bytes)
    }

    fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_bytes(value.as_bytes())
    }
}

/// Somewhere primitive values can be read from.
pub trait ByteSource {
    /// Fills `buf` completely or fails with [`CodecError::Eof`].
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), CodecError>;

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let mut byte = [0; 1];
        self.read_raw(&mut byte)?;
        Ok(byte[0])
    }

    fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        let mut bytes = [0; 4];
        self.read_raw(&mut bytes)?;
        Ok(i32::from_be_bytes(bytes))
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        let mut bytes = [0; 8];
        self.read_raw(&mut bytes)?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Reads an `i32` length prefix, rejecting negative or oversized values.
    fn read_len(&mut self) -> Result<usize, CodecError> {
        let len = self.read_i32()?;
        let len = usize::try_from(len).map_err(|_| CodecError::NegativeLength(len))?;
        if len > MAX_FIELD_LENGTH {
            return Err(CodecError::TooLarge {
                len,
                limit: MAX_FIELD_LENGTH,
            });
        }
        Ok(len)
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_len()?;
        let mut bytes = vec![0; len];
        self.read_raw(&mut bytes)?;
        Ok(bytes)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        Ok(String::from_utf8(self.read_bytes()?)?)
    }
}
