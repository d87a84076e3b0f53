//! Request/response framing.
//!
//! This module defines how a [`Request`] and its response travel over a
//! connection, independent of what carries the bytes. [`ProtocolTransport`]
//! reads and writes the frames over any `Read`/`Write` pair.
//!
//! # Binary Format
//!
//! All integers are big-endian.
//!
//! - A *frame* is an `i32` length followed by that many bytes. A length of `0`
//!   is the *finish marker*.
//! - A request is one metadata frame (the [`Command`](crate::Command) name and
//!   its fixed fields), zero or more data frames, then the finish marker. Only
//!   `TARGET_WRITE_FILE` sends data frames.
//! - A response starts with a header: `i32` status (`0` OK, `1` ERROR) and
//!   `i64` content length.
//!   - ERROR: the body is an encoded [`RemoteError`](crate::remote::RemoteError).
//!   - OK with a length `>= 0`: that many body bytes.
//!   - OK with length [`STREAMED`]: data frames, each one [`Part`] led by a tag
//!     byte (`0` data, `1` progress, `2` error), then the finish marker. An
//!     error part is the last part of its stream.
//!
//! # Exchanges
//!
//! A client drives one request at a time per connection through the
//! [`ExchangeState`] machine. A connection is only reused once its exchange
//! ended in a clean state; anything else leaves unread bytes on the wire.
mod frame;
mod request;
mod response;
mod transport;

pub use frame::{FINISH_MARKER, PROTOCOL_VERSION, PartKind, ResponseHeader, STREAMED, Status};
pub use request::Request;
pub use response::{ExchangeState, Part};
pub use transport::{DEFAULT_MAX_FRAME, ProtocolTransport};
