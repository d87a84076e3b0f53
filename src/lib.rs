//! Directory synchronization over a transport-independent binary RPC layer.
//!
//! The sync engine drives a [`binding::Sender`] and a [`binding::Receiver`];
//! either can live in-process ([`binding::LocalPeer`]) or behind a TCP
//! connection to a [`binding::SyncServer`].
pub mod binding;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod item;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod remote;

pub use command::{Command, CommandError};
pub use error::{ProtocolError, Result, SyncError, TransportError};
pub use item::{EmptyPathError, Options, OptionsBuilder, PathFilter, Principal, SyncItem};
pub use registry::Registry;
pub use remote::{RemoteError, RemoteErrorKind, StackFrame};
