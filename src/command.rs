//! RPC opcodes.
//!
//! Every request starts with exactly one [`Command`], sent on the wire as its
//! name (see [`Command::name`]). The set is closed: a name outside it is a
//! protocol error on the receiving side.
//!
//! # Example
//! ```rust
//! use syncwire::Command;
//!
//! let cmd = Command::try_from("TARGET_DELETE").unwrap();
//! assert_eq!(cmd, Command::TargetDelete);
//! assert_eq!(cmd.to_string(), "TARGET_DELETE");
//! ```
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Opens a session; carries the protocol version and session options.
    Connect,
    /// Ends the session; the server closes the connection afterwards.
    Disconnect,
    Ping,
    SourceCreateSyncItems,
    TargetCreateSyncItems,
    SourceChecksum,
    TargetChecksum,
    SourceReadFile,
    TargetCreateDirectory,
    TargetDelete,
    TargetUpdate,
    TargetValidateFile,
    /// The only request followed by data frames (the file contents).
    TargetWriteFile,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::Connect,
        Command::Disconnect,
        Command::Ping,
        Command::SourceCreateSyncItems,
        Command::TargetCreateSyncItems,
        Command::SourceChecksum,
        Command::TargetChecksum,
        Command::SourceReadFile,
        Command::TargetCreateDirectory,
        Command::TargetDelete,
        Command::TargetUpdate,
        Command::TargetValidateFile,
        Command::TargetWriteFile,
    ];

    /// Wire name of the opcode.
    pub fn name(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Disconnect => "DISCONNECT",
            Command::Ping => "PING",
            Command::SourceCreateSyncItems => "SOURCE_CREATE_SYNC_ITEMS",
            Command::TargetCreateSyncItems => "TARGET_CREATE_SYNC_ITEMS",
            Command::SourceChecksum => "SOURCE_CHECKSUM",
            Command::TargetChecksum => "TARGET_CHECKSUM",
            Command::SourceReadFile => "SOURCE_READ_FILE",
            Command::TargetCreateDirectory => "TARGET_CREATE_DIRECTORY",
            Command::TargetDelete => "TARGET_DELETE",
            Command::TargetUpdate => "TARGET_UPDATE",
            Command::TargetValidateFile => "TARGET_VALIDATE_FILE",
            Command::TargetWriteFile => "TARGET_WRITE_FILE",
        }
    }

    /// Whether the request carries data frames after its metadata frame.
    pub fn has_data_frames(self) -> bool {
        self == Command::TargetWriteFile
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Command::ALL
            .into_iter()
            .find(|command| command.name() == value)
            .ok_or_else(|| CommandError::UnrecognizedCommand(value.to_string()))
    }
}
