//! Errors raised by the peer.
//!
//! A failed remote operation comes back as a [`RemoteError`]: the error's type
//! name, message and the stack frames recorded where it happened. On decode
//! the type name is matched against the closed set of [`RemoteErrorKind`]s;
//! names outside the set become [`RemoteErrorKind::Remote`] and keep the
//! original name, message and frames as they were sent.
use std::{fmt, io};

use thiserror::Error;

/// Records a [`StackFrame`] for the enclosing module at the call site.
///
/// ```rust
/// let frame = syncwire::frame!("create_directory");
/// assert_eq!(frame.method, "create_directory");
/// ```
#[macro_export]
macro_rules! frame {
    ($method:expr) => {
        $crate::remote::StackFrame::new(module_path!(), $method, file!(), line!())
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub class: String,
    pub method: String,
    pub file: String,
    pub line: i32,
}

impl StackFrame {
    pub fn new(
        class: impl Into<String>,
        method: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            file: file.into(),
            line: i32::try_from(line).unwrap_or(i32::MAX),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}::{} ({}:{})",
            self.class, self.method, self.file, self.line
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    Io,
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NotADirectory,
    InvalidInput,
    InvalidData,
    Protocol,
    Unsupported,
    /// Type name unknown on this side.
    Remote,
}

impl RemoteErrorKind {
    const KNOWN: [RemoteErrorKind; 9] = [
        RemoteErrorKind::Io,
        RemoteErrorKind::NotFound,
        RemoteErrorKind::PermissionDenied,
        RemoteErrorKind::AlreadyExists,
        RemoteErrorKind::NotADirectory,
        RemoteErrorKind::InvalidInput,
        RemoteErrorKind::InvalidData,
        RemoteErrorKind::Protocol,
        RemoteErrorKind::Unsupported,
    ];

    /// Wire type name; `None` for [`RemoteErrorKind::Remote`], which keeps
    /// whatever name it was decoded with.
    pub fn type_name(self) -> Option<&'static str> {
        match self {
            RemoteErrorKind::Io => Some("IoError"),
            RemoteErrorKind::NotFound => Some("NotFound"),
            RemoteErrorKind::PermissionDenied => Some("PermissionDenied"),
            RemoteErrorKind::AlreadyExists => Some("AlreadyExists"),
            RemoteErrorKind::NotADirectory => Some("NotADirectory"),
            RemoteErrorKind::InvalidInput => Some("InvalidInput"),
            RemoteErrorKind::InvalidData => Some("InvalidData"),
            RemoteErrorKind::Protocol => Some("ProtocolError"),
            RemoteErrorKind::Unsupported => Some("Unsupported"),
            RemoteErrorKind::Remote => None,
        }
    }

    pub fn from_type_name(name: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|kind| kind.type_name() == Some(name))
            .unwrap_or(RemoteErrorKind::Remote)
    }

    fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => RemoteErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => RemoteErrorKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => RemoteErrorKind::AlreadyExists,
            io::ErrorKind::NotADirectory => RemoteErrorKind::NotADirectory,
            io::ErrorKind::InvalidInput => RemoteErrorKind::InvalidInput,
            io::ErrorKind::InvalidData => RemoteErrorKind::InvalidData,
            io::ErrorKind::Unsupported => RemoteErrorKind::Unsupported,
            _ => RemoteErrorKind::Io,
        }
    }

    fn io_kind(self) -> io::ErrorKind {
        match self {
            RemoteErrorKind::NotFound => io::ErrorKind::NotFound,
            RemoteErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            RemoteErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            RemoteErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            RemoteErrorKind::InvalidInput => io::ErrorKind::InvalidInput,
            RemoteErrorKind::InvalidData | RemoteErrorKind::Protocol => {
                io::ErrorKind::InvalidData
            }
            RemoteErrorKind::Unsupported => io::ErrorKind::Unsupported,
            RemoteErrorKind::Io | RemoteErrorKind::Remote => io::ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{type_name}: {message}")]
pub struct RemoteError {
    kind: RemoteErrorKind,
    type_name: String,
    message: String,
    frames: Vec<StackFrame>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: kind.type_name().unwrap_or("RemoteError").to_string(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Rebuilds an error from its wire parts, falling back to
    /// [`RemoteErrorKind::Remote`] for unknown type names.
    pub fn reconstruct(
        type_name: impl Into<String>,
        message: impl Into<String>,
        frames: Vec<StackFrame>,
    ) -> Self {
        let type_name = type_name.into();
        Self {
            kind: RemoteErrorKind::from_type_name(&type_name),
            type_name,
            message: message.into(),
            frames,
        }
    }

    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }
}

impl From<io::Error> for RemoteError {
    fn from(value: io::Error) -> Self {
        RemoteError::new(RemoteErrorKind::from_io(value.kind()), value.to_string())
    }
}

impl From<RemoteError> for io::Error {
    fn from(value: RemoteError) -> Self {
        io::Error::new(value.kind.io_kind(), value)
    }
}
