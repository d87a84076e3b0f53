use crate::{
    Command,
    codec::{ByteSink, ByteSource, CodecError},
    item::{Options, PathFilter, SyncItem},
    registry::Registry,
};

/// Metadata frame of a request: the opcode and its fixed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect {
        version: i32,
        options: Options,
    },
    Disconnect,
    Ping,
    SourceCreateSyncItems {
        root: String,
        follow_sym_links: bool,
        filter: PathFilter,
    },
    TargetCreateSyncItems {
        root: String,
        follow_sym_links: bool,
        filter: PathFilter,
    },
    SourceChecksum {
        root: String,
        path: String,
    },
    TargetChecksum {
        root: String,
        path: String,
    },
    SourceReadFile {
        base_dir: String,
        file: String,
        size: u64,
    },
    TargetCreateDirectory {
        root: String,
        item: SyncItem,
    },
    TargetDelete {
        root: String,
        item: SyncItem,
    },
    TargetUpdate {
        root: String,
        item: SyncItem,
    },
    TargetValidateFile {
        root: String,
        item: SyncItem,
    },
    /// Followed by data frames holding `size` bytes of file content.
    TargetWriteFile {
        base_dir: String,
        file: String,
        size: u64,
    },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Connect { .. } => Command::Connect,
            Request::Disconnect => Command::Disconnect,
            Request::Ping => Command::Ping,
            Request::SourceCreateSyncItems { .. } => Command::SourceCreateSyncItems,
            Request::TargetCreateSyncItems { .. } => Command::TargetCreateSyncItems,
            Request::SourceChecksum { .. } => Command::SourceChecksum,
            Request::TargetChecksum { .. } => Command::TargetChecksum,
            Request::SourceReadFile { .. } => Command::SourceReadFile,
            Request::TargetCreateDirectory { .. } => Command::TargetCreateDirectory,
            Request::TargetDelete { .. } => Command::TargetDelete,
            Request::TargetUpdate { .. } => Command::TargetUpdate,
            Request::TargetValidateFile { .. } => Command::TargetValidateFile,
            Request::TargetWriteFile { .. } => Command::TargetWriteFile,
        }
    }

    pub fn encode(&self, registry: &Registry, sink: &mut dyn ByteSink) -> Result<(), CodecError> {
        registry.encode(&self.command(), sink)?;

        match self {
            Request::Connect { version, options } => {
                sink.write_i32(*version)?;
                registry.encode(options, sink)
            }
            Request::Disconnect | Request::Ping => Ok(()),
            Request::SourceCreateSyncItems {
                root,
                follow_sym_links,
                filter,
            }
            | Request::TargetCreateSyncItems {
                root,
                follow_sym_links,
                filter,
            } => {
                sink.write_string(root)?;
                sink.write_bool(*follow_sym_links)?;
                registry.encode(filter, sink)
            }
            Request::SourceChecksum { root, path } | Request::TargetChecksum { root, path } => {
                sink.write_string(root)?;
                sink.write_string(path)
            }
            Request::SourceReadFile {
                base_dir,
                file,
                size,
            }
            | Request::TargetWriteFile {
                base_dir,
                file,
                size,
            } => {
                sink.write_string(base_dir)?;
                sink.write_string(file)?;
                sink.write_i64(wire_size(*size)?)
            }
            Request::TargetCreateDirectory { root, item }
            | Request::TargetDelete { root, item }
            | Request::TargetUpdate { root, item }
            | Request::TargetValidateFile { root, item } => {
                sink.write_string(root)?;
                registry.encode(item, sink)
            }
        }
    }

    pub fn decode(registry: &Registry, source: &mut dyn ByteSource) -> Result<Self, CodecError> {
        let command: Command = registry.decode(source)?;

        let request = match command {
            Command::Connect => Request::Connect {
                version: source.read_i32()?,
                options: registry.decode(source)?,
            },
            Command::Disconnect => Request::Disconnect,
            Command::Ping => Request::Ping,
            Command::SourceCreateSyncItems => Request::SourceCreateSyncItems {
                root: source.read_string()?,
                follow_sym_links: source.read_bool()?,
                filter: registry.decode(source)?,
            },
            Command::TargetCreateSyncItems => Request::TargetCreateSyncItems {
                root: source.read_string()?,
                follow_sym_links: source.read_bool()?,
                filter: registry.decode(source)?,
            },
            Command::SourceChecksum => Request::SourceChecksum {
                root: source.read_string()?,
                path: source.read_string()?,
            },
            Command::TargetChecksum => Request::TargetChecksum {
                root: source.read_string()?,
                path: source.read_string()?,
            },
            Command::SourceReadFile => Request::SourceReadFile {
                base_dir: source.read_string()?,
                file: source.read_string()?,
                size: read_size(source)?,
            },
            Command::TargetWriteFile => Request::TargetWriteFile {
                base_dir: source.read_string()?,
                file: source.read_string()?,
                size: read_size(source)?,
            },
            Command::TargetCreateDirectory => Request::TargetCreateDirectory {
                root: source.read_string()?,
                item: registry.decode(source)?,
            },
            Command::TargetDelete => Request::TargetDelete {
                root: source.read_string()?,
                item: registry.decode(source)?,
            },
            Command::TargetUpdate => Request::TargetUpdate {
                root: source.read_string()?,
                item: registry.decode(source)?,
            },
            Command::TargetValidateFile => Request::TargetValidateFile {
                root: source.read_string()?,
                item: registry.decode(source)?,
            },
        };
        Ok(request)
    }
}

fn wire_size(size: u64) -> Result<i64, CodecError> {
    i64::try_from(size).map_err(|_| CodecError::TooLarge {
        len: usize::try_from(size).unwrap_or(usize::MAX),
        limit: i64::MAX as usize,
    })
}

fn read_size(source: &mut dyn ByteSource) -> Result<u64, CodecError> {
    let size = source.read_i64()?;
    u64::try_from(size).map_err(|_| CodecError::NegativeSize(size))
}
