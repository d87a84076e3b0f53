use crate::{
    Command,
    codec::{ByteSink, ByteSource, CodecError},
    item::{Options, PathFilter, Principal, SyncItem},
    remote::{RemoteError, StackFrame},
};

use super::{Codec, Registry};

pub(super) fn register_builtins(registry: &mut Registry) {
    registry
        .register(BoolCodec)
        .register(I32Codec)
        .register(I64Codec)
        .register(StringCodec)
        .register(OptionalStringCodec)
        .register(CommandCodec)
        .register(OptionsCodec)
        .register(PrincipalCodec)
        .register(SyncItemCodec)
        .register(PathFilterCodec)
        .register(RemoteErrorCodec);
}

/// One byte, `1` or `0`.
pub struct BoolCodec;

impl Codec<bool> for BoolCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &bool,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        sink.write_bool(*value)
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<bool, CodecError> {
        source.read_bool()
    }
}

pub struct I32Codec;

impl Codec<i32> for I32Codec {
    fn encode(&self, _: &Registry, value: &i32, sink: &mut dyn ByteSink) -> Result<(), CodecError> {
        sink.write_i32(*value)
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<i32, CodecError> {
        source.read_i32()
    }
}

pub struct I64Codec;

impl Codec<i64> for I64Codec {
    fn encode(&self, _: &Registry, value: &i64, sink: &mut dyn ByteSink) -> Result<(), CodecError> {
        sink.write_i64(*value)
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<i64, CodecError> {
        source.read_i64()
    }
}

/// `i32` byte length, then UTF-8 bytes.
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &String,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        sink.write_string(value)
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<String, CodecError> {
        source.read_string()
    }
}

/// Presence byte, then the string when present. Keeps an absent value
/// distinct from an empty one.
pub struct OptionalStringCodec;

impl Codec<Option<String>> for OptionalStringCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &Option<String>,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        write_optional(sink, value.as_ref(), |sink, value| sink.write_string(value))
    }

    fn decode(
        &self,
        _: &Registry,
        source: &mut dyn ByteSource,
    ) -> Result<Option<String>, CodecError> {
        read_optional(source, |source| source.read_string())
    }
}

/// The opcode's name as a string.
pub struct CommandCodec;

impl Codec<Command> for CommandCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &Command,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        sink.write_string(value.name())
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<Command, CodecError> {
        let name = source.read_string()?;
        Command::try_from(name.as_str()).map_err(|_| CodecError::UnknownCommand(name))
    }
}

/// Four flag bytes: checksum, delete, dry run, follow symlinks.
pub struct OptionsCodec;

impl Codec<Options> for OptionsCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &Options,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        sink.write_bool(value.checksum())?;
        sink.write_bool(value.delete())?;
        sink.write_bool(value.dry_run())?;
        sink.write_bool(value.follow_sym_links())
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<Options, CodecError> {
        Ok(Options::builder()
            .checksum(source.read_bool()?)
            .delete(source.read_bool()?)
            .dry_run(source.read_bool()?)
            .follow_sym_links(source.read_bool()?)
            .build())
    }
}

/// `i32` id, then the name.
pub struct PrincipalCodec;

impl Codec<Principal> for PrincipalCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &Principal,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        sink.write_i32(value.id)?;
        sink.write_string(&value.name)
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<Principal, CodecError> {
        let id = source.read_i32()?;
        let name = source.read_string()?;
        Ok(Principal { name, id })
    }
}

pub struct SyncItemCodec;

impl Codec<SyncItem> for SyncItemCodec {
    fn encode(
        &self,
        registry: &Registry,
        value: &SyncItem,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        let size = i64::try_from(value.size()).map_err(|_| CodecError::TooLarge {
            len: usize::try_from(value.size()).unwrap_or(usize::MAX),
            limit: i64::MAX as usize,
        })?;

        sink.write_string(value.relative_path())?;
        sink.write_bool(value.is_file())?;
        sink.write_i64(size)?;
        sink.write_i64(value.last_modified())?;
        write_optional(sink, value.permissions(), |sink, p| sink.write_string(p))?;

        let principals = registry.codec::<Principal>();
        write_optional(sink, value.group(), |sink, g| principals.encode(registry, g, sink))?;
        write_optional(sink, value.user(), |sink, u| principals.encode(registry, u, sink))?;
        write_optional(sink, value.checksum(), |sink, c| sink.write_string(c))
    }

    fn decode(
        &self,
        registry: &Registry,
        source: &mut dyn ByteSource,
    ) -> Result<SyncItem, CodecError> {
        let relative_path = source.read_string()?;
        let is_file = source.read_bool()?;
        let size = source.read_i64()?;
        let size = u64::try_from(size).map_err(|_| CodecError::NegativeSize(size))?;
        let last_modified = source.read_i64()?;
        let mut item = SyncItem::new(relative_path, is_file, size, last_modified)?;

        let principals = registry.codec::<Principal>();
        if let Some(permissions) = read_optional(source, |s| s.read_string())? {
            item = item.with_permissions(permissions);
        }
        if let Some(group) = read_optional(source, |s| principals.decode(registry, s))? {
            item = item.with_group(group);
        }
        if let Some(user) = read_optional(source, |s| principals.decode(registry, s))? {
            item = item.with_user(user);
        }
        if let Some(checksum) = read_optional(source, |s| s.read_string())? {
            item = item.with_checksum(checksum);
        }
        Ok(item)
    }
}

/// Directory names then file suffixes, each as an `i32` count followed by
/// the strings in sorted order.
pub struct PathFilterCodec;

impl Codec<PathFilter> for PathFilterCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &PathFilter,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        for set in [value.excluded_dirs(), value.excluded_suffixes()] {
            let mut names = set.iter().collect::<Vec<_>>();
            names.sort();
            let count = i32::try_from(names.len()).map_err(|_| CodecError::TooLarge {
                len: names.len(),
                limit: i32::MAX as usize,
            })?;
            sink.write_i32(count)?;
            for name in names {
                sink.write_string(name)?;
            }
        }
        Ok(())
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<PathFilter, CodecError> {
        let mut filter = PathFilter::new();
        for _ in 0..source.read_len()? {
            filter = filter.exclude_dir(source.read_string()?);
        }
        for _ in 0..source.read_len()? {
            filter = filter.exclude_suffix(source.read_string()?);
        }
        Ok(filter)
    }
}

/// Type name, message, `i32` frame count, then each frame as class, method,
/// file and `i32` line.
pub struct RemoteErrorCodec;

impl Codec<RemoteError> for RemoteErrorCodec {
    fn encode(
        &self,
        _: &Registry,
        value: &RemoteError,
        sink: &mut dyn ByteSink,
    ) -> Result<(), CodecError> {
        let frames = value.frames();
        let count = i32::try_from(frames.len()).map_err(|_| CodecError::TooLarge {
            len: frames.len(),
            limit: i32::MAX as usize,
        })?;

        sink.write_string(value.type_name())?;
        sink.write_string(value.message())?;
        sink.write_i32(count)?;
        for frame in frames {
            sink.write_string(&frame.class)?;
            sink.write_string(&frame.method)?;
            sink.write_string(&frame.file)?;
            sink.write_i32(frame.line)?;
        }
        Ok(())
    }

    fn decode(&self, _: &Registry, source: &mut dyn ByteSource) -> Result<RemoteError, CodecError> {
        let type_name = source.read_string()?;
        let message = source.read_string()?;
        let count = source.read_len()?;

        // Each frame takes at least 16 bytes, so don't trust `count` for the allocation.
        let mut frames = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            frames.push(StackFrame {
                class: source.read_string()?,
                method: source.read_string()?,
                file: source.read_string()?,
                line: source.read_i32()?,
            });
        }
        Ok(RemoteError::reconstruct(type_name, message, frames))
    }
}

fn write_optional<T: ?Sized>(
    sink: &mut dyn ByteSink,
    value: Option<&T>,
    write: impl FnOnce(&mut dyn ByteSink, &T) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    match value {
        Some(value) => {
            sink.write_bool(true)?;
            write(sink, value)
        }
        None => sink.write_bool(false),
    }
}

fn read_optional<T>(
    source: &mut dyn ByteSource,
    read: impl FnOnce(&mut dyn ByteSource) -> Result<T, CodecError>,
) -> Result<Option<T>, CodecError> {
    if source.read_bool()? {
        read(source).map(Some)
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{
        codec::{ChannelSink, ChannelSource, StreamSink, StreamSource},
        pool::PooledBuffer,
        remote::RemoteErrorKind,
    };

    use super::*;

    fn full_item() -> SyncItem {
        SyncItem::file("docs/readme.md", 4096, 1_700_000_000_123)
            .unwrap()
            .with_permissions("rw-r--r--")
            .with_group(Principal::new("staff", 20))
            .with_user(Principal::new("alice", 501))
            .with_checksum("d41d8cd98f00b204e9800998ecf8427e")
    }

    /// Encodes through every adapter and decodes through its counterpart.
    fn round_trip<T: 'static + PartialEq + std::fmt::Debug>(value: &T) {
        let registry = Registry::standard();

        let mut buffer = PooledBuffer::with_capacity(0);
        registry.encode(value, &mut buffer).unwrap();
        assert_eq!(&registry.decode::<T>(&mut buffer).unwrap(), value);
        assert!(buffer.is_empty());

        let mut sink = StreamSink::new(Vec::new());
        registry.encode(value, &mut sink).unwrap();
        let mut source = StreamSource::new(Cursor::new(sink.into_inner()));
        assert_eq!(&registry.decode::<T>(&mut source).unwrap(), value);

        let mut sink = ChannelSink::new(Vec::new(), 7);
        registry.encode(value, &mut sink).unwrap();
        let mut source = ChannelSource::new(Cursor::new(sink.into_inner().unwrap()), 3);
        assert_eq!(&registry.decode::<T>(&mut source).unwrap(), value);
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(&true);
        round_trip(&i32::MIN);
        round_trip(&i64::MAX);
        round_trip(&String::from("ünïcode"));
        round_trip(&Some(String::new()));
        round_trip(&None::<String>);
    }

    #[test]
    fn domain_values_round_trip() {
        round_trip(&Command::TargetValidateFile);
        round_trip(&Options::builder().delete(true).follow_sym_links(true).build());
        round_trip(&Principal::new("wheel", 0));
        round_trip(&full_item());
        round_trip(&SyncItem::directory("docs", -5).unwrap());
        round_trip(&PathFilter::new().exclude_dir("target").exclude_suffix(".o"));
    }

    #[test]
    fn absent_fields_stay_absent() {
        let registry = Registry::standard();
        let item = SyncItem::file("a", 1, 2).unwrap().with_checksum("");
        let mut buffer = PooledBuffer::with_capacity(0);

        registry.encode(&item, &mut buffer).unwrap();
        let decoded: SyncItem = registry.decode(&mut buffer).unwrap();

        assert_eq!(decoded.checksum(), Some(""));
        assert_eq!(decoded.permissions(), None);
        assert_eq!(decoded.group(), None);
        assert_eq!(decoded.user(), None);
    }

    #[test]
    fn options_are_four_flag_bytes() {
        let registry = Registry::standard();
        let options = Options::builder().checksum(true).dry_run(true).build();
        let mut buffer = PooledBuffer::with_capacity(0);

        registry.encode(&options, &mut buffer).unwrap();

        assert_eq!(buffer.readable(), &[1, 0, 1, 0]);
    }

    #[test]
    fn principal_writes_id_first() {
        let registry = Registry::standard();
        let mut buffer = PooledBuffer::with_capacity(0);

        registry.encode(&Principal::new("x", 7), &mut buffer).unwrap();

        assert_eq!(buffer.readable(), &[0, 0, 0, 7, 0, 0, 0, 1, b'x']);
    }

    #[test]
    fn command_is_sent_by_name() {
        let registry = Registry::standard();
        let mut buffer = PooledBuffer::with_capacity(0);

        registry.encode(&Command::Ping, &mut buffer).unwrap();

        assert_eq!(buffer.readable(), &[0, 0, 0, 4, b'P', b'I', b'N', b'G']);
    }

    #[test]
    fn unknown_command_name_is_rejected() {
        let registry = Registry::standard();
        let mut buffer = PooledBuffer::with_capacity(0);
        buffer.write_string("SELF_DESTRUCT").unwrap();

        let err = registry.decode::<Command>(&mut buffer).unwrap_err();
        assert!(matches!(err, CodecError::UnknownCommand(name) if name == "SELF_DESTRUCT"));
    }

    #[test]
    fn empty_item_path_is_rejected() {
        let registry = Registry::standard();
        let mut buffer = PooledBuffer::with_capacity(0);
        buffer.write_string("").unwrap();
        buffer.write_bool(true).unwrap();
        buffer.write_i64(0).unwrap();
        buffer.write_i64(0).unwrap();
        for _ in 0..4 {
            buffer.write_bool(false).unwrap();
        }

        assert!(matches!(
            registry.decode::<SyncItem>(&mut buffer),
            Err(CodecError::EmptyPath)
        ));
    }

    #[test]
    fn negative_size_is_rejected() {
        let registry = Registry::standard();
        let mut buffer = PooledBuffer::with_capacity(0);
        buffer.write_string("a").unwrap();
        buffer.write_bool(true).unwrap();
        buffer.write_i64(-1).unwrap();

        assert!(matches!(
            registry.decode::<SyncItem>(&mut buffer),
            Err(CodecError::NegativeSize(-1))
        ));
    }

    #[test]
    fn unknown_error_type_degrades_to_remote() {
        let registry = Registry::standard();
        let frames = vec![
            StackFrame::new("server", "handle", "server.rs", 10),
            StackFrame::new("local", "mkdir", "local.rs", 20),
        ];
        let sent = RemoteError::reconstruct("MyError", "boom", frames);
        let mut buffer = PooledBuffer::with_capacity(0);

        registry.encode(&sent, &mut buffer).unwrap();
        let received: RemoteError = registry.decode(&mut buffer).unwrap();

        assert_eq!(received.kind(), RemoteErrorKind::Remote);
        assert_eq!(received.message(), "boom");
        assert_eq!(received.frames().len(), 2);
        assert_eq!(received, sent);
    }

    #[test]
    fn known_error_type_is_recognised() {
        let registry = Registry::standard();
        let sent = RemoteError::new(RemoteErrorKind::NotADirectory, "Not a directory");
        let mut buffer = PooledBuffer::with_capacity(0);

        registry.encode(&sent, &mut buffer).unwrap();
        let received: RemoteError = registry.decode(&mut buffer).unwrap();

        assert_eq!(received.kind(), RemoteErrorKind::NotADirectory);
        assert_eq!(received.type_name(), "NotADirectory");
    }
}
