use std::io::{self, Read, Write};

use crate::pool::PooledBuffer;

use super::{ByteSink, ByteSource, CodecError};

/// Buffered sink attached to the write half of a channel.
///
/// Writes collect in a [`PooledBuffer`] and reach the channel once
/// `flush_threshold` bytes are pending or on [`flush`](ByteSink::flush).
/// Writes at least as large as the threshold bypass the buffer.
#[derive(Debug)]
pub struct ChannelSink<W> {
    inner: W,
    buffer: PooledBuffer,
    flush_threshold: usize,
}

impl<W: Write> ChannelSink<W> {
    pub fn new(inner: W, flush_threshold: usize) -> Self {
        let flush_threshold = flush_threshold.max(1);
        Self {
            inner,
            buffer: PooledBuffer::with_capacity(flush_threshold),
            flush_threshold,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Bytes written but not yet handed to the channel.
    pub fn pending(&self) -> usize {
        self.buffer.remaining()
    }

    /// Returns the channel after writing out anything still pending.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.drain()?;
        Ok(self.inner)
    }

    fn drain(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(self.buffer.readable())?;
        }
        self.buffer.reset();
        Ok(())
    }
}

impl<W: Write> ByteSink for ChannelSink<W> {
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() >= self.flush_threshold {
            self.drain()?;
            self.inner.write_all(bytes)?;
            return Ok(());
        }

        self.buffer.put(bytes);
        if self.buffer.remaining() >= self.flush_threshold {
            self.drain()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CodecError> {
        self.drain()?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Buffered source attached to the read half of a channel.
///
/// Reads are served from a [`PooledBuffer`] refilled with up to `fill_size`
/// bytes at a time. Reads at least `fill_size` long go straight to the
/// channel once the buffer is empty.
#[derive(Debug)]
pub struct ChannelSource<R> {
    inner: R,
    buffer: PooledBuffer,
    fill_size: usize,
}

impl<R: Read> ChannelSource<R> {
    pub fn new(inner: R, fill_size: usize) -> Self {
        let fill_size = fill_size.max(1);
        Self {
            inner,
            buffer: PooledBuffer::with_capacity(fill_size),
            fill_size,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.remaining()
    }

    /// Whether the channel is closed with nothing left to read. Blocks until
    /// at least one byte arrives or the peer closes.
    pub fn at_end(&mut self) -> Result<bool, CodecError> {
        if !self.buffer.is_empty() {
            return Ok(false);
        }
        match self.fill() {
            Ok(()) => Ok(false),
            Err(CodecError::Eof) => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn fill(&mut self) -> Result<(), CodecError> {
        self.buffer.reset();
        self.buffer.ensure_capacity(self.fill_size);
        let n = loop {
            match self.inner.read(self.buffer.spare_mut()) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            return Err(CodecError::Eof);
        }
        self.buffer.commit(n);
        Ok(())
    }
}

impl<R: Read> ByteSource for ChannelSource<R> {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        let mut filled = self.buffer.take(buf);

        while filled < buf.len() {
            let rest = &mut buf[filled..];
            if rest.len() >= self.fill_size {
                return self.inner.read_exact(rest).map_err(|e| match e.kind() {
                    io::ErrorKind::UnexpectedEof => CodecError::Eof,
                    _ => CodecError::Io(e),
                });
            }
            self.fill()?;
            filled += self.buffer.take(rest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Hands out at most `step` bytes per read call.
    struct Trickle {
        data: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.step);
            self.data.read(&mut buf[..n])
        }
    }

    #[test]
    fn sink_holds_small_writes_until_flush() {
        let mut sink = ChannelSink::new(Vec::new(), 16);
        sink.write_i32(5).unwrap();

        assert_eq!(sink.pending(), 4);
        assert!(sink.get_ref().is_empty());

        sink.flush().unwrap();
        assert_eq!(sink.get_ref(), &[0, 0, 0, 5]);
    }

    #[test]
    fn sink_drains_at_threshold() {
        let mut sink = ChannelSink::new(Vec::new(), 8);
        sink.write_i64(9).unwrap();

        assert_eq!(sink.pending(), 0);
        assert_eq!(sink.get_ref().len(), 8);
    }

    #[test]
    fn sink_keeps_order_for_large_writes() {
        let mut sink = ChannelSink::new(Vec::new(), 4);
        sink.write_u8(1).unwrap();
        sink.write_raw(&[2; 10]).unwrap();

        assert_eq!(sink.get_ref()[0], 1);
        assert_eq!(&sink.get_ref()[1..], &[2; 10]);
    }

    #[test]
    fn source_reassembles_split_reads() {
        let mut bytes = vec![0, 0, 0, 6];
        bytes.extend_from_slice(b"abcdef");
        let mut source = ChannelSource::new(
            Trickle {
                data: Cursor::new(bytes),
                step: 3,
            },
            4,
        );

        assert_eq!(source.read_string().unwrap(), "abcdef");
        assert!(source.at_end().unwrap());
    }

    #[test]
    fn at_end_keeps_received_bytes() {
        let mut source = ChannelSource::new(Cursor::new(vec![1, 0]), 16);

        assert!(!source.at_end().unwrap());
        assert_eq!(source.buffered(), 2);
        assert!(source.read_bool().unwrap());
        assert!(!source.read_bool().unwrap());
        assert!(source.at_end().unwrap());
    }

    #[derive(Debug)]
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn into_inner_reports_failed_drain() {
        let mut sink = ChannelSink::new(Broken, 16);
        sink.write_u8(1).unwrap();

        let err = sink.into_inner().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn short_channel_is_eof() {
        let mut source = ChannelSource::new(Cursor::new(vec![0, 0]), 16);

        assert!(matches!(source.read_i32(), Err(CodecError::Eof)));
    }
}
