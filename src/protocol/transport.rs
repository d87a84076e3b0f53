use std::{
    io::{Read, Write},
    sync::Arc,
};

use log::trace;

use crate::{
    codec::{ByteSink, ByteSource, ChannelSink, ChannelSource, CodecError},
    error::{ProtocolError, Result, SyncError},
    pool::PooledBuffer,
    registry::Registry,
    remote::RemoteError,
};

use super::{
    Part, Request,
    frame::{FINISH_MARKER, PartKind, ResponseHeader, STREAMED, Status},
};

/// Default upper bound on one frame or fixed response body.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Frame-level reader/writer over the two halves of a connection.
///
/// Requests and responses are written with the methods named after them;
/// nothing reaches the peer before [`finish`](Self::finish),
/// [`end_stream`](Self::end_stream) or one of the single-shot response
/// writers flushes the outgoing buffer.
pub struct ProtocolTransport<R: Read, W: Write> {
    source: ChannelSource<R>,
    sink: ChannelSink<W>,
    /// Encoding space for metadata frames and value parts. Owned for the
    /// lifetime of the connection, so it is not taken from a pool.
    scratch: PooledBuffer,
    registry: Arc<Registry>,
    max_frame: usize,
}

impl<R: Read, W: Write> ProtocolTransport<R, W> {
    pub fn new(reader: R, writer: W, registry: Arc<Registry>, buffer_size: usize) -> Self {
        Self {
            source: ChannelSource::new(reader, buffer_size),
            sink: ChannelSink::new(writer, buffer_size),
            scratch: PooledBuffer::with_capacity(256),
            registry,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn reader(&self) -> &R {
        self.source.get_ref()
    }

    pub fn writer(&self) -> &W {
        self.sink.get_ref()
    }

    /// Writes the metadata frame of `request`. Data frames, if any, and the
    /// finish marker follow through [`write_data`](Self::write_data) and
    /// [`finish`](Self::finish).
    pub fn begin_request(&mut self, request: &Request) -> Result<()> {
        self.scratch.reset();
        request.encode(&self.registry, &mut self.scratch)?;
        trace!("sending {} ({} bytes)", request.command(), self.scratch.remaining());
        write_frame(&mut self.sink, self.max_frame, self.scratch.readable())
    }

    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        write_frame(&mut self.sink, self.max_frame, bytes)
    }

    /// Writes the finish marker and flushes.
    pub fn finish(&mut self) -> Result<()> {
        self.sink.write_i32(FINISH_MARKER)?;
        self.sink.flush()?;
        Ok(())
    }

    /// Hands buffered output to the peer without ending anything.
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    /// Writes a request that carries no data frames.
    pub fn write_request(&mut self, request: &Request) -> Result<()> {
        self.begin_request(request)?;
        self.finish()
    }

    /// Reads the next request's metadata frame.
    ///
    /// Returns `None` when the peer closed the connection between requests.
    /// For requests without data frames the finish marker is consumed too;
    /// `TARGET_WRITE_FILE` leaves its data frames for [`read_data`](Self::read_data).
    pub fn read_request(&mut self) -> Result<Option<Request>> {
        if self.source.at_end()? {
            return Ok(None);
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        let request = self.read_metadata(&mut scratch);
        self.scratch = scratch;
        let request = request?;

        if !request.command().has_data_frames() {
            self.expect_finish()?;
        }
        Ok(Some(request))
    }

    /// Reads one data frame into `buffer`, replacing its content. Returns
    /// `false` on the finish marker.
    pub fn read_data(&mut self, buffer: &mut PooledBuffer) -> Result<bool> {
        let len = self.source.read_i32()?;
        if len == FINISH_MARKER {
            return Ok(false);
        }
        let len = self.check_frame_len(len)?;

        buffer.reset();
        buffer.ensure_capacity(len);
        self.source.read_raw(&mut buffer.spare_mut()[..len])?;
        buffer.commit(len);
        Ok(true)
    }

    pub fn expect_finish(&mut self) -> Result<()> {
        match self.source.read_i32()? {
            FINISH_MARKER => Ok(()),
            _ => Err(ProtocolError::Unexpected("data frame in place of the finish marker").into()),
        }
    }

    /// OK response with a fixed body.
    pub fn write_ok(&mut self, body: &[u8]) -> Result<()> {
        self.write_header(ResponseHeader::ok(body.len() as i64))?;
        self.sink.write_raw(body)?;
        self.sink.flush()?;
        Ok(())
    }

    /// ERROR response carrying `error` as its body.
    pub fn write_error(&mut self, error: &RemoteError) -> Result<()> {
        self.scratch.reset();
        self.registry.encode(error, &mut self.scratch)?;
        self.write_header(ResponseHeader::error(self.scratch.remaining() as i64))?;
        self.sink.write_raw(self.scratch.readable())?;
        self.sink.flush()?;
        Ok(())
    }

    /// Starts a streamed OK response. Parts follow, then [`end_stream`](Self::end_stream).
    pub fn begin_stream(&mut self) -> Result<()> {
        self.write_header(ResponseHeader::streamed())
    }

    /// Data part carrying raw bytes.
    pub fn write_data_part(&mut self, payload: &[u8]) -> Result<()> {
        let len = payload.len() + 1;
        self.write_frame_len(len)?;
        self.sink.write_u8(PartKind::Data as u8)?;
        self.sink.write_raw(payload)?;
        Ok(())
    }

    /// Data part carrying one encoded value.
    pub fn write_value_part<T: 'static>(&mut self, value: &T) -> Result<()> {
        self.scratch.reset();
        self.scratch.write_u8(PartKind::Data as u8)?;
        self.registry.encode(value, &mut self.scratch)?;
        write_frame(&mut self.sink, self.max_frame, self.scratch.readable())
    }

    pub fn write_progress(&mut self, progress: u64) -> Result<()> {
        self.write_frame_len(9)?;
        self.sink.write_u8(PartKind::Progress as u8)?;
        self.sink
            .write_i64(i64::try_from(progress).unwrap_or(i64::MAX))?;
        Ok(())
    }

    /// Error part. The stream must be ended right after it.
    pub fn write_error_part(&mut self, error: &RemoteError) -> Result<()> {
        self.scratch.reset();
        self.scratch.write_u8(PartKind::Error as u8)?;
        self.registry.encode(error, &mut self.scratch)?;
        write_frame(&mut self.sink, self.max_frame, self.scratch.readable())
    }

    pub fn end_stream(&mut self) -> Result<()> {
        self.finish()
    }

    pub fn read_header(&mut self) -> Result<ResponseHeader> {
        let status = Status::try_from(self.source.read_i32()?)?;
        let content_length = self.source.read_i64()?;

        let valid = match status {
            Status::Ok => content_length >= STREAMED,
            Status::Error => content_length >= 0,
        };
        if !valid {
            return Err(ProtocolError::InvalidContentLength(content_length).into());
        }
        if content_length > self.max_frame as i64 {
            return Err(ProtocolError::FrameTooLarge {
                len: content_length as usize,
                limit: self.max_frame,
            }
            .into());
        }
        Ok(ResponseHeader {
            status,
            content_length,
        })
    }

    /// Reads the fixed body announced by `header` into `buffer`.
    pub fn read_body(&mut self, header: &ResponseHeader, buffer: &mut PooledBuffer) -> Result<()> {
        let len = header
            .body_len()
            .ok_or(ProtocolError::Unexpected("streamed body where a fixed body was expected"))?;

        buffer.reset();
        buffer.ensure_capacity(len);
        self.source.read_raw(&mut buffer.spare_mut()[..len])?;
        buffer.commit(len);
        Ok(())
    }

    /// Reads and decodes the body of an ERROR response.
    pub fn read_remote_error(&mut self, header: &ResponseHeader) -> Result<RemoteError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        let error = self.read_body(header, &mut scratch).and_then(|()| {
            self.registry
                .decode::<RemoteError>(&mut scratch)
                .map_err(SyncError::from)
        });
        self.scratch = scratch;
        error
    }

    /// Reads a response that must be OK without a stream, skipping its body.
    /// An ERROR response comes back as [`SyncError::Application`].
    pub fn read_ack(&mut self) -> Result<()> {
        let header = self.read_header()?;
        match header.status {
            Status::Error => Err(self.read_remote_error(&header)?.into()),
            Status::Ok if header.is_streamed() => {
                Err(ProtocolError::Unexpected("streamed body in an acknowledgement").into())
            }
            Status::Ok => {
                let mut scratch = std::mem::take(&mut self.scratch);
                let body = self.read_body(&header, &mut scratch);
                self.scratch = scratch;
                body
            }
        }
    }

    /// Reads the next part of a streamed response into `buffer`. `None` means
    /// the finish marker was reached. After [`Part::Error`] only the finish
    /// marker may follow.
    pub fn read_part(&mut self, buffer: &mut PooledBuffer) -> Result<Option<Part>> {
        if !self.read_data(buffer)? {
            return Ok(None);
        }

        let part = match PartKind::try_from(buffer.read_u8()?)? {
            PartKind::Data => Part::Data,
            PartKind::Progress => {
                let progress = buffer.read_i64()?;
                let progress =
                    u64::try_from(progress).map_err(|_| CodecError::NegativeSize(progress))?;
                Part::Progress(progress)
            }
            PartKind::Error => Part::Error(self.registry.decode(buffer)?),
        };
        Ok(Some(part))
    }

    fn read_metadata(&mut self, scratch: &mut PooledBuffer) -> Result<Request> {
        if !self.read_data(scratch)? {
            return Err(ProtocolError::Unexpected("finish marker before request metadata").into());
        }
        let request = Request::decode(&self.registry, scratch)?;
        if !scratch.is_empty() {
            return Err(ProtocolError::Unexpected("trailing bytes in request metadata").into());
        }
        Ok(request)
    }

    fn write_header(&mut self, header: ResponseHeader) -> Result<()> {
        self.sink.write_i32(header.status as i32)?;
        self.sink.write_i64(header.content_length)?;
        Ok(())
    }

    fn write_frame_len(&mut self, len: usize) -> Result<()> {
        let len = frame_len(len, self.max_frame)?;
        self.sink.write_i32(len)?;
        Ok(())
    }

    fn check_frame_len(&self, len: i32) -> Result<usize> {
        let len = usize::try_from(len).map_err(|_| ProtocolError::InvalidFrameLength(len))?;
        if len > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                len,
                limit: self.max_frame,
            }
            .into());
        }
        Ok(len)
    }
}

fn frame_len(len: usize, max_frame: usize) -> Result<i32> {
    if len > max_frame {
        return Err(ProtocolError::FrameTooLarge {
            len,
            limit: max_frame,
        }
        .into());
    }
    i32::try_from(len).map_err(|_| {
        SyncError::from(ProtocolError::FrameTooLarge {
            len,
            limit: i32::MAX as usize,
        })
    })
}

fn write_frame(sink: &mut dyn ByteSink, max_frame: usize, payload: &[u8]) -> Result<()> {
    sink.write_i32(frame_len(payload.len(), max_frame)?)?;
    sink.write_raw(payload)?;
    Ok(())
}
