use crate::pool::PooledBuffer;

use super::{ByteSink, ByteSource, CodecError};

impl ByteSink for PooledBuffer {
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.put(bytes);
        Ok(())
    }
}

impl ByteSource for PooledBuffer {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        // Leave the buffer untouched on a short read.
        if self.remaining() < buf.len() {
            return Err(CodecError::Eof);
        }
        self.take(buf);
        Ok(())
    }
}
