//! Reusable byte buffers with explicit read and write positions.
//!
//! A [`PooledBuffer`] holds the live bytes `[read_position, write_position)`
//! inside a backing allocation of `capacity` bytes. Writes past the end grow
//! the allocation following [`calculate_capacity`]; growing or compacting never
//! loses live bytes.
use std::fmt;

use super::{Capacity, Pool};

/// Above this size, capacity grows in whole multiples instead of doubling.
pub const GROWTH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Smallest capacity a buffer grows to.
pub const MIN_CAPACITY: usize = 64;

/// Capacity to allocate for `needed` bytes.
///
/// Up to [`GROWTH_THRESHOLD`] this is the smallest power-of-two multiple of
/// [`MIN_CAPACITY`] holding `needed`; past it, `needed` rounded up to a multiple
/// of the threshold.
pub fn calculate_capacity(needed: usize) -> usize {
    if needed > GROWTH_THRESHOLD {
        return needed.div_ceil(GROWTH_THRESHOLD) * GROWTH_THRESHOLD;
    }

    let mut capacity = MIN_CAPACITY;
    while capacity < needed {
        capacity <<= 1;
    }
    capacity
}

#[derive(Clone, Default)]
pub struct PooledBuffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
}

impl PooledBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read: 0,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn read_position(&self) -> usize {
        self.read
    }

    pub fn write_position(&self) -> usize {
        self.write
    }

    /// Bytes written but not yet read.
    pub fn remaining(&self) -> usize {
        self.write - self.read
    }

    /// Room left after the write position without growing.
    pub fn writable(&self) -> usize {
        self.capacity() - self.write
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Moves both positions back to the start; the allocation is kept.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    /// Makes room for `additional` more bytes after the write position.
    pub fn ensure_capacity(&mut self, additional: usize) {
        if self.writable() >= additional {
            return;
        }

        let live = self.remaining();
        let needed = live + additional;
        if needed <= self.capacity() {
            self.compact();
            return;
        }

        let mut data = vec![0; calculate_capacity(needed)];
        data[..live].copy_from_slice(&self.data[self.read..self.write]);
        self.data = data;
        self.read = 0;
        self.write = live;
    }

    /// Shifts the live bytes to the start of the allocation.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.data.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Appends `bytes`, growing if needed.
    pub fn put(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.data[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
    }

    /// Copies up to `out.len()` live bytes into `out`, returning how many.
    pub fn take(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.remaining());
        out[..n].copy_from_slice(&self.data[self.read..self.read + n]);
        self.read += n;
        n
    }

    /// The live bytes, without consuming them.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Marks `n` live bytes as consumed.
    ///
    /// # Panics
    ///
    /// If `n` is greater than [`remaining`](Self::remaining).
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance past write position");
        self.read += n;
    }

    /// Free space after the write position, for filling in place.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    /// Marks `n` bytes of [`spare_mut`](Self::spare_mut) as written.
    ///
    /// # Panics
    ///
    /// If `n` is greater than [`writable`](Self::writable).
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.writable(), "commit past capacity");
        self.write += n;
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

/// Unbounded pool of buffers starting at `initial_capacity`, reset to `(0, 0)`
/// on every acquisition.
pub fn buffer_pool(initial_capacity: usize) -> Pool<PooledBuffer> {
    Pool::new(
        Capacity::Unbounded,
        move || Ok(PooledBuffer::with_capacity(initial_capacity)),
        PooledBuffer::reset,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1024 * 1024;

    fn assert_positions(buffer: &PooledBuffer) {
        assert!(buffer.read_position() <= buffer.write_position());
        assert!(buffer.write_position() <= buffer.capacity());
    }

    #[test]
    fn capacity_doubles_below_threshold() {
        assert_eq!(calculate_capacity(0), 64);
        assert_eq!(calculate_capacity(1), 64);
        assert_eq!(calculate_capacity(64), 64);
        assert_eq!(calculate_capacity(65), 128);
        assert_eq!(calculate_capacity(1000), 1024);
        assert_eq!(calculate_capacity(3 * MIB), 4 * MIB);
        assert_eq!(calculate_capacity(4 * MIB), 4 * MIB);
    }

    #[test]
    fn capacity_rounds_to_threshold_multiple_above() {
        assert_eq!(calculate_capacity(4 * MIB + 1), 8 * MIB);
        assert_eq!(calculate_capacity(8 * MIB), 8 * MIB);
        assert_eq!(calculate_capacity(9 * MIB), 12 * MIB);
        assert_eq!(calculate_capacity(100 * MIB + 3), 104 * MIB);
    }

    #[test]
    fn growth_preserves_live_bytes() {
        let mut buffer = PooledBuffer::with_capacity(8);
        buffer.put(b"abcdefgh");
        let mut skipped = [0; 3];
        buffer.take(&mut skipped);

        buffer.put(b"0123456789");

        assert_eq!(buffer.readable(), b"defgh0123456789");
        assert_eq!(buffer.capacity(), 64);
        assert_positions(&buffer);
    }

    #[test]
    fn ensure_capacity_compacts_when_possible() {
        let mut buffer = PooledBuffer::with_capacity(64);
        buffer.put(&[7; 60]);
        buffer.advance(50);

        buffer.ensure_capacity(40);

        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.read_position(), 0);
        assert_eq!(buffer.readable(), &[7; 10]);
    }

    #[test]
    fn positions_hold_across_mixed_operations() {
        let mut buffer = PooledBuffer::with_capacity(0);
        let mut out = [0; 17];

        for round in 0..50 {
            buffer.put(&vec![round as u8; round * 3]);
            assert_positions(&buffer);
            buffer.take(&mut out);
            assert_positions(&buffer);
            if round % 7 == 0 {
                buffer.compact();
                assert_positions(&buffer);
            }
        }
    }

    #[test]
    fn commit_tracks_in_place_fill() {
        let mut buffer = PooledBuffer::with_capacity(16);
        buffer.spare_mut()[..4].copy_from_slice(b"ping");
        buffer.commit(4);

        assert_eq!(buffer.readable(), b"ping");
    }

    #[test]
    #[should_panic(expected = "advance past write position")]
    fn advance_past_write_panics() {
        let mut buffer = PooledBuffer::with_capacity(16);
        buffer.put(b"ab");
        buffer.advance(3);
    }

    #[test]
    fn pool_hands_out_reset_buffers() {
        let pool = buffer_pool(32);
        {
            let mut buffer = pool.acquire().unwrap();
            buffer.put(b"left over");
        }

        let buffer = pool.acquire().unwrap();
        assert_eq!(buffer.read_position(), 0);
        assert_eq!(buffer.write_position(), 0);
        assert_eq!(buffer.capacity(), 32);
    }
}
