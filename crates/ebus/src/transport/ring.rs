//! Fixed-capacity ring buffer absorbing arrival jitter between transport
//! reads and the protocol engine draining them byte by byte.

use crate::error::{Error, Result};
use bytes::BytesMut;

/// Telegrams never exceed `NN` (16) data bytes plus a 5-byte master header
/// and CRC; four bytes of slack keep the minimum capacity quad-aligned.
pub const MIN_CAPACITY: usize = 16 + 5 + 1 + 4;

/// A byte ring absorbing jitter between transport arrivals and the rate at
/// which the protocol engine consumes them.
///
/// Bytes are appended at the tail by [`fill_from`](RingBuffer::fill_from)
/// and removed from the head by [`consume`](RingBuffer::consume); nothing
/// already appended is ever discarded except by an explicit `consume`.
pub struct RingBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl RingBuffer {
    /// Build a buffer with at least [`MIN_CAPACITY`] bytes of room.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Append `data`, reporting an overflow error once buffered-but-unread
    /// bytes exceed 75% of capacity (the caller is falling behind).
    pub fn fill_from(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        if self.buf.len() * 4 > self.capacity * 3 {
            return Err(Error::OutOfRange(format!(
                "ring buffer over 75% full: {} of {} bytes",
                self.buf.len(),
                self.capacity
            )));
        }
        Ok(())
    }

    /// Drop `n` bytes from the head of the buffer.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        let _ = self.buf.split_to(n);
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer currently holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_drops_from_head() {
        let mut ring = RingBuffer::new(MIN_CAPACITY);
        ring.fill_from(&[1, 2, 3, 4]).unwrap();
        ring.consume(2);
        assert_eq!(ring.as_slice(), &[3, 4]);
    }

    #[test]
    fn overflow_reported_past_three_quarters() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.fill_from(&[0; 5]).is_ok());
        assert!(ring.fill_from(&[0; 2]).is_err());
    }

    #[test]
    fn read_never_silently_drops_unread_bytes() {
        let mut ring = RingBuffer::new(MIN_CAPACITY);
        ring.fill_from(&[9, 9, 9]).unwrap();
        ring.fill_from(&[1]).unwrap();
        assert_eq!(ring.as_slice(), &[9, 9, 9, 1]);
    }
}
