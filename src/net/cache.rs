//! Bounded FIFO byte queue backing each connection direction.

use bytes::{Bytes, BytesMut};

/// Ordered byte queue with bulk append at the back and bulk consume at the
/// front.
///
/// Every connection owns two of these, one per direction. The cap is a soft
/// advisory bound: it is checked after data has been appended, so a single
/// large read burst can transiently exceed it. The owner reacts to
/// [`Self::overflowed`] by closing the connection, never by dropping bytes.
pub struct ByteCache {
    bytes: BytesMut,
    max_bytes: usize,
}

impl ByteCache {
    /// Creates an empty cache with the given byte cap.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            bytes: BytesMut::new(),
            max_bytes,
        }
    }

    /// Appends data at the back of the queue.
    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Removes and returns exactly `count` bytes from the front, preserving
    /// order.
    ///
    /// Callers must establish sufficient length first, via a handler
    /// predicate or [`Self::len`]. Consuming more than is buffered is a
    /// contract violation, not a runtime error.
    ///
    /// # Panics
    /// If `count` exceeds the current length.
    pub fn consume(&mut self, count: usize) -> Bytes {
        assert!(
            count <= self.bytes.len(),
            "consume({count}) exceeds buffered length = {}",
            self.bytes.len()
        );

        self.bytes.split_to(count).freeze()
    }

    /// Current count of buffered bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Contiguous view of the buffered bytes, front first.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// True once the buffered length has exceeded the cap.
    pub fn overflowed(&self) -> bool {
        self.bytes.len() > self.max_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}
