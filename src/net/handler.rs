//! One-shot predicate/action handlers for connection buffers.
//!
//! A handler pairs a condition over a connection's cache with a user
//! callback. The connection tests its pending handler after every cache
//! mutation and runs it once the condition holds, then clears it. To keep
//! processing a stream, install a new handler from inside the callback that
//! just fired.
//!
//! The behavior space is closed: reads complete on an exact byte count or on
//! a delimiter, writes complete on a drained cache. There is no open-ended
//! handler hierarchy.

use crate::net::cache::ByteCache;
use crate::net::connection::Connection;
use crate::reactor::core::EventLoop;

use bytes::Bytes;

/// Callback invoked with the consumed payload once a read condition is met.
pub type ReadCallback = Box<dyn FnOnce(&mut EventLoop, &mut Connection, Bytes)>;

/// Callback invoked without payload once a write condition is met.
pub type WriteCallback = Box<dyn FnOnce(&mut EventLoop, &mut Connection)>;

/// Callback invoked exactly once when a connection is torn down.
pub type CloseCallback = Box<dyn FnOnce(&mut EventLoop)>;

/// Pending read condition for a connection's inbound cache.
pub enum ReadHandler {
    /// Fires once the inbound cache holds at least `count` bytes, consuming
    /// exactly `count` of them.
    Exactly { count: usize, callback: ReadCallback },
    /// Fires once the delimiter byte sequence appears in the inbound cache,
    /// consuming through the end of its first occurrence. The delivered
    /// payload includes the delimiter.
    Delimiter {
        delimiter: Vec<u8>,
        callback: ReadCallback,
    },
}

impl ReadHandler {
    /// Read condition waiting for an exact count of bytes.
    pub fn exactly(
        count: usize,
        callback: impl FnOnce(&mut EventLoop, &mut Connection, Bytes) + 'static,
    ) -> Self {
        Self::Exactly {
            count,
            callback: Box::new(callback),
        }
    }

    /// Read condition waiting for a contiguous byte sequence.
    ///
    /// The match is an exact byte comparison, first occurrence from the
    /// front, with no escaping.
    ///
    /// # Panics
    /// If the delimiter is empty.
    pub fn delimiter(
        delimiter: impl Into<Vec<u8>>,
        callback: impl FnOnce(&mut EventLoop, &mut Connection, Bytes) + 'static,
    ) -> Self {
        let delimiter = delimiter.into();
        assert!(!delimiter.is_empty(), "delimiter must not be empty");

        Self::Delimiter {
            delimiter,
            callback: Box::new(callback),
        }
    }

    /// Returns the count of bytes to consume if the condition holds.
    pub(crate) fn ready(&self, cache: &ByteCache) -> Option<usize> {
        match self {
            ReadHandler::Exactly { count, .. } => (cache.len() >= *count).then_some(*count),
            ReadHandler::Delimiter { delimiter, .. } => {
                find_subsequence(cache.as_slice(), delimiter).map(|index| index + delimiter.len())
            }
        }
    }

    pub(crate) fn into_callback(self) -> ReadCallback {
        match self {
            ReadHandler::Exactly { callback, .. } => callback,
            ReadHandler::Delimiter { callback, .. } => callback,
        }
    }
}

/// Pending write condition for a connection's outbound cache.
pub enum WriteHandler {
    /// Fires once the outbound cache has fully drained to the socket.
    Flush { callback: WriteCallback },
}

impl WriteHandler {
    /// Write condition waiting for the outbound cache to drain.
    pub fn flush(callback: impl FnOnce(&mut EventLoop, &mut Connection) + 'static) -> Self {
        Self::Flush {
            callback: Box::new(callback),
        }
    }

    pub(crate) fn ready(&self, cache: &ByteCache) -> bool {
        match self {
            WriteHandler::Flush { .. } => cache.is_empty(),
        }
    }

    pub(crate) fn into_callback(self) -> WriteCallback {
        match self {
            WriteHandler::Flush { callback } => callback,
        }
    }
}

/// First occurrence of `needle` in `haystack`, exact byte match.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
