//! Fluent builder for EventLoop construction.

use crate::error::Error;
use crate::net::connection::Connection;
use crate::reactor::core::EventLoop;

use std::time::Duration;

/// Builder for constructing [`EventLoop`] instances with a fluent API.
///
/// # Example
/// ```ignore
/// use eventloop::EventLoopBuilder;
/// use std::time::Duration;
///
/// let event_loop = EventLoopBuilder::new()
///     .poll_timeout(Duration::from_millis(500))
///     .max_cache_bytes(1024 * 1024)
///     .build()
///     .unwrap();
/// ```
pub struct EventLoopBuilder {
    poll_timeout: Duration,
    max_cache_bytes: usize,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoopBuilder {
    /// Creates a builder with the default poll timeout and cache cap.
    pub fn new() -> Self {
        Self {
            poll_timeout: EventLoop::DEFAULT_POLL_TIMEOUT,
            max_cache_bytes: Connection::DEFAULT_MAX_CACHE_BYTES,
        }
    }

    /// Sets the upper bound for one I/O wait when no callback or time event
    /// demands attention sooner.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the per-direction byte cap of every connection accepted by this
    /// loop. A connection whose cache exceeds the cap is closed; this is the
    /// only backpressure mechanism.
    pub fn max_cache_bytes(mut self, max_bytes: usize) -> Self {
        self.max_cache_bytes = max_bytes;
        self
    }

    /// Builds the configured event loop.
    ///
    /// # Returns
    /// A new [`EventLoop`], or an [`Error`] if the multiplexer cannot be set
    /// up.
    pub fn build(self) -> Result<EventLoop, Error> {
        EventLoop::with_config(self.poll_timeout, self.max_cache_bytes)
    }
}
