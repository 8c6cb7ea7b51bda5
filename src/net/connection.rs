//! One accepted client connection.
//!
//! A connection owns its socket, one cache per direction, and at most one
//! pending handler per direction. The event loop calls [`on_readable`] and
//! [`on_writable`](Connection::on_writable) when the multiplexer reports
//! readiness; everything else is driven by handler callbacks.
//!
//! [`on_readable`]: Connection::on_readable

use crate::net::cache::ByteCache;
use crate::net::handler::{CloseCallback, ReadHandler, WriteHandler};
use crate::reactor::core::EventLoop;
use crate::reactor::poller::Interest;

use log::{debug, warn};
use std::io;
use std::os::unix::io::RawFd;

/// Size of the scratch buffer used to move bytes between the socket and the
/// caches.
const IO_BUFFER_SIZE: usize = 4096;

pub struct Connection {
    file_descriptor: RawFd,
    read_cache: ByteCache,
    write_cache: ByteCache,
    read_handler: Option<ReadHandler>,
    write_handler: Option<WriteHandler>,
    close_callback: Option<CloseCallback>,
    interest: Interest,
    closed: bool,
}

impl Connection {
    /// Default byte cap for each of the two caches.
    pub const DEFAULT_MAX_CACHE_BYTES: usize = 100 * 1024 * 1024;

    pub(crate) fn new(file_descriptor: RawFd, max_cache_bytes: usize) -> Self {
        Self {
            file_descriptor,
            read_cache: ByteCache::new(max_cache_bytes),
            write_cache: ByteCache::new(max_cache_bytes),
            read_handler: None,
            write_handler: None,
            close_callback: None,
            // Accepted sockets are registered for read readiness.
            interest: Interest {
                readable: true,
                writable: false,
            },
            closed: false,
        }
    }

    pub fn file_descriptor(&self) -> RawFd {
        self.file_descriptor
    }

    /// Read-only view of the inbound cache.
    pub fn read_cache(&self) -> &ByteCache {
        &self.read_cache
    }

    /// Read-only view of the outbound cache.
    pub fn write_cache(&self) -> &ByteCache {
        &self.write_cache
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Installs the pending read condition, replacing any previous one.
    ///
    /// If the condition already holds over buffered data, the handler fires
    /// here instead of waiting for the next readiness notification.
    pub fn set_read_handler(&mut self, event_loop: &mut EventLoop, handler: ReadHandler) {
        if self.closed {
            return;
        }

        self.read_handler = Some(handler);
        self.set_readable_interest(event_loop, true);
        self.run_read_handler_if_ready(event_loop);
    }

    /// Installs the pending write condition, replacing any previous one.
    ///
    /// If the condition already holds, the handler fires here. Writable
    /// interest is not asserted; [`Self::prepare_write`] owns that.
    pub fn set_write_handler(&mut self, event_loop: &mut EventLoop, handler: WriteHandler) {
        if self.closed {
            return;
        }

        self.write_handler = Some(handler);
        self.run_write_handler_if_ready(event_loop);
    }

    /// Registers a callback fired exactly once when this connection is torn
    /// down, replacing any previous one.
    pub fn set_close_callback(&mut self, callback: impl FnOnce(&mut EventLoop) + 'static) {
        self.close_callback = Some(Box::new(callback));
    }

    /// Queues data for delivery to the peer and asserts writable interest.
    ///
    /// Overflowing the outbound cache closes the connection; queued bytes
    /// are never dropped while it stays open.
    pub fn prepare_write(&mut self, event_loop: &mut EventLoop, data: &[u8]) {
        if self.closed {
            return;
        }

        self.set_writable_interest(event_loop, true);
        self.write_cache.append(data);

        if self.write_cache.overflowed() {
            warn!(
                "write cache exceeded {} bytes, closing file descriptor = {}",
                self.write_cache.max_bytes(),
                self.file_descriptor
            );
            self.close(event_loop);
        }
    }

    /// Tears the connection down: deregisters it from the multiplexer,
    /// closes the socket, and fires the close callback. A second close is a
    /// no-op.
    pub fn close(&mut self, event_loop: &mut EventLoop) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.read_handler = None;
        self.write_handler = None;

        event_loop.poller.deregister(self.file_descriptor);
        unsafe {
            libc::close(self.file_descriptor);
        }
        debug!("closed connection, file descriptor = {}", self.file_descriptor);

        if let Some(callback) = self.close_callback.take() {
            callback(event_loop);
        }
    }

    /// Drains the socket into the inbound cache and reacts to what arrived.
    ///
    /// Bytes buffered ahead of an end-of-stream are still delivered to a
    /// satisfied read handler before the connection closes.
    pub(crate) fn on_readable(&mut self, event_loop: &mut EventLoop) {
        let mut buffer = [0u8; IO_BUFFER_SIZE];
        let mut end_of_stream = false;
        let mut failed = false;

        loop {
            let count = unsafe {
                libc::read(
                    self.file_descriptor,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };

            if count == 0 {
                end_of_stream = true;
                break;
            }

            if count < 0 {
                let error = io::Error::last_os_error();
                let code = error.raw_os_error().unwrap_or(0);

                if code == libc::EAGAIN || code == libc::EWOULDBLOCK {
                    break;
                }

                if code == libc::EINTR {
                    continue;
                }

                warn!(
                    "failed to read from client, file descriptor = {}: {}",
                    self.file_descriptor, error
                );
                failed = true;
                break;
            }

            debug!(
                "received data, count = {} on file descriptor = {}",
                count, self.file_descriptor
            );
            self.read_cache.append(&buffer[..count as usize]);
        }

        if self.read_cache.overflowed() {
            warn!(
                "read cache exceeded {} bytes, closing file descriptor = {}",
                self.read_cache.max_bytes(),
                self.file_descriptor
            );
            self.close(event_loop);
            return;
        }

        self.run_read_handler_if_ready(event_loop);

        if self.closed {
            return;
        }

        if end_of_stream || failed {
            self.close(event_loop);
        }
    }

    /// Writes the outbound cache to the socket, retaining whatever the
    /// kernel did not accept, and drops writable interest once drained.
    pub(crate) fn on_writable(&mut self, event_loop: &mut EventLoop) {
        if self.write_cache.is_empty() {
            // Spurious writability with nothing queued would otherwise spin.
            self.set_writable_interest(event_loop, false);
        } else {
            while !self.write_cache.is_empty() {
                let attempted = self.write_cache.len();
                let count = unsafe {
                    libc::write(
                        self.file_descriptor,
                        self.write_cache.as_slice().as_ptr() as *const libc::c_void,
                        attempted,
                    )
                };

                if count < 0 {
                    let error = io::Error::last_os_error();
                    let code = error.raw_os_error().unwrap_or(0);

                    if code == libc::EAGAIN || code == libc::EWOULDBLOCK {
                        break;
                    }

                    if code == libc::EINTR {
                        continue;
                    }

                    warn!(
                        "failed to write to client, file descriptor = {}: {}",
                        self.file_descriptor, error
                    );
                    self.close(event_loop);
                    return;
                }

                let written = count as usize;
                let _ = self.write_cache.consume(written);

                if written < attempted {
                    break;
                }
            }

            if self.write_cache.is_empty() {
                self.set_writable_interest(event_loop, false);
            }
        }

        self.run_write_handler_if_ready(event_loop);
    }

    fn run_read_handler_if_ready(&mut self, event_loop: &mut EventLoop) {
        let count = match self
            .read_handler
            .as_ref()
            .and_then(|handler| handler.ready(&self.read_cache))
        {
            Some(count) => count,
            None => return,
        };

        if let Some(handler) = self.read_handler.take() {
            let payload = self.read_cache.consume(count);
            debug!(
                "read handler satisfied, consumed {} bytes from file descriptor = {}",
                count, self.file_descriptor
            );

            let callback = handler.into_callback();
            callback(event_loop, self, payload);
        }
    }

    fn run_write_handler_if_ready(&mut self, event_loop: &mut EventLoop) {
        let is_ready = self
            .write_handler
            .as_ref()
            .is_some_and(|handler| handler.ready(&self.write_cache));
        if !is_ready {
            return;
        }

        if let Some(handler) = self.write_handler.take() {
            debug!(
                "write cache drained, running flush handler for file descriptor = {}",
                self.file_descriptor
            );

            let callback = handler.into_callback();
            callback(event_loop, self);
        }
    }

    fn set_readable_interest(&mut self, event_loop: &mut EventLoop, readable: bool) {
        if self.interest.readable == readable {
            return;
        }

        self.interest.readable = readable;
        self.update_registration(event_loop);
    }

    fn set_writable_interest(&mut self, event_loop: &mut EventLoop, writable: bool) {
        if self.interest.writable == writable {
            return;
        }

        self.interest.writable = writable;
        self.update_registration(event_loop);
    }

    fn update_registration(&self, event_loop: &mut EventLoop) {
        if let Err(error) = event_loop
            .poller
            .modify(self.file_descriptor, self.interest)
        {
            warn!(
                "failed to update interest for file descriptor = {}: {}",
                self.file_descriptor, error
            );
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            unsafe {
                libc::close(self.file_descriptor);
            }
        }
    }
}
