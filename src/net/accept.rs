//! Accepting new clients on a listening socket.

use crate::net::connection::Connection;
use crate::reactor::core::{Entry, EventLoop};
use crate::reactor::poller::{Interest, set_nonblocking};

use log::{debug, warn};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

/// Extension point invoked with each freshly accepted connection.
///
/// This is the seam where a protocol layer attaches: the hook installs the
/// connection's initial read/write handlers and close callback.
pub type AcceptCallback = Box<dyn FnMut(&mut EventLoop, &mut Connection)>;

/// Reacts to readiness on the listening socket by accepting clients and
/// handing each new [`Connection`] to the protocol hook.
pub struct AcceptManager {
    listener_file_descriptor: RawFd,
    on_accept: AcceptCallback,
}

impl AcceptManager {
    pub(crate) fn new(listener_file_descriptor: RawFd, on_accept: AcceptCallback) -> Self {
        Self {
            listener_file_descriptor,
            on_accept,
        }
    }

    /// Accepts every queued client. A failed accept is logged and affects
    /// neither the listener nor the other connections.
    pub(crate) fn on_acceptable(&mut self, event_loop: &mut EventLoop) {
        loop {
            let client_file_descriptor = unsafe {
                libc::accept(
                    self.listener_file_descriptor,
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };

            if client_file_descriptor < 0 {
                let error = io::Error::last_os_error();
                let code = error.raw_os_error().unwrap_or(0);

                if code == libc::EAGAIN || code == libc::EWOULDBLOCK {
                    break;
                }

                if code == libc::EINTR {
                    continue;
                }

                if code == libc::EMFILE || code == libc::ENFILE {
                    warn!("file descriptor limit reached while accepting, will retry on next readiness");
                    break;
                }

                warn!("failed to accept client: {}", error);
                break;
            }

            set_nonblocking(client_file_descriptor);

            let interest = Interest {
                readable: true,
                writable: false,
            };
            if let Err(error) = event_loop.poller.register(client_file_descriptor, interest) {
                warn!(
                    "failed to register accepted client, file descriptor = {}: {}",
                    client_file_descriptor, error
                );
                unsafe {
                    libc::close(client_file_descriptor);
                }
                continue;
            }

            let mut connection = Connection::new(client_file_descriptor, event_loop.max_cache_bytes);
            (self.on_accept)(event_loop, &mut connection);

            // The hook may have already torn the connection down.
            if !connection.is_closed() {
                debug!(
                    "accepted client, file descriptor = {}",
                    client_file_descriptor
                );
                event_loop
                    .registry
                    .insert(client_file_descriptor, Entry::Client(connection));
            }
        }
    }
}

impl Drop for AcceptManager {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.listener_file_descriptor);
        }
    }
}
