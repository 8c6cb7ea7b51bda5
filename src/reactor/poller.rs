//! epoll multiplexer with an eventfd wake-up channel.
//!
//! Registrations are level-triggered and keyed by file descriptor, which
//! mirrors how the registry in [`core`](crate::reactor::core) looks entries
//! up. The eventfd is registered for read readiness so any thread holding a
//! [`Waker`] can interrupt a blocked wait.

use log::warn;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

const MAX_EVENTS: usize = 64;

/// Readiness interest for one registered file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    fn to_flags(self) -> u32 {
        let mut flags = 0;

        if self.readable {
            flags |= libc::EPOLLIN as u32;
        }

        if self.writable {
            flags |= libc::EPOLLOUT as u32;
        }

        flags
    }
}

/// One readiness notification reported by a wait.
pub(crate) struct Ready {
    pub file_descriptor: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// Wake-up eventfd, shared between the poller and any outstanding wakers so
/// the descriptor stays open as long as either side can use it.
struct WakeFd(RawFd);

impl WakeFd {
    fn wake(&self) {
        let value: u64 = 1;

        unsafe {
            libc::write(self.0, &value as *const u64 as *const libc::c_void, 8);
        }
    }

    fn drain(&self) {
        let mut value: u64 = 0;

        loop {
            let count =
                unsafe { libc::read(self.0, &mut value as *mut u64 as *mut libc::c_void, 8) };
            if count <= 0 {
                break;
            }
        }
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Thread-safe handle that interrupts a blocked wait.
#[derive(Clone)]
pub(crate) struct Waker {
    wake: Arc<WakeFd>,
}

impl Waker {
    pub(crate) fn wake(&self) {
        self.wake.wake();
    }
}

pub(crate) struct Poller {
    epoll_file_descriptor: RawFd,
    wake: Arc<WakeFd>,
    events: Vec<libc::epoll_event>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll_file_descriptor = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_file_descriptor < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_file_descriptor =
            unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_file_descriptor < 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(epoll_file_descriptor) };
            return Err(error);
        }

        let poller = Self {
            epoll_file_descriptor,
            wake: Arc::new(WakeFd(wake_file_descriptor)),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
        };

        poller.register(
            wake_file_descriptor,
            Interest {
                readable: true,
                writable: false,
            },
        )?;

        Ok(poller)
    }

    pub(crate) fn register(&self, file_descriptor: RawFd, interest: Interest) -> io::Result<()> {
        self.epoll_ctl(libc::EPOLL_CTL_ADD, file_descriptor, interest)
    }

    pub(crate) fn modify(&self, file_descriptor: RawFd, interest: Interest) -> io::Result<()> {
        self.epoll_ctl(libc::EPOLL_CTL_MOD, file_descriptor, interest)
    }

    pub(crate) fn deregister(&self, file_descriptor: RawFd) {
        let ret = unsafe {
            libc::epoll_ctl(
                self.epoll_file_descriptor,
                libc::EPOLL_CTL_DEL,
                file_descriptor,
                ptr::null_mut(),
            )
        };

        if ret < 0 {
            warn!(
                "failed to deregister file descriptor = {}: {}",
                file_descriptor,
                io::Error::last_os_error()
            );
        }
    }

    /// Waits for readiness for up to `timeout` and reports the ready set.
    ///
    /// An interrupted wait reports an empty set rather than an error so the
    /// caller simply runs its next iteration.
    pub(crate) fn wait(&mut self, timeout: Duration) -> io::Result<Vec<Ready>> {
        let count = unsafe {
            libc::epoll_wait(
                self.epoll_file_descriptor,
                self.events.as_mut_ptr(),
                MAX_EVENTS as i32,
                timeout_to_millis(timeout),
            )
        };

        if count < 0 {
            let error = io::Error::last_os_error();
            if error.raw_os_error() == Some(libc::EINTR) {
                return Ok(Vec::new());
            }

            return Err(error);
        }

        let ready = self.events[..count as usize]
            .iter()
            .map(|event| {
                let flags = event.events;
                Ready {
                    file_descriptor: event.u64 as RawFd,
                    readable: flags & (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0,
                    writable: flags & (libc::EPOLLOUT | libc::EPOLLERR) as u32 != 0,
                }
            })
            .collect();

        Ok(ready)
    }

    pub(crate) fn waker(&self) -> Waker {
        Waker {
            wake: self.wake.clone(),
        }
    }

    pub(crate) fn wake_file_descriptor(&self) -> RawFd {
        self.wake.0
    }

    /// Interrupts an in-progress wait, or makes the next wait return
    /// immediately if none is in progress.
    pub(crate) fn wake(&self) {
        self.wake.wake();
    }

    /// Consumes pending wake-ups after the wake descriptor reported ready.
    pub(crate) fn drain_wake(&self) {
        self.wake.drain();
    }

    fn epoll_ctl(&self, operation: i32, file_descriptor: RawFd, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.to_flags(),
            u64: file_descriptor as u64,
        };

        let ret = unsafe {
            libc::epoll_ctl(
                self.epoll_file_descriptor,
                operation,
                file_descriptor,
                &mut event,
            )
        };

        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_file_descriptor);
        }
    }
}

pub(crate) fn set_nonblocking(file_descriptor: RawFd) {
    let flags = unsafe { libc::fcntl(file_descriptor, libc::F_GETFL) };

    unsafe {
        libc::fcntl(file_descriptor, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
}

/// Rounds a wait timeout up to whole milliseconds so a sub-millisecond
/// remainder does not degrade into a busy loop.
fn timeout_to_millis(timeout: Duration) -> i32 {
    if timeout.is_zero() {
        return 0;
    }

    timeout.as_millis().clamp(1, i32::MAX as u128) as i32
}
