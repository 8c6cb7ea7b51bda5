//! TCP listening socket bound into an event loop.
//!
//! # Usage
//!
//! ```ignore
//! use eventloop::{EventLoop, ReadHandler, TcpServer};
//!
//! let mut event_loop = EventLoop::new().unwrap();
//! let server = TcpServer::bind(&mut event_loop, "127.0.0.1:8080", |event_loop, connection| {
//!     connection.set_read_handler(
//!         event_loop,
//!         ReadHandler::delimiter(b"\n".to_vec(), |_event_loop, _connection, line| {
//!             println!("received {:?}", line);
//!         }),
//!     );
//! })
//! .unwrap();
//! println!("listening on {}", server.local_addr().unwrap());
//! event_loop.start();
//! ```

use crate::error::Error;
use crate::net::accept::AcceptManager;
use crate::net::connection::Connection;
use crate::reactor::core::{Entry, EventLoop};
use crate::reactor::poller::{Interest, set_nonblocking};

use log::info;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::RawFd;

/// A TCP server socket registered with an event loop.
///
/// Binding performs the following:
/// 1. Creates a new IPv4 socket with `SO_REUSEADDR`
/// 2. Sets it to non-blocking mode
/// 3. Binds to the specified address and listens with a backlog of 128
/// 4. Registers it for accept readiness in the given event loop
///
/// Accepted connections are handed to the `on_accept` hook, which installs
/// their initial handlers. The listener itself carries no protocol logic.
pub struct TcpServer {
    file_descriptor: RawFd,
}

impl TcpServer {
    /// Binds a listener and registers it with the event loop.
    ///
    /// # Arguments
    /// * `event_loop` - The loop that will dispatch accept readiness
    /// * `address` - Address to bind to, format: "ip:port" (e.g., "127.0.0.1:8080");
    ///   port 0 picks an ephemeral port
    /// * `on_accept` - Hook invoked with each freshly accepted connection
    ///
    /// # Returns
    /// A [`TcpServer`] on success, or an [`Error`] if the address does not
    /// parse or a socket operation fails
    pub fn bind(
        event_loop: &mut EventLoop,
        address: &str,
        on_accept: impl FnMut(&mut EventLoop, &mut Connection) + 'static,
    ) -> Result<Self, Error> {
        let parsed: SocketAddrV4 = address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_owned()))?;

        let file_descriptor = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if file_descriptor < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let enable: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                file_descriptor,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &enable as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }

        set_nonblocking(file_descriptor);

        let sockaddr = socketaddr_to_sockaddr(&parsed);
        let ret = unsafe {
            libc::bind(
                file_descriptor,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(file_descriptor) };
            return Err(error.into());
        }

        let ret = unsafe { libc::listen(file_descriptor, 128) };
        if ret < 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(file_descriptor) };
            return Err(error.into());
        }

        let interest = Interest {
            readable: true,
            writable: false,
        };
        if let Err(error) = event_loop.poller.register(file_descriptor, interest) {
            unsafe { libc::close(file_descriptor) };
            return Err(error.into());
        }

        // The accept manager owns the descriptor from here on.
        event_loop.registry.insert(
            file_descriptor,
            Entry::Listener(AcceptManager::new(file_descriptor, Box::new(on_accept))),
        );

        let server = Self { file_descriptor };
        if let Ok(local_addr) = server.local_addr() {
            info!("listening on {}", local_addr);
        }

        Ok(server)
    }

    /// Returns the local address this listener is bound to.
    ///
    /// Useful after binding to port 0 to learn the ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let result = unsafe {
            libc::getsockname(
                self.file_descriptor,
                &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut length,
            )
        };

        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(sockaddr_to_socketaddr(&addr))
    }
}

fn socketaddr_to_sockaddr(address: &SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: address.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from(*address.ip()).to_be(),
        },
        sin_zero: [0; 8],
    }
}

fn sockaddr_to_socketaddr(address: &libc::sockaddr_in) -> SocketAddr {
    let ip = Ipv4Addr::from(u32::from_be(address.sin_addr.s_addr));
    let port = u16::from_be(address.sin_port);

    SocketAddr::V4(SocketAddrV4::new(ip, port))
}
