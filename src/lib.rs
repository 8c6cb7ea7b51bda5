//! Single-threaded, non-blocking TCP reactor.
//!
//! One forever loop multiplexes socket readiness, deferred callbacks, and
//! scheduled time events, and moves bytes to and from per-connection caches
//! through one-shot predicate/action handlers.
//!
//! # Architecture
//!
//! - **EventLoop**: drives one iteration = callbacks, time events, bounded
//!   I/O wait, dispatch
//! - **EventLoopHandle**: thread-safe submission of callbacks and time
//!   events into the loop thread
//! - **Connection**: one socket, one inbound and one outbound [`ByteCache`],
//!   at most one pending handler per direction
//! - **ReadHandler / WriteHandler**: one-shot conditions (exact byte count,
//!   delimiter, flushed) paired with user callbacks
//! - **TcpServer**: listening socket whose accept hook installs each new
//!   connection's initial handlers
//! - **EventLoopBuilder**: fluent configuration of timeouts and cache caps

pub mod builder;
pub mod error;
pub mod net;
pub mod reactor;

pub use builder::EventLoopBuilder;
pub use error::Error;
pub use net::cache::ByteCache;
pub use net::connection::Connection;
pub use net::handler::{ReadHandler, WriteHandler};
pub use net::listener::TcpServer;
pub use reactor::core::{CallbackId, EventLoop};
pub use reactor::handle::EventLoopHandle;
pub use reactor::time::TimeEventId;
