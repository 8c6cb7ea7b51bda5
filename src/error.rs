//! Error types for event loop and listener construction.
//!
//! Connection-level failures (read/write errors, end of stream, cache
//! overflow) never surface as errors. They tear the affected connection down
//! and notify through its close callback. The variants here only cover
//! operations that can fail before the loop is running.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A syscall failed while setting up the multiplexer or a socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The listen address could not be parsed as an IPv4 socket address.
    #[error("invalid socket address: {0}")]
    InvalidAddress(String),
}
