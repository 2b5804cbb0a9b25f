//! Error types for the huddle client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()` or `panic!()` outside tests.

use std::io;
use thiserror::Error;

/// Client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server could not be reached.
    #[error("cannot dial server {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// I/O error on the socket or the terminal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the connection.
    #[error("server closed the connection")]
    Disconnected,
}

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
