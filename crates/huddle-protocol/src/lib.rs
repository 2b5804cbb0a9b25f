//! huddle protocol - line grammar shared by server and client
//!
//! The wire format is newline-delimited UTF-8 text. Clients send
//! [`Command`]s; the server answers with [`Envelope`]s or bare [`Notice`]s.

pub mod command;
pub mod envelope;

pub use command::{is_valid_target, Command, ProtocolError};
pub use envelope::{Envelope, Notice};

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8888;
