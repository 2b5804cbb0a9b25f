//! huddle - interactive terminal client for the huddle chat server
//!
//! Two tasks share one connection:
//!
//! 1. **Menu**: reads stdin, encodes [`huddle_protocol::Command`]s onto the socket
//! 2. **Response pump**: copies every server line to stdout
//!
//! The client exits when the user picks `0`, stdin ends, or the server
//! closes the connection.

pub mod cli;
pub mod client;
pub mod error;
pub mod menu;

pub use client::{connect, pump_responses, CommandSink};
pub use error::{ClientError, Result};
pub use menu::{Menu, MenuChoice};
