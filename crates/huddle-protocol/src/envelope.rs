//! Server-to-client lines.
//!
//! The server only ever writes two shapes of line: an [`Envelope`]
//! (`[<address>]<name>:<body>`) or a bare notice string. [`Notice`] holds
//! every body text the server produces so the wording lives in one place.

use std::fmt;

/// A formatted, addressed chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Remote endpoint of the session the line is attributed to
    pub address: String,
    /// Display name of that session at formatting time
    pub name: String,
    /// Message text or notice body
    pub body: String,
}

impl Envelope {
    /// Creates an envelope.
    pub fn new(
        address: impl Into<String>,
        name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            body: body.into(),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}:{}", self.address, self.name, self.body)
    }
}

/// Notice texts sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A session came online (broadcast).
    Online,

    /// A session went offline (broadcast).
    Offline,

    /// A session was evicted (broadcast).
    Kicked,

    /// Final line to a session evicted for inactivity.
    Inactive,

    /// One entry of a `who` reply.
    Present,

    /// Rename confirmation to the requester.
    Renamed { from: String, to: String },

    /// Rename refused because the name is held by another session.
    NameTaken(String),

    /// Rename refused because the requested name is empty.
    EmptyName,

    /// Direct message target is not online.
    UnknownUser(String),

    /// Inbound line exceeded the configured maximum and was discarded.
    LineTooLong { max: usize },
}

impl Notice {
    /// Returns true for notices sent as a bare line rather than an envelope body.
    pub fn is_bare(&self) -> bool {
        matches!(
            self,
            Self::NameTaken(_) | Self::EmptyName | Self::LineTooLong { .. }
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
            Self::Kicked => f.write_str("kicked"),
            Self::Inactive => f.write_str("user inactive, kicked out..."),
            Self::Present => f.write_str("online..."),
            Self::Renamed { from, to } => write!(f, "username changed from {from} to {to}"),
            Self::NameTaken(name) => write!(f, "username {name} is already used"),
            Self::EmptyName => f.write_str("username must not be empty"),
            Self::UnknownUser(name) => write!(f, "username {name} does not exist"),
            Self::LineTooLong { max } => write!(f, "message too long (max {max} bytes)"),
        }
    }
}
