//! Client-to-server command grammar.
//!
//! Every inbound line is classified into exactly one [`Command`]. Parsing is
//! total: anything that does not match a recognized form is plain text. The
//! forms are tried in a fixed order so that later rules never shadow
//! earlier ones:
//!
//! ```text
//! ""                  -> no command
//! "who"               -> Who
//! "{rename}<rest>"    -> Rename(rest)
//! "{to=<alnum+>}<.+>" -> DirectMessage(name, body)
//! anything else       -> PlainText(line)
//! ```

use std::fmt;

use thiserror::Error;

/// Literal line that asks for the list of online users.
pub const WHO: &str = "who";

/// Prefix of a rename request.
pub const RENAME_PREFIX: &str = "{rename}";

/// Opening of a direct message header, closed by [`DM_CLOSE`].
pub const DM_OPEN: &str = "{to=";

/// Closing of a direct message header.
pub const DM_CLOSE: char = '}';

/// A parsed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Text to broadcast to every online session.
    PlainText(String),

    /// Presence query.
    Who,

    /// Request to change the sender's display name.
    Rename(String),

    /// Text delivered to a single named session.
    DirectMessage {
        /// Name of the receiving session
        target: String,
        /// Message text
        body: String,
    },
}

impl Command {
    /// Classifies one line (without its line terminator).
    ///
    /// Returns `None` for an empty line, which carries no command but still
    /// counts as traffic for idle tracking.
    pub fn parse(line: &str) -> Option<Self> {
        if line.is_empty() {
            return None;
        }

        if line == WHO {
            return Some(Self::Who);
        }

        if let Some(name) = line.strip_prefix(RENAME_PREFIX) {
            return Some(Self::Rename(name.to_string()));
        }

        if let Some((target, body)) = split_direct(line) {
            return Some(Self::DirectMessage {
                target: target.to_string(),
                body: body.to_string(),
            });
        }

        Some(Self::PlainText(line.to_string()))
    }

    /// Builds a direct message, checking that it would parse back as one.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidTarget` if `target` is empty or not ASCII alphanumeric
    /// - `ProtocolError::EmptyBody` if `body` is empty
    pub fn direct(
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let target = target.into();
        let body = body.into();

        if !is_valid_target(&target) {
            return Err(ProtocolError::InvalidTarget(target));
        }
        if body.is_empty() {
            return Err(ProtocolError::EmptyBody);
        }

        Ok(Self::DirectMessage { target, body })
    }

    /// Returns a short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlainText(_) => "plain_text",
            Self::Who => "who",
            Self::Rename(_) => "rename",
            Self::DirectMessage { .. } => "direct_message",
        }
    }
}

/// Encodes the command as a wire line (without the trailing newline).
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlainText(text) => f.write_str(text),
            Self::Who => f.write_str(WHO),
            Self::Rename(name) => write!(f, "{RENAME_PREFIX}{name}"),
            Self::DirectMessage { target, body } => {
                write!(f, "{DM_OPEN}{target}{DM_CLOSE}{body}")
            }
        }
    }
}

/// Returns true if `name` can be addressed by a direct message.
pub fn is_valid_target(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Splits `{to=<name>}<body>` into its parts.
fn split_direct(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(DM_OPEN)?;
    let close = rest.find(DM_CLOSE)?;
    let target = rest.get(..close)?;
    let body = rest.get(close + DM_CLOSE.len_utf8()..)?;

    if is_valid_target(target) && !body.is_empty() {
        Some((target, body))
    } else {
        None
    }
}

/// Errors building a command from user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The direct message target is not addressable.
    #[error("invalid username '{0}': use letters and digits only")]
    InvalidTarget(String),

    /// A direct message needs at least one character of text.
    #[error("message must not be empty")]
    EmptyBody,
}
