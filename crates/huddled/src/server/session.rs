//! Per-connection session state.
//!
//! A [`Session`] is shared (`Arc`) between the registry and the session's
//! reader, writer and watchdog tasks. Its lifecycle is an explicit state
//! machine guarded by atomic compare-and-swap, so exactly one caller wins
//! the `Online -> Closing` transition no matter how many teardown paths
//! race for it:
//!
//! ```text
//! Connecting --register--> Online --disconnect--> Closing --writer done--> Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use huddle_protocol::{Envelope, Notice};

use super::outbox::{outbox, Delivery, Outbox, OutboxReceiver};
use crate::config::OutboxConfig;

/// Numeric identifier assigned by the acceptor, unique per process.
pub type SessionId = u64;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Online = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Online,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Signal from the reader to the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// A line was processed; restart the idle timer.
    Alive,
    /// The session is shutting down; stop watching.
    Terminating,
}

/// Why a session left the Online state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed its end of the stream.
    PeerClosed,
    /// Reading from the socket failed.
    ReadFailed,
    /// Writing to the socket failed or timed out.
    WriteFailed,
    /// No traffic for the configured idle period.
    IdleTimeout,
    /// The outbox overflowed under the `disconnect` policy.
    Overflow,
    /// The server is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// Notice broadcast to the remaining sessions.
    pub fn notice(self) -> Notice {
        match self {
            Self::IdleTimeout | Self::Overflow => Notice::Kicked,
            _ => Notice::Offline,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::ReadFailed => write!(f, "read error"),
            Self::WriteFailed => write!(f, "write error"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Overflow => write!(f, "outbox overflow"),
            Self::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Receiving ends handed to the session's own tasks.
#[derive(Debug)]
pub struct SessionChannels {
    /// Drained by the writer task
    pub outbox: OutboxReceiver,
    /// Drained by the watchdog task
    pub liveness: mpsc::Receiver<Liveness>,
}

/// Server-side state of one connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    address: String,
    name: RwLock<String>,
    outbox: Outbox,
    liveness: mpsc::Sender<Liveness>,
    state: AtomicU8,
    closing: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session in the `Connecting` state, named after its address.
    ///
    /// The session's close signal is a child of `shutdown`, so cancelling
    /// the server token closes every session.
    pub fn new(
        id: SessionId,
        address: impl Into<String>,
        outbox_config: OutboxConfig,
        shutdown: &CancellationToken,
    ) -> (Arc<Self>, SessionChannels) {
        let address = address.into();
        let (outbox_tx, outbox_rx) = outbox(outbox_config);
        // One pending ping is enough to restart the timer
        let (liveness_tx, liveness_rx) = mpsc::channel(1);

        let session = Arc::new(Self {
            id,
            name: RwLock::new(address.clone()),
            address,
            outbox: outbox_tx,
            liveness: liveness_tx,
            state: AtomicU8::new(SessionState::Connecting as u8),
            closing: shutdown.child_token(),
            connected_at: Utc::now(),
        });

        (
            session,
            SessionChannels {
                outbox: outbox_rx,
                liveness: liveness_rx,
            },
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote endpoint, fixed for the life of the session.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current display name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Only the registry renames sessions, while holding its lock.
    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_online(&self) -> bool {
        self.state() == SessionState::Online
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Formats `body` as an envelope from this session.
    pub fn envelope(&self, body: impl Into<String>) -> Envelope {
        Envelope::new(self.address.clone(), self.name(), body)
    }

    /// Formats a notice for delivery to this session: bare notices as-is,
    /// everything else wrapped in this session's envelope.
    pub fn format_notice(&self, notice: &Notice) -> String {
        if notice.is_bare() {
            notice.to_string()
        } else {
            self.envelope(notice.to_string()).to_string()
        }
    }

    /// Queues a line on this session's outbox.
    pub async fn push(&self, line: String) -> Delivery {
        self.outbox.push(line).await
    }

    /// Queues a reply to this session's own request. See [`Outbox::push_reply`].
    pub async fn push_reply(&self, line: String) -> Delivery {
        self.outbox.push_reply(line).await
    }

    /// Restarts the watchdog's idle timer.
    pub fn ping(&self) {
        // Full means a ping is already pending, which restarts the timer just the same
        let _ = self.liveness.try_send(Liveness::Alive);
    }

    /// Resolves once the session starts closing (or the server shuts down).
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closing.cancelled()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    pub(crate) fn mark_online(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Online)
    }

    /// Close-once guard: true for exactly one caller.
    pub(crate) fn begin_closing(&self) -> bool {
        self.transition(SessionState::Online, SessionState::Closing)
    }

    /// Tells the watchdog and the writer that teardown has happened.
    pub(crate) fn signal_closing(&self) {
        let _ = self.liveness.try_send(Liveness::Terminating);
        self.closing.cancel();
    }

    pub(crate) fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
