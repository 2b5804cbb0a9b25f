//! Shared routing context.
//!
//! A [`Hub`] bundles the registry, the broadcast handle and the server
//! configuration. Every task that routes messages holds a clone. Command
//! effects live in `dispatch`; session registration and teardown live here.

use std::sync::Arc;

use tracing::{info, warn};

use huddle_protocol::Notice;

use crate::broadcast::BroadcastHandle;
use crate::config::ServerConfig;
use crate::registry::{Registry, RegistryError};
use crate::server::{Delivery, DisconnectReason, Session};

/// Cheap-to-clone routing context.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Registry,
    broadcast: BroadcastHandle,
    config: Arc<ServerConfig>,
}

impl Hub {
    pub fn new(registry: Registry, broadcast: BroadcastHandle, config: Arc<ServerConfig>) -> Self {
        Self {
            registry,
            broadcast,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Inserts a connecting session under its address and announces it.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NameConflict` if another session renamed itself to
    ///   this address; the session stays `Connecting`
    pub async fn register(&self, session: &Arc<Session>) -> Result<(), RegistryError> {
        self.registry
            .insert(session.address(), Arc::clone(session))
            .await?;
        session.mark_online();

        info!(
            session_id = session.id(),
            address = %session.address(),
            "Session online"
        );

        self.broadcast(session.envelope(Notice::Online.to_string()).to_string());
        Ok(())
    }

    /// Enqueues a line on the shared broadcast channel.
    pub fn broadcast(&self, line: String) {
        if !self.broadcast.send(line) {
            warn!("Broadcaster stopped, dropping message");
        }
    }

    /// Pushes a line into one session's outbox, evicting the session if it
    /// overflows under the `disconnect` policy.
    pub async fn deliver(&self, session: &Arc<Session>, line: String) -> Delivery {
        let delivery = session.push(line).await;

        if delivery == Delivery::Overflow {
            warn!(
                session_id = session.id(),
                name = %session.name(),
                "Outbox full, disconnecting slow session"
            );
            self.disconnect(session, DisconnectReason::Overflow).await;
        }

        delivery
    }

    /// Answers a session's own request. Never evicts the requester: the
    /// reply waits for outbox space under every overflow policy.
    pub async fn reply(&self, session: &Arc<Session>, line: String) -> Delivery {
        session.push_reply(line).await
    }

    /// Sends a notice to one session only.
    pub async fn notify(&self, session: &Arc<Session>, notice: Notice) -> Delivery {
        let line = session.format_notice(&notice);
        self.reply(session, line).await
    }

    /// Tears a session down. Safe to call from any task any number of
    /// times; only the first call for a session has an effect.
    ///
    /// Order: final notice (idle kicks only), registry removal, offline or
    /// kicked broadcast, then the close signal to the watchdog and writer.
    /// Returns true if this call performed the teardown.
    pub async fn disconnect(&self, session: &Arc<Session>, reason: DisconnectReason) -> bool {
        if !session.begin_closing() {
            return false;
        }

        if reason == DisconnectReason::IdleTimeout {
            let line = session.format_notice(&Notice::Inactive);
            // Overflow here is moot: the session is already on its way out
            let _ = session.push(line).await;
        }

        self.registry.remove_session(session).await;

        let online_for = chrono::Utc::now() - session.connected_at();
        info!(
            session_id = session.id(),
            name = %session.name(),
            reason = %reason,
            online_secs = online_for.num_seconds(),
            "Session offline"
        );

        self.broadcast(session.envelope(reason.notice().to_string()).to_string());
        session.signal_closing();
        true
    }
}
