//! Command effects.
//!
//! | Command | Effect |
//! |---|---|
//! | `Who` | one `online...` line per online session, to the requester only, paced by its writer |
//! | `Rename` | move the registry entry, confirm to the requester only |
//! | `DirectMessage` | envelope into the target's outbox only |
//! | `PlainText` | envelope onto the broadcast channel |

use std::sync::Arc;

use tracing::debug;

use huddle_protocol::{Command, Envelope, Notice};

use crate::hub::Hub;
use crate::registry::RegistryError;
use crate::server::Session;

impl Hub {
    /// Executes one parsed command on behalf of `session`.
    pub async fn dispatch(&self, session: &Arc<Session>, command: Command) {
        debug!(
            session_id = session.id(),
            command = command.kind(),
            "Dispatching command"
        );

        match command {
            Command::Who => self.who(session).await,
            Command::Rename(name) => self.rename(session, name).await,
            Command::DirectMessage { target, body } => {
                self.direct_message(session, &target, body).await
            }
            Command::PlainText(body) => {
                self.broadcast(session.envelope(body).to_string());
            }
        }
    }

    async fn who(&self, session: &Arc<Session>) {
        let online = self.registry().snapshot().await;

        for (name, peer) in online {
            let line = Envelope::new(peer.address(), name, Notice::Present.to_string());
            self.reply(session, line.to_string()).await;
        }
    }

    async fn rename(&self, session: &Arc<Session>, new_name: String) {
        if new_name.is_empty() {
            self.notify(session, Notice::EmptyName).await;
            return;
        }

        // Only this session's reader renames it, so the name cannot change underneath
        let old_name = session.name();

        match self.registry().rename(&old_name, &new_name).await {
            Ok(()) => {
                debug!(session_id = session.id(), old = %old_name, new = %new_name, "Renamed");
                self.notify(
                    session,
                    Notice::Renamed {
                        from: old_name,
                        to: new_name,
                    },
                )
                .await;
            }
            Err(RegistryError::NameConflict(name)) => {
                self.notify(session, Notice::NameTaken(name)).await;
            }
            Err(RegistryError::NotFound(_)) => {
                // Torn down concurrently; nothing left to rename
                debug!(session_id = session.id(), "Rename after session left registry");
            }
        }
    }

    async fn direct_message(&self, session: &Arc<Session>, target: &str, body: String) {
        match self.registry().lookup(target).await {
            Some(peer) => {
                let line = session.envelope(body).to_string();
                self.deliver(&peer, line).await;
            }
            None => {
                self.notify(session, Notice::UnknownUser(target.to_string()))
                    .await;
            }
        }
    }
}
