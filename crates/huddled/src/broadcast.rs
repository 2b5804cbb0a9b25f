//! Process-wide fan-out.
//!
//! Any task may enqueue a line through a [`BroadcastHandle`]; a single
//! [`Broadcaster`] task takes lines off the shared channel in order and
//! pushes a copy into the outbox of every session online at fan-out time,
//! the sender included.
//!
//! Under the `block` overflow policy one stalled session stalls the whole
//! fan-out until its writer drains or is evicted. The other policies bound
//! that wait.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::Hub;

/// Producer side of the broadcast channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BroadcastHandle {
    sender: mpsc::UnboundedSender<String>,
}

impl BroadcastHandle {
    /// Enqueues a line for fan-out. Returns false if the broadcaster is gone.
    pub fn send(&self, line: String) -> bool {
        self.sender.send(line).is_ok()
    }
}

/// The fan-out task. Run it with [`Broadcaster::run`].
#[derive(Debug)]
pub struct Broadcaster {
    pub(crate) receiver: mpsc::UnboundedReceiver<String>,
}

/// Creates the shared broadcast channel.
pub fn channel() -> (BroadcastHandle, Broadcaster) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (BroadcastHandle { sender }, Broadcaster { receiver })
}

impl Broadcaster {
    /// Fans out lines until cancelled or every handle is dropped.
    pub async fn run(mut self, hub: Hub, cancel_token: CancellationToken) {
        debug!("Broadcaster starting");

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Broadcaster shutting down");
                    break;
                }

                line = self.receiver.recv() => {
                    match line {
                        Some(line) => fan_out(&hub, line).await,
                        None => {
                            debug!("Broadcast channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Delivers one line to every session online right now.
async fn fan_out(hub: &Hub, line: String) {
    info!(message = %line, "Broadcast");

    // Snapshot so the registry lock is not held while outboxes block
    let targets = hub.registry().snapshot().await;
    debug!(targets = targets.len(), "Fanning out");

    for (_, session) in targets {
        hub.deliver(&session, line.clone()).await;
    }
}
