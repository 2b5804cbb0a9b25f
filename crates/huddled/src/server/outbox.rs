//! Per-session inbound channel.
//!
//! Many producers (dispatchers, the broadcaster, the watchdog) push lines;
//! only the session's writer task consumes them. The channel is bounded and
//! the [`OverflowPolicy`] decides what happens when it is full:
//!
//! - `Block` and `Disconnect` sit on a tokio `mpsc` channel. `Block` awaits
//!   a free slot, `Disconnect` uses `try_send` and reports [`Delivery::Overflow`].
//! - `DropOldest` sits on a tokio `broadcast` channel with a single
//!   receiver, which overwrites the oldest slot instead of waiting.

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::config::{OutboxConfig, OverflowPolicy};

/// Outcome of pushing one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The line is queued for the writer.
    Queued,
    /// The writer is gone; the line was discarded.
    Closed,
    /// The outbox is full under the `Disconnect` policy.
    Overflow,
}

#[derive(Debug, Clone)]
enum Sender {
    Queue(mpsc::Sender<String>),
    Ring(broadcast::Sender<String>),
}

#[derive(Debug)]
enum Receiver {
    Queue(mpsc::Receiver<String>),
    Ring(broadcast::Receiver<String>),
}

/// Producer side, held by the session and cloned freely.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: Sender,
    policy: OverflowPolicy,
}

/// Consumer side, owned by the writer task.
#[derive(Debug)]
pub struct OutboxReceiver {
    receiver: Receiver,
}

/// Creates a connected outbox pair. `config.capacity` must be at least 1.
pub fn outbox(config: OutboxConfig) -> (Outbox, OutboxReceiver) {
    let capacity = config.capacity.max(1);

    let (sender, receiver) = match config.overflow {
        OverflowPolicy::Block | OverflowPolicy::Disconnect => {
            let (tx, rx) = mpsc::channel(capacity);
            (Sender::Queue(tx), Receiver::Queue(rx))
        }
        OverflowPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (Sender::Ring(tx), Receiver::Ring(rx))
        }
    };

    (
        Outbox {
            sender,
            policy: config.overflow,
        },
        OutboxReceiver { receiver },
    )
}

impl Outbox {
    /// Pushes a line. Only the `Block` policy can suspend here.
    pub async fn push(&self, line: String) -> Delivery {
        match &self.sender {
            Sender::Queue(tx) if self.policy == OverflowPolicy::Disconnect => {
                match tx.try_send(line) {
                    Ok(()) => Delivery::Queued,
                    Err(mpsc::error::TrySendError::Full(_)) => Delivery::Overflow,
                    Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
                }
            }
            Sender::Queue(tx) => match tx.send(line).await {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
            Sender::Ring(tx) => match tx.send(line) {
                Ok(_) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
        }
    }

    /// Pushes a line the session asked for itself. Queue-backed outboxes
    /// wait for a free slot under every policy, so a reply larger than the
    /// capacity is paced by the writer instead of counting as overflow.
    pub async fn push_reply(&self, line: String) -> Delivery {
        match &self.sender {
            Sender::Queue(tx) => match tx.send(line).await {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
            Sender::Ring(tx) => match tx.send(line) {
                Ok(_) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
        }
    }
}

impl OutboxReceiver {
    /// Waits for the next line. Returns `None` once every producer is gone
    /// or, for queue-backed outboxes, after `close` and a full drain.
    pub async fn recv(&mut self) -> Option<String> {
        match &mut self.receiver {
            Receiver::Queue(rx) => rx.recv().await,
            Receiver::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(line) => return Some(line),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Outbox full, dropped oldest lines");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Returns an already queued line without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        match &mut self.receiver {
            Receiver::Queue(rx) => rx.try_recv().ok(),
            Receiver::Ring(rx) => loop {
                match rx.try_recv() {
                    Ok(line) => return Some(line),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Outbox full, dropped oldest lines");
                    }
                    Err(_) => return None,
                }
            },
        }
    }

    /// Stops accepting new lines. Lines already queued can still be drained,
    /// and producers blocked on a full queue are released with `Closed`.
    pub fn close(&mut self) {
        if let Receiver::Queue(rx) = &mut self.receiver {
            rx.close();
        }
    }
}
