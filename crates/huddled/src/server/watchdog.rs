//! Per-session idle watchdog.
//!
//! Each wait for a liveness signal gets a fresh timeout, so a session is
//! kicked only after one full quiet period with no processed line.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, trace};

use super::session::{DisconnectReason, Liveness, Session};
use crate::hub::Hub;

/// Watches one session until it closes or goes idle.
pub async fn run_watchdog(hub: Hub, session: Arc<Session>, mut liveness: mpsc::Receiver<Liveness>) {
    let idle_timeout = hub.config().idle_timeout;

    loop {
        tokio::select! {
            _ = session.closed() => break,

            signal = timeout(idle_timeout, liveness.recv()) => match signal {
                Ok(Some(Liveness::Alive)) => {
                    trace!(session_id = session.id(), "Idle timer reset");
                }
                Ok(Some(Liveness::Terminating)) | Ok(None) => break,
                Err(_) => {
                    info!(
                        session_id = session.id(),
                        name = %session.name(),
                        idle_secs = idle_timeout.as_secs(),
                        "Session idle, kicking"
                    );
                    hub.disconnect(&session, DisconnectReason::IdleTimeout).await;
                    break;
                }
            },
        }
    }
}
