//! TCP acceptor for the chat server.
//!
//! The server:
//! - Binds the listening socket (failure aborts startup)
//! - Spawns the process-wide broadcaster
//! - Spawns a `ConnectionHandler` for each accepted client
//! - Supports graceful shutdown via `CancellationToken`: on cancel it stops
//!   accepting, waits (bounded) for every connection task to finish its
//!   teardown and drain its outbox, then stops the broadcaster
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│    Registry     │
//! │ reader / writer │     │ (name -> Session)│
//! │   / watchdog    │     └────────┬────────┘
//! └───────┬─────────┘              │ snapshot
//!         │ plain text             ▼
//!         │               ┌─────────────────┐
//!         └──────────────▶│   Broadcaster   │──▶ every session outbox
//!                         └─────────────────┘
//! ```

mod connection;
mod outbox;
mod session;
mod watchdog;

pub use connection::{ConnectionError, ConnectionHandler};
pub use outbox::{outbox, Delivery, Outbox, OutboxReceiver};
pub use session::{
    DisconnectReason, Liveness, Session, SessionChannels, SessionId, SessionState,
};
pub use watchdog::run_watchdog;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::broadcast::{self, Broadcaster};
use crate::config::{ConfigError, ServerConfig};
use crate::hub::Hub;
use crate::registry::Registry;

/// Upper bound on waiting for connections to finish after shutdown.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// TCP chat server.
pub struct ChatServer {
    /// Bound listening socket
    listener: TcpListener,

    /// Routing context shared with every connection
    hub: Hub,

    /// Fan-out task, started by `run`
    broadcaster: Broadcaster,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for session ids
    connection_counter: AtomicU64,

    /// Every spawned connection task, awaited on shutdown
    connections: TaskTracker,
}

impl ChatServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration fails validation
    /// - `ServerError::Bind` if the address cannot be bound. The service
    ///   must not start without a listener.
    pub async fn bind(
        config: ServerConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        let (handle, broadcaster) = broadcast::channel();
        let hub = Hub::new(Registry::new(), handle, Arc::new(config));

        Ok(Self {
            listener,
            hub,
            broadcaster,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            connections: TaskTracker::new(),
        })
    }

    /// Returns the address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Accept)
    }

    /// Returns the routing context (registry, config).
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Accepts connections until the cancellation token is triggered, then
    /// waits for the open sessions to shut down.
    ///
    /// Sessions hold child tokens of `cancel_token`, so cancelling it closes
    /// every one of them. The broadcaster keeps running until they are done
    /// and fans out their `offline` notices to any peer whose writer is
    /// still draining. Peers closing at the same moment may miss them.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            hub,
            broadcaster,
            cancel_token,
            connection_counter,
            connections,
        } = self;

        info!(addr = %hub.config().bind_addr(), "Chat server listening");

        let broadcast_token = CancellationToken::new();
        let fan_out = tokio::spawn(broadcaster.run(hub.clone(), broadcast_token.clone()));

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let id = connection_counter.fetch_add(1, Ordering::Relaxed);
                            handle_connection(&connections, &hub, &cancel_token, stream, addr, id);
                        }
                        Err(e) => {
                            // Continue accepting other connections
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        drop(listener);
        connections.close();
        debug!(open = connections.len(), "Waiting for connections to close");

        if timeout(SHUTDOWN_GRACE_PERIOD, connections.wait()).await.is_err() {
            warn!(
                open = connections.len(),
                grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                "Connections still open after grace period"
            );
        }

        broadcast_token.cancel();
        let _ = fan_out.await;

        info!("Chat server stopped");
        Ok(())
    }
}

/// Spawns the handler task for one accepted socket.
fn handle_connection(
    connections: &TaskTracker,
    hub: &Hub,
    cancel_token: &CancellationToken,
    stream: TcpStream,
    addr: SocketAddr,
    id: SessionId,
) {
    let handler = ConnectionHandler::new(
        stream,
        addr.to_string(),
        hub.clone(),
        cancel_token.clone(),
        id,
    );
    connections.spawn(handler.run());
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener error: {0}")]
    Accept(#[source] std::io::Error),
}
