//! Helpers shared by unit tests.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broadcast::{self, Broadcaster};
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::registry::Registry;
use crate::server::{Session, SessionChannels};

/// A hub whose broadcast channel is not being drained, so tests can
/// inspect `broadcaster.receiver` directly.
pub(crate) fn test_hub(config: ServerConfig) -> (Hub, Broadcaster) {
    let (handle, broadcaster) = broadcast::channel();
    (
        Hub::new(Registry::new(), handle, Arc::new(config)),
        broadcaster,
    )
}

/// Creates and registers a session named after `address`.
pub(crate) async fn online(hub: &Hub, id: u64, address: &str) -> (Arc<Session>, SessionChannels) {
    let (session, channels) = Session::new(
        id,
        address,
        hub.config().outbox,
        &CancellationToken::new(),
    );
    hub.register(&session).await.expect("register test session");
    (session, channels)
}

/// Drains everything currently queued in an outbox.
pub(crate) fn drain(channels: &mut SessionChannels) -> Vec<String> {
    std::iter::from_fn(|| channels.outbox.try_recv()).collect()
}
