//! Integration tests for the TCP chat server.
//!
//! These tests drive `ChatServer` over real sockets on 127.0.0.1 and check
//! routing, renames, direct messages, presence queries, idle eviction and
//! shutdown as a client sees them.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use huddle_protocol::Command;
use huddled::config::{OutboxConfig, OverflowPolicy, ServerConfig};
use huddled::hub::Hub;
use huddled::server::{ChatServer, SessionState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Longest wait for an expected line
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest wait for the server to finish shutting down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a client must stay quiet to count as "received nothing"
const SILENCE_WINDOW: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    hub: Hub,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Spawns a server with default settings on an ephemeral port.
    async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    /// Spawns a server with custom settings on an ephemeral port.
    async fn spawn_with(config: ServerConfig) -> Self {
        let config = ServerConfig { port: 0, ..config };
        let cancel_token = CancellationToken::new();

        let server = ChatServer::bind(config, cancel_token.clone())
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let hub = server.hub().clone();

        let task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            hub,
            cancel_token,
            task,
        }
    }

    /// Connects a client and waits until it is announced online.
    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect to server");
        let mut client = TestClient::new(stream);
        let own = format!("[{0}]{0}:online", client.address);
        client.expect(&own).await;
        client
    }

    /// Cancels the server and waits for `run` to return.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(SHUTDOWN_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
    }
}

/// Test client connection with line helpers.
struct TestClient {
    /// The address the server knows this client by
    address: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let address = stream.local_addr().expect("client addr").to_string();
        let (reader, writer) = stream.into_split();
        Self {
            address,
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends one raw line.
    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Sends an encoded command.
    async fn send_command(&mut self, command: &Command) {
        self.send(&command.to_string()).await;
    }

    /// Receives one line, or `None` on end-of-stream.
    async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        if read == 0 {
            return None;
        }
        Some(line.trim_end_matches('\n').to_string())
    }

    /// Skips lines until `expected` arrives.
    async fn expect(&mut self, expected: &str) {
        loop {
            match self.recv().await {
                Some(line) if line == expected => return,
                Some(_) => continue,
                None => panic!("connection closed before {expected:?}"),
            }
        }
    }

    /// Skips lines until the server closes the connection.
    async fn expect_eof(&mut self) {
        while self.recv().await.is_some() {}
    }

    /// Asserts nothing matching `predicate` arrives for a short while.
    async fn assert_no_line(&mut self, predicate: impl Fn(&str) -> bool) {
        let deadline = tokio::time::Instant::now() + SILENCE_WINDOW;
        loop {
            let mut line = String::new();
            match tokio::time::timeout_at(deadline, self.reader.read_line(&mut line)).await {
                Err(_) => return,
                Ok(Ok(0)) => return,
                Ok(Ok(_)) => assert!(!predicate(line.trim_end()), "unexpected line {line:?}"),
                Ok(Err(e)) => panic!("read failed: {e}"),
            }
        }
    }
}

// ============================================================================
// Routing Tests
// ============================================================================

#[tokio::test]
async fn test_broadcast_reaches_everyone_including_sender() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    a.send("hello").await;

    let expected = format!("[{0}]{0}:hello", a.address);
    a.expect(&expected).await;
    b.expect(&expected).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_broadcasts_from_one_sender_keep_their_order() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    for i in 0..20 {
        a.send(&format!("m{i}")).await;
    }

    let prefix = format!("[{0}]{0}:m", a.address);
    let mut seen = Vec::new();
    while seen.len() < 20 {
        let line = b.recv().await.expect("line");
        if let Some(n) = line.strip_prefix(&prefix) {
            seen.push(n.parse::<u32>().unwrap());
        }
    }
    assert_eq!(seen, (0..20).collect::<Vec<_>>());

    server.shutdown().await;
}

#[tokio::test]
async fn test_join_is_announced_to_existing_sessions() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let b = server.connect().await;

    a.expect(&format!("[{0}]{0}:online", b.address)).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_rename_confirms_and_conflict_is_refused() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut c = server.connect().await;

    a.send_command(&Command::Rename("Alice".into())).await;
    a.expect(&format!(
        "[{0}]Alice:username changed from {0} to Alice",
        a.address
    ))
    .await;

    c.send("{rename}Alice").await;
    c.expect("username Alice is already used").await;

    let holder = server.hub.registry().lookup("Alice").await.unwrap();
    assert_eq!(holder.address(), a.address);
    assert!(server.hub.registry().lookup(&c.address).await.is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn test_direct_message_reaches_target_only() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    let mut c = server.connect().await;

    b.send("{rename}B").await;
    b.expect(&format!("[{0}]B:username changed from {0} to B", b.address))
        .await;

    a.send_command(&Command::direct("B", "secret").unwrap()).await;

    b.expect(&format!("[{0}]{0}:secret", a.address)).await;
    a.assert_no_line(|line| line.ends_with(":secret")).await;
    c.assert_no_line(|line| line.ends_with(":secret")).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_direct_message_to_unknown_user() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;

    a.send("{to=ghost}boo").await;
    a.expect(&format!("[{0}]{0}:username ghost does not exist", a.address))
        .await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_who_lists_online_sessions() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let b = server.connect().await;

    a.send("who").await;

    let mut listed = Vec::new();
    while listed.len() < 2 {
        let line = a.recv().await.expect("line");
        if line.ends_with(":online...") {
            listed.push(line);
        }
    }
    listed.sort();

    let mut expected = vec![
        format!("[{0}]{0}:online...", a.address),
        format!("[{0}]{0}:online...", b.address),
    ];
    expected.sort();
    assert_eq!(listed, expected);

    server.shutdown().await;
}

#[tokio::test]
async fn test_who_reply_beyond_outbox_capacity_keeps_requester() {
    let config = ServerConfig {
        outbox: OutboxConfig {
            capacity: 2,
            overflow: OverflowPolicy::Disconnect,
        },
        ..Default::default()
    };
    let server = TestServer::spawn_with(config).await;
    let mut a = server.connect().await;
    let mut rest = Vec::new();
    for _ in 0..3 {
        rest.push(server.connect().await);
    }

    a.send("who").await;

    let mut listed = 0;
    while listed < 4 {
        let line = a.recv().await.expect("requester was disconnected");
        if line.ends_with(":online...") {
            listed += 1;
        }
    }
    assert!(server.hub.registry().lookup(&a.address).await.is_some());
    assert_eq!(server.hub.registry().len().await, 4);

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_is_refused_and_session_survives() {
    let config = ServerConfig {
        max_line_length: 16,
        ..Default::default()
    };
    let server = TestServer::spawn_with(config).await;
    let mut a = server.connect().await;

    a.send(&"x".repeat(100)).await;
    a.expect("message too long (max 16 bytes)").await;

    a.send("still here").await;
    a.expect(&format!("[{0}]{0}:still here", a.address)).await;

    server.shutdown().await;
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_disconnect_is_announced_offline() {
    let server = TestServer::spawn().await;
    let a = server.connect().await;
    let mut b = server.connect().await;
    let a_address = a.address.clone();

    drop(a);

    b.expect(&format!("[{0}]{0}:offline", a_address)).await;
    sleep(Duration::from_millis(50)).await;
    assert!(server.hub.registry().lookup(&a_address).await.is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_idle_session_is_kicked() {
    let config = ServerConfig {
        idle_timeout: Duration::from_millis(600),
        ..Default::default()
    };
    let server = TestServer::spawn_with(config).await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    // Empty lines count as traffic for B while A stays silent
    for _ in 0..5 {
        sleep(Duration::from_millis(200)).await;
        b.send("").await;
    }

    a.expect(&format!("[{0}]{0}:user inactive, kicked out...", a.address))
        .await;
    a.expect_eof().await;
    b.expect(&format!("[{0}]{0}:kicked", a.address)).await;

    assert!(server.hub.registry().lookup(&a.address).await.is_none());
    assert!(server.hub.registry().lookup(&b.address).await.is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;

    server.shutdown().await;

    a.expect_eof().await;
}

#[tokio::test]
async fn test_shutdown_drains_queued_lines_before_returning() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let session = server.hub.registry().lookup(&a.address).await.unwrap();

    for i in 0..20 {
        session.push(format!("queued {i}")).await;
    }

    let hub = server.hub.clone();
    server.shutdown().await;

    // `run` only returns after every connection task has finished
    assert_eq!(session.state(), SessionState::Closed);
    assert!(hub.registry().is_empty().await);

    let mut received = Vec::new();
    while let Some(line) = a.recv().await {
        if line.starts_with("queued ") {
            received.push(line);
        }
    }
    let expected: Vec<String> = (0..20).map(|i| format!("queued {i}")).collect();
    assert_eq!(received, expected);
}
