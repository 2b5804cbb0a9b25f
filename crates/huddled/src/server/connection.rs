//! Connection handler for individual client connections.
//!
//! Each accepted socket gets a `ConnectionHandler` that:
//! - Creates the session and registers it under the remote address
//! - Spawns the writer task (outbox -> socket) and the watchdog task
//! - Runs the reader loop (socket -> parse -> dispatch -> liveness ping)
//! - Returns once all three have finished
//!
//! Read errors and end-of-stream take the session offline. Write errors
//! and write timeouts are fatal to this session only.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use huddle_protocol::{Command, Notice};

use super::outbox::OutboxReceiver;
use super::session::{DisconnectReason, Session, SessionId};
use super::watchdog::run_watchdog;
use crate::hub::Hub;

/// Chunk size used while discarding the tail of an oversized line.
const DISCARD_CHUNK: u64 = 4096;

/// Handles one accepted connection from start to finish.
pub struct ConnectionHandler {
    stream: TcpStream,
    address: String,
    hub: Hub,
    shutdown: CancellationToken,
    session_id: SessionId,
}

impl ConnectionHandler {
    /// Creates a handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted socket
    /// * `address` - Remote endpoint string, also the session's initial name
    /// * `hub` - Shared routing context
    /// * `shutdown` - Server-wide cancellation token
    /// * `session_id` - Unique number for this connection
    pub fn new(
        stream: TcpStream,
        address: String,
        hub: Hub,
        shutdown: CancellationToken,
        session_id: SessionId,
    ) -> Self {
        Self {
            stream,
            address,
            hub,
            shutdown,
            session_id,
        }
    }

    /// Runs the session until it is closed and its socket released.
    pub async fn run(self) {
        let Self {
            stream,
            address,
            hub,
            shutdown,
            session_id,
        } = self;

        debug!(session_id, address = %address, "Client connected");

        let (read_half, write_half) = stream.into_split();
        let (session, channels) = Session::new(session_id, address, hub.config().outbox, &shutdown);

        if let Err(e) = hub.register(&session).await {
            warn!(session_id, error = %e, "Rejecting connection");
            let notice = Notice::NameTaken(session.address().to_string());
            reject(write_half, &notice.to_string(), hub.config().write_timeout).await;
            session.mark_closed();
            return;
        }

        let writer = tokio::spawn(run_writer(
            hub.clone(),
            Arc::clone(&session),
            channels.outbox,
            write_half,
        ));
        let watchdog = tokio::spawn(run_watchdog(
            hub.clone(),
            Arc::clone(&session),
            channels.liveness,
        ));

        run_reader(&hub, &session, read_half).await;

        let _ = writer.await;
        let _ = watchdog.await;
        debug!(session_id, "Connection finished");
    }
}

/// Result of reading one framed line.
#[derive(Debug)]
enum ReadLine {
    Line(String),
    TooLong,
    Eof,
}

/// Reads lines, dispatches them, and pings the watchdog after each one.
async fn run_reader(hub: &Hub, session: &Arc<Session>, read_half: OwnedReadHalf) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    let max = hub.config().max_line_length;

    loop {
        let read = tokio::select! {
            _ = session.closed() => {
                hub.disconnect(session, DisconnectReason::Shutdown).await;
                return;
            }
            read = read_line(&mut reader, &mut buf, max) => read,
        };

        match read {
            Ok(ReadLine::Line(line)) => {
                if let Some(command) = Command::parse(&line) {
                    hub.dispatch(session, command).await;
                }
            }
            Ok(ReadLine::TooLong) => {
                debug!(session_id = session.id(), max, "Discarded oversized line");
                hub.notify(session, Notice::LineTooLong { max }).await;
            }
            Ok(ReadLine::Eof) => {
                debug!(session_id = session.id(), "Client sent EOF");
                hub.disconnect(session, DisconnectReason::PeerClosed).await;
                return;
            }
            Err(e) => {
                debug!(session_id = session.id(), error = %e, "Read failed");
                hub.disconnect(session, DisconnectReason::ReadFailed).await;
                return;
            }
        }

        session.ping();
    }
}

/// Reads one newline-terminated line of at most `max` bytes.
///
/// The terminator (`\n`, or `\r\n`) is stripped. A final line without a
/// terminator is returned as-is before `Eof`. Invalid UTF-8 is replaced
/// rather than rejected.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> std::io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();

    // One byte of headroom so a line of exactly `max` bytes still fits with its '\n'
    let limit = max as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if read == 0 {
        return Ok(ReadLine::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() as u64 >= limit {
        discard_rest(reader, buf).await?;
        return Ok(ReadLine::TooLong);
    }

    Ok(ReadLine::Line(String::from_utf8_lossy(buf).into_owned()))
}

/// Skips input up to and including the next newline.
async fn discard_rest<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let read = (&mut *reader)
            .take(DISCARD_CHUNK)
            .read_until(b'\n', buf)
            .await?;

        if read == 0 || buf.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

/// Drains the outbox onto the socket until the session closes.
///
/// On close, lines already queued are still written before the socket is
/// shut down. A failed or timed-out write tears the session down instead.
async fn run_writer<W>(hub: Hub, session: Arc<Session>, mut outbox: OutboxReceiver, write_half: W)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(write_half);
    let write_timeout = hub.config().write_timeout;

    let healthy = loop {
        let line = tokio::select! {
            biased;
            line = outbox.recv() => line,
            _ = session.closed() => break true,
        };

        let Some(line) = line else {
            break true;
        };

        if let Err(e) = write_line(&mut writer, &line, write_timeout).await {
            warn!(session_id = session.id(), error = %e, "Write failed, closing session");
            break false;
        }
    };

    // Release producers blocked on a full outbox before anything else
    outbox.close();

    if healthy {
        while let Some(line) = outbox.try_recv() {
            if write_line(&mut writer, &line, write_timeout).await.is_err() {
                break;
            }
        }
    } else {
        hub.disconnect(&session, DisconnectReason::WriteFailed).await;
    }

    if let Err(e) = close_write(&mut writer, write_timeout).await {
        debug!(session_id = session.id(), error = %e, "Socket shutdown failed");
    }
    session.mark_closed();
    debug!(session_id = session.id(), "Writer stopped");
}

async fn write_line<W>(
    writer: &mut BufWriter<W>,
    line: &str,
    write_timeout: Duration,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    match timeout(write_timeout, async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Flushes what is left and closes the write side, giving up on a peer
/// that stops reading.
async fn close_write<W>(
    writer: &mut BufWriter<W>,
    write_timeout: Duration,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    match timeout(write_timeout, writer.shutdown()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Sends a final bare notice to a connection that never went online.
async fn reject<W>(write_half: W, reason: &str, write_timeout: Duration)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(write_half);
    if let Err(e) = write_line(&mut writer, reason, write_timeout).await {
        debug!(error = %e, "Failed to send rejection");
    }
    let _ = close_write(&mut writer, write_timeout).await;
}

/// Errors local to one connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout")]
    WriteTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use crate::config::ServerConfig;
    use crate::server::SessionState;
    use crate::testing::{online, test_hub};

    /// A socket whose every write fails.
    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn lines(input: &[u8], max: usize) -> Vec<String> {
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        let mut out = Vec::new();
        loop {
            match read_line(&mut reader, &mut buf, max).await.unwrap() {
                ReadLine::Line(line) => out.push(line),
                ReadLine::TooLong => out.push("<too long>".to_string()),
                ReadLine::Eof => return out,
            }
        }
    }

    #[tokio::test]
    async fn test_read_line_strips_terminators() {
        assert_eq!(
            lines(b"hello\nwho\r\n\nlast", 64).await,
            vec!["hello", "who", "", "last"]
        );
    }

    #[tokio::test]
    async fn test_read_line_exact_limit_fits() {
        assert_eq!(lines(b"abcd\nabcde\n", 4).await, vec!["abcd", "<too long>"]);
    }

    #[tokio::test]
    async fn test_read_line_recovers_after_oversized_line() {
        let mut input = vec![b'x'; 10_000];
        input.extend_from_slice(b"\nnext\n");
        assert_eq!(lines(&input, 16).await, vec!["<too long>", "next"]);
    }

    #[tokio::test]
    async fn test_read_line_replaces_invalid_utf8() {
        assert_eq!(lines(b"a\xffb\n", 64).await, vec!["a\u{fffd}b"]);
    }

    #[tokio::test]
    async fn test_write_failure_tears_down_only_that_session() {
        let (hub, mut broadcaster) = test_hub(ServerConfig::default());
        let (broken, channels) = online(&hub, 1, "1.1.1.1:1").await;
        let (healthy, _healthy_channels) = online(&hub, 2, "2.2.2.2:2").await;
        while broadcaster.receiver.try_recv().is_ok() {}

        let writer = tokio::spawn(run_writer(
            hub.clone(),
            Arc::clone(&broken),
            channels.outbox,
            BrokenPipe,
        ));
        broken.push("hello".to_string()).await;
        writer.await.unwrap();

        assert_eq!(broken.state(), SessionState::Closed);
        assert!(hub.registry().lookup("1.1.1.1:1").await.is_none());
        assert_eq!(
            broadcaster.receiver.try_recv().unwrap(),
            "[1.1.1.1:1]1.1.1.1:1:offline"
        );

        // The rest of the server is untouched and still admits sessions
        assert!(healthy.is_online());
        let (_late, _late_channels) = online(&hub, 3, "3.3.3.3:3").await;
        assert_eq!(hub.registry().len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_counts_as_write_failure() {
        let config = ServerConfig {
            write_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let (hub, mut broadcaster) = test_hub(config);
        let (stalled, channels) = online(&hub, 1, "1.1.1.1:1").await;
        while broadcaster.receiver.try_recv().is_ok() {}

        // The peer never reads, so the one-byte pipe fills at once
        let (socket, _peer) = tokio::io::duplex(1);
        let writer = tokio::spawn(run_writer(
            hub.clone(),
            Arc::clone(&stalled),
            channels.outbox,
            socket,
        ));
        stalled.push("a line that will not fit".to_string()).await;
        writer.await.unwrap();

        assert!(stalled.is_closing());
        assert!(hub.registry().is_empty().await);
        assert_eq!(
            broadcaster.receiver.try_recv().unwrap(),
            "[1.1.1.1:1]1.1.1.1:1:offline"
        );
    }

    #[test]
    fn test_connection_error_display() {
        assert_eq!(ConnectionError::WriteTimeout.to_string(), "Write timeout");
        assert!(ConnectionError::Io("broken pipe".into())
            .to_string()
            .contains("broken pipe"));
    }
}
