//! Server connection for the huddle client.
//!
//! A connection splits into two independent halves:
//! - [`CommandSink`] encodes [`Command`]s onto the socket
//! - [`pump_responses`] copies every server line to an output (stdout)
//!
//! The server never replies in lockstep with requests, so the two halves
//! run concurrently and share nothing.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use huddle_protocol::Command;

use crate::error::{ClientError, Result};

/// Connects to the chat server at `host:port`.
///
/// # Errors
///
/// - `ClientError::Connect` if the server cannot be reached
pub async fn connect(
    host: &str,
    port: u16,
) -> Result<(CommandSink<OwnedWriteHalf>, BufReader<OwnedReadHalf>)> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ClientError::Connect {
            addr: addr.clone(),
            source,
        })?;

    info!(addr = %addr, "Connected to server");

    let (reader, writer) = stream.into_split();
    Ok((CommandSink::new(writer), BufReader::new(reader)))
}

/// Writes encoded commands, one per line.
#[derive(Debug)]
pub struct CommandSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> CommandSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Sends one command and flushes it.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        debug!(command = command.kind(), "Sending command");
        let mut line = command.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Copies server lines to `out` until the server closes the connection.
///
/// Returns `ClientError::Disconnected` on end-of-stream so callers can
/// tell a server hang-up from a local exit.
pub async fn pump_responses<R, O>(mut reader: R, mut out: O) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            debug!("Server closed the connection");
            return Err(ClientError::Disconnected);
        }
        out.write_all(&line).await?;
        out.flush().await?;
    }
}
