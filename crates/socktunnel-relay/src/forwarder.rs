//! Per-connection byte pump between a local stream and a remote channel

use socktunnel_transport::{Transport, TransportError};
use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors that end a forwarded connection before any byte moved
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Failed to open channel to remote socket {remote}: {source}")]
    OpenChannel {
        remote: String,
        #[source]
        source: TransportError,
    },
}

/// Direction of one copy loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => write!(f, "local->remote"),
            Direction::RemoteToLocal => write!(f, "remote->local"),
        }
    }
}

/// Why a forwarded connection stopped
#[derive(Debug)]
pub enum StopReason {
    /// The local peer ended its stream
    LocalEof,
    /// The remote endpoint ended its stream
    RemoteEof,
    /// The relay asked the connection to close
    Closed,
    /// A copy loop failed
    Failed { direction: Direction, error: io::Error },
}

/// Outcome of one forwarded connection
#[derive(Debug)]
pub struct ForwardSummary {
    pub bytes_to_remote: u64,
    pub bytes_to_local: u64,
    pub reason: StopReason,
}

/// Relays accepted local streams to channels opened on a transport
pub struct Forwarder<T> {
    transport: Arc<T>,
    remote_path: Arc<str>,
    buffer_size: usize,
}

impl<T> Clone for Forwarder<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            remote_path: self.remote_path.clone(),
            buffer_size: self.buffer_size,
        }
    }
}

impl<T: Transport> Forwarder<T> {
    pub fn new(transport: Arc<T>, remote_path: impl Into<Arc<str>>, buffer_size: usize) -> Self {
        Self {
            transport,
            remote_path: remote_path.into(),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Open a remote channel for `local` and copy bytes both ways
    ///
    /// Returns once either direction hits end of stream or an error, or
    /// `close` fires. Both streams are shut down before returning. If the
    /// channel cannot be opened the local stream is shut down and the
    /// transport error is returned.
    pub async fn forward<L>(
        &self,
        mut local: L,
        close: CancellationToken,
    ) -> Result<ForwardSummary, ForwardError>
    where
        L: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let opened = tokio::select! {
            biased;
            _ = close.cancelled() => None,
            result = self.transport.open_channel(&self.remote_path) => Some(result),
        };

        let remote = match opened {
            Some(Ok(channel)) => channel,
            Some(Err(source)) => {
                close_stream(&mut local, "local").await;
                return Err(ForwardError::OpenChannel {
                    remote: self.remote_path.to_string(),
                    source,
                });
            }
            None => {
                close_stream(&mut local, "local").await;
                return Ok(ForwardSummary {
                    bytes_to_remote: 0,
                    bytes_to_local: 0,
                    reason: StopReason::Closed,
                });
            }
        };

        debug!(
            transport = self.transport.name(),
            remote = %self.remote_path,
            "Remote channel opened"
        );

        Ok(pump_duplex(local, remote, self.buffer_size, &close).await)
    }
}

/// Copy bytes between two duplex streams until one direction finishes
///
/// The first direction to reach end of stream or fail (or `close` firing)
/// ends the whole exchange; both write sides are then shut down and both
/// streams dropped, which terminates the other direction.
pub async fn pump_duplex<L, R>(
    local: L,
    remote: R,
    buffer_size: usize,
    close: &CancellationToken,
) -> ForwardSummary
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let mut bytes_to_remote = 0u64;
    let mut bytes_to_local = 0u64;

    let reason = {
        let upstream = copy_until_eof(
            &mut local_read,
            &mut remote_write,
            buffer_size,
            &mut bytes_to_remote,
        );
        let downstream = copy_until_eof(
            &mut remote_read,
            &mut local_write,
            buffer_size,
            &mut bytes_to_local,
        );

        tokio::select! {
            biased;
            _ = close.cancelled() => StopReason::Closed,
            result = upstream => match result {
                Ok(()) => StopReason::LocalEof,
                Err(error) => StopReason::Failed { direction: Direction::LocalToRemote, error },
            },
            result = downstream => match result {
                Ok(()) => StopReason::RemoteEof,
                Err(error) => StopReason::Failed { direction: Direction::RemoteToLocal, error },
            },
        }
    };

    close_stream(&mut local_write, "local").await;
    close_stream(&mut remote_write, "remote").await;

    ForwardSummary {
        bytes_to_remote,
        bytes_to_local,
        reason,
    }
}

/// Read into a bounded buffer and write everything out until EOF
async fn copy_until_eof<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    transferred: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buffer[..n]).await?;
        writer.flush().await?;
        *transferred += n as u64;
    }
}

/// Shut down the write side of a stream, ignoring "already closed"
async fn close_stream<S>(stream: &mut S, side: &'static str)
where
    S: AsyncWrite + Unpin,
{
    match stream.shutdown().await {
        Ok(()) => {}
        Err(e) if is_already_closed(&e) => {}
        Err(e) => warn!(side, error = %e, "Failed to close stream"),
    }
}

fn is_already_closed(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}
