//! Transport abstraction for socket tunnels
//!
//! A socket relay never talks to the remote host directly. It only needs one
//! capability from whatever secure session is already established: open a new
//! duplex byte channel to a named Unix socket on the far side. This crate
//! defines that capability so the relay stays independent of the session
//! implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 socktunnel-relay                         │
//! │      (listener, accept loop, per-connection pumps)       │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ open_channel("/var/run/docker.sock")
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │            socktunnel-transport (this crate)             │
//! │                 - Transport                              │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Implemented by
//!                           ↓
//! ┌──────────────────────┬──────────────────────┬───────────┐
//! │ LocalTransport       │ russh client Handle  │  Custom   │
//! │ (same-host sockets)  │ (feature "ssh")      │ sessions  │
//! └──────────────────────┴──────────────────────┴───────────┘
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

mod local;
#[cfg(feature = "ssh")]
mod ssh;

pub use local::LocalTransport;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Remote endpoint {endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel to {endpoint} rejected: {reason}")]
    Rejected { endpoint: String, reason: String },

    #[error("Transport closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A duplex byte stream usable as a relay channel
pub trait DuplexChannel: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> DuplexChannel for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Opens channels to named endpoints on the remote side of a session
///
/// Implementations are shared by every connection of a relay without any
/// extra synchronization, so `open_channel` must be safe to call
/// concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The channel type produced by this transport
    type Channel: DuplexChannel;

    /// Open a duplex channel to the Unix socket at `remote_path`
    async fn open_channel(&self, remote_path: &str) -> TransportResult<Self::Channel>;

    /// Short human-readable name used in log fields (e.g. "ssh", "local")
    fn name(&self) -> &str;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport,
{
    type Channel = T::Channel;

    async fn open_channel(&self, remote_path: &str) -> TransportResult<Self::Channel> {
        self.as_ref().open_channel(remote_path).await
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }
}
