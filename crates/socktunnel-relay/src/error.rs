//! Relay errors

use crate::relay::RelayState;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to whoever starts or stops a relay
///
/// Everything that goes wrong after the listener is bound (one failed
/// channel, an accept error, a failed close) is logged instead.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to create local socket directory for {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove stale local socket file {}: {source}", path.display())]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to listen on local socket {}: {source}\n\nTroubleshooting:\n  • Check whether another process owns the socket: lsof {}\n  • Enable auto-removal of the local socket to replace a stale file", path.display(), path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay accept task failed while in state {state}: {source}")]
    AcceptTask {
        state: RelayState,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl RelayError {
    /// The local socket path involved, if any
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            RelayError::CreateDir { path, .. }
            | RelayError::RemoveStale { path, .. }
            | RelayError::Bind { path, .. } => Some(path),
            RelayError::AcceptTask { .. } => None,
        }
    }
}
