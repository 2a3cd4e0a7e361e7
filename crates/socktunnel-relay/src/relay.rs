//! Socket relay lifecycle: bind, accept, dispatch, drain

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::forwarder::Forwarder;
use crate::registry::ConnectionRegistry;
use crate::socket_file;
use serde::Serialize;
use socktunnel_transport::Transport;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn, Dispatch};

/// Lifecycle state of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// Constructed, not started
    Idle,
    /// Listener bound, accepting connections
    Running,
    /// Stop requested, closing connections
    Draining,
    /// Listener closed and every connection closed (terminal)
    Stopped,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::Idle => write!(f, "idle"),
            RelayState::Running => write!(f, "running"),
            RelayState::Draining => write!(f, "draining"),
            RelayState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Exposes a remote Unix socket at a local path
///
/// A relay is started exactly once: [`SocketRelay::start`] consumes it and
/// hands back a [`RelayHandle`], whose [`RelayHandle::stop`] consumes the
/// handle in turn. Stopping twice, or stopping a relay that never bound its
/// listener, cannot be expressed.
///
/// ```no_run
/// use socktunnel_relay::{RelayConfig, SocketRelay};
/// use socktunnel_transport::LocalTransport;
///
/// # async fn run() -> Result<(), socktunnel_relay::RelayError> {
/// let config = RelayConfig::new("./.sock/docker.sock", "/var/run/docker.sock")
///     .auto_remove_local_socket(true);
/// let relay = SocketRelay::new(config, LocalTransport::new());
///
/// let handle = relay.start().await?;
/// // ... talk to ./.sock/docker.sock ...
/// handle.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct SocketRelay<T> {
    config: RelayConfig,
    transport: Arc<T>,
    state: watch::Sender<RelayState>,
}

impl<T: Transport> SocketRelay<T> {
    pub fn new(config: RelayConfig, transport: T) -> Self {
        Self::with_shared_transport(config, Arc::new(transport))
    }

    /// Build a relay on a transport that other relays also use
    pub fn with_shared_transport(config: RelayConfig, transport: Arc<T>) -> Self {
        let (state, _) = watch::channel(RelayState::Idle);
        Self {
            config,
            transport,
            state,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Watch state transitions, including those after `start`
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Prepare the local socket, bind it and start accepting connections
    ///
    /// Setup failures (directory creation, stale file removal, bind) are
    /// returned here and the relay ends in [`RelayState::Stopped`] without
    /// ever running. On success the accept loop runs in a background task
    /// until [`RelayHandle::stop`].
    pub async fn start(self) -> Result<RelayHandle, RelayError> {
        let logger = self.config.logger.clone();

        let listener = match self.bind().with_subscriber(logger.clone()).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.send_replace(RelayState::Stopped);
                return Err(e);
            }
        };

        let SocketRelay {
            config,
            transport,
            state,
        } = self;

        state.send_replace(RelayState::Running);
        let state_rx = state.subscribe();
        let shutdown = CancellationToken::new();

        let accept_loop = AcceptLoop {
            listener,
            forwarder: Forwarder::new(
                transport,
                config.remote_path.as_str(),
                config.buffer_size,
            ),
            shutdown: shutdown.clone(),
            registry: ConnectionRegistry::new(),
            state,
        };
        let task = tokio::spawn(accept_loop.run().with_subscriber(logger.clone()));

        Ok(RelayHandle {
            local_path: config.local_path,
            remote_path: config.remote_path,
            auto_remove_local_socket: config.auto_remove_local_socket,
            logger,
            shutdown,
            task,
            state: state_rx,
        })
    }

    async fn bind(&self) -> Result<UnixListener, RelayError> {
        let path = &self.config.local_path;

        socket_file::ensure_parent_dir(path)
            .await
            .map_err(|source| RelayError::CreateDir {
                path: path.clone(),
                source,
            })?;

        if self.config.auto_remove_local_socket {
            let removed = socket_file::remove_if_exists(path)
                .await
                .map_err(|source| RelayError::RemoveStale {
                    path: path.clone(),
                    source,
                })?;
            if removed {
                debug!(local = %path.display(), "Removed stale local socket file");
            }
        }

        debug!(
            local = %path.display(),
            remote = %self.config.remote_path,
            transport = self.transport.name(),
            "Starting socket relay"
        );

        UnixListener::bind(path).map_err(|source| RelayError::Bind {
            path: path.clone(),
            source,
        })
    }
}

/// The accept task: sole owner of the listener and the connection registry
struct AcceptLoop<T> {
    listener: UnixListener,
    forwarder: Forwarder<T>,
    shutdown: CancellationToken,
    registry: ConnectionRegistry,
    state: watch::Sender<RelayState>,
}

impl<T: Transport> AcceptLoop<T> {
    async fn run(self) {
        let AcceptLoop {
            listener,
            forwarder,
            shutdown,
            mut registry,
            state,
        } = self;

        info!(remote = %forwarder.remote_path(), "Socket relay listening");

        loop {
            debug!("Waiting for new connection");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Received stop signal");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        Self::dispatch(&forwarder, &shutdown, &mut registry, stream);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }

        state.send_replace(RelayState::Draining);
        drop(listener);

        let open = registry.len();
        registry.drain().await;

        state.send_replace(RelayState::Stopped);
        info!(closed_connections = open, "Socket relay drained");
    }

    fn dispatch(
        forwarder: &Forwarder<T>,
        shutdown: &CancellationToken,
        registry: &mut ConnectionRegistry,
        stream: UnixStream,
    ) {
        registry.prune_finished();

        let id = registry.next_id();
        let close = shutdown.child_token();
        debug!(connection_id = id, "Accepted connection");

        let forwarder = forwarder.clone();
        let task = tokio::spawn(
            {
                let close = close.clone();
                async move {
                    match forwarder.forward(stream, close).await {
                        Ok(summary) => debug!(
                            connection_id = id,
                            bytes_to_remote = summary.bytes_to_remote,
                            bytes_to_local = summary.bytes_to_local,
                            reason = ?summary.reason,
                            "Connection closed"
                        ),
                        Err(e) => error!(
                            connection_id = id,
                            error = %e,
                            "Failed to forward connection"
                        ),
                    }
                }
            }
            .with_current_subscriber(),
        );

        registry.register(id, close, task);
    }
}

/// Handle to a running relay
///
/// Dropping the handle without calling [`RelayHandle::stop`] still sends
/// the stop signal; the drain then finishes in the background.
pub struct RelayHandle {
    local_path: PathBuf,
    remote_path: String,
    auto_remove_local_socket: bool,
    logger: Dispatch,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<RelayState>,
}

impl RelayHandle {
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    /// Stop accepting, close every connection and wait for the drain
    ///
    /// With auto-removal enabled the local socket file is deleted once the
    /// drain completed; a failure to delete it is only logged.
    pub async fn stop(mut self) -> Result<(), RelayError> {
        let logger = self.logger.clone();
        self.stop_and_wait().with_subscriber(logger).await
    }

    async fn stop_and_wait(&mut self) -> Result<(), RelayError> {
        debug!(local = %self.local_path.display(), "Stopping socket relay");
        self.shutdown.cancel();

        let joined = (&mut self.task).await;

        if self.auto_remove_local_socket {
            if let Err(e) = socket_file::remove_if_exists(&self.local_path).await {
                warn!(
                    local = %self.local_path.display(),
                    error = %e,
                    "Failed to remove local socket file"
                );
            }
        }

        joined.map_err(|source| RelayError::AcceptTask {
            state: *self.state.borrow(),
            source,
        })?;

        info!(local = %self.local_path.display(), "Socket relay stopped");
        Ok(())
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHandle")
            .field("local_path", &self.local_path)
            .field("remote_path", &self.remote_path)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socktunnel_transport::LocalTransport;
    use tempfile::TempDir;

    #[test]
    fn test_state_display() {
        assert_eq!(RelayState::Idle.to_string(), "idle");
        assert_eq!(RelayState::Draining.to_string(), "draining");
        assert_eq!(
            serde_json::to_string(&RelayState::Stopped).unwrap(),
            "\"stopped\""
        );
    }

    #[tokio::test]
    async fn test_new_relay_is_idle() {
        let relay = SocketRelay::new(
            RelayConfig::new("/tmp/never-bound.sock", "/var/run/docker.sock"),
            LocalTransport::new(),
        );
        assert_eq!(relay.state(), RelayState::Idle);
        assert_eq!(relay.config().remote_path, "/var/run/docker.sock");
    }

    #[tokio::test]
    async fn test_start_and_stop_without_connections() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("relay.sock");

        let relay = SocketRelay::new(
            RelayConfig::new(&local, "/var/run/docker.sock"),
            LocalTransport::new(),
        );
        let mut states = relay.subscribe();

        let handle = relay.start().await.unwrap();
        assert_eq!(handle.state(), RelayState::Running);
        assert_eq!(*states.borrow_and_update(), RelayState::Running);
        assert!(local.exists());

        handle.stop().await.unwrap();
        assert_eq!(*states.borrow_and_update(), RelayState::Stopped);

        // Auto-removal is off, the socket file stays behind
        assert!(local.exists());
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_relay_stopped() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("taken.sock");
        std::fs::write(&local, "not a socket").unwrap();

        let relay = SocketRelay::new(
            RelayConfig::new(&local, "/var/run/docker.sock"),
            LocalTransport::new(),
        );
        let states = relay.subscribe();

        let err = relay.start().await.unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }));
        assert_eq!(err.path(), Some(local.as_path()));
        assert_eq!(*states.borrow(), RelayState::Stopped);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_accepting() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("relay.sock");

        let relay = SocketRelay::new(
            RelayConfig::new(&local, "/var/run/docker.sock"),
            LocalTransport::new(),
        );
        let mut states = relay.subscribe();

        let handle = relay.start().await.unwrap();
        drop(handle);

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            states.wait_for(|state| *state == RelayState::Stopped),
        )
        .await
        .expect("relay did not stop after handle was dropped")
        .unwrap();
    }
}
