//! A started relay that has been probed ready
//!
//! [`ForwardedEndpoint`] is what a docker or containerd client wrapper holds:
//! the relay is started, a health check confirms the daemon answers through
//! the local socket, and `done_and_wait` tears it all down again.

use crate::config::ProbeConfig;
use crate::error::RelayError;
use crate::probe::{wait_until_ready, HealthCheck, HttpPingCheck, ProbeError, SocketConnectCheck};
use crate::relay::{RelayHandle, SocketRelay};
use socktunnel_transport::Transport;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::instrument::WithSubscriber;
use tracing::{dispatcher, info, warn};

/// Docker daemon socket on the remote host
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// containerd socket on the remote host
pub const DEFAULT_CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";

/// Endpoint setup errors
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Endpoint at {} is not ready: {source}", path.display())]
    NotReady {
        path: PathBuf,
        #[source]
        source: ProbeError,
    },
}

/// A running relay whose far side answered a health check
#[derive(Debug)]
pub struct ForwardedEndpoint {
    relay: RelayHandle,
    attempts: u32,
}

impl ForwardedEndpoint {
    /// Start `relay` and wait until `check` passes
    ///
    /// If the probe gives up the relay is stopped again (and its socket file
    /// removed when auto-removal is on) before the error is returned.
    pub async fn establish<T, C>(
        relay: SocketRelay<T>,
        check: &C,
        probe: &ProbeConfig,
    ) -> Result<Self, EndpointError>
    where
        T: Transport,
        C: HealthCheck + ?Sized,
    {
        let logger = relay.config().logger.clone();
        let handle = relay.start().await?;

        let probed = wait_until_ready(probe, check)
            .with_subscriber(logger.clone())
            .await;

        match probed {
            Ok(attempts) => {
                dispatcher::with_default(&logger, || {
                    info!(
                        local = %handle.local_path().display(),
                        remote = %handle.remote_path(),
                        attempts,
                        "Forwarded endpoint ready"
                    )
                });
                Ok(Self {
                    relay: handle,
                    attempts,
                })
            }
            Err(source) => {
                let path = handle.local_path().to_path_buf();
                if let Err(e) = handle.stop().await {
                    dispatcher::with_default(&logger, || {
                        warn!(error = %e, "Failed to stop relay after readiness probe gave up")
                    });
                }
                Err(EndpointError::NotReady { path, source })
            }
        }
    }

    /// Start `relay` in front of a Docker daemon and wait for `/_ping`
    pub async fn docker<T: Transport>(
        relay: SocketRelay<T>,
        probe: &ProbeConfig,
    ) -> Result<Self, EndpointError> {
        let check = HttpPingCheck::new(relay.config().local_path.clone());
        Self::establish(relay, &check, probe).await
    }

    /// Start `relay` and wait until its local socket accepts connections
    pub async fn socket<T: Transport>(
        relay: SocketRelay<T>,
        probe: &ProbeConfig,
    ) -> Result<Self, EndpointError> {
        let check = SocketConnectCheck::new(relay.config().local_path.clone());
        Self::establish(relay, &check, probe).await
    }

    pub fn local_path(&self) -> &Path {
        self.relay.local_path()
    }

    pub fn handle(&self) -> &RelayHandle {
        &self.relay
    }

    /// Attempt on which the health check first passed
    pub fn ready_after(&self) -> u32 {
        self.attempts
    }

    /// Stop the relay and wait until every connection is closed
    pub async fn done_and_wait(self) -> Result<(), RelayError> {
        self.relay.stop().await
    }
}
