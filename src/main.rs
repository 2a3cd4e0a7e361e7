//! socktunnel CLI - Expose a Unix socket at another path
//!
//! Runs a socket relay in the foreground until Ctrl+C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use socktunnel_relay::{
    ForwardedEndpoint, HealthCheck, HttpPingCheck, ProbeConfig, RelayConfig, RelayHandle,
    SocketConnectCheck, SocketRelay, DEFAULT_BUFFER_SIZE, DEFAULT_DOCKER_SOCKET,
};
use socktunnel_transport::LocalTransport;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LONG_VERSION: &str = concat!(
    env!("GIT_TAG"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// socktunnel - Forward Unix domain sockets
#[derive(Parser, Debug)]
#[command(name = "socktunnel")]
#[command(about = "socktunnel - Forward Unix domain sockets")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, env = "SOCKTUNNEL_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen on a local socket path and forward every connection
    #[command(long_about = r#"
Listen on a local Unix socket and forward every accepted connection to a
remote Unix socket. Runs until interrupted with Ctrl+C, then closes every
open connection before exiting.

EXAMPLES:
  # Re-expose the Docker socket inside a project directory
  socktunnel forward --local ./.sock/docker.sock \
    --remote /var/run/docker.sock --auto-remove --http-ping

  # Forward into a mounted root filesystem
  socktunnel forward --local /tmp/containerd.sock \
    --remote /run/containerd/containerd.sock --remote-root /mnt/host

ENVIRONMENT VARIABLES:
  SOCKTUNNEL_LOCAL           Local socket path to listen on
  SOCKTUNNEL_REMOTE          Remote socket path to forward to
  SOCKTUNNEL_REMOTE_ROOT     Directory prepended to the remote path
  SOCKTUNNEL_AUTO_REMOVE     Remove the local socket file before and after
  SOCKTUNNEL_BUFFER_SIZE     Copy buffer size in bytes
  SOCKTUNNEL_PROBE_ATTEMPTS  Readiness probe attempts (0 = no probe)
  SOCKTUNNEL_PROBE_DELAY_MS  Delay between probe attempts
  SOCKTUNNEL_HTTP_PING       Probe with a Docker /_ping request
    "#)]
    Forward {
        /// Local socket path to listen on (e.g., ./.sock/docker.sock)
        #[arg(long, env = "SOCKTUNNEL_LOCAL")]
        local: PathBuf,

        /// Remote socket path to forward to
        #[arg(long, env = "SOCKTUNNEL_REMOTE", default_value = DEFAULT_DOCKER_SOCKET)]
        remote: String,

        /// Directory prepended to the remote path before connecting
        #[arg(long, env = "SOCKTUNNEL_REMOTE_ROOT")]
        remote_root: Option<PathBuf>,

        /// Remove a stale local socket file on start and the socket on exit
        #[arg(long, env = "SOCKTUNNEL_AUTO_REMOVE")]
        auto_remove: bool,

        /// Copy buffer size in bytes
        #[arg(long, env = "SOCKTUNNEL_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
        buffer_size: usize,

        /// Readiness probe attempts after start (0 disables probing)
        #[arg(long, env = "SOCKTUNNEL_PROBE_ATTEMPTS", default_value = "0")]
        probe_attempts: u32,

        /// Delay between readiness probe attempts in milliseconds
        #[arg(long, env = "SOCKTUNNEL_PROBE_DELAY_MS", default_value = "1000")]
        probe_delay_ms: u64,

        /// Probe with a Docker-style `GET /_ping` instead of a plain connect
        #[arg(long, env = "SOCKTUNNEL_HTTP_PING")]
        http_ping: bool,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// A started relay, probed or not
enum Running {
    Plain(RelayHandle),
    Probed(ForwardedEndpoint),
}

impl Running {
    async fn stop(self) -> Result<()> {
        match self {
            Running::Plain(handle) => handle.stop().await,
            Running::Probed(endpoint) => endpoint.done_and_wait().await,
        }
        .context("Failed to stop socket relay")
    }
}

#[allow(clippy::too_many_arguments)]
async fn forward(
    local: PathBuf,
    remote: String,
    remote_root: Option<PathBuf>,
    auto_remove: bool,
    buffer_size: usize,
    probe_attempts: u32,
    probe_delay_ms: u64,
    http_ping: bool,
) -> Result<()> {
    let transport = match remote_root {
        Some(root) => LocalTransport::with_root(root),
        None => LocalTransport::new(),
    };

    info!("Local socket: {}", local.display());
    info!("Remote socket: {}", transport.resolve(&remote).display());
    if auto_remove {
        info!("Local socket file will be removed on exit");
    }

    let config = RelayConfig::new(&local, remote)
        .auto_remove_local_socket(auto_remove)
        .buffer_size(buffer_size)
        .with_current_logger();
    let relay = SocketRelay::new(config, transport);

    let running = if probe_attempts == 0 {
        Running::Plain(relay.start().await.context("Failed to start socket relay")?)
    } else {
        let probe = ProbeConfig::default()
            .max_attempts(probe_attempts)
            .delay(Duration::from_millis(probe_delay_ms));
        let check: Box<dyn HealthCheck> = if http_ping {
            Box::new(HttpPingCheck::new(&local))
        } else {
            Box::new(SocketConnectCheck::new(&local))
        };

        let endpoint = ForwardedEndpoint::establish(relay, check.as_ref(), &probe)
            .await
            .context("Failed to establish forwarded socket")?;
        info!(
            "Remote socket answered {} after {} attempt(s)",
            check.name(),
            endpoint.ready_after()
        );
        Running::Probed(endpoint)
    };

    info!("Forwarding, press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    } else {
        info!("Shutting down...");
    }

    running.stop().await?;
    info!("Stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Forward {
            local,
            remote,
            remote_root,
            auto_remove,
            buffer_size,
            probe_attempts,
            probe_delay_ms,
            http_ping,
        } => {
            forward(
                local,
                remote,
                remote_root,
                auto_remove,
                buffer_size,
                probe_attempts,
                probe_delay_ms,
                http_ping,
            )
            .await
        }
    }
}
