//! Unix socket relay
//!
//! Exposes a Unix domain socket that lives on another host (typically a
//! container daemon's control socket) as a local socket file. Every local
//! client connection gets its own channel through a [`Transport`] and bytes
//! are pumped both ways until either side closes.
//!
//! ```text
//! ┌──────────┐        ┌──────────────────────┐        ┌──────────────┐
//! │  client  │──unix──│ SocketRelay          │──chan──│ remote socket│
//! │ (docker) │        │  accept → Forwarder  │        │ (dockerd)    │
//! └──────────┘        └──────────────────────┘        └──────────────┘
//!                      ConnectionRegistry tracks
//!                      every in-flight forwarder
//! ```
//!
//! [`Transport`]: socktunnel_transport::Transport

pub mod config;
pub mod endpoint;
pub mod error;
pub mod forwarder;
pub mod probe;
mod registry;
pub mod relay;
pub mod socket_file;

pub use config::{ProbeConfig, RelayConfig, DEFAULT_BUFFER_SIZE, DEFAULT_PROBE_ATTEMPTS};
pub use endpoint::{
    EndpointError, ForwardedEndpoint, DEFAULT_CONTAINERD_SOCKET, DEFAULT_DOCKER_SOCKET,
};
pub use error::RelayError;
pub use forwarder::{pump_duplex, Direction, ForwardError, ForwardSummary, Forwarder, StopReason};
pub use probe::{
    check_fn, wait_until_ready, FnCheck, HealthCheck, HttpPingCheck, ProbeError, ProbeFailure,
    SocketConnectCheck,
};
pub use relay::{RelayHandle, RelayState, SocketRelay};
