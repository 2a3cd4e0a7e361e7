//! Relay and readiness-probe configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Dispatch;

/// Default size of the per-direction transfer buffer (16 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default number of readiness probe attempts
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 3;

/// Socket relay configuration
///
/// Built once before the relay starts and never changed afterwards.
/// The logger is not serialized; a deserialized config logs nowhere until
/// [`RelayConfig::with_logger`] is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Path of the local socket that downstream clients connect to
    pub local_path: PathBuf,

    /// Path of the socket on the remote host
    pub remote_path: String,

    /// Remove a stale file at `local_path` before binding and after stopping
    #[serde(default)]
    pub auto_remove_local_socket: bool,

    /// Transfer buffer size for each copy direction
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Sink for relay log events; a no-op dispatcher unless configured
    #[serde(skip, default = "Dispatch::none")]
    pub logger: Dispatch,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl RelayConfig {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            auto_remove_local_socket: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            logger: Dispatch::none(),
        }
    }

    pub fn auto_remove_local_socket(mut self, enabled: bool) -> Self {
        self.auto_remove_local_socket = enabled;
        self
    }

    pub fn with_logger(mut self, logger: Dispatch) -> Self {
        self.logger = logger;
        self
    }

    /// Log through whatever subscriber is the default where this is called
    pub fn with_current_logger(self) -> Self {
        let current = tracing::dispatcher::get_default(Dispatch::clone);
        self.with_logger(current)
    }

    pub fn disable_logger(self) -> Self {
        self.with_logger(Dispatch::none())
    }

    /// Set the transfer buffer size; zero is bumped to one byte
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

/// Readiness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Maximum number of health checks before giving up
    #[serde(default = "default_probe_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between two attempts
    #[serde(default = "default_probe_delay", with = "duration_millis")]
    pub delay: Duration,

    /// Upper bound for a single health check
    #[serde(default = "default_probe_timeout", with = "duration_millis")]
    pub attempt_timeout: Duration,
}

fn default_probe_attempts() -> u32 {
    DEFAULT_PROBE_ATTEMPTS
}

fn default_probe_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PROBE_ATTEMPTS,
            delay: default_probe_delay(),
            attempt_timeout: default_probe_timeout(),
        }
    }
}

impl ProbeConfig {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

/// Helper module for serializing Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
