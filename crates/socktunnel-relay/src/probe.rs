//! Readiness probing for forwarded sockets
//!
//! The relay itself never looks at the bytes it moves. Callers that need to
//! know when the far-side daemon is actually reachable through the local
//! path run a [`HealthCheck`] with [`wait_until_ready`], which retries with a
//! fixed delay and gives up after a bounded number of attempts.

use crate::config::ProbeConfig;
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

/// Why a single health check failed
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("Failed to connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Health check timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

/// Readiness probing errors
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{check} not ready after {attempts} attempts: {last}")]
    Exhausted {
        check: String,
        attempts: u32,
        #[source]
        last: ProbeFailure,
    },
}

/// A lightweight liveness check against a forwarded socket
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), ProbeFailure>;

    /// Name used in logs and errors
    fn name(&self) -> &str {
        "health check"
    }
}

/// Run `check` until it succeeds or `config.max_attempts` is reached
///
/// Returns the attempt number that succeeded. The delay is applied between
/// attempts, never before the first one. Zero attempts is treated as one.
pub async fn wait_until_ready<C>(config: &ProbeConfig, check: &C) -> Result<u32, ProbeError>
where
    C: HealthCheck + ?Sized,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(config.attempt_timeout, check.check()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeFailure::Timeout),
        };

        match result {
            Ok(()) => {
                debug!(check = check.name(), attempt, "Endpoint is ready");
                return Ok(attempt);
            }
            Err(e) if attempt >= max_attempts => {
                return Err(ProbeError::Exhausted {
                    check: check.name().to_string(),
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                debug!(
                    check = check.name(),
                    attempt,
                    max_attempts,
                    error = %e,
                    "Endpoint not ready, retrying"
                );
            }
        }

        attempt += 1;
        tokio::time::sleep(config.delay).await;
    }
}

/// Ready as soon as the socket accepts a connection
#[derive(Debug, Clone)]
pub struct SocketConnectCheck {
    path: PathBuf,
}

impl SocketConnectCheck {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HealthCheck for SocketConnectCheck {
    async fn check(&self) -> Result<(), ProbeFailure> {
        UnixStream::connect(&self.path)
            .await
            .map_err(|source| ProbeFailure::Connect {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "socket connect"
    }
}

/// Docker-style ping: `GET /_ping` over the socket must answer `200`
#[derive(Debug, Clone)]
pub struct HttpPingCheck {
    path: PathBuf,
    request_path: String,
    host: String,
}

impl HttpPingCheck {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            request_path: "/_ping".to_string(),
            host: "docker".to_string(),
        }
    }

    pub fn with_request_path(mut self, request_path: impl Into<String>) -> Self {
        self.request_path = request_path.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HealthCheck for HttpPingCheck {
    async fn check(&self) -> Result<(), ProbeFailure> {
        let mut stream =
            UnixStream::connect(&self.path)
                .await
                .map_err(|source| ProbeFailure::Connect {
                    path: self.path.clone(),
                    source,
                })?;

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.request_path, self.host
        );
        stream.write_all(request.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        reader.read_line(&mut status_line).await?;

        match parse_status(&status_line) {
            Some(200) => Ok(()),
            Some(code) => Err(ProbeFailure::UnexpectedResponse(format!(
                "status {code}"
            ))),
            None => Err(ProbeFailure::UnexpectedResponse(
                status_line.trim_end().to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "http ping"
    }
}

/// Extract the status code from an HTTP/1.x status line
fn parse_status(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Health check built from an async closure
pub struct FnCheck<F> {
    name: String,
    check: F,
}

/// Wrap an async closure as a [`HealthCheck`]
pub fn check_fn<F, Fut>(name: impl Into<String>, check: F) -> FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProbeFailure>> + Send + 'static,
{
    FnCheck {
        name: name.into(),
        check,
    }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnCheck<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProbeFailure>> + Send + 'static,
{
    async fn check(&self) -> Result<(), ProbeFailure> {
        (self.check)().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
