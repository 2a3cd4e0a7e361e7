//! Shared fixtures for relay integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use socktunnel_transport::{LocalTransport, Transport, TransportError, TransportResult};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// Remote daemon stand-in that echoes every byte back
pub fn spawn_echo_server(path: &Path) -> JoinHandle<()> {
    let listener = UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    })
}

/// Remote daemon stand-in that sends `greeting` and hangs up
pub fn spawn_hangup_server(path: &Path, greeting: &'static [u8]) -> JoinHandle<()> {
    let listener = UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(greeting).await;
            drop(stream);
        }
    })
}

/// Write `payload` and read the same number of bytes back
pub async fn echo_round_trip(stream: &mut UnixStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    let mut received = vec![0u8; payload.len()];
    stream.read_exact(&mut received).await.unwrap();
    received
}

/// Loopback transport that refuses the first `failures` channel opens
pub struct FlakyTransport {
    inner: LocalTransport,
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyTransport {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: LocalTransport::new(),
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    type Channel = UnixStream;

    async fn open_channel(&self, remote_path: &str) -> TransportResult<Self::Channel> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(TransportError::Rejected {
                endpoint: remote_path.to_string(),
                reason: format!("refused attempt {}", attempt + 1),
            });
        }
        self.inner.open_channel(remote_path).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// In-memory log sink for an injected subscriber
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    pub fn dispatch(&self) -> tracing::Dispatch {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::Dispatch::new(subscriber)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
