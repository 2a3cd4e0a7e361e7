//! Same-host transport: channels are plain Unix socket connections

use crate::{Transport, TransportError, TransportResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::debug;

/// Transport that "opens a channel" by connecting to a Unix socket on this host
///
/// Useful for re-exposing a socket under a different path, and as a loopback
/// stand-in for a remote session in tests. An optional root directory is
/// prepended to every remote path, so `/var/run/docker.sock` resolves to
/// `<root>/var/run/docker.sock`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    root: Option<PathBuf>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolve every remote path below `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Map a remote socket path to the local filesystem path that is dialed
    pub fn resolve(&self, remote_path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(remote_path.trim_start_matches('/')),
            None => PathBuf::from(remote_path),
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    type Channel = UnixStream;

    async fn open_channel(&self, remote_path: &str) -> TransportResult<Self::Channel> {
        let path = self.resolve(remote_path);
        debug!(path = %path.display(), "Opening local channel");

        UnixStream::connect(&path)
            .await
            .map_err(|source| TransportError::Unreachable {
                endpoint: path.display().to_string(),
                source,
            })
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[test]
    fn test_resolve_without_root() {
        let transport = LocalTransport::new();
        assert_eq!(
            transport.resolve("/var/run/docker.sock"),
            PathBuf::from("/var/run/docker.sock")
        );
        assert!(transport.root().is_none());
    }

    #[test]
    fn test_resolve_with_root() {
        let transport = LocalTransport::with_root("/srv/remote");
        assert_eq!(
            transport.resolve("/run/containerd/containerd.sock"),
            PathBuf::from("/srv/remote/run/containerd/containerd.sock")
        );
        assert_eq!(
            transport.resolve("relative.sock"),
            PathBuf::from("/srv/remote/relative.sock")
        );
    }

    #[tokio::test]
    async fn test_open_channel_connects_to_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let transport = LocalTransport::new();
        let mut channel = transport
            .open_channel(socket_path.to_str().unwrap())
            .await
            .unwrap();

        channel.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        channel.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_channel_with_root() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("var/run")).unwrap();
        let _listener = UnixListener::bind(temp_dir.path().join("var/run/docker.sock")).unwrap();

        let transport = LocalTransport::with_root(temp_dir.path());
        assert!(transport.open_channel("/var/run/docker.sock").await.is_ok());
    }

    #[tokio::test]
    async fn test_open_channel_missing_socket() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.sock");

        let transport = LocalTransport::new();
        let err = transport
            .open_channel(missing.to_str().unwrap())
            .await
            .unwrap_err();

        match err {
            TransportError::Unreachable { endpoint, source } => {
                assert!(endpoint.ends_with("missing.sock"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("Expected Unreachable, got {other:?}"),
        }
    }
}
