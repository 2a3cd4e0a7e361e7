//! Local socket file lifecycle
//!
//! Helpers used around the listener: make sure the socket's directory
//! exists, and remove a socket file without caring whether it is there.

use std::io;
use std::path::Path;
use tokio::fs;

/// Mode for directories created on the way to the local socket
const SOCKET_DIR_MODE: u32 = 0o755;

/// Create the parent directory of `path` (and its ancestors) if missing
pub async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(SOCKET_DIR_MODE)
                .create(parent)
                .await
        }
        _ => Ok(()),
    }
}

/// Remove the file at `path`
///
/// Returns `Ok(true)` if a file was removed and `Ok(false)` if there was
/// nothing to remove. Any other filesystem error is returned.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.sock");

        assert!(!remove_if_exists(&path).await.unwrap());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stale.sock");
        std::fs::write(&path, "stale").unwrap();

        assert!(remove_if_exists(&path).await.unwrap());
        assert!(!path.exists());

        // Second removal finds nothing
        assert!(!remove_if_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("not-a-socket");
        std::fs::create_dir(&path).unwrap();

        assert!(remove_if_exists(&path).await.is_err());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_creates_ancestors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a").join("b").join("relay.sock");

        ensure_parent_dir(&path).await.unwrap();
        assert!(temp_dir.path().join("a").join("b").is_dir());
        assert!(!path.exists());

        // Existing directory is fine
        ensure_parent_dir(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_relative_name() {
        // A bare file name has an empty parent, nothing to create
        ensure_parent_dir(Path::new("relay.sock")).await.unwrap();
    }
}
