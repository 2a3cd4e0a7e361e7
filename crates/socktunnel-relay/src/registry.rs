//! Registry of in-flight forwarded connections
//!
//! Owned by the accept loop and only ever touched from that task, so it
//! needs no lock.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// One accepted connection and the task forwarding it
struct TrackedConnection {
    id: u64,
    close: CancellationToken,
    task: JoinHandle<()>,
}

/// Connections accepted by a relay, in accept order
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    connections: Vec<TrackedConnection>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the id for the next accepted connection
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn register(&mut self, id: u64, close: CancellationToken, task: JoinHandle<()>) {
        self.connections.push(TrackedConnection { id, close, task });
    }

    /// Forget connections whose forwarding task already finished
    pub fn prune_finished(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|conn| !conn.task.is_finished());
        before - self.connections.len()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ask every connection to close, then wait for all of them
    pub async fn drain(&mut self) {
        let total = self.connections.len();
        for (i, conn) in self.connections.iter().enumerate() {
            debug!(
                connection_id = conn.id,
                "Closing connection ({} of {})",
                i + 1,
                total
            );
            conn.close.cancel();
        }

        for conn in self.connections.drain(..) {
            if let Err(e) = conn.task.await {
                // Cancellation is not possible here; only a panic lands in this branch
                error!(connection_id = conn.id, error = %e, "Forwarding task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn spawn_until_closed(close: CancellationToken, closed: Arc<AtomicUsize>) -> JoinHandle<()> {
        tokio::spawn(async move {
            close.cancelled().await;
            // Simulate a slow close so drain has to wait
            tokio::time::sleep(Duration::from_millis(20)).await;
            closed.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_drain_waits_for_every_connection() {
        let mut registry = ConnectionRegistry::new();
        let closed = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let id = registry.next_id();
            let close = CancellationToken::new();
            let task = spawn_until_closed(close.clone(), closed.clone());
            registry.register(id, close, task);
        }
        assert_eq!(registry.len(), 3);

        registry.drain().await;

        assert_eq!(closed.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_drain_empty_registry() {
        let mut registry = ConnectionRegistry::new();
        registry.drain().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_prune_finished() {
        let mut registry = ConnectionRegistry::new();

        let done = tokio::spawn(async {});
        let id = registry.next_id();
        registry.register(id, CancellationToken::new(), done);

        let pending_close = CancellationToken::new();
        let pending = spawn_until_closed(pending_close.clone(), Arc::new(AtomicUsize::new(0)));
        let id = registry.next_id();
        registry.register(id, pending_close, pending);

        // Let the finished task complete
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(registry.prune_finished(), 1);
        assert_eq!(registry.len(), 1);

        registry.drain().await;
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.next_id(), 1);
        assert_eq!(registry.next_id(), 2);
    }

    #[tokio::test]
    async fn test_drain_survives_panicking_task() {
        let mut registry = ConnectionRegistry::new();
        let close = CancellationToken::new();
        let task = tokio::spawn({
            let close = close.clone();
            async move {
                close.cancelled().await;
                panic!("forwarder blew up");
            }
        });
        let id = registry.next_id();
        registry.register(id, close, task);

        registry.drain().await;
        assert!(registry.is_empty());
    }
}
