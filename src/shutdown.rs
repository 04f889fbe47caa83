use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Cooperative cancellation handle shared by workers, the middleware chain
/// and the realtime server.
///
/// The atomic flag answers cheap loop-top checks; the broadcast channel
/// makes the signal awaitable inside `select!`.
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(8);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            drop(self.tx.send(()));
        }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the shutdown has been triggered. The future is owned,
    /// so it can be handed to spawned tasks and `select!` arms alike.
    pub fn triggered(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let flag = Arc::clone(&self.flag);
        let mut rx = self.tx.subscribe();
        async move {
            if flag.load(Ordering::SeqCst) {
                return;
            }
            // Err means every sender is gone, which only happens at teardown.
            drop(rx.recv().await);
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_observable_and_idempotent() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn(shutdown.triggered());
        shutdown.trigger();
        shutdown.trigger();

        assert!(shutdown.is_triggered());
        waiter.await.expect("waiter task");
    }

    #[tokio::test]
    async fn triggered_resolves_when_already_set() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.triggered().await;
    }
}
