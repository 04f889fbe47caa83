use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::StartupError;
use crate::protocol::{ClientFactory, SharedClient};

/// Bounded, lazily-filled client pool.
///
/// `get` prefers an idle client, creates a new one while fewer than
/// `max_size` exist, and otherwise waits for a `put`. Surplus clients handed
/// back after `close` (a shutdown race) are closed instead of pooled.
pub struct ClientPool {
    factory: ClientFactory,
    max_size: usize,
    tx: mpsc::Sender<SharedClient>,
    rx: Mutex<mpsc::Receiver<SharedClient>>,
    created: StdMutex<usize>,
    closed: AtomicBool,
}

impl ClientPool {
    #[must_use]
    pub fn new(factory: ClientFactory, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        let (tx, rx) = mpsc::channel(max_size);
        ClientPool {
            factory,
            max_size,
            tx,
            rx: Mutex::new(rx),
            created: StdMutex::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// # Errors
    ///
    /// Returns a [`StartupError`] when a new client cannot be built or the
    /// pool is already closed.
    pub async fn get(&self) -> Result<SharedClient, StartupError> {
        {
            let mut rx = self.rx.lock().await;
            if let Ok(client) = rx.try_recv() {
                return Ok(client);
            }
        }

        {
            let mut created = self.created.lock().unwrap_or_else(|err| err.into_inner());
            if *created < self.max_size {
                let client = (self.factory)()?;
                *created += 1;
                debug!(created = *created, "created pooled client");
                return Ok(client);
            }
        }

        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(StartupError::PoolClosed)
    }

    /// Returns a client; closes it instead when the buffer is full or the
    /// pool has been shut down.
    pub async fn put(&self, client: SharedClient) {
        if self.closed.load(Ordering::SeqCst) || self.tx.try_send(client.clone()).is_err() {
            drop(client.close().await);
            let mut created = self.created.lock().unwrap_or_else(|err| err.into_inner());
            *created = created.saturating_sub(1);
        }
    }

    /// Drains the pool and closes every idle client.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut rx = self.rx.lock().await;
        while let Ok(client) = rx.try_recv() {
            drop(client.close().await);
        }
    }
}
