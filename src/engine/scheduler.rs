use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::shutdown::Shutdown;
use crate::stats::Collector;

use super::middleware::SharedHandler;
use super::pool::ClientPool;
use super::progress::ProgressTracker;
use super::selector::ApiSelector;
use super::worker::Worker;

/// Launches the workers with a linear ramp-up and waits for all of them.
pub struct Scheduler {
    worker_count: u64,
    requests_per_worker: u64,
    ramp_up: Duration,
    pool: Arc<ClientPool>,
    handler: SharedHandler,
    collector: Arc<Collector>,
    selector: Arc<ApiSelector>,
    progress: Arc<ProgressTracker>,
}

impl Scheduler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_count: u64,
        requests_per_worker: u64,
        ramp_up: Duration,
        pool: Arc<ClientPool>,
        handler: SharedHandler,
        collector: Arc<Collector>,
        selector: Arc<ApiSelector>,
    ) -> Self {
        let total = worker_count.saturating_mul(requests_per_worker);
        let progress = Arc::new(ProgressTracker::new(
            total,
            worker_count,
            Arc::clone(&collector),
        ));
        Scheduler {
            worker_count,
            requests_per_worker,
            ramp_up,
            pool,
            handler,
            collector,
            selector,
            progress,
        }
    }

    /// Runs every worker to completion. Worker `i` starts at `i·T/W` into
    /// the ramp-up window. The first fatal worker error (a client that never
    /// connected) is returned; the rest are discarded.
    ///
    /// # Errors
    ///
    /// Returns the first fatal worker error.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), AppError> {
        let (error_tx, mut error_rx) =
            mpsc::channel::<AppError>(usize::try_from(self.worker_count).unwrap_or(1).max(1));

        let progress = Arc::clone(&self.progress);
        let progress_shutdown = shutdown.clone();
        let progress_task =
            tokio::spawn(async move { progress.run(&progress_shutdown).await });

        let step = if self.worker_count > 0 {
            self.ramp_up / u32::try_from(self.worker_count).unwrap_or(u32::MAX)
        } else {
            Duration::ZERO
        };

        let mut handles = Vec::with_capacity(usize::try_from(self.worker_count).unwrap_or(0));
        for id in 0..self.worker_count {
            if id > 0 && !step.is_zero() {
                tokio::select! {
                    () = shutdown.triggered() => break,
                    () = tokio::time::sleep(step) => {}
                }
            }

            let pool = Arc::clone(&self.pool);
            let handler = Arc::clone(&self.handler);
            let collector = Arc::clone(&self.collector);
            let selector = Arc::clone(&self.selector);
            let progress = Arc::clone(&self.progress);
            let requests_per_worker = self.requests_per_worker;
            let shutdown = shutdown.clone();
            let error_tx = error_tx.clone();

            handles.push(tokio::spawn(async move {
                let client = match pool.get().await {
                    Ok(client) => client,
                    Err(err) => {
                        warn!(worker = id, "failed to obtain client: {}", err);
                        drop(error_tx.try_send(AppError::Startup(err)));
                        return;
                    }
                };

                let worker = Worker::new(
                    id,
                    Arc::clone(&client),
                    handler,
                    collector,
                    selector,
                    requests_per_worker,
                    progress,
                );
                let run_result = worker.run(&shutdown).await;
                pool.put(client).await;

                if let Err(source) = run_result {
                    drop(error_tx.try_send(AppError::Worker { id, source }));
                }
            }));
        }
        drop(error_tx);

        for handle in handles {
            if let Err(err) = handle.await {
                warn!("worker task panicked: {}", err);
            }
        }
        debug!("all workers finished");

        self.progress.complete();
        progress_task.abort();

        match error_rx.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}
