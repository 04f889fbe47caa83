use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::shutdown::Shutdown;
use crate::stats::Collector;

/// 1 Hz console progress while the run is active.
pub struct ProgressTracker {
    total: u64,
    completed: AtomicU64,
    started: Instant,
    worker_count: u64,
    collector: Arc<Collector>,
}

impl ProgressTracker {
    /// `total` of 0 means the run is duration-bounded rather than counted.
    #[must_use]
    pub fn new(total: u64, worker_count: u64, collector: Arc<Collector>) -> Self {
        ProgressTracker {
            total,
            completed: AtomicU64::new(0),
            started: Instant::now(),
            worker_count,
            collector,
        }
    }

    pub fn increment(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn run(&self, shutdown: &Shutdown) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.triggered() => break,
                _ = ticker.tick() => self.report_line(),
            }
        }
    }

    fn report_line(&self) {
        let completed = self.completed.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return;
        }
        let snapshot = self.collector.snapshot();
        let qps = completed as f64 / elapsed;

        let mut codes: Vec<(u16, u64)> = self.collector.status_codes().into_iter().collect();
        codes.sort_unstable();
        let status = if codes.is_empty() {
            "-".to_owned()
        } else {
            codes
                .iter()
                .map(|(code, count)| format!("{}:{}", code, count))
                .collect::<Vec<_>>()
                .join(" ")
        };

        if self.total > 0 {
            info!(
                "progress: {}/{} | workers {} | qps {:.1} | ok {} failed {} | status [{}]",
                completed,
                self.total,
                self.worker_count,
                qps,
                snapshot.success_requests,
                snapshot.failed_requests,
                status
            );
        } else {
            info!(
                "progress: {} in {:.0}s | workers {} | qps {:.1} | ok {} failed {} | status [{}]",
                completed,
                elapsed,
                self.worker_count,
                qps,
                snapshot.success_requests,
                snapshot.failed_requests,
                status
            );
        }
    }

    pub fn complete(&self) {
        let completed = self.completed.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        info!(
            "run complete: {} requests in {:.2}s ({:.1} req/s)",
            completed,
            elapsed,
            completed as f64 / elapsed
        );
    }
}
