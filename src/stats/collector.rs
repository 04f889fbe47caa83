use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::protocol::{Response, VerificationResult};

use super::report::Report;

/// Upper bound on retained request details.
pub const MAX_DETAILS: usize = 10_000;
/// On overflow the oldest tenth is dropped as one batch.
const DETAIL_DROP_BATCH: usize = MAX_DETAILS / 10;

/// One finished request as the worker hands it over.
#[derive(Debug, Clone, Default)]
pub struct RequestOutcome {
    pub success: bool,
    pub status_code: u16,
    pub duration: Duration,
    pub size: u64,
    pub error: Option<String>,
    pub url: String,
    pub method: String,
    pub query: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub response_body: String,
    pub response_headers: BTreeMap<String, String>,
    pub verifications: Vec<VerificationResult>,
}

impl RequestOutcome {
    /// Builds an outcome from a response that reached (or echoed) the wire.
    #[must_use]
    pub fn from_response(response: &Response, success: bool, error: Option<String>) -> Self {
        RequestOutcome {
            success,
            status_code: response.status_code,
            duration: response.duration,
            size: response.body.len() as u64,
            error: error.or_else(|| response.error.clone()),
            url: response.request_url.clone(),
            method: response.request_method.clone(),
            query: response.request_query.clone(),
            headers: response.request_headers.clone(),
            body: response.request_body.clone(),
            response_body: response.body_text().into_owned(),
            response_headers: response.headers.clone(),
            verifications: response.verifications.clone(),
        }
    }
}

/// One retained entry of the detail ring, served by `/api/details` and the
/// report.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDetail {
    pub id: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub status_code: u16,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub query: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub response_body: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub response_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub verifications: Vec<VerificationResult>,
}

/// Instantaneous counters for the live view.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub avg_duration: Duration,
    pub total_bytes: u64,
}

#[derive(Debug)]
struct CollectorInner {
    total_duration: Duration,
    durations: Vec<Duration>,
    min_duration: Duration,
    max_duration: Duration,
    total_bytes: u64,
    errors: HashMap<String, u64>,
    status_codes: HashMap<u16, u64>,
    details: VecDeque<RequestDetail>,
}

/// Concurrent sink for request outcomes.
///
/// Counters are hot-path atomics so snapshot readers observe progress
/// without blocking writers; everything else sits behind one coarse mutex
/// with a short critical section and no I/O inside.
pub struct Collector {
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    inner: Mutex<CollectorInner>,
}

impl Collector {
    #[must_use]
    pub fn new() -> Self {
        Collector {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            inner: Mutex::new(CollectorInner {
                total_duration: Duration::ZERO,
                durations: Vec::with_capacity(MAX_DETAILS),
                min_duration: Duration::MAX,
                max_duration: Duration::ZERO,
                total_bytes: 0,
                errors: HashMap::new(),
                status_codes: HashMap::new(),
                details: VecDeque::with_capacity(MAX_DETAILS),
            }),
        }
    }

    /// Records one outcome. The returned id reflects arrival order, which is
    /// the collector's total order.
    pub fn record(&self, outcome: RequestOutcome) -> u64 {
        let id = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        if outcome.success {
            self.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        inner.total_duration += outcome.duration;
        inner.durations.push(outcome.duration);
        if outcome.duration < inner.min_duration {
            inner.min_duration = outcome.duration;
        }
        if outcome.duration > inner.max_duration {
            inner.max_duration = outcome.duration;
        }
        inner.total_bytes += outcome.size;

        if outcome.status_code > 0 {
            *inner.status_codes.entry(outcome.status_code).or_insert(0) += 1;
        }
        if !outcome.success {
            if let Some(message) = &outcome.error {
                *inner.errors.entry(message.clone()).or_insert(0) += 1;
            }
        }

        if inner.details.len() >= MAX_DETAILS {
            inner.details.drain(..DETAIL_DROP_BATCH);
        }
        inner.details.push_back(RequestDetail {
            id,
            timestamp: chrono::Utc::now(),
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            status_code: outcome.status_code,
            success: outcome.success,
            error: outcome.error,
            size: outcome.size,
            url: outcome.url,
            method: outcome.method,
            query: outcome.query,
            headers: outcome.headers,
            body: outcome.body,
            response_body: outcome.response_body,
            response_headers: outcome.response_headers,
            verifications: outcome.verifications,
        });

        id
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let total_requests = self.total.load(Ordering::SeqCst);
        let success_requests = self.success.load(Ordering::SeqCst);
        let failed_requests = self.failed.load(Ordering::SeqCst);

        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let min_duration = if total_requests > 0 {
            inner.min_duration
        } else {
            Duration::ZERO
        };
        let avg_duration = if total_requests > 0 {
            inner.total_duration / u32::try_from(total_requests).unwrap_or(u32::MAX)
        } else {
            Duration::ZERO
        };

        Snapshot {
            total_requests,
            success_requests,
            failed_requests,
            min_duration,
            max_duration: inner.max_duration,
            avg_duration,
            total_bytes: inner.total_bytes,
        }
    }

    #[must_use]
    pub fn status_codes(&self) -> HashMap<u16, u64> {
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        inner.status_codes.clone()
    }

    #[must_use]
    pub fn errors(&self) -> HashMap<String, u64> {
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        inner.errors.clone()
    }

    /// The most recent `count` durations in milliseconds, oldest first.
    #[must_use]
    pub fn recent_durations(&self, count: usize) -> Vec<u64> {
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let start = inner.durations.len().saturating_sub(count);
        inner.durations[start..]
            .iter()
            .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            .collect()
    }

    /// Reverse-chronological page of the detail ring.
    #[must_use]
    pub fn details(&self, offset: usize, limit: usize, only_errors: bool) -> Vec<RequestDetail> {
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let filtered: Vec<&RequestDetail> = inner
            .details
            .iter()
            .rev()
            .filter(|detail| !only_errors || !detail.success)
            .collect();

        if offset >= filtered.len() {
            return Vec::new();
        }
        let end = (offset + limit).min(filtered.len());
        filtered[offset..end].iter().map(|d| (*d).clone()).collect()
    }

    #[must_use]
    pub fn details_count(&self, only_errors: bool) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        if only_errors {
            inner
                .details
                .iter()
                .filter(|detail| !detail.success)
                .count()
        } else {
            inner.details.len()
        }
    }

    /// Builds the end-of-run report. Percentiles read a sorted copy of the
    /// durations at `⌊(n−1)·p⌋`.
    #[must_use]
    pub fn generate_report(&self, total_time: Duration) -> Report {
        let total_requests = self.total.load(Ordering::SeqCst);
        let success_requests = self.success.load(Ordering::SeqCst);
        let failed_requests = self.failed.load(Ordering::SeqCst);

        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let mut durations = inner.durations.clone();
        durations.sort_unstable();

        let percentile = |p: f64| -> Duration {
            if durations.is_empty() {
                return Duration::ZERO;
            }
            let index = ((durations.len() - 1) as f64 * p) as usize;
            durations[index]
        };

        let success_rate = if total_requests > 0 {
            success_requests as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };
        let avg_duration = if total_requests > 0 {
            inner.total_duration / u32::try_from(total_requests).unwrap_or(u32::MAX)
        } else {
            Duration::ZERO
        };
        let qps = if total_time.as_secs_f64() > 0.0 {
            total_requests as f64 / total_time.as_secs_f64()
        } else {
            0.0
        };

        Report {
            total_requests,
            success_requests,
            failed_requests,
            success_rate,
            total_time,
            min_duration: if total_requests > 0 {
                inner.min_duration
            } else {
                Duration::ZERO
            },
            max_duration: inner.max_duration,
            avg_duration,
            p50: percentile(0.50),
            p90: percentile(0.90),
            p95: percentile(0.95),
            p99: percentile(0.99),
            qps,
            total_bytes: inner.total_bytes,
            errors: inner.errors.clone(),
            status_codes: inner.status_codes.clone(),
            request_details: inner.details.iter().cloned().collect(),
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Collector::new()
    }
}
