use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::StartupError;
use crate::shutdown::Shutdown;

use super::collector::{Collector, RequestDetail};

pub(super) const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// Queue depth per SSE subscriber; a full queue drops that tick.
const SUBSCRIBER_QUEUE: usize = 10;
const MAX_DETAIL_LIMIT: usize = 1_000;
const RECENT_DURATIONS: usize = 20;

/// One frame of the live feed.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeData {
    pub timestamp: i64,
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub qps: f64,
    pub avg_duration_ms: u64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub elapsed_seconds: u64,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub errors: HashMap<String, u64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub status_codes: HashMap<u16, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_durations: Vec<u64>,
}

struct ServerState {
    collector: Arc<Collector>,
    started: Instant,
    completed: Mutex<Option<Instant>>,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<String>>>,
    next_subscriber: AtomicU64,
}

impl ServerState {
    fn elapsed(&self) -> Duration {
        let completed = self.completed.lock().unwrap_or_else(|err| err.into_inner());
        match *completed {
            Some(end) => end.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    fn collect_data(&self) -> RealtimeData {
        let snapshot = self.collector.snapshot();
        let elapsed = self.elapsed().as_secs_f64();

        let (success_rate, qps) = if snapshot.total_requests > 0 && elapsed > 0.0 {
            (
                snapshot.success_requests as f64 / snapshot.total_requests as f64 * 100.0,
                snapshot.total_requests as f64 / elapsed,
            )
        } else {
            (0.0, 0.0)
        };

        RealtimeData {
            timestamp: chrono::Utc::now().timestamp(),
            total_requests: snapshot.total_requests,
            success_requests: snapshot.success_requests,
            failed_requests: snapshot.failed_requests,
            success_rate,
            qps,
            avg_duration_ms: u64::try_from(snapshot.avg_duration.as_millis()).unwrap_or(u64::MAX),
            min_duration_ms: u64::try_from(snapshot.min_duration.as_millis()).unwrap_or(u64::MAX),
            max_duration_ms: u64::try_from(snapshot.max_duration.as_millis()).unwrap_or(u64::MAX),
            elapsed_seconds: elapsed as u64,
            errors: self.collector.errors(),
            status_codes: self.collector.status_codes(),
            recent_durations: self.collector.recent_durations(RECENT_DURATIONS),
        }
    }
}

/// HTTP surface streaming collector snapshots: `/` dashboard, `/stream`
/// (SSE at 1 Hz), `/api/data`, `/api/details`.
pub struct RealtimeServer {
    state: Arc<ServerState>,
    shutdown: Shutdown,
    port: u16,
}

impl RealtimeServer {
    #[must_use]
    pub fn new(collector: Arc<Collector>, port: u16) -> Self {
        RealtimeServer {
            state: Arc::new(ServerState {
                collector,
                started: Instant::now(),
                completed: Mutex::new(None),
                subscribers: RwLock::new(HashMap::new()),
                next_subscriber: AtomicU64::new(0),
            }),
            shutdown: Shutdown::new(),
            port,
        }
    }

    /// Binds the listener, launches the serve loop and the 1 Hz broadcast
    /// loop, and returns the bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Bind`] when the port is taken; callers treat
    /// this as a warning and keep the run going.
    pub async fn start(&self) -> Result<SocketAddr, StartupError> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|err| StartupError::Bind {
                port: self.port,
                source: err,
            })?;
        let addr = listener.local_addr().map_err(|err| StartupError::Bind {
            port: self.port,
            source: err,
        })?;

        let app = Router::new()
            .route("/", get(index))
            .route("/stream", get(stream))
            .route("/api/data", get(data))
            .route("/api/details", get(details))
            .with_state(Arc::clone(&self.state));

        let serve_shutdown = self.shutdown.triggered();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(serve_shutdown);
            if let Err(err) = server.await {
                warn!("realtime server error: {}", err);
            }
        });

        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { broadcast_loop(state, shutdown).await });

        info!("realtime dashboard listening on http://{}", addr);
        Ok(addr)
    }

    /// Freezes the timebase so the displayed QPS stops advancing once the
    /// run ends.
    pub fn mark_completed(&self) {
        let mut completed = self
            .state
            .completed
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        if completed.is_none() {
            *completed = Some(Instant::now());
            debug!("realtime server marked completed");
        }
    }

    /// Stops the broadcast loop, drops every subscriber queue and shuts the
    /// listener down gracefully.
    pub fn stop(&self) {
        self.shutdown.trigger();
        if let Ok(mut subscribers) = self.state.subscribers.write() {
            subscribers.clear();
        }
    }
}

async fn broadcast_loop(state: Arc<ServerState>, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.triggered() => break,
            _ = ticker.tick() => {}
        }

        let is_empty = state
            .subscribers
            .read()
            .map(|subscribers| subscribers.is_empty())
            .unwrap_or(true);
        if is_empty {
            continue;
        }

        let Ok(frame) = serde_json::to_string(&state.collect_data()) else {
            continue;
        };

        let mut stale = Vec::new();
        if let Ok(subscribers) = state.subscribers.read() {
            for (id, queue) in subscribers.iter() {
                match queue.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Slow consumer; it tolerates the gap.
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => stale.push(*id),
                }
            }
        }
        if !stale.is_empty() {
            if let Ok(mut subscribers) = state.subscribers.write() {
                for id in stale {
                    subscribers.remove(&id);
                }
            }
        }
    }
}

async fn index() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn data(State(state): State<Arc<ServerState>>) -> Json<RealtimeData> {
    Json(state.collect_data())
}

async fn stream(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<String>(SUBSCRIBER_QUEUE);

    // Initial frame so the dashboard renders before the first tick.
    if let Ok(frame) = serde_json::to_string(&state.collect_data()) {
        drop(tx.try_send(frame));
    }

    let id = state.next_subscriber.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut subscribers) = state.subscribers.write() {
        subscribers.insert(id, tx);
    }
    debug!(subscriber = id, "sse subscriber connected");

    let stream = ReceiverStream::new(rx).map(|frame| Ok(Event::default().data(frame)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct DetailsQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    errors: bool,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
struct DetailsPage {
    total: usize,
    offset: usize,
    limit: usize,
    details: Vec<RequestDetail>,
}

async fn details(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DetailsQuery>,
) -> Json<DetailsPage> {
    let limit = query.limit.min(MAX_DETAIL_LIMIT);
    let details = state.collector.details(query.offset, limit, query.errors);
    let total = state.collector.details_count(query.errors);
    Json(DetailsPage {
        total,
        offset: query.offset,
        limit,
        details,
    })
}
