//! Web Surface: an axum router exposing REST + WebSocket endpoints over
//! the Log Stream Hub and the FIFO Queue.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use orch_core::logstream::{LogHub, LogLevel};
use orch_core::queue::{Queue, QueueError, RunOutcome};
use orch_tracker::TicketId;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::warn;

/// Shared router state: the log hub and queue are already `Arc`s
/// constructed once at service start and
/// handed here by reference, never owned.
#[derive(Clone)]
pub struct AppState {
    pub logs: Arc<LogHub>,
    pub queue: Arc<Queue>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(logs: Arc<LogHub>, queue: Arc<Queue>) -> Self {
        Self { logs, queue, started_at: Instant::now() }
    }
}

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError { status: StatusCode::CONFLICT, message: err.to_string() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

// ---------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
struct HistoryEntryResponse {
    ticket_id: TicketId,
    outcome: &'static str,
    duration_ms: u128,
}

impl From<orch_core::queue::HistoryEntry> for HistoryEntryResponse {
    fn from(entry: orch_core::queue::HistoryEntry) -> Self {
        Self {
            ticket_id: entry.ticket_id,
            outcome: match entry.outcome {
                RunOutcome::Success => "success",
                RunOutcome::Failure => "failure",
            },
            duration_ms: entry.duration.as_millis(),
        }
    }
}

#[derive(Debug, Serialize)]
struct QueueResponse {
    running: Option<TicketId>,
    queued: Vec<TicketId>,
    completed: Vec<HistoryEntryResponse>,
    failed: Vec<HistoryEntryResponse>,
    total_runs: usize,
    processing: bool,
}

#[derive(Debug, Serialize)]
struct QueueStatsResponse {
    success_rate: String,
    mean_duration: String,
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    issue_number: TicketId,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    count: Option<usize>,
}

// ---------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------

/// Builds the full router: the REST API routes, a `/ws`
/// WebSocket upgrade endpoint, and a static-file fallback to
/// `static_dir/index.html` for any unmatched non-API path (the web
/// client's rendering is out of scope; this only serves its build output).
pub fn build_router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/health", get(health))
        .route("/api/queue", get(queue_status).post(enqueue))
        .route("/api/queue/stats", get(queue_stats))
        .route("/api/queue/{id}", delete(remove_from_queue))
        .route("/api/queue/clear", post(clear_queue))
        .route("/api/logs", get(recent_logs))
        .route("/api/logs/issue/{n}", get(logs_by_issue))
        .route("/api/logs/agent/{name}", get(logs_by_agent))
        .route("/api/logs/stats", get(log_stats))
        .route("/ws", get(ws_upgrade));

    let mut router = api.with_state(state).layer(CorsLayer::permissive());

    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        router = router.fallback_service(ServeDir::new(dir).fallback(tower_http::services::ServeFile::new(index)));
    }

    router
}

pub async fn run(state: AppState, static_dir: Option<PathBuf>, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state, static_dir);
    let addr: SocketAddr = format!("{host}:{port}").parse().expect("host:port must be a valid socket address");
    tracing::info!(%addr, "orch web surface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

// ---------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now(),
    })
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueResponse> {
    let history = state.queue.history();
    let completed: Vec<_> = history
        .iter()
        .filter(|h| h.outcome == RunOutcome::Success)
        .rev()
        .take(10)
        .cloned()
        .map(HistoryEntryResponse::from)
        .collect();
    let failed: Vec<_> = history
        .iter()
        .filter(|h| h.outcome == RunOutcome::Failure)
        .rev()
        .take(10)
        .cloned()
        .map(HistoryEntryResponse::from)
        .collect();

    Json(QueueResponse {
        running: state.queue.running(),
        queued: state.queue.queued(),
        total_runs: history.len(),
        completed,
        failed,
        processing: state.queue.is_processing(),
    })
}

async fn queue_stats(State(state): State<AppState>) -> Json<QueueStatsResponse> {
    let stats = state.queue.stats();
    Json(QueueStatsResponse {
        success_rate: format!("{:.1}%", stats.success_rate * 100.0),
        mean_duration: format_duration(stats.mean_duration),
    })
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

async fn enqueue(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<StatusCode, AppError> {
    state.queue.enqueue(req.issue_number)?;
    Ok(StatusCode::ACCEPTED)
}

async fn remove_from_queue(State(state): State<AppState>, Path(id): Path<TicketId>) -> Result<StatusCode, AppError> {
    state.queue.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_queue(State(state): State<AppState>) -> StatusCode {
    state.queue.clear();
    StatusCode::NO_CONTENT
}

async fn recent_logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Json<Vec<orch_core::logstream::LogEvent>> {
    let count = q.count.unwrap_or(100);
    Json(state.logs.recent(count))
}

async fn logs_by_issue(
    State(state): State<AppState>,
    Path(n): Path<u64>,
) -> Json<Vec<orch_core::logstream::LogEvent>> {
    Json(state.logs.by_ticket(n))
}

async fn logs_by_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<Vec<orch_core::logstream::LogEvent>> {
    Json(state.logs.by_agent(&name))
}

#[derive(Debug, Serialize)]
struct LogStatsResponse {
    total: usize,
    debug: usize,
    info: usize,
    warn: usize,
    error: usize,
    fatal: usize,
}

async fn log_stats(State(state): State<AppState>) -> Json<LogStatsResponse> {
    Json(LogStatsResponse {
        total: state.logs.len(),
        debug: state.logs.by_level(LogLevel::Debug).len(),
        info: state.logs.by_level(LogLevel::Info).len(),
        warn: state.logs.by_level(LogLevel::Warn).len(),
        error: state.logs.by_level(LogLevel::Error).len(),
        fatal: state.logs.by_level(LogLevel::Fatal).len(),
    })
}

// ---------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WsFrame<'a> {
    Init { logs: &'a [orch_core::logstream::LogEvent], count: usize },
    Log { log: &'a orch_core::logstream::LogEvent },
}

/// On connect: send one `init` frame with the current ring-buffer
/// snapshot, then forward each subsequently published log as a `log`
/// frame, in publication order.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (snapshot, mut rx) = state.logs.subscribe();

    let init = WsFrame::Init { logs: &snapshot, count: snapshot.len() };
    let Ok(payload) = serde_json::to_string(&init) else { return };
    if socket.send(Message::Text(payload.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(log) => {
                        let frame = WsFrame::Log { log: &log };
                        let Ok(payload) = serde_json::to_string(&frame) else { continue };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "ws subscriber lagged, some log events were dropped");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                // Dead connections are reaped here: a closed/error frame
                // from the client, or the stream ending, drops this task
                // and its broadcast receiver.
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => continue,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_core::logstream::LogEvent;
    use orch_test_utils::FakeTracker;

    fn fake_queue() -> Arc<Queue> {
        Queue::new(Arc::new(move |_id| {
            orch_core::Orchestrator::new(orch_core::OrchestratorContext {
                tracker: Arc::new(FakeTracker::default()),
                labels: orch_core::labels::LabelScheme::new("orch/"),
                executor: Arc::new(orch_core::executor::AgentExecutor::new(
                    Arc::new(orch_test_utils::FakeAgentService::new()),
                    Arc::new(orch_core::resilience::Resilience::new(Default::default(), Default::default(), 2)),
                    None,
                )),
                roster: orch_core::agents::AgentRoster::new(),
                state: Arc::new(orch_core::state::StateStore::new(
                    Arc::new(FakeTracker::default()),
                    orch_core::labels::LabelScheme::new("orch/"),
                    orch_core::retry::RetryConfig::default(),
                )),
                worktrees: Arc::new(
                    orch_core::worktree::WorktreeManager::new(".", ".", ".orch-test-registry-web.json")
                        .expect("test harness runs inside a git repo"),
                ),
                status: orch_core::status::StatusReporter::new(
                    Arc::new(FakeTracker::default()),
                    orch_core::labels::LabelScheme::new("orch/"),
                    Arc::new(NullProvider),
                    Duration::from_secs(60),
                ),
                events: Arc::new(orch_core::events::EventBus::new()),
                resilience: Arc::new(orch_core::resilience::Resilience::new(Default::default(), Default::default(), 2)),
                retry_config: orch_core::retry::RetryConfig::default(),
                settings: orch_core::context::StageSettings::default(),
            })
        }))
    }

    struct NullProvider;
    #[async_trait::async_trait]
    impl orch_core::status::StatusSnapshotProvider for NullProvider {
        async fn snapshot(
            &self,
            _master_id: TicketId,
        ) -> Result<Vec<orch_core::body::StatusRow>, orch_tracker::TrackerError> {
            Ok(vec![])
        }
    }

    fn state() -> AppState {
        AppState::new(Arc::new(LogHub::new(100)), fake_queue())
    }

    #[tokio::test]
    async fn health_reports_ok_status() {
        let response = health(State(state())).await;
        assert_eq!(response.0.status, "ok");
    }

    #[tokio::test]
    async fn queue_status_reflects_empty_queue() {
        let response = queue_status(State(state())).await;
        assert_eq!(response.0.running, None);
        assert!(response.0.queued.is_empty());
        assert!(!response.0.processing);
    }

    #[tokio::test]
    async fn enqueue_then_remove_round_trips() {
        let s = state();
        enqueue(State(s.clone()), Json(EnqueueRequest { issue_number: 42 })).await.unwrap();
        let status = queue_status(State(s.clone())).await;
        assert!(status.0.queued.contains(&42) || status.0.running == Some(42));

        // Either still queued (removable) or already picked up by the
        // drain loop; only assert the removable case deterministically.
        if status.0.queued.contains(&42) {
            remove_from_queue(State(s), Path(42)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn recent_logs_honors_count_query() {
        let s = state();
        for i in 0..5 {
            s.logs.publish(LogEvent::new(LogLevel::Info, format!("msg {i}")));
        }
        let Json(logs) = recent_logs(State(s), Query(LogsQuery { count: Some(2) })).await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].message, "msg 4");
    }
}
