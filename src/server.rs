//! HTTP API and Server-Sent Events transport.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (status, version, features) |
//! | `GET`    | `/analysis-modes` | Available analysis modes |
//! | `POST`   | `/analyze` | Run the pipeline and return the report |
//! | `POST`   | `/analyze/stream` | Run the pipeline, streaming progress as SSE |
//! | `GET`    | `/sessions/{id}` | Look up a streaming session |
//! | `DELETE` | `/sessions/{id}` | Cancel a running session |
//! | `GET`    | `/cache/stats` | Cache entry counts per category |
//! | `DELETE` | `/cache/{subject}` | Drop every cached entry for a subject |
//!
//! # Request Body
//!
//! ```json
//! { "competitor_name": "Acme", "competitor_website": "https://acme.test",
//!   "focus": "pricing", "analysis_mode": "deep" }
//! ```
//!
//! # Streaming
//!
//! `POST /analyze/stream` answers `text/event-stream`, one block per event:
//!
//! ```text
//! data: {"timestamp":"…","type":"session_start","analysis_mode":"simple","session_id":"…","message":"…"}
//!
//! data: {"timestamp":"…","type":"heartbeat","analysis_mode":"simple"}
//!
//! data: {"timestamp":"…","type":"complete","analysis_mode":"simple","data":{…}}
//! ```
//!
//! The session id is also returned in the `x-session-id` header. A client
//! that disconnects before the terminal event cancels the run.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid request: subject must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `stage_failure`
//! (502, body also carries the failed `run`), `internal` (500).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, info_span, Instrument};

use intel_harness_core::error::HarnessError;
use intel_harness_core::fingerprint::AnalysisRequest;
use intel_harness_core::models::{PipelineRun, RunStatus};
use intel_harness_core::profiles::{profile, AnalysisMode};

use crate::cache::{CacheStats, ResultCache};
use crate::channel::EventReceiver;
use crate::config::Config;
use crate::orchestrator::{build_orchestrator, PipelineOrchestrator, PreparedRun};
use crate::session::{OpenedSession, Session, SessionManager, SessionStatus};
use crate::sink::NoopSink;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, sessions: Arc<SessionManager>) -> Self {
        Self {
            orchestrator,
            sessions,
        }
    }

    fn cache(&self) -> &ResultCache {
        self.orchestrator.cache()
    }
}

/// Build the router with CORS open to all origins.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/analysis-modes", get(handle_modes))
        .route("/analyze", post(handle_analyze))
        .route("/analyze/stream", post(handle_analyze_stream))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_cancel_session),
        )
        .route("/cache/stats", get(handle_cache_stats))
        .route("/cache/{subject}", axum::routing::delete(handle_clear_cache))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config).await?);
    let sessions = Arc::new(SessionManager::new(config.sessions.clone()));
    let shutdown = CancellationToken::new();
    let purge = sessions.spawn_purge_task(shutdown.clone());

    let app = build_router(AppState::new(orchestrator, sessions));
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = purge.await;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<PipelineRun>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    run: Option<PipelineRun>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
            run: self.run,
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
        run: None,
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// 502 carrying the failed run, partial stage outputs included.
fn stage_failure(run: PipelineRun) -> AppError {
    let message = match &run.failure {
        Some(failure) => match failure.stage {
            Some(stage) => HarnessError::StageFailure {
                stage,
                message: failure.message.clone(),
            }
            .to_string(),
            None => failure.message.clone(),
        },
        None => "pipeline failed".to_string(),
    };
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "stage_failure".to_string(),
        message,
        run: Some(run),
    }
}

impl From<HarnessError> for AppError {
    fn from(err: HarnessError) -> Self {
        if err.is_client_error() {
            bad_request(err.to_string())
        } else {
            internal(err.to_string())
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    cache_enabled: bool,
    active_sessions: usize,
    features: Vec<&'static str>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_enabled: state.cache().is_enabled(),
        active_sessions: state.sessions.len(),
        features: vec!["analysis_modes", "streaming", "result_cache", "research_reuse"],
    })
}

// ============ GET /analysis-modes ============

#[derive(Serialize)]
struct ModeInfo {
    name: AnalysisMode,
    label: &'static str,
    description: &'static str,
    typical_duration: &'static str,
}

#[derive(Serialize)]
struct ModesResponse {
    modes: Vec<ModeInfo>,
    default: AnalysisMode,
}

async fn handle_modes() -> Json<ModesResponse> {
    Json(ModesResponse {
        modes: AnalysisMode::ALL
            .iter()
            .map(|mode| {
                let p = profile(*mode);
                ModeInfo {
                    name: *mode,
                    label: p.label,
                    description: p.description,
                    typical_duration: p.typical_duration,
                }
            })
            .collect(),
        default: AnalysisMode::default(),
    })
}

// ============ POST /analyze ============

async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Response, AppError> {
    let run = state
        .orchestrator
        .run(&request, &NoopSink, &CancellationToken::new())
        .await?;

    match (run.status, run.final_payload) {
        (RunStatus::Succeeded, Some(report)) => Ok(Json(report).into_response()),
        (_, payload) => Err(stage_failure(PipelineRun {
            final_payload: payload,
            ..run
        })),
    }
}

// ============ POST /analyze/stream ============

async fn handle_analyze_stream(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Response, AppError> {
    let prepared = PreparedRun::from_request(&request)?;

    let OpenedSession {
        session_id,
        sink,
        receiver,
        cancel,
    } = state.sessions.open(&prepared.subject, prepared.mode).await;

    let orchestrator = state.orchestrator.clone();
    let run_cancel = cancel.clone();
    tokio::spawn(
        async move {
            orchestrator.execute(&prepared, &sink, &run_cancel).await;
        }
        .instrument(info_span!("session", session_id = %session_id)),
    );

    let body = Body::from_stream(sse_stream(
        receiver,
        state.sessions.heartbeat_interval(),
        cancel.drop_guard(),
    ));

    let mut response = (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response.headers_mut().insert("x-session-id", value);
    }
    Ok(response)
}

struct StreamState {
    receiver: EventReceiver,
    heartbeat: Duration,
    /// Cancels the run if the body is dropped before the terminal event.
    guard: Option<DropGuard>,
}

/// Drain the receiver into SSE frames, heartbeat when idle, end after the
/// terminal event.
fn sse_stream(
    receiver: EventReceiver,
    heartbeat: Duration,
    guard: DropGuard,
) -> impl Stream<Item = Result<String, Infallible>> {
    let state = StreamState {
        receiver,
        heartbeat,
        guard: Some(guard),
    };
    futures::stream::unfold(state, |mut state| async move {
        let event = state.receiver.pull(state.heartbeat).await?;
        if event.is_terminal() {
            if let Some(guard) = state.guard.take() {
                guard.disarm();
            }
        }
        Some((Ok(event.to_sse_frame()), state))
    })
}

// ============ /sessions/{id} ============

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    state
        .sessions
        .get(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("session not found: {}", id)))
}

#[derive(Serialize)]
struct CancelResponse {
    session_id: String,
    cancelled: bool,
    status: SessionStatus,
}

async fn handle_cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.sessions.cancel(&id);
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| not_found(format!("session not found: {}", id)))?;
    Ok(Json(CancelResponse {
        session_id: id,
        cancelled,
        status: session.status,
    }))
}

// ============ /cache ============

async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache().stats().await)
}

#[derive(Serialize)]
struct ClearResponse {
    subject: String,
    removed: usize,
}

async fn handle_clear_cache(
    State(state): State<AppState>,
    Path(subject): Path<String>,
) -> Result<Json<ClearResponse>, AppError> {
    if subject.trim().is_empty() {
        return Err(bad_request("subject must not be empty"));
    }
    let removed = state.cache().clear_subject(&subject).await;
    Ok(Json(ClearResponse { subject, removed }))
}
