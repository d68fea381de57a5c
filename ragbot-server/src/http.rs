//! Chatbot HTTP API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, so the behaviour can be tested
//! without going through the router.
//!
//! Endpoints:
//! - GET  /                     : liveness
//! - POST /register             : register or re-register a session
//! - POST /ask                  : ask a question (refusals are ordinary 200 answers)
//! - GET  /health               : database and pgvector status
//! - GET  /sessions/:session_id : session diagnostics

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ragbot_core::models::UserProfile;
use ragbot_core::{GatingPipeline, RagbotError};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub pipeline: Arc<GatingPipeline>,
    pub pool: PgPool,
    pub cors_allow_all: bool,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let cors_allow_all = state.cors_allow_all;
    let router = Router::new()
        .route("/", get(root_handler))
        .route("/register", post(register_handler))
        .route("/ask", post(ask_handler))
        .route("/health", get(health_handler))
        .route("/sessions/:session_id", get(session_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_allow_all {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Serve on `addr` until the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    addr: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Chatbot HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub session_id: String,
    pub name: String,
    pub job: String,
    pub company: String,
    pub country: String,
}

impl From<RegisterRequest> for UserProfile {
    fn from(req: RegisterRequest) -> Self {
        UserProfile {
            session_id: req.session_id,
            name: req.name,
            job: req.job,
            company: req.company,
            country: req.country,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub session_id: String,
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::json!(self)
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub fn root_inner() -> serde_json::Value {
    serde_json::json!({
        "status": "ok",
        "message": "Chatbot API is running",
    })
}

pub async fn register_inner(
    pipeline: &GatingPipeline,
    req: RegisterRequest,
) -> (StatusCode, serde_json::Value) {
    if req.session_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("session_id must not be empty").into_value(),
        );
    }

    let profile = UserProfile::from(req);
    match pipeline.register(&profile).await {
        Ok(()) => (StatusCode::OK, serde_json::json!({ "status": "ok" })),
        Err(e) => {
            tracing::error!(session_id = %profile.session_id, error = %e, "Registration failed");
            (error_status(&e), ErrorResponse::new(e.to_string()).into_value())
        }
    }
}

pub async fn ask_inner(
    pipeline: &GatingPipeline,
    req: AskRequest,
) -> (StatusCode, serde_json::Value) {
    if req.session_id.trim().is_empty() || req.question.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("session_id and question are required").into_value(),
        );
    }

    let start = Instant::now();
    match pipeline.ask(&req.session_id, &req.question).await {
        Ok(outcome) => {
            tracing::debug!(
                session_id = %req.session_id,
                answered = outcome.is_answered(),
                took_ms = start.elapsed().as_millis() as u64,
                "Ask completed"
            );
            let body = AskResponse {
                answer: outcome.into_text(),
            };
            (StatusCode::OK, serde_json::json!(body))
        }
        Err(e) => {
            tracing::error!(session_id = %req.session_id, error = %e, "Ask failed");
            (error_status(&e), ErrorResponse::new(e.to_string()).into_value())
        }
    }
}

/// Inner health check: queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: &PgPool) -> (StatusCode, serde_json::Value) {
    let pg_ver = match ragbot_core::db::health_check(pool).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    let pgvector_ver = match ragbot_core::db::check_pgvector(pool).await {
        Ok(v) => v,
        Err(e) => format!("unavailable: {}", e),
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "postgresql": pg_ver,
            "pgvector": pgvector_ver,
        }),
    )
}

pub async fn session_inner(
    pipeline: &GatingPipeline,
    session_id: &str,
) -> (StatusCode, serde_json::Value) {
    let state = match pipeline.store().session_state(session_id).await {
        Ok(state) => state,
        Err(e) => return (error_status(&e), ErrorResponse::new(e.to_string()).into_value()),
    };
    let messages = match pipeline.store().message_count(session_id).await {
        Ok(count) => count,
        Err(e) => return (error_status(&e), ErrorResponse::new(e.to_string()).into_value()),
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "session_id": session_id,
            "active": state.as_ref().map(|s| s.active).unwrap_or(false),
            "activated_at": state.map(|s| s.activated_at),
            "question_count": pipeline.question_count(session_id),
            "max_questions": pipeline.max_questions(),
            "messages": messages,
        }),
    )
}

// ============================================================================
// Axum handler wrappers, delegating to the inner functions
// ============================================================================

pub async fn root_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(root_inner()))
}

pub async fn register_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let (status, body) = register_inner(&state.pipeline, req).await;
    (status, Json(body))
}

pub async fn ask_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AskRequest>,
) -> impl IntoResponse {
    let (status, body) = ask_inner(&state.pipeline, req).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool).await;
    (status, Json(body))
}

pub async fn session_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = session_inner(&state.pipeline, &session_id).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Timeouts map to 504; every other dependency failure is a 500.
pub fn error_status(err: &RagbotError) -> StatusCode {
    match err {
        RagbotError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
