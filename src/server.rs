//! HTTP endpoint for AI-assisted project descriptions.
//!
//! This is the caller of the generation pipeline: it enforces the per-request
//! file limit and the per-project quota, runs
//! [`FallbackOrchestrator::generate_with_fallback`], and records successful
//! generations.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/projects/{id}/generate` | Generate a description from file URLs |
//! | `GET`  | `/projects/{id}/quota` | Generations used / remaining |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "file_urls must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `fetch_failed` (400),
//! `generation_rejected` (422), `quota_exceeded` (429), `internal` (500),
//! `unavailable` (503), `cancelled` (503). Provider error text is never
//! returned to clients.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::GenerationError;
use crate::fallback::FallbackOrchestrator;
use crate::quota::{InMemoryQuotaStore, QuotaError, QuotaGate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<FallbackOrchestrator>,
    quota: QuotaGate,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: FallbackOrchestrator,
        quota: QuotaGate,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            quota,
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/projects/{id}/generate", post(handle_generate))
        .route("/projects/{id}/quota", get(handle_quota))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the server with an in-memory quota store.
///
/// Runs until Ctrl-C; in-flight generations are cancelled on shutdown and
/// do not consume quota.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = FallbackOrchestrator::new(config)?;
    let quota = QuotaGate::new(
        Arc::new(InMemoryQuotaStore::new()),
        config.quota.max_generations,
    );
    let shutdown = CancellationToken::new();
    let state = AppState::new(config.clone(), orchestrator, quota, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, models = ?config.completion.model_sequence(), "server listening");
    println!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %err, "internal error");
    app_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal server error",
    )
}

/// Maps pipeline errors to client responses. Only messages we wrote
/// ourselves (input validation, fetch failures) are passed through.
fn classify_generation_error(err: GenerationError) -> AppError {
    match err {
        GenerationError::InvalidInput(message) => bad_request(message),
        GenerationError::Fetch { url, status, .. } => app_error(
            StatusCode::BAD_REQUEST,
            "fetch_failed",
            match status {
                Some(status) => format!("could not fetch {} (HTTP {})", url, status),
                None => format!("could not fetch {}", url),
            },
        ),
        GenerationError::Authorization { .. }
        | GenerationError::Http { .. }
        | GenerationError::ResponseFormat(_)
        | GenerationError::Parse(_) => app_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "generation_rejected",
            "the AI service could not generate a description for these files",
        ),
        GenerationError::FallbackExhausted { .. }
        | GenerationError::ServiceUnavailable { .. }
        | GenerationError::RateLimited { .. } => app_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "the AI service is temporarily unavailable, try again later",
        ),
        GenerationError::Cancelled => app_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "cancelled",
            "generation was cancelled",
        ),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /projects/{id}/quota ============

#[derive(Serialize)]
struct QuotaResponse {
    project_id: String,
    used: u32,
    limit: u32,
    remaining: u32,
}

async fn handle_quota(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<QuotaResponse>, AppError> {
    let status = state.quota.status(&project_id).await.map_err(internal)?;
    Ok(Json(QuotaResponse {
        project_id,
        used: status.used,
        limit: status.limit,
        remaining: status.remaining(),
    }))
}

// ============ POST /projects/{id}/generate ============

#[derive(Deserialize)]
struct GenerateRequest {
    file_urls: Vec<String>,
    #[serde(default = "default_enable_fallback")]
    enable_fallback: bool,
}

fn default_enable_fallback() -> bool {
    true
}

#[derive(Serialize)]
struct GenerateResponse {
    description: String,
    technologies: Vec<String>,
    model: String,
    remaining: u32,
}

async fn handle_generate(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;

    let max_files = state.config.files.max_files;
    if request.file_urls.is_empty() {
        return Err(bad_request("file_urls must not be empty"));
    }
    if request.file_urls.len() > max_files {
        return Err(bad_request(format!(
            "at most {} files may be submitted, got {}",
            max_files,
            request.file_urls.len()
        )));
    }

    // Held until the generation finishes; dropped unused on any error.
    let reservation = state
        .quota
        .reserve(&project_id)
        .await
        .map_err(|err| match err {
            QuotaError::Exceeded { limit, .. } => app_error(
                StatusCode::TOO_MANY_REQUESTS,
                "quota_exceeded",
                format!("project has used all {} AI generations", limit),
            ),
            QuotaError::Store(err) => internal(err),
        })?;
    let remaining = reservation.status().remaining();

    let cancel = state.shutdown.child_token();
    let generation = state
        .orchestrator
        .generate_with_fallback(
            &request.file_urls,
            &project_id,
            request.enable_fallback,
            &cancel,
        )
        .await
        .map_err(classify_generation_error)?;

    reservation
        .commit(&generation.model)
        .await
        .map_err(internal)?;

    Ok(Json(GenerateResponse {
        description: generation.result.description,
        technologies: generation.result.technologies,
        model: generation.model,
        remaining,
    }))
}
