//! HTTP API for pomotune recommendations.
//!
//! Axum handlers over a shared [`OptimizationSession`]. Session calls do
//! blocking file I/O and model fitting, so they run on the blocking pool.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use pomotune_core::{
    CoreError, CsvHistoryStore, HistoryStore, OptimizationSession, RoundRecommendation,
    SessionRecommendation, TrialRecord,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Core(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub request_id: String,
}

/// A [`ServerError`] tagged with the request it belongs to.
#[derive(Debug)]
pub struct ApiError {
    error: ServerError,
    request_id: String,
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            error: ServerError::BadRequest(rejection.body_text()),
            request_id: request_id(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            tracing::error!(request_id = %self.request_id, error = %self.error, "request failed");
        } else {
            tracing::info!(request_id = %self.request_id, error = %self.error, "request rejected");
        }
        let body = ErrorResponse {
            error: self.error.to_string(),
            request_id: self.request_id,
        };
        (status, Json(body)).into_response()
    }
}

/// Shared handler state.
pub struct AppState<S: HistoryStore = CsvHistoryStore> {
    pub session: OptimizationSession<S>,
}

impl<S: HistoryStore> AppState<S> {
    pub fn new(session: OptimizationSession<S>) -> Self {
        Self { session }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct RoundQuery {
    pub focus_score: f64,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub average_focus_score: f64,
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Run a session call on the blocking pool.
async fn blocking<S, T, F>(state: Arc<AppState<S>>, f: F) -> Result<T, ApiError>
where
    S: HistoryStore + 'static,
    T: Send + 'static,
    F: FnOnce(&OptimizationSession<S>) -> Result<T, CoreError> + Send + 'static,
{
    let request_id = request_id();
    let result = tokio::task::spawn_blocking(move || f(&state.session))
        .await
        .map_err(ServerError::from)
        .and_then(|r| r.map_err(ServerError::from));
    result.map_err(|error| ApiError { error, request_id })
}

async fn root() -> &'static str {
    "pomotune: Pomodoro timing recommendations"
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn round_optimizer<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
    query: Result<Query<RoundQuery>, QueryRejection>,
) -> Result<Json<RoundRecommendation>, ApiError> {
    let Query(query) = query?;
    blocking(state, move |session| {
        session.round_optimizer(&user_id, query.focus_score)
    })
    .await
    .map(Json)
}

async fn session_optimizer<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<String>,
    query: Result<Query<SessionQuery>, QueryRejection>,
) -> Result<Json<SessionRecommendation>, ApiError> {
    let Query(query) = query?;
    blocking(state, move |session| {
        session.session_optimizer(&user_id, query.average_focus_score)
    })
    .await
    .map(Json)
}

async fn history<S: HistoryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((target, user_id)): Path<(String, String)>,
) -> Result<Json<Vec<TrialRecord>>, ApiError> {
    blocking(state, move |session| session.history(&user_id, &target))
        .await
        .map(Json)
}

/// Build the API router.
pub fn router<S: HistoryStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/round_optimizer/:user_id", get(round_optimizer::<S>))
        .route("/session_optimizer/:user_id", get(session_optimizer::<S>))
        .route("/history/:target/:user_id", get(history::<S>))
        .with_state(state)
}

/// Bind `address` and serve until the process is stopped.
pub async fn serve<S: HistoryStore + 'static>(
    state: Arc<AppState<S>>,
    address: &str,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|e| ServerError::Bind(format!("{address}: {e}")))?;
    tracing::info!(address = %address, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
