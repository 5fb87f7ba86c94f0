//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload/movies/csv` | Ingest a CSV body (`text/csv` or `application/csv`) |
//! | `POST` | `/api/fetch/movies` | Filtered, sorted, paginated movie query |
//! | `GET`  | `/api/health_check` | Liveness; never touches the store |
//!
//! # Error Contract
//!
//! Every failure, whether the client sent a bad payload or the store is
//! down, is answered with `502` and a single message:
//!
//! ```json
//! { "error": "Exception @fetch_movies: Sort params only accept -1 (descending) or 1 (ascending) as value" }
//! ```
//!
//! # CORS
//!
//! All origins are allowed, with `Content-Type` and `Authorization` request
//! headers; preflight responses are cacheable for 600 seconds.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::{Config, UploadConfig};
use crate::db;
use crate::error::ApiError;
use crate::indexes;
use crate::ingest::upload_csv;
use crate::models::Document;
use crate::query::{fetch_movies, result_message, FetchRequest};
use crate::store::DocumentStore;

/// Content types accepted by the upload route.
const CSV_CONTENT_TYPES: [&str; 2] = ["text/csv", "application/csv"];

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide store; its pool connects lazily on first use.
    pub store: Arc<dyn DocumentStore>,
    pub upload: UploadConfig,
}

/// Opens the store, bootstraps indexes, and serves until the process is
/// interrupted.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(db::open_store(config)?);

    // Cold start. Failures are logged so the service still comes up.
    indexes::bootstrap_movie_indexes(store.as_ref()).await;

    let app = build_router(AppState {
        store,
        upload: config.upload.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        service = %config.service.qualified_name(),
        "Server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Builds the router with CORS applied to every route.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(600));

    Router::new()
        .route(
            "/api/upload/movies/csv",
            // The validator enforces the configured size limit itself.
            post(handle_upload_csv).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/fetch/movies", post(handle_fetch_movies))
        .route("/api/health_check", get(handle_health))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// A handler failure, rendered as `502 {"error": ...}`.
struct AppError {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Logs a failure at the handler boundary and converts it to a response.
fn fail(handler: &'static str, err: ApiError) -> AppError {
    let message = format!("Exception @{}: {:#}", handler, err);
    error!(
        handler,
        client_error = err.is_client_error(),
        "{}",
        message
    );
    AppError { message }
}

// ============ POST /api/upload/movies/csv ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

fn check_csv_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let mime = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase());

    match mime {
        Some(mime) if CSV_CONTENT_TYPES.contains(&mime.as_str()) => Ok(()),
        Some(mime) => Err(ApiError::bad_request(format!(
            "Unsupported content type '{}'. Expected one of: {}",
            mime,
            CSV_CONTENT_TYPES.join(", ")
        ))),
        None => Err(ApiError::bad_request(format!(
            "Missing content type. Expected one of: {}",
            CSV_CONTENT_TYPES.join(", ")
        ))),
    }
}

/// Handler for `POST /api/upload/movies/csv`. The raw body reaches the
/// validator undecoded.
async fn handle_upload_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>, AppError> {
    const HANDLER: &str = "upload_csv";

    check_csv_content_type(&headers).map_err(|e| fail(HANDLER, e))?;

    let message = upload_csv(state.store.as_ref(), &state.upload, &body)
        .await
        .map_err(|e| fail(HANDLER, e))?;

    Ok(Json(MessageResponse { message }))
}

// ============ POST /api/fetch/movies ============

#[derive(Serialize)]
struct FetchResponse {
    message: String,
    data: Vec<Document>,
}

/// Handler for `POST /api/fetch/movies`.
async fn handle_fetch_movies(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<FetchResponse>, AppError> {
    const HANDLER: &str = "fetch_movies";

    let request: FetchRequest = serde_json::from_slice(&body).map_err(|e| {
        fail(
            HANDLER,
            ApiError::bad_request(format!("Invalid JSON payload: {}", e)),
        )
    })?;

    let data = fetch_movies(state.store.as_ref(), &request)
        .await
        .map_err(|e| fail(HANDLER, e))?;

    Ok(Json(FetchResponse {
        message: result_message(&data).to_string(),
        data,
    }))
}

// ============ GET /api/health_check ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "RUNNING" })
}
