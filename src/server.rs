//! HTTP server.
//!
//! Thin request layer over the blob store and the index, plus the process
//! wiring for `searchr serve`: index bootstrap, storage watcher, ingestion
//! pipeline and graceful shutdown.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Store a multipart `file` in the bucket (201 `{ key, id }`) |
//! | `GET`  | `/search?file=<term>&offset=&limit=` | Body search; 204 when nothing matches |
//! | `GET`  | `/documents/{id}` | Full indexed document |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query parameter 'file' is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `payload_too_large` (413), `storage_error` (502), `data_corruption` (500),
//! `internal` (500).
//!
//! Uploads only store the object. Indexing happens asynchronously once the
//! storage notification for it arrives.

use axum::{
    extract::rejection::QueryRejection,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use searchr_core::schema::{FIELD_KEY, FIELD_SIZE, FIELD_URL};
use searchr_core::{IndexError, IndexManager, IndexedDocument, SearchQuery};

use crate::config::Config;
use crate::extract;
use crate::ingest::{Pipeline, PipelineOptions};
use crate::migrate;
use crate::storage::{self, detect_content_type, BlobStore, StorageError};
use crate::watcher::StorageWatcher;

/// Largest page a single search may request.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Multipart framing allowance on top of the file size cap.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<IndexManager>,
    pub blobs: Arc<dyn BlobStore>,
    pub max_upload_bytes: usize,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/search", get(handle_search))
        .route("/documents/{id}", get(handle_get_document))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Run `searchr serve` until Ctrl-C or SIGTERM.
///
/// Index creation failure is fatal. On shutdown the HTTP listener stops
/// accepting, the watcher unsubscribes, and the pipeline gets
/// `pipeline.shutdown_grace_secs` to finish in-flight events.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let index = migrate::init_index(config).await?;
    let blobs = storage::open(&config.storage)?;
    let extractor = extract::open(&config.extraction)?;

    let cancel = CancellationToken::new();

    let watcher = StorageWatcher::from_config(blobs.clone(), &config.storage)?;
    let events = watcher.watch(cancel.clone(), config.pipeline.queue_depth);
    let pipeline = Arc::new(Pipeline::new(
        blobs.clone(),
        extractor,
        index.clone(),
        PipelineOptions::from(&config.pipeline),
    ));
    let pipeline_task = tokio::spawn(pipeline.run(events, cancel.clone()));

    let state = AppState {
        index,
        blobs,
        max_upload_bytes: config.server.max_upload_bytes,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("searchr listening on http://{}", config.server.bind);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let report = pipeline_task.await?;
    if report.abandoned > 0 {
        warn!("{} event(s) abandoned at shutdown", report.abandoned);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn payload_too_large(limit: usize) -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large",
        message: format!("file exceeds the {} byte upload limit", limit),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Malformed client input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("multipart field 'file' is required")]
    MissingFile,
    #[error("uploaded file has no filename")]
    MissingFilename,
    #[error("uploaded file is empty")]
    EmptyFile,
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("query parameter 'file' is required")]
    MissingTerm,
    #[error("limit must be between 1 and {}", MAX_PAGE_LIMIT)]
    LimitOutOfRange,
    #[error("{0}")]
    Malformed(String),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        bad_request(e.to_string())
    }
}

impl From<IndexError> for AppError {
    fn from(e: IndexError) -> Self {
        if e.is_client_error() {
            return bad_request(e.to_string());
        }
        match e {
            IndexError::DataCorruption { .. } => {
                error!("{}", e);
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "data_corruption",
                    message: e.to_string(),
                }
            }
            other => {
                error!("Index error: {}", other);
                internal(other.to_string())
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        warn!("Storage error: {}", e);
        AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "storage_error",
            message: e.to_string(),
        }
    }
}

/// Turn an uploaded filename into an object key. Path separators from
/// clients are kept, but empty, `.` and `..` segments are rejected.
pub fn object_key(filename: &str) -> Result<String, ValidationError> {
    let trimmed = filename.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(ValidationError::MissingFilename);
    }
    let bad_segment = trimmed
        .split(['/', '\\'])
        .any(|s| s.is_empty() || s == "." || s == "..");
    if bad_segment || trimmed.chars().any(char::is_control) {
        return Err(ValidationError::InvalidKey(filename.to_string()));
    }
    Ok(trimmed.to_string())
}

// ============ POST /upload ============

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub key: String,
    pub id: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let limit = state.max_upload_bytes;
    let too_large_or_bad = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            payload_too_large(limit)
        } else {
            bad_request(e.body_text())
        }
    };

    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart.next_field().await.map_err(too_large_or_bad)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or(ValidationError::MissingFilename)?;
        let data = field.bytes().await.map_err(too_large_or_bad)?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) = upload.ok_or(ValidationError::MissingFile)?;
    if data.is_empty() {
        return Err(ValidationError::EmptyFile.into());
    }
    if data.len() > limit {
        return Err(payload_too_large(limit));
    }
    let key = object_key(&filename)?;

    let id = state
        .blobs
        .put(&key, data, detect_content_type(&key))
        .await?;
    info!("Uploaded {} as {}", key, id);

    Ok((StatusCode::CREATED, Json(UploadResponse { key, id })))
}

// ============ GET /search ============

#[derive(Deserialize, Debug)]
pub struct SearchParams {
    pub file: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl SearchParams {
    fn into_query(self) -> Result<SearchQuery, ValidationError> {
        let term = self
            .file
            .filter(|t| !t.trim().is_empty())
            .ok_or(ValidationError::MissingTerm)?;
        let limit = self.limit.unwrap_or(SearchQuery::DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ValidationError::LimitOutOfRange);
        }
        Ok(SearchQuery::new(term)
            .offset(self.offset.unwrap_or(0))
            .limit(limit)
            .fields([FIELD_KEY, FIELD_SIZE, FIELD_URL]))
    }
}

async fn handle_search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params.map_err(|e| ValidationError::Malformed(e.body_text()))?;
    let query = params.into_query()?;

    let page = state.index.find(&query).await?;
    if page.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut resp = Json(page.hits).into_response();
    if let Ok(total) = HeaderValue::from_str(&page.total.to_string()) {
        resp.headers_mut().insert("x-total-count", total);
    }
    Ok(resp)
}

// ============ GET /documents/{id} ============

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexedDocument>, AppError> {
    match state.index.get(&id).await? {
        Some(doc) => Ok(Json(doc)),
        None => Err(not_found(format!("document not found: {}", id))),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_sanitised() {
        assert_eq!(object_key("report.pdf").unwrap(), "report.pdf");
        assert_eq!(object_key("/2024/q1.pdf").unwrap(), "2024/q1.pdf");
        assert_eq!(object_key("  ").unwrap_err(), ValidationError::MissingFilename);
        assert!(matches!(
            object_key("../etc/passwd"),
            Err(ValidationError::InvalidKey(_))
        ));
        assert!(matches!(object_key("a//b"), Err(ValidationError::InvalidKey(_))));
    }

    #[test]
    fn search_params_require_term() {
        let params = SearchParams {
            file: Some("   ".into()),
            offset: None,
            limit: None,
        };
        assert_eq!(params.into_query().unwrap_err(), ValidationError::MissingTerm);
    }

    #[test]
    fn search_params_bound_limit() {
        let params = SearchParams {
            file: Some("revenue".into()),
            offset: Some(20),
            limit: Some(MAX_PAGE_LIMIT + 1),
        };
        assert_eq!(
            params.into_query().unwrap_err(),
            ValidationError::LimitOutOfRange
        );

        let params = SearchParams {
            file: Some("revenue".into()),
            offset: Some(20),
            limit: None,
        };
        let q = params.into_query().unwrap();
        assert_eq!(q.offset, 20);
        assert_eq!(q.limit, SearchQuery::DEFAULT_LIMIT);
        assert_eq!(q.fields, vec!["key", "size", "url"]);
    }
}
