//! HTTP surface (axum).
//!
//! | Route | Body | Response |
//! |-------|------|----------|
//! | `POST /upload`, `/upload-flash`, `/process` | multipart, field `files` | [`IngestOutput`] |
//! | `GET /results` | | array of rows ordered by identity |
//! | `POST /update` | JSON array of rows | [`UpdateOutput`] |
//! | `POST /export-to-sheet` | JSON array of rows | [`ExportOutput`] |
//! | `GET /health` | | `{"status": "ok"}` |
//!
//! Errors are `{"error": "<message>"}`: 400 for input errors (including
//! malformed bodies), 500 for everything else.

use crate::error::{ErrorKind, LedgerError};
use crate::ingest::IngestService;
use crate::output::{ExportOutput, IngestOutput, UpdateOutput};
use crate::pipeline::normalize::{UploadBatch, UploadedFile};
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Multipart field carrying the uploaded files.
pub const UPLOAD_FIELD: &str = "files";

/// Default request body cap: 32 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub type SharedService = Arc<IngestService>;

/// Build the application router.
pub fn router(service: SharedService, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/upload-flash", post(upload))
        .route("/process", post(upload))
        .route("/results", get(results))
        .route("/update", post(update))
        .route("/export-to-sheet", post(export_to_sheet))
        .route("/health", get(health))
        .with_state(service)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(
    service: SharedService,
    addr: &str,
    max_upload_bytes: usize,
) -> Result<(), LedgerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LedgerError::Internal(format!("failed to bind {addr}: {e}")))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router(service, max_upload_bytes))
        .await
        .map_err(|e| LedgerError::Internal(format!("server failed: {e}")))
}

// ── Handlers ─────────────────────────────────────────────────────────────

pub async fn upload(
    State(service): State<SharedService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestOutput>, ApiError> {
    let mut multipart = multipart.map_err(|e| LedgerError::InvalidBody(e.body_text()))?;
    let batch = read_upload(&mut multipart).await?;
    let output = service.ingest(batch).await?;
    Ok(Json(output))
}

pub async fn results(
    State(service): State<SharedService>,
) -> Result<Json<Vec<Map<String, Value>>>, ApiError> {
    Ok(Json(service.results().await?))
}

pub async fn update(
    State(service): State<SharedService>,
    payload: Result<Json<Vec<Value>>, JsonRejection>,
) -> Result<Json<UpdateOutput>, ApiError> {
    let Json(rows) = payload.map_err(|e| LedgerError::InvalidBody(e.body_text()))?;
    Ok(Json(service.update(rows).await?))
}

pub async fn export_to_sheet(
    State(service): State<SharedService>,
    payload: Result<Json<Vec<Value>>, JsonRejection>,
) -> Result<Json<ExportOutput>, ApiError> {
    let Json(rows) = payload.map_err(|e| LedgerError::InvalidBody(e.body_text()))?;
    Ok(Json(service.export(rows).await?))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Collect every part named [`UPLOAD_FIELD`]; other parts are ignored.
async fn read_upload(multipart: &mut Multipart) -> Result<UploadBatch, LedgerError> {
    let mut batch = UploadBatch::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| LedgerError::InvalidBody(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        batch.field_present = true;
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| LedgerError::InvalidBody(e.body_text()))?;
        batch.files.push(UploadedFile {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Ok(batch)
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A [`LedgerError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Input => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Rejected request: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_map_to_400() {
        assert_eq!(
            ApiError(LedgerError::NoFilesUploaded).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(LedgerError::InvalidBody("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn downstream_errors_map_to_500() {
        for err in [
            LedgerError::format("no JSON"),
            LedgerError::Persistence("down".into()),
            LedgerError::SheetsFailed("403".into()),
            LedgerError::InferenceFailed { retries: 2, detail: "503".into() },
        ] {
            assert_eq!(ApiError(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
