//! HTTP surface over [`ConversionService`].
//!
//! | Method | Path                               | Response                         |
//! |--------|------------------------------------|----------------------------------|
//! | POST   | `/convert`                         | `{session_id, message}` (202)    |
//! | GET    | `/conversion-status/{session_id}`  | batch status JSON                |
//! | GET    | `/files`                           | `{files: [...]}` every artifact  |
//! | GET    | `/files/{id}`                      | session listing, or a stored file|
//! | GET    | `/files/{session_id}/{filename}`   | PDF as attachment                |
//! | GET    | `/view/{session_id}/{filename}`    | PDF inline                       |
//! | GET    | `/artifacts/{fingerprint}`         | content-addressed PDF            |
//! | GET    | `/health`                          | liveness                         |
//!
//! Errors are `{ "error": "..." }` with 400, 404, 413 or 500.

use crate::error::Hwp2PdfError;
use crate::fingerprint::Fingerprint;
use crate::job::{SessionId, Upload};
use crate::registry::BatchStatus;
use crate::service::{ConversionService, SessionArtifact};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

type AppState = Arc<ConversionService>;

/// Build the router. Upload size is capped at the service's
/// `max_upload_bytes`.
pub fn router(service: Arc<ConversionService>) -> Router {
    let body_limit = service.config().max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/convert", post(convert))
        .route("/conversion-status/{session_id}", get(conversion_status))
        .route("/files", get(list_files))
        .route("/files/{id}", get(files_by_id))
        .route("/files/{session_id}/{filename}", get(download))
        .route("/view/{session_id}/{filename}", get(view))
        .route("/artifacts/{fingerprint}", get(artifact_by_fingerprint))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve `service` on `listener` until `shutdown` resolves, then drain the
/// worker pool.
pub async fn serve(
    listener: TcpListener,
    service: Arc<ConversionService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown)
        .await?;
    service.shutdown().await;
    Ok(())
}

// ── Responses ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    session_id: SessionId,
    message: String,
}

#[derive(Debug, Serialize)]
struct FileList {
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SessionFiles {
    session_id: SessionId,
    files: Vec<SessionArtifact>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

impl From<Hwp2PdfError> for AppError {
    fn from(err: Hwp2PdfError) -> Self {
        match err {
            e @ Hwp2PdfError::Validation { .. } => AppError::BadRequest(e.to_string()),
            e if e.is_not_found() => AppError::NotFound(e.to_string()),
            e => AppError::Internal(e.to_string()),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health(State(service): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: service.session_count(),
    })
}

async fn convert(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        // Plain form fields carry no file name.
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let payload = field.bytes().await.map_err(multipart_error)?;
        uploads.push(Upload::new(filename, payload.to_vec()));
    }

    if uploads.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".to_string()));
    }

    let count = uploads.len();
    let session_id = service.submit(uploads).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            session_id,
            message: format!("Conversion started for {count} file(s)"),
        }),
    ))
}

async fn conversion_status(
    State(service): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<BatchStatus>, AppError> {
    let session: SessionId = session_id.parse()?;
    Ok(Json(service.status(&session)?))
}

async fn list_files(State(service): State<AppState>) -> Result<Json<FileList>, AppError> {
    let files = service
        .list_artifacts()
        .await?
        .iter()
        .map(|key| key.relative_path().to_string_lossy().replace('\\', "/"))
        .collect();
    Ok(Json(FileList { files }))
}

/// `/files/{id}`: a session id lists that session's artifacts; anything else
/// is treated as a stored content-addressed file name (`<hex>.pdf` or `<hex>`).
async fn files_by_id(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if let Ok(session_id) = id.parse::<SessionId>() {
        let files = service.session_artifacts(&session_id).await?;
        return Ok(Json(SessionFiles { session_id, files }).into_response());
    }

    let fingerprint = parse_fingerprint(id.strip_suffix(".pdf").unwrap_or(&id))?;
    let bytes = service.artifact_by_fingerprint(&fingerprint).await?;
    Ok(pdf_response(bytes, &format!("{fingerprint}.pdf"), Disposition::Attachment))
}

async fn download(
    State(service): State<AppState>,
    Path((session_id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let session: SessionId = session_id.parse()?;
    let artifact = service.artifact(&session, &filename).await?;
    Ok(pdf_response(artifact.bytes, &artifact.name, Disposition::Attachment))
}

async fn view(
    State(service): State<AppState>,
    Path((session_id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let session: SessionId = session_id.parse()?;
    let artifact = service.artifact(&session, &filename).await?;
    Ok(pdf_response(artifact.bytes, &artifact.name, Disposition::Inline))
}

async fn artifact_by_fingerprint(
    State(service): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<Response, AppError> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let bytes = service.artifact_by_fingerprint(&fingerprint).await?;
    Ok(pdf_response(bytes, &format!("{fingerprint}.pdf"), Disposition::Inline))
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// A malformed fingerprint can never name a stored artifact.
fn parse_fingerprint(raw: &str) -> Result<Fingerprint, AppError> {
    raw.parse::<Fingerprint>()
        .map_err(|_| AppError::NotFound(format!("Artifact '{raw}' not found")))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Inline,
    Attachment,
}

fn pdf_response(bytes: Vec<u8>, name: &str, disposition: Disposition) -> Response {
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let value = format!(
        "{kind}; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback(name),
        percent_encode(name)
    );
    let disposition = HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

/// Bytes escaped in an RFC 5987 `filename*` value.
const FILENAME_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn percent_encode(name: &str) -> String {
    utf8_percent_encode(name, FILENAME_VALUE).to_string()
}

fn ascii_fallback(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
