//! Error types for the edgequake-hwp2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Hwp2PdfError`] (**request-level**): the operation cannot proceed at
//!   all (a batch fails validation, a session id is unknown, the output root
//!   cannot be created). Returned as `Err(Hwp2PdfError)` from service calls
//!   and mapped to an HTTP status by [`crate::server`].
//!
//! * [`ConversionError`] (**job-level**): one document failed to convert but
//!   its siblings are unaffected. Stored inside the batch status so pollers
//!   see which file failed and why, instead of losing the whole batch.

use std::path::PathBuf;
use thiserror::Error;

/// All request-level errors returned by the edgequake-hwp2pdf library.
///
/// Job-level failures use [`ConversionError`] and are recorded in
/// [`crate::registry::BatchStatus`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Hwp2PdfError {
    // ── Admission errors ──────────────────────────────────────────────────
    /// An uploaded file failed type validation; the whole batch is rejected.
    #[error("Rejected '{filename}': {reason}")]
    Validation { filename: String, reason: String },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No batch was ever registered under this session id (or it was evicted).
    #[error("Session '{session}' not found")]
    SessionNotFound { session: String },

    /// No finished artifact exists for this key.
    #[error("Artifact '{key}' not found")]
    ArtifactNotFound { key: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// A scratch or output root could not be created at startup.
    #[error("Cannot provision directory '{path}': {source}\nCheck the path is writable.")]
    Provisioning {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a finished artifact to durable storage failed.
    #[error("Failed to write artifact '{path}': {source}")]
    StoreWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Input errors (CLI one-shot conversion) ────────────────────────────
    /// Input file was not found at the given path.
    #[error("HWP file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An external converter executable could not be resolved.
    #[error(transparent)]
    Toolchain(#[from] hwp_toolchain::ToolchainError),

    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// The service is shutting down and no longer accepts batches.
    #[error("Service is shutting down; no new batches are accepted")]
    ShuttingDown,

    /// A batch did not reach a terminal state in time.
    #[error("Session '{session}' still processing after {secs}s")]
    WaitTimeout { session: String, secs: u64 },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error during submission bookkeeping.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Hwp2PdfError {
    /// `true` for the lookup failures that surface as HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Hwp2PdfError::SessionNotFound { .. } | Hwp2PdfError::ArtifactNotFound { .. }
        )
    }
}

/// Which external transformation a [`ConversionError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// HWP → XHTML (`hwp5html`).
    One,
    /// XHTML → PDF (`weasyprint`).
    Two,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::One => f.write_str("stage 1 (hwp5html)"),
            Stage::Two => f.write_str("stage 2 (weasyprint)"),
        }
    }
}

/// A non-fatal error for a single job.
///
/// Recorded in the batch's failed list. Sibling jobs keep running.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionError {
    /// The HWP → XHTML step exited non-zero or could not be launched.
    #[error("HTML conversion failed: {detail}")]
    StageOneFailed { detail: String },

    /// The XHTML → PDF step exited non-zero or produced no output.
    #[error("PDF rendering failed: {detail}")]
    StageTwoFailed { detail: String },

    /// An external tool exceeded its wall-clock budget and was killed.
    #[error("{stage} timed out after {secs}s")]
    StageTimedOut { stage: Stage, secs: u64 },

    /// The scratch workspace could not be prepared.
    #[error("Scratch workspace error: {detail}")]
    Workspace { detail: String },

    /// The finished artifact could not be stored.
    #[error("Storing artifact failed: {detail}")]
    Storage { detail: String },

    /// The worker hit an unexpected fault (e.g. a converter panic).
    #[error("Internal worker fault: {detail}")]
    Internal { detail: String },
}

impl ConversionError {
    /// Build the failure variant matching `stage`.
    pub fn stage_failed(stage: Stage, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match stage {
            Stage::One => ConversionError::StageOneFailed { detail },
            Stage::Two => ConversionError::StageTwoFailed { detail },
        }
    }
}
