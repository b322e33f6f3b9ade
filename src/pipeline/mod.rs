//! Internal pipeline stages for HWP-to-PDF conversion.
//!
//! Each sub-module handles one stage of the per-job flow:
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `workspace`   | Private scratch directory with guaranteed removal       |
//! | `process`     | Run an external tool under a deadline                   |
//! | `stylesheet`  | Inject the `@page` geometry rule before rendering       |
//! | `external`    | `hwp5html` → patch → `weasyprint`, the real converter   |
//! | `input`       | Resolve CLI inputs (local path or URL) to uploads       |
//!
//! The scheduler only sees the [`Converter`] trait and
//! [`convert_in_workspace`]; tests swap in their own converter without
//! touching the worker pool.

pub mod external;
pub mod input;
pub mod process;
pub mod stylesheet;
pub mod workspace;

use crate::error::ConversionError;
use async_trait::async_trait;
use std::path::Path;
use workspace::ScratchWorkspace;

/// A two-stage document transformation.
///
/// Implementations must not retry internally (retries are a scheduler
/// policy) and must write intermediates only inside `workspace`.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `source` into finished artifact bytes.
    async fn convert(
        &self,
        source: &[u8],
        workspace: &ScratchWorkspace,
    ) -> Result<Vec<u8>, ConversionError>;
}

/// Run `converter` inside a freshly acquired scratch workspace.
///
/// The workspace is released on every exit path; if this future is dropped
/// (timeout) or the converter panics, the owned `TempDir` is dropped with it.
/// An empty artifact is reported as a stage 2 failure.
pub async fn convert_in_workspace(
    converter: &dyn Converter,
    scratch_root: &Path,
    source: &[u8],
) -> Result<Vec<u8>, ConversionError> {
    let workspace = ScratchWorkspace::acquire(scratch_root).map_err(|e| ConversionError::Workspace {
        detail: format!("cannot create workspace in {}: {}", scratch_root.display(), e),
    })?;

    let result = converter.convert(source, &workspace).await;
    workspace.release();

    match result {
        Ok(bytes) if bytes.is_empty() => Err(ConversionError::StageTwoFailed {
            detail: "converter produced an empty artifact".into(),
        }),
        other => other,
    }
}
