//! The production converter: `hwp5html`, stylesheet patch, `weasyprint`.
//!
//! ## Workspace layout
//!
//! ```text
//! hwp2pdf-job-XXXXXX/
//!  ├─ source.hwp         upload bytes
//!  ├─ html/
//!  │   ├─ index.xhtml    stage 1 output
//!  │   └─ styles.css     stage 1 output, patched with @page
//!  └─ output.pdf         stage 2 output
//! ```

use super::process::run_stage;
use super::stylesheet::patch_stylesheet;
use super::workspace::ScratchWorkspace;
use super::Converter;
use crate::config::{PageSize, ServiceConfig};
use crate::error::{ConversionError, Stage};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const SOURCE_FILE: &str = "source.hwp";
const HTML_DIR: &str = "html";
const INDEX_FILE: &str = "index.xhtml";
const STYLES_FILE: &str = "styles.css";
const OUTPUT_FILE: &str = "output.pdf";

/// Converter backed by the two out-of-process tools.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    stage_one: PathBuf,
    stage_two: PathBuf,
    page_size: PageSize,
    timeout: Duration,
}

impl ExternalConverter {
    pub fn new(stage_one: impl Into<PathBuf>, stage_two: impl Into<PathBuf>) -> Self {
        Self {
            stage_one: stage_one.into(),
            stage_two: stage_two.into(),
            page_size: PageSize::default(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Programs, page size and timeout taken from `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.stage_one_program, &config.stage_two_program)
            .with_page_size(config.page_size.clone())
            .with_timeout(config.stage_timeout())
    }

    pub fn with_page_size(mut self, size: PageSize) -> Self {
        self.page_size = size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Converter for ExternalConverter {
    async fn convert(
        &self,
        source: &[u8],
        workspace: &ScratchWorkspace,
    ) -> Result<Vec<u8>, ConversionError> {
        let source_path = workspace.join(SOURCE_FILE);
        let html_dir = workspace.join(HTML_DIR);
        let output_path = workspace.join(OUTPUT_FILE);

        tokio::fs::write(&source_path, source)
            .await
            .map_err(|e| workspace_error("writing source", e))?;
        tokio::fs::create_dir(&html_dir)
            .await
            .map_err(|e| workspace_error("creating html dir", e))?;

        // ── Stage 1: HWP → XHTML ─────────────────────────────────────────
        run_stage(
            Stage::One,
            &self.stage_one,
            [
                OsStr::new("--output"),
                html_dir.as_os_str(),
                source_path.as_os_str(),
            ],
            workspace.path(),
            self.timeout,
        )
        .await?;

        let index_path = html_dir.join(INDEX_FILE);
        if !tokio::fs::try_exists(&index_path).await.unwrap_or(false) {
            return Err(ConversionError::StageOneFailed {
                detail: format!("'{}' produced no {INDEX_FILE}", self.stage_one.display()),
            });
        }

        // ── Patch: fixed page geometry ───────────────────────────────────
        patch_stylesheet(&html_dir.join(STYLES_FILE), &self.page_size)
            .await
            .map_err(|e| workspace_error("patching stylesheet", e))?;
        debug!("Patched {} with page size {}", STYLES_FILE, self.page_size.css_value());

        // ── Stage 2: XHTML → PDF ─────────────────────────────────────────
        run_stage(
            Stage::Two,
            &self.stage_two,
            [index_path.as_os_str(), output_path.as_os_str()],
            workspace.path(),
            self.timeout,
        )
        .await?;

        match tokio::fs::read(&output_path).await {
            Ok(bytes) if !bytes.is_empty() => Ok(bytes),
            Ok(_) => Err(ConversionError::StageTwoFailed {
                detail: format!("'{}' wrote an empty PDF", self.stage_two.display()),
            }),
            Err(e) => Err(ConversionError::StageTwoFailed {
                detail: format!("'{}' produced no PDF: {}", self.stage_two.display(), e),
            }),
        }
    }
}

fn workspace_error(action: &str, e: std::io::Error) -> ConversionError {
    ConversionError::Workspace {
        detail: format!("{action}: {e}"),
    }
}
