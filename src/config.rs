//! Configuration types for the conversion service.
//!
//! All orchestration behaviour is controlled through [`ServiceConfig`], built
//! via its [`ServiceConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share the config across worker tasks, log it at startup, and
//! diff two deployments to understand why they behave differently.

use crate::error::Hwp2PdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration for a [`crate::service::ConversionService`].
///
/// Built via [`ServiceConfig::builder()`] or using
/// [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_hwp2pdf::{DedupPolicy, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .workers(8)
///     .dedup(DedupPolicy::SessionIsolated)
///     .stage_timeout_secs(60)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Parent directory for per-job scratch workspaces.
    /// Default: `$TMPDIR/hwp2pdf/scratch`.
    pub scratch_root: PathBuf,

    /// Durable directory holding finished artifacts.
    /// Default: `$TMPDIR/hwp2pdf/files`.
    pub output_root: PathBuf,

    /// Fixed number of worker tasks. Default: 4.
    ///
    /// Each worker runs one conversion at a time, and a conversion is two
    /// out-of-process tools back to back (a Python interpreter each). Four
    /// keeps a small host busy without swapping.
    pub workers: usize,

    /// Capacity of the job queue feeding the workers. Default: 64.
    pub queue_capacity: usize,

    /// File extension (without the dot) every upload must carry. Default: `hwp`.
    pub accepted_extension: String,

    /// How finished artifacts are keyed. Default: [`DedupPolicy::ContentAddressed`].
    pub dedup: DedupPolicy,

    /// Wall-clock budget for each external tool invocation. Default: 120.
    pub stage_timeout_secs: u64,

    /// Extra attempts for a failed job. Default: 0.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Page size injected into the intermediate stylesheet. Default: letter.
    pub page_size: PageSize,

    /// Stage 1 executable (name or path). Default: `hwp5html`.
    pub stage_one_program: PathBuf,

    /// Stage 2 executable (name or path). Default: `weasyprint`.
    pub stage_two_program: PathBuf,

    /// Evict finished batches this many seconds after they terminate.
    /// `None` keeps them for the process lifetime. Default: 86 400 (one day).
    pub session_ttl_secs: Option<u64>,

    /// Largest accepted request body on `POST /convert`. Default: 64 MiB.
    pub max_upload_bytes: usize,

    /// Receives batch and job lifecycle events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("hwp2pdf");
        Self {
            scratch_root: base.join("scratch"),
            output_root: base.join("files"),
            workers: 4,
            queue_capacity: 64,
            accepted_extension: "hwp".to_string(),
            dedup: DedupPolicy::default(),
            stage_timeout_secs: 120,
            max_retries: 0,
            retry_backoff_ms: 500,
            page_size: PageSize::default(),
            stage_one_program: PathBuf::from(hwp_toolchain::HWP5HTML.program),
            stage_two_program: PathBuf::from(hwp_toolchain::WEASYPRINT.program),
            session_ttl_secs: Some(86_400),
            max_upload_bytes: 64 * 1024 * 1024,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("scratch_root", &self.scratch_root)
            .field("output_root", &self.output_root)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("accepted_extension", &self.accepted_extension)
            .field("dedup", &self.dedup)
            .field("stage_timeout_secs", &self.stage_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("page_size", &self.page_size)
            .field("stage_one_program", &self.stage_one_program)
            .field("stage_two_program", &self.stage_two_program)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Per-invocation timeout as a [`std::time::Duration`].
    pub fn stage_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stage_timeout_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = dir.into();
        self
    }

    pub fn output_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_root = dir.into();
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n.max(1);
        self
    }

    pub fn accepted_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.accepted_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn dedup(mut self, policy: DedupPolicy) -> Self {
        self.config.dedup = policy;
        self
    }

    pub fn stage_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stage_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn page_size(mut self, size: PageSize) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn stage_one_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.stage_one_program = program.into();
        self
    }

    pub fn stage_two_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.stage_two_program = program.into();
        self
    }

    pub fn session_ttl_secs(mut self, secs: Option<u64>) -> Self {
        self.config.session_ttl_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Hwp2PdfError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(Hwp2PdfError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if c.stage_timeout_secs == 0 {
            return Err(Hwp2PdfError::InvalidConfig(
                "Stage timeout must be ≥ 1 second".into(),
            ));
        }
        if c.accepted_extension.is_empty() {
            return Err(Hwp2PdfError::InvalidConfig(
                "Accepted extension must not be empty".into(),
            ));
        }
        if c.scratch_root == c.output_root {
            return Err(Hwp2PdfError::InvalidConfig(format!(
                "Scratch and output roots must differ (both are {})",
                c.scratch_root.display()
            )));
        }
        if c.session_ttl_secs == Some(0) {
            return Err(Hwp2PdfError::InvalidConfig(
                "Session TTL must be ≥ 1 second (omit it to disable eviction)".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How finished artifacts are keyed on durable storage.
///
/// One policy is chosen per service instance and applied to every job.
///
/// | Policy | Key | Identical uploads |
/// |--------|-----|-------------------|
/// | `ContentAddressed` | SHA-256 of the upload | converted once, shared by every session |
/// | `SessionIsolated`  | session id + file stem | converted again for every session |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Artifacts keyed by the upload's fingerprint (default).
    #[default]
    ContentAddressed,
    /// Artifacts keyed by `(session id, filename)`.
    SessionIsolated,
}

impl FromStr for DedupPolicy {
    type Err = Hwp2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" | "content-addressed" | "content_addressed" => {
                Ok(DedupPolicy::ContentAddressed)
            }
            "session" | "session-isolated" | "session_isolated" => Ok(DedupPolicy::SessionIsolated),
            other => Err(Hwp2PdfError::InvalidConfig(format!(
                "Unknown dedup policy '{other}' (expected 'content' or 'session')"
            ))),
        }
    }
}

/// Page size written into the `@page` rule of the intermediate stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageSize {
    /// US Letter (default, matches the service's historical output).
    #[default]
    Letter,
    /// ISO A4.
    A4,
    /// US Legal.
    Legal,
    /// Any CSS `size` value, e.g. `"210mm 297mm"` or `"B5 landscape"`.
    Custom(String),
}

impl PageSize {
    /// The value placed after `size:` in the injected rule.
    pub fn css_value(&self) -> &str {
        match self {
            PageSize::Letter => "letter",
            PageSize::A4 => "A4",
            PageSize::Legal => "legal",
            PageSize::Custom(s) => s,
        }
    }
}

impl FromStr for PageSize {
    type Err = Hwp2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.contains(['{', '}', ';']) {
            return Err(Hwp2PdfError::InvalidConfig(format!(
                "Invalid page size '{s}'"
            )));
        }
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "letter" => PageSize::Letter,
            "a4" => PageSize::A4,
            "legal" => PageSize::Legal,
            _ => PageSize::Custom(trimmed.to_string()),
        })
    }
}
