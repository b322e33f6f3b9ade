//! # edgequake-hwp2pdf
//!
//! Batch conversion of HWP word-processor documents to PDF, served over HTTP.
//!
//! ## Why this crate?
//!
//! The HWP → PDF toolchain (`hwp5html` then `weasyprint`) is slow, forks two
//! external processes per document and writes intermediates to disk. Running
//! it straight from a request handler blocks the handler, spawns without
//! bound under load, and leaves scratch files behind on failure. This crate
//! puts an orchestration core in front of the tools: bounded workers, a
//! polled status registry, content-addressed de-duplication, and scratch
//! directories that are always reclaimed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload batch
//!  │
//!  ├─ 1. Admit     validate every file (all-or-nothing), fingerprint payloads
//!  ├─ 2. Register  batch enters `processing` in the session registry
//!  ├─ 3. Dispatch  jobs flow through a bounded queue to N workers
//!  ├─ 4. Convert   cache hit, or hwp5html → @page patch → weasyprint
//!  ├─ 5. Store     atomic no-clobber write into the artifact store
//!  └─ 6. Report    last job to finish moves the batch to completed / error
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_hwp2pdf::{ConversionService, ServiceConfig, Upload};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::with_external_tools(ServiceConfig::default())?;
//!     let bytes = std::fs::read("report.hwp")?;
//!     let session = service.submit(vec![Upload::new("report.hwp", bytes)]).await?;
//!     let status = service.wait_for(&session, Duration::from_secs(300)).await?;
//!     println!("{:?}: {:?}", status.status, status.message);
//!     let pdf = service.artifact(&session, "report.pdf").await?;
//!     std::fs::write(&pdf.name, pdf.bytes)?;
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `hwp2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-hwp2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DedupPolicy, PageSize, ServiceConfig, ServiceConfigBuilder};
pub use error::{ConversionError, Hwp2PdfError, Stage};
pub use fingerprint::{fingerprint, Fingerprint};
pub use job::{admit_batch, artifact_name_for, Job, SessionId, Upload};
pub use pipeline::external::ExternalConverter;
pub use pipeline::workspace::ScratchWorkspace;
pub use pipeline::{convert_in_workspace, Converter};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use registry::{BatchState, BatchStatus, FailedFile, JobOutcome, JobState, JobStatus, SessionRegistry};
pub use service::{provision_roots, ArtifactDownload, ConversionService, SessionArtifact};
pub use store::{ArtifactKey, ArtifactStore, ListScope, PutOutcome};
