//! Progress-callback trait for per-job conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive
//! events as workers pick up and finish jobs. The CLI uses this to drive its
//! progress bar; a host application can forward the same events to a
//! channel, a WebSocket or a log sink.
//!
//! # Example
//!
//! ```rust
//! use edgequake_hwp2pdf::{ConversionProgressCallback, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, filename: &str, cached: bool) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}: {filename} (cached: {cached})");
//!     }
//! }
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! # let _ = config;
//! ```

use std::sync::Arc;

/// Called by the scheduler as batches and jobs move through their lifecycle.
///
/// Workers run concurrently, so `on_job_*` may be invoked from several tasks
/// at once. All methods default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// A batch was admitted with `total_jobs` jobs.
    fn on_batch_start(&self, session: &str, total_jobs: usize) {
        let _ = (session, total_jobs);
    }

    /// A worker picked up `filename`.
    fn on_job_start(&self, filename: &str) {
        let _ = filename;
    }

    /// `filename` finished; `cached` is true when no conversion ran.
    fn on_job_complete(&self, filename: &str, cached: bool) {
        let _ = (filename, cached);
    }

    /// `filename` failed after all attempts.
    fn on_job_error(&self, filename: &str, error: &str) {
        let _ = (filename, error);
    }

    /// The batch reached a terminal state.
    fn on_batch_complete(&self, session: &str, succeeded: usize, failed: usize) {
        let _ = (session, succeeded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
