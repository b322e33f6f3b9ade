//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_hwp2pdf::{
    ConversionError, ConversionService, Converter, ScratchWorkspace, ServiceConfig,
    ServiceConfigBuilder, Upload,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Payload prefixes that steer [`FakeConverter`].
pub const FAIL_STAGE_ONE: &[u8] = b"FAIL1";
pub const FAIL_STAGE_TWO: &[u8] = b"FAIL2";
pub const PANIC: &[u8] = b"PANIC";
pub const FLAKY: &[u8] = b"FLAKY";

pub const PDF_MAGIC: &[u8] = b"%PDF-fake\n";

/// In-process converter: counts calls, tracks concurrency, fails on demand.
#[derive(Default)]
pub struct FakeConverter {
    pub calls: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
    pub flaky_failures_left: AtomicUsize,
    pub delay: Duration,
    workspaces: Mutex<Vec<PathBuf>>,
}

impl FakeConverter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn flaky(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            flaky_failures_left: AtomicUsize::new(failures),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every workspace directory the converter was handed.
    pub fn workspaces(&self) -> Vec<PathBuf> {
        self.workspaces.lock().unwrap().clone()
    }
}

#[async_trait]
impl Converter for FakeConverter {
    async fn convert(
        &self,
        source: &[u8],
        workspace: &ScratchWorkspace,
    ) -> Result<Vec<u8>, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.workspaces
            .lock()
            .unwrap()
            .push(workspace.path().to_path_buf());

        // Leave an intermediate behind so cleanup is observable.
        tokio::fs::write(workspace.join("index.xhtml"), source)
            .await
            .unwrap();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if source.starts_with(PANIC) {
            panic!("converter blew up");
        }
        if source.starts_with(FAIL_STAGE_ONE) {
            return Err(ConversionError::StageOneFailed {
                detail: "hwp5html exited with status 1".into(),
            });
        }
        if source.starts_with(FAIL_STAGE_TWO) {
            return Err(ConversionError::StageTwoFailed {
                detail: "weasyprint exited with status 1".into(),
            });
        }
        if source.starts_with(FLAKY)
            && self
                .flaky_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(ConversionError::StageOneFailed {
                detail: "transient failure".into(),
            });
        }

        let mut pdf = PDF_MAGIC.to_vec();
        pdf.extend_from_slice(source);
        Ok(pdf)
    }
}

/// Config rooted in `dir` with short timings.
pub fn config(dir: &Path) -> ServiceConfigBuilder {
    ServiceConfig::builder()
        .scratch_root(dir.join("scratch"))
        .output_root(dir.join("files"))
        .workers(4)
        .retry_backoff_ms(1)
        .session_ttl_secs(None)
}

/// Route library logs to the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn start(builder: ServiceConfigBuilder, converter: Arc<FakeConverter>) -> ConversionService {
    init_tracing();
    ConversionService::start(builder.build().unwrap(), converter).unwrap()
}

pub fn upload(name: &str, payload: &[u8]) -> Upload {
    Upload::new(name, payload.to_vec())
}

/// Entries left under the scratch root.
pub fn scratch_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("scratch")).unwrap().count()
}

pub const WAIT: Duration = Duration::from_secs(10);
