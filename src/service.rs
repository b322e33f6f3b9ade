//! The conversion service: admission, scheduling, status and artifacts
//! behind one handle.
//!
//! [`ConversionService`] is what the HTTP layer and the CLI talk to. It owns
//! the registry, the artifact store, the worker pool and the janitor that
//! evicts old sessions. Construction is an explicit step with its own error
//! path; nothing touches the filesystem until [`ConversionService::start`].

use crate::config::{DedupPolicy, ServiceConfig};
use crate::error::Hwp2PdfError;
use crate::fingerprint::Fingerprint;
use crate::job::{admit_batch, artifact_name_for, SessionId, Upload};
use crate::pipeline::external::ExternalConverter;
use crate::pipeline::workspace::sweep_stale;
use crate::pipeline::Converter;
use crate::registry::{BatchStatus, SessionRegistry};
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::store::{ArtifactKey, ArtifactStore, ListScope};
use hwp_toolchain::{HWP5HTML, WEASYPRINT};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Polling interval of [`ConversionService::wait_for`].
const WAIT_POLL: Duration = Duration::from_millis(25);

/// A finished artifact ready to be sent to a client.
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    /// Name the client should save it as, e.g. `report.pdf`.
    pub name: String,
    pub key: ArtifactKey,
    pub bytes: Vec<u8>,
}

/// One artifact produced for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionArtifact {
    pub name: String,
    pub artifact: ArtifactKey,
}

/// Create the scratch and output roots and clear scratch left behind by a
/// previous process.
pub fn provision_roots(config: &ServiceConfig) -> Result<ArtifactStore, Hwp2PdfError> {
    std::fs::create_dir_all(&config.scratch_root).map_err(|e| Hwp2PdfError::Provisioning {
        path: config.scratch_root.clone(),
        source: e,
    })?;

    match sweep_stale(&config.scratch_root) {
        Ok(0) => {}
        Ok(n) => info!(
            "Removed {} stale workspace(s) from {}",
            n,
            config.scratch_root.display()
        ),
        Err(e) => warn!(
            "Could not sweep {}: {}",
            config.scratch_root.display(),
            e
        ),
    }

    ArtifactStore::open(&config.output_root)
}

/// Running conversion service.
pub struct ConversionService {
    config: ServiceConfig,
    registry: Arc<SessionRegistry>,
    store: ArtifactStore,
    scheduler: Scheduler,
    janitor: Option<JoinHandle<()>>,
}

impl ConversionService {
    /// Provision storage and start the worker pool with `converter`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ServiceConfig, converter: Arc<dyn Converter>) -> Result<Self, Hwp2PdfError> {
        let store = provision_roots(&config)?;
        let registry = Arc::new(SessionRegistry::new());

        let scheduler = Scheduler::start(
            SchedulerSettings {
                workers: config.workers,
                queue_capacity: config.queue_capacity,
                scratch_root: config.scratch_root.clone(),
                dedup: config.dedup,
                max_retries: config.max_retries,
                retry_backoff_ms: config.retry_backoff_ms,
            },
            Arc::clone(&registry),
            store.clone(),
            converter,
            config.progress_callback.clone(),
        );

        let janitor = config
            .session_ttl_secs
            .map(|ttl| spawn_janitor(Arc::clone(&registry), Duration::from_secs(ttl)));

        info!(
            "Conversion service ready (scratch: {}, output: {}, dedup: {:?})",
            config.scratch_root.display(),
            config.output_root.display(),
            config.dedup
        );

        Ok(Self {
            config,
            registry,
            store,
            scheduler,
            janitor,
        })
    }

    /// Start with the real `hwp5html` / `weasyprint` converter, resolving
    /// both programs up front so a missing tool fails at startup.
    pub fn with_external_tools(mut config: ServiceConfig) -> Result<Self, Hwp2PdfError> {
        config.stage_one_program = resolve_tool(&HWP5HTML, &config.stage_one_program)?;
        config.stage_two_program = resolve_tool(&WEASYPRINT, &config.stage_two_program)?;
        let converter = Arc::new(ExternalConverter::from_config(&config));
        Self::start(config, converter)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Validate and register a batch, then dispatch it. Returns at once.
    pub async fn submit(&self, uploads: Vec<Upload>) -> Result<SessionId, Hwp2PdfError> {
        let jobs = admit_batch(uploads, &self.config.accepted_extension)?;
        let session = SessionId::new();
        let total = jobs.len();

        self.registry.create(session, &jobs)?;
        info!("Session {} accepted {} file(s)", session, total);

        if let Some(cb) = &self.config.progress_callback {
            cb.on_batch_start(&session.to_string(), total);
        }

        if jobs.is_empty() {
            if let Some(cb) = &self.config.progress_callback {
                cb.on_batch_complete(&session.to_string(), 0, 0);
            }
            return Ok(session);
        }

        if let Err(e) = self.scheduler.submit(session, jobs).await {
            self.registry.remove(&session);
            return Err(e);
        }
        Ok(session)
    }

    /// Current status of a batch.
    pub fn status(&self, session: &SessionId) -> Result<BatchStatus, Hwp2PdfError> {
        self.registry.get(session)
    }

    /// Poll until the batch is terminal or `timeout` elapses.
    pub async fn wait_for(
        &self,
        session: &SessionId,
        timeout: Duration,
    ) -> Result<BatchStatus, Hwp2PdfError> {
        let poll = async {
            loop {
                match self.registry.get(session) {
                    Ok(status) if status.status.is_terminal() => return Ok(status),
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(WAIT_POLL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| Hwp2PdfError::WaitTimeout {
                session: session.to_string(),
                secs: timeout.as_secs(),
            })?
    }

    /// Fetch the artifact of `name` (artifact or source filename) in a session.
    pub async fn artifact(
        &self,
        session: &SessionId,
        name: &str,
    ) -> Result<ArtifactDownload, Hwp2PdfError> {
        let missing = || Hwp2PdfError::ArtifactNotFound {
            key: format!("{session}/{name}"),
        };

        let (artifact_name, key) = match self.registry.get(session) {
            Ok(status) => {
                let job = status.job(name).ok_or_else(missing)?;
                let key = job.artifact.clone().ok_or_else(missing)?;
                (job.artifact_name.clone(), key)
            }
            // Session-isolated artifacts outlive their registry entry.
            Err(e) if e.is_not_found() && self.config.dedup == DedupPolicy::SessionIsolated => {
                let artifact_name = artifact_name_for(name, &self.config.accepted_extension)
                    .ok_or_else(missing)?;
                let key = ArtifactKey::Session {
                    session: *session,
                    name: artifact_name.clone(),
                };
                (artifact_name, key)
            }
            Err(e) => return Err(e),
        };

        let bytes = self.store.get(&key).await?;
        Ok(ArtifactDownload {
            name: artifact_name,
            key,
            bytes,
        })
    }

    /// Every artifact a session produced so far.
    pub async fn session_artifacts(
        &self,
        session: &SessionId,
    ) -> Result<Vec<SessionArtifact>, Hwp2PdfError> {
        match self.registry.get(session) {
            Ok(status) => Ok(status
                .jobs
                .into_iter()
                .filter_map(|j| {
                    j.artifact.map(|artifact| SessionArtifact {
                        name: j.artifact_name,
                        artifact,
                    })
                })
                .collect()),
            Err(e) if e.is_not_found() && self.config.dedup == DedupPolicy::SessionIsolated => {
                let keys = self.store.list(ListScope::Session(*session)).await?;
                if keys.is_empty() {
                    return Err(e);
                }
                Ok(keys
                    .into_iter()
                    .filter_map(|key| match &key {
                        ArtifactKey::Session { name, .. } => Some(SessionArtifact {
                            name: name.clone(),
                            artifact: key.clone(),
                        }),
                        ArtifactKey::Content { .. } => None,
                    })
                    .collect())
            }
            Err(e) => Err(e),
        }
    }

    /// Every artifact in durable storage.
    pub async fn list_artifacts(&self) -> Result<Vec<ArtifactKey>, Hwp2PdfError> {
        self.store.list(ListScope::All).await
    }

    /// Fetch a content-addressed artifact directly by fingerprint.
    pub async fn artifact_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<u8>, Hwp2PdfError> {
        self.store
            .get(&ArtifactKey::Content {
                fingerprint: fingerprint.clone(),
            })
            .await
    }

    /// Number of sessions currently tracked.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting work, let queued jobs finish, and join the workers.
    pub async fn shutdown(&self) {
        if let Some(janitor) = &self.janitor {
            janitor.abort();
        }
        self.scheduler.shutdown().await;
        info!("Conversion service stopped");
    }
}

impl Drop for ConversionService {
    fn drop(&mut self) {
        if let Some(janitor) = &self.janitor {
            janitor.abort();
        }
    }
}

/// Resolve a configured program. The bare default name also honours the
/// tool's override environment variable.
fn resolve_tool(tool: &hwp_toolchain::Tool, configured: &Path) -> Result<PathBuf, Hwp2PdfError> {
    let explicit = (configured != Path::new(tool.program)).then_some(configured);
    let path = hwp_toolchain::locate(tool, explicit)?;
    debug!("Using {} at {}", tool.program, path.display());
    Ok(path)
}

fn spawn_janitor(registry: Arc<SessionRegistry>, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let Ok(ttl) = chrono::Duration::from_std(ttl) else {
                return;
            };
            let evicted = registry.evict_finished_before(chrono::Utc::now() - ttl);
            if evicted > 0 {
                debug!("Evicted {} finished session(s)", evicted);
            }
        }
    })
}
