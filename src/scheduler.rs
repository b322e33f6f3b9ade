//! Bounded worker pool that executes admitted jobs.
//!
//! ## Flow
//!
//! ```text
//! submit ──▶ dispatcher task ──▶ mpsc queue (bounded) ──▶ N workers
//!                                                          │
//!            registry.record_outcome ◀── converter / cache ┘
//! ```
//!
//! `submit` never waits on the queue: each batch gets its own dispatcher task
//! that feeds jobs in, so backpressure lands on the dispatcher while the
//! caller returns at once. The worker count is fixed at start, which caps the
//! number of external conversions running at any moment.
//!
//! Every job runs in its own spawned task that the worker awaits. A panic in
//! a converter therefore surfaces as a `JoinError`, is recorded as a failed
//! job, and the worker moves on to the next item.

use crate::config::DedupPolicy;
use crate::error::{ConversionError, Hwp2PdfError};
use crate::fingerprint::Fingerprint;
use crate::job::{Job, SessionId};
use crate::pipeline::{convert_in_workspace, Converter};
use crate::progress::ProgressCallback;
use crate::registry::{JobOutcome, SessionRegistry};
use crate::store::{ArtifactKey, ArtifactStore, PutOutcome};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Tunables the scheduler reads from [`crate::config::ServiceConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub scratch_root: PathBuf,
    pub dedup: DedupPolicy,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

/// One job on its way to a worker.
struct QueuedJob {
    session: SessionId,
    job: Job,
}

/// State shared by every worker.
struct WorkerContext {
    registry: Arc<SessionRegistry>,
    store: ArtifactStore,
    converter: Arc<dyn Converter>,
    settings: SchedulerSettings,
    progress: Option<ProgressCallback>,
    in_flight: DashMap<Fingerprint, Arc<Mutex<()>>>,
}

/// Fixed-size worker pool fed through a bounded queue.
pub struct Scheduler {
    queue: RwLock<Option<mpsc::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ctx: Arc<WorkerContext>,
}

impl Scheduler {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(
        settings: SchedulerSettings,
        registry: Arc<SessionRegistry>,
        store: ArtifactStore,
        converter: Arc<dyn Converter>,
        progress: Option<ProgressCallback>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let worker_count = settings.workers.max(1);

        let ctx = Arc::new(WorkerContext {
            registry,
            store,
            converter,
            settings,
            progress,
            in_flight: DashMap::new(),
        });

        let workers = (0..worker_count)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&rx), Arc::clone(&ctx))))
            .collect();

        info!(
            "Scheduler started: {} workers, queue capacity {}",
            worker_count, ctx.settings.queue_capacity
        );

        Self {
            queue: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            ctx,
        }
    }

    /// Hand a registered batch to the pool without waiting for queue space.
    pub async fn submit(&self, session: SessionId, jobs: Vec<Job>) -> Result<(), Hwp2PdfError> {
        let sender = self
            .queue
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(Hwp2PdfError::ShuttingDown)?;

        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            for job in jobs {
                let filename = job.filename.clone();
                if sender.send(QueuedJob { session, job }).await.is_err() {
                    ctx.report(
                        session,
                        &filename,
                        JobOutcome::Failed(ConversionError::Internal {
                            detail: "worker pool stopped before the job ran".into(),
                        }),
                    );
                }
            }
            debug!("Session {} fully dispatched", session);
        });

        Ok(())
    }

    /// Number of worker tasks in the pool.
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Stop accepting batches, drain everything already queued, then join
    /// the workers.
    pub async fn shutdown(&self) {
        self.queue.write().await.take();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        if handles.is_empty() {
            return;
        }
        info!("Draining {} workers", handles.len());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker exited abnormally: {}", e);
            }
        }
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>, ctx: Arc<WorkerContext>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(QueuedJob { session, job }) = next else {
            break;
        };
        debug!(worker = id, %session, file = %job.filename, "picked up job");
        Arc::clone(&ctx).run(session, job).await;
    }
    debug!(worker = id, "worker stopped");
}

impl WorkerContext {
    async fn run(self: Arc<Self>, session: SessionId, job: Job) {
        let filename = job.filename.clone();
        if let Err(e) = self.registry.mark_running(&session, &filename) {
            warn!("Cannot mark {} running: {}", filename, e);
        }
        if let Some(cb) = &self.progress {
            cb.on_job_start(&filename);
        }

        let ctx = Arc::clone(&self);
        let outcome = match tokio::spawn(async move { ctx.execute(session, job).await }).await {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed(ConversionError::Internal {
                detail: describe_join_error(e),
            }),
        };

        self.report(session, &filename, outcome);
    }

    /// Resolve one job to an outcome: cache hit, fresh conversion, or failure.
    async fn execute(&self, session: SessionId, job: Job) -> JobOutcome {
        let key = match self.settings.dedup {
            DedupPolicy::ContentAddressed => ArtifactKey::Content {
                fingerprint: job.fingerprint.clone(),
            },
            DedupPolicy::SessionIsolated => ArtifactKey::Session {
                session,
                name: job.artifact_name.clone(),
            },
        };

        // Identical payloads converting at the same time serialise here, so
        // the second one finds the first one's artifact.
        let _in_flight = match self.settings.dedup {
            DedupPolicy::ContentAddressed => Some(self.claim(&job.fingerprint).await),
            DedupPolicy::SessionIsolated => None,
        };

        if self.store.exists(&key).await {
            debug!("{}: artifact {} already stored", job.filename, key);
            return JobOutcome::Cached(key);
        }

        let bytes = match self.convert_with_retries(&job).await {
            Ok(bytes) => bytes,
            Err(e) => return JobOutcome::Failed(e),
        };

        match self.store.put(&key, bytes).await {
            Ok(PutOutcome::Stored) => JobOutcome::Converted(key),
            Ok(PutOutcome::AlreadyPresent) => {
                debug!("{}: lost store race for {}", job.filename, key);
                JobOutcome::Converted(key)
            }
            Err(e) => JobOutcome::Failed(ConversionError::Storage {
                detail: e.to_string(),
            }),
        }
    }

    async fn convert_with_retries(&self, job: &Job) -> Result<Vec<u8>, ConversionError> {
        let max_retries = self.settings.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = self
                    .settings
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                warn!(
                    "{}: retry {}/{} after {}ms",
                    job.filename, attempt, max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match convert_in_workspace(
                self.converter.as_ref(),
                &self.settings.scratch_root,
                &job.payload,
            )
            .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", job.filename, attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ConversionError::Internal {
            detail: "no conversion attempt was made".into(),
        }))
    }

    /// Take the per-fingerprint lock for the rest of the job.
    async fn claim(&self, fingerprint: &Fingerprint) -> InFlight<'_> {
        let lock = Arc::clone(self.in_flight.entry(fingerprint.clone()).or_default().value());
        InFlight {
            map: &self.in_flight,
            fingerprint: fingerprint.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Record the outcome and fire progress events.
    fn report(&self, session: SessionId, filename: &str, outcome: JobOutcome) {
        match &outcome {
            JobOutcome::Converted(key) => {
                info!("{} converted → {}", filename, key);
                if let Some(cb) = &self.progress {
                    cb.on_job_complete(filename, false);
                }
            }
            JobOutcome::Cached(key) => {
                info!("{} served from cache → {}", filename, key);
                if let Some(cb) = &self.progress {
                    cb.on_job_complete(filename, true);
                }
            }
            JobOutcome::Failed(e) => {
                warn!("{} failed: {}", filename, e);
                if let Some(cb) = &self.progress {
                    cb.on_job_error(filename, &e.to_string());
                }
            }
        }

        match self.registry.record_outcome(&session, filename, outcome) {
            Ok(Some(state)) => {
                let (succeeded, failed) = self
                    .registry
                    .get(&session)
                    .map(|s| (s.completed.len(), s.failed.len()))
                    .unwrap_or_default();
                info!(
                    "Session {} finished: {:?} ({} ok, {} failed)",
                    session, state, succeeded, failed
                );
                if let Some(cb) = &self.progress {
                    cb.on_batch_complete(&session.to_string(), succeeded, failed);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Dropping outcome for {}: {}", filename, e),
        }
    }
}

/// Holds a fingerprint's in-flight lock; removes the map entry once no other
/// job is waiting on it.
struct InFlight<'a> {
    map: &'a DashMap<Fingerprint, Arc<Mutex<()>>>,
    fingerprint: Fingerprint,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.map
            .remove_if(&self.fingerprint, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn describe_join_error(e: JoinError) -> String {
    if !e.is_panic() {
        return format!("job task cancelled: {e}");
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("converter panicked: {message}")
}
