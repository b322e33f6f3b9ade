//! Session/status registry: the batch state machine exposed for polling.
//!
//! ```text
//!              ┌──────────── last job reports, no failures ──▶ completed
//! processing ──┤
//!              └──────────── last job reports, ≥1 failure ───▶ error
//! ```
//!
//! The registry is the only mutable state shared between workers. Every
//! mutation of a batch happens under its map entry's write lock, so two
//! workers finishing sibling jobs at the same instant cannot lose an update,
//! and exactly one of them observes the terminal transition.

use crate::error::{ConversionError, Hwp2PdfError};
use crate::fingerprint::Fingerprint;
use crate::job::{Job, SessionId};
use crate::store::ArtifactKey;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle of a batch. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Processing,
    Completed,
    Error,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BatchState::Processing)
    }
}

/// Lifecycle of one job inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    /// Converted by this batch.
    Converted,
    /// Satisfied from an existing artifact without converting.
    Cached,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Converted | JobState::Cached | JobState::Failed)
    }
}

/// How a job ended, as reported by a worker.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Converted(ArtifactKey),
    Cached(ArtifactKey),
    Failed(ConversionError),
}

/// Per-job view inside [`BatchStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub filename: String,
    pub artifact_name: String,
    pub fingerprint: Fingerprint,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ConversionError>,
}

/// A failed file with its error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub filename: String,
    pub error: String,
}

/// Snapshot of one batch, as returned to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub session_id: SessionId,
    pub status: BatchState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub total: usize,
    /// Filenames in submission order.
    pub files: Vec<String>,
    /// Filenames that finished successfully, in completion order.
    pub completed: Vec<String>,
    /// Filenames that failed, in completion order.
    pub failed: Vec<FailedFile>,
    pub jobs: Vec<JobStatus>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchStatus {
    fn new(session_id: SessionId, jobs: &[Job]) -> Self {
        Self {
            session_id,
            status: BatchState::Processing,
            message: None,
            total: jobs.len(),
            files: jobs.iter().map(|j| j.filename.clone()).collect(),
            completed: Vec::new(),
            failed: Vec::new(),
            jobs: jobs
                .iter()
                .map(|j| JobStatus {
                    filename: j.filename.clone(),
                    artifact_name: j.artifact_name.clone(),
                    fingerprint: j.fingerprint.clone(),
                    state: JobState::Queued,
                    artifact: None,
                    error: None,
                })
                .collect(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Number of jobs that reported an outcome.
    pub fn finished(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// The job whose artifact name or source filename is `name`.
    pub fn job(&self, name: &str) -> Option<&JobStatus> {
        self.jobs
            .iter()
            .find(|j| j.artifact_name == name || j.filename == name)
    }

    /// Artifact of the job named `name`, once it has one.
    pub fn artifact_for(&self, name: &str) -> Option<&ArtifactKey> {
        self.job(name).and_then(|j| j.artifact.as_ref())
    }

    fn finalize(&mut self) {
        if self.failed.is_empty() {
            self.status = BatchState::Completed;
            self.message = Some(format!(
                "All {} file(s) converted successfully",
                self.completed.len()
            ));
        } else {
            let names: Vec<&str> = self.failed.iter().map(|f| f.filename.as_str()).collect();
            self.status = BatchState::Error;
            self.message = Some(format!("Conversion failed for: {}", names.join(", ")));
        }
        self.finished_at = Some(Utc::now());
    }
}

/// In-memory map of every live batch.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    batches: DashMap<SessionId, BatchStatus>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new batch in `processing`; an empty batch completes at once.
    pub fn create(&self, session: SessionId, jobs: &[Job]) -> Result<BatchStatus, Hwp2PdfError> {
        match self.batches.entry(session) {
            Entry::Occupied(_) => Err(Hwp2PdfError::Internal(format!(
                "session {session} registered twice"
            ))),
            Entry::Vacant(slot) => {
                let mut status = BatchStatus::new(session, jobs);
                if jobs.is_empty() {
                    status.finalize();
                }
                Ok(slot.insert(status).clone())
            }
        }
    }

    /// Snapshot of a batch.
    pub fn get(&self, session: &SessionId) -> Result<BatchStatus, Hwp2PdfError> {
        self.batches
            .get(session)
            .map(|b| b.clone())
            .ok_or_else(|| not_found(session))
    }

    /// Move a queued job to `running`.
    pub fn mark_running(&self, session: &SessionId, filename: &str) -> Result<(), Hwp2PdfError> {
        let mut batch = self.batches.get_mut(session).ok_or_else(|| not_found(session))?;
        if let Some(job) = batch.jobs.iter_mut().find(|j| j.filename == filename) {
            if job.state == JobState::Queued {
                job.state = JobState::Running;
            }
        }
        Ok(())
    }

    /// Record how one job ended.
    ///
    /// Returns `Some(terminal_state)` to exactly one caller: the one whose
    /// report completes the batch. Reports for an already finished job or
    /// batch are ignored.
    pub fn record_outcome(
        &self,
        session: &SessionId,
        filename: &str,
        outcome: JobOutcome,
    ) -> Result<Option<BatchState>, Hwp2PdfError> {
        let mut entry = self.batches.get_mut(session).ok_or_else(|| not_found(session))?;
        let batch = entry.value_mut();

        if batch.status.is_terminal() {
            warn!(%session, filename, "outcome reported for a finished batch; ignored");
            return Ok(None);
        }

        let job = batch
            .jobs
            .iter_mut()
            .find(|j| j.filename == filename)
            .ok_or_else(|| {
                Hwp2PdfError::Internal(format!("session {session} has no job '{filename}'"))
            })?;

        if job.state.is_terminal() {
            warn!(%session, filename, "duplicate outcome for job; ignored");
            return Ok(None);
        }

        match outcome {
            JobOutcome::Converted(key) => {
                job.state = JobState::Converted;
                job.artifact = Some(key);
                batch.completed.push(filename.to_string());
            }
            JobOutcome::Cached(key) => {
                job.state = JobState::Cached;
                job.artifact = Some(key);
                batch.completed.push(filename.to_string());
            }
            JobOutcome::Failed(error) => {
                job.state = JobState::Failed;
                batch.failed.push(FailedFile {
                    filename: filename.to_string(),
                    error: error.to_string(),
                });
                job.error = Some(error);
            }
        }

        if batch.finished() == batch.total {
            batch.finalize();
            return Ok(Some(batch.status));
        }
        Ok(None)
    }

    /// Drop a batch entirely (submission rollback).
    pub fn remove(&self, session: &SessionId) -> bool {
        self.batches.remove(session).is_some()
    }

    /// Evict terminal batches that finished before `cutoff`. Returns the count.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.batches.len();
        self.batches.retain(|_, b| match b.finished_at {
            Some(at) if b.status.is_terminal() => at >= cutoff,
            _ => true,
        });
        before.saturating_sub(self.batches.len())
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

fn not_found(session: &SessionId) -> Hwp2PdfError {
    Hwp2PdfError::SessionNotFound {
        session: session.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{admit_batch, Upload};
    use std::sync::Arc;

    fn jobs(names: &[&str]) -> Vec<Job> {
        admit_batch(
            names
                .iter()
                .map(|n| Upload::new(*n, n.as_bytes().to_vec()))
                .collect(),
            "hwp",
        )
        .unwrap()
    }

    fn key(job: &Job) -> ArtifactKey {
        ArtifactKey::Content {
            fingerprint: job.fingerprint.clone(),
        }
    }

    #[test]
    fn unknown_session_is_not_found() {
        let reg = SessionRegistry::new();
        let err = reg.get(&SessionId::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn empty_batch_completes_immediately() {
        let reg = SessionRegistry::new();
        let status = reg.create(SessionId::new(), &[]).unwrap();
        assert_eq!(status.status, BatchState::Completed);
        assert_eq!(status.finished(), 0);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn all_success_completes() {
        let reg = SessionRegistry::new();
        let id = SessionId::new();
        let js = jobs(&["a.hwp", "b.hwp"]);
        reg.create(id, &js).unwrap();

        reg.mark_running(&id, "a.hwp").unwrap();
        assert_eq!(reg.get(&id).unwrap().jobs[0].state, JobState::Running);

        assert_eq!(
            reg.record_outcome(&id, "a.hwp", JobOutcome::Converted(key(&js[0])))
                .unwrap(),
            None
        );
        assert_eq!(
            reg.record_outcome(&id, "b.hwp", JobOutcome::Cached(key(&js[1])))
                .unwrap(),
            Some(BatchState::Completed)
        );

        let status = reg.get(&id).unwrap();
        assert_eq!(status.completed, vec!["a.hwp", "b.hwp"]);
        assert_eq!(status.jobs[1].state, JobState::Cached);
        assert!(status.artifact_for("b.pdf").is_some());
    }

    #[test]
    fn one_failure_marks_error_and_lists_file() {
        let reg = SessionRegistry::new();
        let id = SessionId::new();
        let js = jobs(&["a.hwp", "bad.hwp", "c.hwp"]);
        reg.create(id, &js).unwrap();

        reg.record_outcome(&id, "a.hwp", JobOutcome::Converted(key(&js[0])))
            .unwrap();
        reg.record_outcome(
            &id,
            "bad.hwp",
            JobOutcome::Failed(ConversionError::StageOneFailed {
                detail: "exit 1".into(),
            }),
        )
        .unwrap();
        let terminal = reg
            .record_outcome(&id, "c.hwp", JobOutcome::Converted(key(&js[2])))
            .unwrap();
        assert_eq!(terminal, Some(BatchState::Error));

        let status = reg.get(&id).unwrap();
        assert_eq!(status.failed.len(), 1);
        assert_eq!(status.failed[0].filename, "bad.hwp");
        assert_eq!(status.message.as_deref(), Some("Conversion failed for: bad.hwp"));
        assert_eq!(status.completed.len() + status.failed.len(), 3);
    }

    #[test]
    fn duplicate_reports_are_ignored() {
        let reg = SessionRegistry::new();
        let id = SessionId::new();
        let js = jobs(&["a.hwp", "b.hwp"]);
        reg.create(id, &js).unwrap();

        reg.record_outcome(&id, "a.hwp", JobOutcome::Converted(key(&js[0])))
            .unwrap();
        assert_eq!(
            reg.record_outcome(&id, "a.hwp", JobOutcome::Converted(key(&js[0])))
                .unwrap(),
            None
        );
        assert_eq!(reg.get(&id).unwrap().status, BatchState::Processing);
    }

    #[test]
    fn double_create_is_rejected() {
        let reg = SessionRegistry::new();
        let id = SessionId::new();
        reg.create(id, &[]).unwrap();
        assert!(reg.create(id, &[]).is_err());
    }

    #[test]
    fn concurrent_reports_reach_terminal_exactly_once() {
        let reg = Arc::new(SessionRegistry::new());
        let id = SessionId::new();
        let names: Vec<String> = (0..64).map(|i| format!("f{i}.hwp")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let js = jobs(&refs);
        reg.create(id, &js).unwrap();

        let handles: Vec<_> = js
            .into_iter()
            .enumerate()
            .map(|(i, job)| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let outcome = if i % 8 == 0 {
                        JobOutcome::Failed(ConversionError::StageTwoFailed {
                            detail: "boom".into(),
                        })
                    } else {
                        JobOutcome::Converted(key(&job))
                    };
                    reg.record_outcome(&id, &job.filename, outcome).unwrap()
                })
            })
            .collect();

        let terminals = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(terminals, 1);

        let status = reg.get(&id).unwrap();
        assert_eq!(status.status, BatchState::Error);
        assert_eq!(status.completed.len(), 56);
        assert_eq!(status.failed.len(), 8);
    }

    #[test]
    fn eviction_keeps_running_and_recent_batches() {
        let reg = SessionRegistry::new();
        let finished = SessionId::new();
        let running = SessionId::new();
        reg.create(finished, &[]).unwrap();
        reg.create(running, &jobs(&["a.hwp"])).unwrap();

        assert_eq!(reg.evict_finished_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(reg.evict_finished_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(reg.get(&finished).is_err());
        assert!(reg.get(&running).is_ok());
        assert_eq!(reg.len(), 1);
    }
}
