//! Jobs, sessions, and batch admission.
//!
//! A client upload becomes an immutable [`Job`] only after the whole batch
//! passes [`admit_batch`]. Admission is all-or-nothing: one bad filename
//! rejects the batch before any conversion starts, so a client never has to
//! reason about a half-accepted submission.

use crate::error::Hwp2PdfError;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::store::is_artifact_name;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = Hwp2PdfError;

    /// Anything that is not a UUID can never have been issued, so it maps
    /// straight to `SessionNotFound`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|_| Hwp2PdfError::SessionNotFound {
                session: s.to_string(),
            })
    }
}

/// One uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub payload: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            payload: payload.into(),
        }
    }
}

/// An admitted conversion job. Immutable after creation.
#[derive(Debug, Clone)]
pub struct Job {
    /// Client-supplied filename, reduced to its final path component.
    pub filename: String,
    /// Name of the finished artifact, `<stem>.pdf`.
    pub artifact_name: String,
    /// Content identity of `payload`.
    pub fingerprint: Fingerprint,
    /// Raw source bytes.
    pub payload: Vec<u8>,
}

/// Validate every upload, then turn the batch into jobs.
///
/// Rejects the whole batch when any entry has an empty name, the wrong
/// extension (compared case-insensitively), or an artifact name that
/// collides with an earlier entry.
pub fn admit_batch(uploads: Vec<Upload>, extension: &str) -> Result<Vec<Job>, Hwp2PdfError> {
    let mut seen = HashSet::with_capacity(uploads.len());
    let mut jobs = Vec::with_capacity(uploads.len());

    for upload in uploads {
        let filename = base_name(&upload.filename).ok_or_else(|| Hwp2PdfError::Validation {
            filename: upload.filename.clone(),
            reason: "missing file name".into(),
        })?;

        let stem = accepted_stem(&filename, extension).ok_or_else(|| Hwp2PdfError::Validation {
            filename: filename.clone(),
            reason: format!("only .{extension} files are allowed"),
        })?;

        let artifact_name = format!("{stem}.pdf");
        if !is_artifact_name(&artifact_name) {
            return Err(Hwp2PdfError::Validation {
                filename,
                reason: "hidden file names are not allowed".into(),
            });
        }
        if !seen.insert(artifact_name.clone()) {
            return Err(Hwp2PdfError::Validation {
                filename,
                reason: format!("duplicate file in batch (would overwrite {artifact_name})"),
            });
        }

        jobs.push(Job {
            fingerprint: fingerprint(&upload.payload),
            filename,
            artifact_name,
            payload: upload.payload,
        });
    }

    Ok(jobs)
}

/// Artifact name a client may use for a file: `<stem>.pdf` for a source
/// name with `extension`, the name itself for a PDF name. `None` when the
/// result is not a plain artifact file name.
pub fn artifact_name_for(name: &str, extension: &str) -> Option<String> {
    let candidate = match accepted_stem(name, extension) {
        Some(stem) => format!("{stem}.pdf"),
        None => name.to_string(),
    };
    is_artifact_name(&candidate).then_some(candidate)
}

/// Final path component of a client-supplied name. Browsers on some
/// platforms send the full local path.
fn base_name(raw: &str) -> Option<String> {
    let normalised = raw.replace('\\', "/");
    let name = Path::new(&normalised).file_name()?.to_str()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// The file stem when `name` ends in `.extension` and has a non-empty stem.
fn accepted_stem<'a>(name: &'a str, extension: &str) -> Option<&'a str> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && ext.eq_ignore_ascii_case(extension)).then_some(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_valid_batch_in_order() {
        let jobs = admit_batch(
            vec![Upload::new("b.hwp", b"two".to_vec()), Upload::new("a.HWP", b"one".to_vec())],
            "hwp",
        )
        .unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].filename, "b.hwp");
        assert_eq!(jobs[0].artifact_name, "b.pdf");
        assert_eq!(jobs[1].artifact_name, "a.pdf");
        assert_eq!(jobs[1].fingerprint, fingerprint(b"one"));
    }

    #[test]
    fn one_bad_extension_rejects_batch() {
        let err = admit_batch(
            vec![Upload::new("ok.hwp", b"1".to_vec()), Upload::new("notes.txt", b"2".to_vec())],
            "hwp",
        )
        .unwrap_err();
        match err {
            Hwp2PdfError::Validation { filename, .. } => assert_eq!(filename, "notes.txt"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extension_must_be_a_real_suffix() {
        assert!(admit_batch(vec![Upload::new("hwp", vec![])], "hwp").is_err());
        assert!(admit_batch(vec![Upload::new(".hwp", vec![])], "hwp").is_err());
        assert!(admit_batch(vec![Upload::new("report.hwp.exe", vec![])], "hwp").is_err());
    }

    #[test]
    fn duplicate_artifact_names_are_rejected() {
        let err = admit_batch(
            vec![Upload::new("a.hwp", b"1".to_vec()), Upload::new("a.HWP", b"2".to_vec())],
            "hwp",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {err}");
    }

    #[test]
    fn client_paths_are_reduced_to_base_name() {
        let jobs = admit_batch(
            vec![
                Upload::new("C:\\Users\\kim\\보고서.hwp", b"1".to_vec()),
                Upload::new("../../etc/x.hwp", b"2".to_vec()),
            ],
            "hwp",
        )
        .unwrap();
        assert_eq!(jobs[0].filename, "보고서.hwp");
        assert_eq!(jobs[1].filename, "x.hwp");
    }

    #[test]
    fn hidden_names_are_rejected() {
        let err = admit_batch(vec![Upload::new(".profile.hwp", vec![])], "hwp").unwrap_err();
        assert!(matches!(err, Hwp2PdfError::Validation { .. }), "got: {err}");
    }

    #[test]
    fn artifact_name_for_source_and_pdf_names() {
        assert_eq!(artifact_name_for("report.hwp", "hwp").as_deref(), Some("report.pdf"));
        assert_eq!(artifact_name_for("report.HWP", "hwp").as_deref(), Some("report.pdf"));
        assert_eq!(artifact_name_for("report.pdf", "hwp").as_deref(), Some("report.pdf"));
        assert_eq!(artifact_name_for("../report.hwp", "hwp"), None);
        assert_eq!(artifact_name_for("..%2Fsecret.txt", "hwp"), None);
        assert_eq!(artifact_name_for("../../secret.txt", "hwp"), None);
        assert_eq!(artifact_name_for("notes.txt", "hwp"), None);
    }

    #[test]
    fn empty_batch_is_admitted() {
        assert!(admit_batch(Vec::new(), "hwp").unwrap().is_empty());
    }

    #[test]
    fn session_id_parse() {
        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
        assert!(matches!(
            "not-a-session".parse::<SessionId>(),
            Err(Hwp2PdfError::SessionNotFound { .. })
        ));
    }
}
