//! Durable artifact storage.
//!
//! Finished PDFs live under the output root, keyed by an [`ArtifactKey`]:
//!
//! ```text
//! files/
//!  ├─ 3f2a…e9.pdf                  content-addressed (fingerprint)
//!  └─ 5b1c…-…-…/report.pdf         session-isolated (session id / name)
//! ```
//!
//! ## Write policy
//!
//! Every `put` writes to a hidden temp file in the destination directory and
//! then links it into place with a no-clobber rename. Readers therefore never
//! observe a half-written PDF, and when two workers race on the same key the
//! first writer wins; the second sees [`PutOutcome::AlreadyPresent`]. Under
//! content addressing both writers hold identical bytes, so nothing is lost.

use crate::error::Hwp2PdfError;
use crate::fingerprint::Fingerprint;
use crate::job::SessionId;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const ARTIFACT_EXTENSION: &str = "pdf";

/// Storage key of one finished artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ArtifactKey {
    /// Shared across sessions, named by the source fingerprint.
    Content { fingerprint: Fingerprint },
    /// Private to one session, named after the uploaded file.
    Session { session: SessionId, name: String },
}

impl ArtifactKey {
    /// Path relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            ArtifactKey::Content { fingerprint } => {
                PathBuf::from(format!("{fingerprint}.{ARTIFACT_EXTENSION}"))
            }
            ArtifactKey::Session { session, name } => {
                PathBuf::from(session.to_string()).join(name)
            }
        }
    }

    /// Whether the key names a file directly inside its store directory.
    pub fn is_well_formed(&self) -> bool {
        match self {
            ArtifactKey::Content { .. } => true,
            ArtifactKey::Session { name, .. } => is_artifact_name(name),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKey::Content { fingerprint } => write!(f, "{fingerprint}"),
            ArtifactKey::Session { session, name } => write!(f, "{session}/{name}"),
        }
    }
}

/// Which artifacts [`ArtifactStore::list`] returns.
#[derive(Debug, Clone, Copy)]
pub enum ListScope {
    /// Everything under the root.
    All,
    /// Only session-isolated artifacts of one session.
    Session(SessionId),
}

/// Result of [`ArtifactStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// This call created the artifact.
    Stored,
    /// An artifact already existed under the key and was left untouched.
    AlreadyPresent,
}

/// Filesystem-backed artifact store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Hwp2PdfError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Hwp2PdfError::Provisioning {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `key` on disk, or `None` when the key would leave
    /// the store root.
    pub fn path_of(&self, key: &ArtifactKey) -> Option<PathBuf> {
        key.is_well_formed()
            .then(|| self.root.join(key.relative_path()))
    }

    fn resolve(&self, key: &ArtifactKey) -> Result<PathBuf, Hwp2PdfError> {
        self.path_of(key).ok_or_else(|| Hwp2PdfError::ArtifactNotFound {
            key: key.to_string(),
        })
    }

    pub async fn exists(&self, key: &ArtifactKey) -> bool {
        let Some(path) = self.path_of(key) else {
            return false;
        };
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Atomically store `bytes` under `key` unless the key already exists.
    pub async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>) -> Result<PutOutcome, Hwp2PdfError> {
        let path = self.path_of(key).ok_or_else(|| {
            Hwp2PdfError::Internal(format!("Refusing to store artifact under {key}"))
        })?;
        let target = path.clone();
        let outcome = tokio::task::spawn_blocking(move || write_no_clobber(&target, &bytes))
            .await
            .map_err(|e| Hwp2PdfError::Internal(format!("Store task panicked: {e}")))?
            .map_err(|e| Hwp2PdfError::StoreWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        debug!("put {} → {:?}", key, outcome);
        Ok(outcome)
    }

    pub async fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>, Hwp2PdfError> {
        match tokio::fs::read(self.resolve(key)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Hwp2PdfError::ArtifactNotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => Err(Hwp2PdfError::Internal(format!("Reading artifact {key}: {e}"))),
        }
    }

    /// Keys of every finished artifact in `scope`, sorted.
    pub async fn list(&self, scope: ListScope) -> Result<Vec<ArtifactKey>, Hwp2PdfError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_blocking(&root, scope))
            .await
            .map_err(|e| Hwp2PdfError::Internal(format!("List task panicked: {e}")))?
            .map_err(|e| Hwp2PdfError::Internal(format!("Listing artifacts: {e}")))
    }
}

// ── Blocking helpers ─────────────────────────────────────────────────────

fn write_no_clobber(path: &Path, bytes: &[u8]) -> std::io::Result<PutOutcome> {
    if path.is_file() {
        return Ok(PutOutcome::AlreadyPresent);
    }
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "key has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(PutOutcome::Stored),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(PutOutcome::AlreadyPresent)
        }
        Err(e) => Err(e.error),
    }
}

fn list_blocking(root: &Path, scope: ListScope) -> std::io::Result<Vec<ArtifactKey>> {
    let mut keys = Vec::new();
    match scope {
        ListScope::All => {
            for entry in std::fs::read_dir(root)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type()?;
                if file_type.is_file() {
                    if let Some(fingerprint) = name
                        .strip_suffix(".pdf")
                        .and_then(|stem| stem.parse::<Fingerprint>().ok())
                    {
                        keys.push(ArtifactKey::Content { fingerprint });
                    }
                } else if file_type.is_dir() {
                    if let Ok(session) = name.parse::<SessionId>() {
                        session_keys(root, session, &mut keys)?;
                    }
                }
            }
        }
        ListScope::Session(session) => session_keys(root, session, &mut keys)?,
    }
    keys.sort();
    Ok(keys)
}

fn session_keys(root: &Path, session: SessionId, out: &mut Vec<ArtifactKey>) -> std::io::Result<()> {
    let dir = root.join(session.to_string());
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && is_artifact_name(&name) {
            out.push(ArtifactKey::Session { session, name });
        }
    }
    Ok(())
}

/// A bare, visible `*.pdf` file name: one normal path component.
pub fn is_artifact_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name.ends_with(&format!(".{ARTIFACT_EXTENSION}"))
        && matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    fn content_key(payload: &[u8]) -> ArtifactKey {
        ArtifactKey::Content {
            fingerprint: fingerprint(payload),
        }
    }

    #[tokio::test]
    async fn put_get_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("files")).unwrap();
        let key = content_key(b"source");

        assert!(!store.exists(&key).await);
        assert_eq!(store.put(&key, b"%PDF-a".to_vec()).await.unwrap(), PutOutcome::Stored);
        assert!(store.exists(&key).await);
        assert_eq!(store.get(&key).await.unwrap(), b"%PDF-a");
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let key = content_key(b"source");

        store.put(&key, b"first".to_vec()).await.unwrap();
        assert_eq!(
            store.put(&key, b"second".to_vec()).await.unwrap(),
            PutOutcome::AlreadyPresent
        );
        assert_eq!(store.get(&key).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn racing_puts_leave_one_artifact_and_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let key = content_key(b"dup");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.put(&key, b"%PDF-same".to_vec()).await.unwrap() })
            })
            .collect();
        let outcomes = futures::future::join_all(handles).await;
        let stored = outcomes
            .into_iter()
            .filter(|o| *o.as_ref().unwrap() == PutOutcome::Stored)
            .count();
        assert_eq!(stored, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let err = store.get(&content_key(b"nothing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn session_keys_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let (s1, s2) = (SessionId::new(), SessionId::new());
        let k1 = ArtifactKey::Session {
            session: s1,
            name: "report.pdf".into(),
        };
        let k2 = ArtifactKey::Session {
            session: s2,
            name: "report.pdf".into(),
        };

        store.put(&k1, b"one".to_vec()).await.unwrap();
        store.put(&k2, b"two".to_vec()).await.unwrap();
        assert_eq!(store.get(&k1).await.unwrap(), b"one");
        assert_eq!(store.get(&k2).await.unwrap(), b"two");

        assert_eq!(store.list(ListScope::Session(s1)).await.unwrap(), vec![k1.clone()]);
        assert!(store
            .list(ListScope::Session(SessionId::new()))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_all_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let key = content_key(b"a");
        store.put(&key, b"pdf".to_vec()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("not-a-digest.pdf"), "x").unwrap();

        assert_eq!(store.list(ListScope::All).await.unwrap(), vec![key]);
    }

    #[test]
    fn display_forms() {
        let s = SessionId::new();
        let key = ArtifactKey::Session {
            session: s,
            name: "x.pdf".into(),
        };
        assert_eq!(key.to_string(), format!("{s}/x.pdf"));
        assert_eq!(content_key(b"").to_string().len(), Fingerprint::HEX_LEN);
    }

    #[test]
    fn artifact_names_are_single_components() {
        assert!(is_artifact_name("report.pdf"));
        assert!(is_artifact_name("보고서 v2.pdf"));
        for bad in [
            "",
            ".pdf",
            ".hidden.pdf",
            "../secret.pdf",
            "../../secret.txt",
            "a/b.pdf",
            "a\\b.pdf",
            "/etc/passwd.pdf",
            "report.hwp",
        ] {
            assert!(!is_artifact_name(bad), "{bad:?} accepted");
        }
    }

    #[tokio::test]
    async fn escaping_session_keys_never_touch_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("files")).unwrap();
        let session = SessionId::new();
        std::fs::create_dir_all(dir.path().join("files").join(session.to_string())).unwrap();
        std::fs::write(dir.path().join("secret.pdf"), "TOP-SECRET").unwrap();
        let key = ArtifactKey::Session {
            session,
            name: "../../secret.pdf".into(),
        };

        assert!(store.path_of(&key).is_none());
        assert!(!store.exists(&key).await);
        assert!(store.get(&key).await.unwrap_err().is_not_found());
        assert!(store.put(&key, b"x".to_vec()).await.is_err());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("secret.pdf")).unwrap(),
            "TOP-SECRET"
        );
    }
}
