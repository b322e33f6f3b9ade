//! Scratch workspaces: one private directory per in-flight job.
//!
//! ## Why a `TempDir` wrapper?
//!
//! The intermediate XHTML, its stylesheet and the rendered PDF all live in a
//! directory nobody else may see. Backing it by [`tempfile::TempDir`] ties
//! the directory's lifetime to a value: it is removed when the workspace is
//! dropped, whether the job succeeded, returned an error, timed out (the
//! future is dropped) or panicked (the stack unwinds). Cleanup never depends
//! on a failure branch remembering to call it.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Prefix of every workspace directory under the scratch root.
pub const WORKSPACE_PREFIX: &str = "hwp2pdf-job-";

/// A uniquely named directory owned by exactly one job.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    /// Create a fresh workspace under `scratch_root`.
    pub fn acquire(scratch_root: &Path) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(scratch_root)?;
        debug!("Acquired scratch workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the workspace.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the workspace now, logging (not propagating) a failed removal.
    ///
    /// Dropping the workspace has the same effect silently; this exists so
    /// the normal path gets a log line when removal fails.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove scratch workspace {}: {}", path.display(), e);
        }
    }
}

/// Remove workspaces left behind by a previous process (crash, SIGKILL).
///
/// Only entries carrying [`WORKSPACE_PREFIX`] are touched. Returns the
/// number of directories removed.
pub fn sweep_stale(scratch_root: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(scratch_root)? {
        let entry = entry?;
        let is_workspace = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX));
        if is_workspace && entry.file_type()?.is_dir() {
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not sweep {}: {}", entry.path().display(), e),
            }
        }
    }
    Ok(removed)
}
