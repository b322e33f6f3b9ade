//! # hwp-toolchain
//!
//! Locate the two external programs that turn an HWP document into a PDF:
//!
//! | Stage | Program      | Package      | Override env var |
//! |-------|--------------|--------------|------------------|
//! | 1     | `hwp5html`   | pyhwp        | `HWP5HTML_PATH`  |
//! | 2     | `weasyprint` | WeasyPrint   | `WEASYPRINT_PATH`|
//!
//! ## How it works
//!
//! [`locate`] resolves a [`Tool`] in this order (first match wins):
//!
//! 1. An explicit path or program name passed by the caller.
//! 2. The tool's override environment variable.
//! 3. A search of every directory listed in `PATH`.
//!
//! [`probe_version`] then runs `<tool> --version` so a service can log the
//! exact converter build it is about to depend on.
//!
//! ```rust,no_run
//! use hwp_toolchain::{locate, probe_version, HWP5HTML};
//!
//! let path = locate(&HWP5HTML, None).expect("hwp5html not installed");
//! println!("{}", probe_version(&path).unwrap_or_default());
//! ```

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

// ── Known tools ──────────────────────────────────────────────────────────────

/// An external program the conversion pipeline depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    /// Executable name looked up on `PATH`.
    pub program: &'static str,
    /// Environment variable holding an explicit location.
    pub env_var: &'static str,
    /// Install hint shown when the tool is missing.
    pub install_hint: &'static str,
}

/// Stage 1: HWP → XHTML + CSS (pyhwp).
pub const HWP5HTML: Tool = Tool {
    program: "hwp5html",
    env_var: "HWP5HTML_PATH",
    install_hint: "pip install pyhwp",
};

/// Stage 2: XHTML → PDF.
pub const WEASYPRINT: Tool = Tool {
    program: "weasyprint",
    env_var: "WEASYPRINT_PATH",
    install_hint: "pip install weasyprint",
};

/// Every tool the pipeline needs, in stage order.
pub const ALL_TOOLS: [Tool; 2] = [HWP5HTML, WEASYPRINT];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by toolchain lookups.
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// The program could not be found anywhere.
    #[error("'{program}' was not found on PATH.\nInstall it with: {hint}\nor point {env_var} at the executable.")]
    NotFound {
        program: String,
        env_var: String,
        hint: String,
    },

    /// An explicit location was given but nothing executable lives there.
    #[error("'{path}' is not an executable file")]
    NotExecutable { path: PathBuf },

    /// The program exists but `--version` failed.
    #[error("Failed to probe '{path}': {reason}")]
    Probe { path: PathBuf, reason: String },
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve `tool` to an absolute executable path.
///
/// `explicit` may be a bare program name (searched on `PATH`) or a path.
pub fn locate(tool: &Tool, explicit: Option<&Path>) -> Result<PathBuf, ToolchainError> {
    if let Some(candidate) = explicit {
        return locate_program(candidate).ok_or_else(|| not_found_or_not_executable(tool, candidate));
    }

    if let Some(env_path) = std::env::var_os(tool.env_var) {
        let candidate = PathBuf::from(env_path);
        if !candidate.as_os_str().is_empty() {
            return locate_program(&candidate)
                .ok_or_else(|| not_found_or_not_executable(tool, &candidate));
        }
    }

    locate_program(Path::new(tool.program)).ok_or_else(|| ToolchainError::NotFound {
        program: tool.program.to_string(),
        env_var: tool.env_var.to_string(),
        hint: tool.install_hint.to_string(),
    })
}

/// Resolve a program name or path without consulting any override variable.
///
/// Names containing a path separator are checked in place; bare names are
/// searched on `PATH`.
pub fn locate_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return is_executable(program).then(|| program.to_path_buf());
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    search_path(program.as_os_str(), &path_var)
}

/// Search the directories of a `PATH`-style list for `name`.
pub fn search_path(name: &OsStr, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidates(&dir, name))
        .find(|candidate| is_executable(candidate))
}

/// Run `<path> --version` and return the first non-empty output line.
pub fn probe_version(path: &Path) -> Result<String, ToolchainError> {
    let output = Command::new(path)
        .arg("--version")
        .output()
        .map_err(|e| ToolchainError::Probe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ToolchainError::Probe {
            path: path.to_path_buf(),
            reason: format!("exited with {}", output.status),
        });
    }

    // Some tools print their version on stderr.
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown version")
        .to_string())
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn not_found_or_not_executable(tool: &Tool, candidate: &Path) -> ToolchainError {
    if candidate.exists() {
        ToolchainError::NotExecutable {
            path: candidate.to_path_buf(),
        }
    } else {
        ToolchainError::NotFound {
            program: candidate.display().to_string(),
            env_var: tool.env_var.to_string(),
            hint: tool.install_hint.to_string(),
        }
    }
}

fn candidates(dir: &Path, name: &OsStr) -> Vec<PathBuf> {
    let mut out = vec![dir.join(name)];
    if cfg!(windows) {
        for ext in ["exe", "cmd", "bat"] {
            let mut with_ext = OsString::from(name);
            with_ext.push(".");
            with_ext.push(ext);
            out.push(dir.join(with_ext));
        }
    }
    out
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn write_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn known_tools_have_distinct_env_vars() {
        assert_ne!(HWP5HTML.env_var, WEASYPRINT.env_var);
        assert_eq!(ALL_TOOLS[0].program, "hwp5html");
        assert_eq!(ALL_TOOLS[1].program, "weasyprint");
    }

    #[cfg(unix)]
    #[test]
    fn search_path_finds_executable_in_later_dir() {
        let empty = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let expected = write_executable(bin.path(), "hwp5html", "#!/bin/sh\n");

        let path_var = std::env::join_paths([empty.path(), bin.path()]).unwrap();
        let found = search_path(OsStr::new("hwp5html"), &path_var);
        assert_eq!(found, Some(expected));
    }

    #[cfg(unix)]
    #[test]
    fn search_path_skips_non_executable_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weasyprint"), "not a program").unwrap();

        let path_var = std::env::join_paths([dir.path()]).unwrap();
        assert!(search_path(OsStr::new("weasyprint"), &path_var).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_executable(dir.path(), "my-hwp5html", "#!/bin/sh\n");
        assert_eq!(locate(&HWP5HTML, Some(&tool)).unwrap(), tool);
    }

    #[cfg(unix)]
    #[test]
    fn explicit_non_executable_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, "x").unwrap();
        let err = locate(&WEASYPRINT, Some(&file)).unwrap_err();
        assert!(matches!(err, ToolchainError::NotExecutable { .. }), "got: {err}");
    }

    #[test]
    fn missing_explicit_path_mentions_env_var() {
        let err = locate(&HWP5HTML, Some(Path::new("/definitely/not/here/hwp5html"))).unwrap_err();
        assert!(err.to_string().contains("HWP5HTML_PATH"), "got: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn probe_version_reads_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_executable(
            dir.path(),
            "fake-weasyprint",
            "#!/bin/sh\necho ''\necho 'WeasyPrint version 62.3'\n",
        );
        assert_eq!(probe_version(&tool).unwrap(), "WeasyPrint version 62.3");
    }

    #[cfg(unix)]
    #[test]
    fn probe_version_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_executable(dir.path(), "broken", "#!/bin/sh\nexit 2\n");
        assert!(matches!(
            probe_version(&tool),
            Err(ToolchainError::Probe { .. })
        ));
    }
}
