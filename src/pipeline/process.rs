//! Running one external conversion tool under a deadline.
//!
//! Both stages are out-of-process Python programs. They are the only points
//! where a worker suspends for a long time, so every invocation is wrapped in
//! [`tokio::time::timeout`] with `kill_on_drop(true)`: when the deadline
//! passes, the `Child` is dropped and the process is killed instead of
//! holding a worker slot forever.

use crate::error::{ConversionError, Stage};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt carried into an error message.
const STDERR_TAIL_BYTES: usize = 2048;

/// Run `program args…` in `cwd`, mapping every failure onto `stage`.
pub async fn run_stage<I, S>(
    stage: Stage,
    program: &Path,
    args: I,
    cwd: &Path,
    timeout: Duration,
) -> Result<(), ConversionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        ConversionError::stage_failed(
            stage,
            format!("failed to launch '{}': {}", program.display(), e),
        )
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| {
            ConversionError::stage_failed(stage, format!("waiting for '{}': {}", program.display(), e))
        })?,
        Err(_) => {
            return Err(ConversionError::StageTimedOut {
                stage,
                secs: timeout.as_secs().max(1),
            })
        }
    };

    debug!(
        "{} finished with {} in {}ms",
        stage,
        output.status,
        start.elapsed().as_millis()
    );

    if output.status.success() {
        Ok(())
    } else {
        let stderr = stderr_tail(&output.stderr);
        let detail = if stderr.is_empty() {
            format!("'{}' exited with {}", program.display(), output.status)
        } else {
            format!("'{}' exited with {}: {}", program.display(), output.status, stderr)
        };
        Err(ConversionError::stage_failed(stage, detail))
    }
}

/// The last [`STDERR_TAIL_BYTES`] of stderr, trimmed, on a char boundary.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut cut = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    format!("\u{2026}{}", &text[cut..])
}
