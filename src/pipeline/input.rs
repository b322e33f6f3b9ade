//! Input resolution for the CLI: turn a path or URL into an [`Upload`].
//!
//! The HTTP service receives bytes directly; the one-shot `convert` command
//! instead accepts what a user types, which is either a local file or a
//! link to one. Both end up as an in-memory [`Upload`] so the batch goes
//! through exactly the same admission and scheduling path as a web upload.

use crate::error::Hwp2PdfError;
use crate::job::Upload;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to an [`Upload`], downloading URLs.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Upload, Hwp2PdfError> {
    if input.trim().is_empty() {
        return Err(Hwp2PdfError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<Upload, Hwp2PdfError> {
    let path = PathBuf::from(path_str);

    let payload = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Hwp2PdfError::PermissionDenied { path: path.clone() },
        _ => Hwp2PdfError::FileNotFound { path: path.clone() },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Hwp2PdfError::InvalidInput {
            input: path_str.to_string(),
        })?;

    debug!("Read local input {} ({} bytes)", path.display(), payload.len());
    Ok(Upload::new(filename, payload))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Upload, Hwp2PdfError> {
    info!("Downloading HWP from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Hwp2PdfError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Hwp2PdfError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Hwp2PdfError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Hwp2PdfError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Hwp2PdfError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(Upload::new(filename_from_url(url), bytes.to_vec()))
}

/// Last path segment of `url` when it looks like a file name.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.hwp".to_string()
}
