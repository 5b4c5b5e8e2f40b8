//! Input resolution: load a user-supplied path or URL into memory.
//!
//! Submission stores the document bytes in the artifact store, so nothing
//! here needs to outlive the call: a local file is read, a URL is fetched
//! under a timeout.

use crate::error::PipelineError;
use bytes::Bytes;
use std::path::PathBuf;
use tracing::{debug, info};

/// A document ready to submit.
#[derive(Debug, Clone)]
pub struct LoadedInput {
    /// File name used for the upload key and as the default display name.
    pub file_name: String,
    pub bytes: Bytes,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input` from disk or over HTTP.
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<LoadedInput, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        load_local(input).await
    }
}

async fn load_local(path_str: &str) -> Result<LoadedInput, PipelineError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
            path: path_str.to_string(),
        },
        _ => PipelineError::InvalidSubmission(format!("cannot read '{path_str}': {e}")),
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());
    debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok(LoadedInput {
        file_name,
        bytes: Bytes::from(bytes),
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedInput, PipelineError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(LoadedInput {
        file_name: filename_from_url(url),
        bytes,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
