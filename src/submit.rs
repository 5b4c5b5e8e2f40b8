//! Client-facing entry points: submit a document, list requests, locate audio.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::layout;
use crate::output::RequestSummary;
use crate::pipeline::status::TaskStatus;
use crate::store::{ArtifactStore, StatusStore};
use crate::task::{PageRange, TaskRecord};
use bytes::Bytes;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

/// Collapsed status shown to clients once narration is done.
pub const READY: &str = "Voice-is-Ready";
pub const FAILED: &str = "Failed";
pub const IN_PROGRESS: &str = "Work-In-Progress";

/// A document to narrate.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub file_name: String,
    pub bytes: Bytes,
    pub language: String,
    pub start_page: u32,
    pub end_page: u32,
    pub owner: String,
    /// Defaults to `file_name` when empty.
    pub display_name: String,
}

/// Store the document and create its task record with status `Submitted`.
///
/// Returns the new task's reference key.
pub async fn submit_document(
    artifacts: &dyn ArtifactStore,
    status: &dyn StatusStore,
    config: &PipelineConfig,
    request: SubmissionRequest,
) -> Result<String, PipelineError> {
    let file_name = request.file_name.trim();
    if file_name.is_empty() || file_name.contains('/') {
        return Err(PipelineError::InvalidSubmission(format!(
            "invalid file name '{}'",
            request.file_name
        )));
    }
    if request.language.trim().is_empty() {
        return Err(PipelineError::InvalidSubmission("language is required".into()));
    }
    if request.bytes.is_empty() {
        return Err(PipelineError::InvalidSubmission(format!("'{file_name}' is empty")));
    }
    let page_range = PageRange::new(request.start_page, request.end_page)?;
    let retention = chrono::Duration::from_std(config.retention)
        .map_err(|e| PipelineError::InvalidConfig(format!("retention: {e}")))?;

    let reference_key = Uuid::new_v4().to_string();
    let source_location = layout::upload_key(&reference_key, file_name);
    artifacts
        .put(&source_location, request.bytes, content_type(file_name))
        .await?;

    let now = Utc::now();
    let display_name = match request.display_name.trim() {
        "" => file_name.to_string(),
        name => name.to_string(),
    };
    status
        .insert(TaskRecord {
            reference_key: reference_key.clone(),
            status: TaskStatus::Submitted,
            failure_reason: None,
            source_location,
            language: request.language.trim().to_lowercase(),
            page_range,
            owner: request.owner,
            display_name,
            created_at: now,
            expires_at: now + retention,
        })
        .await?;
    info!(
        "Submitted {} as {} (pages {}-{})",
        file_name, reference_key, page_range.start, page_range.end
    );
    Ok(reference_key)
}

/// Every task of `owner`, oldest first, with a client-facing status.
pub async fn list_requests(
    status: &dyn StatusStore,
    owner: &str,
) -> Result<Vec<RequestSummary>, PipelineError> {
    let records = status.list_by_owner(owner).await?;
    Ok(records
        .into_iter()
        .map(|r| RequestSummary {
            status: client_status(r.status).to_string(),
            reference_key: r.reference_key,
            display_name: r.display_name,
        })
        .collect())
}

pub fn client_status(status: TaskStatus) -> &'static str {
    if status == TaskStatus::SynthesizeOk {
        READY
    } else if status.is_failure() {
        FAILED
    } else {
        IN_PROGRESS
    }
}

/// Key of the task's final audio (or audio manifest).
pub async fn download_location(
    artifacts: &dyn ArtifactStore,
    config: &PipelineConfig,
    reference_key: &str,
) -> Result<String, PipelineError> {
    for key in [
        layout::final_audio_key(reference_key, &config.audio_extension),
        layout::final_manifest_key(reference_key),
    ] {
        if artifacts.exists(&key).await? {
            return Ok(key);
        }
    }
    Err(PipelineError::NotReady {
        reference_key: reference_key.to_string(),
    })
}

fn content_type(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        "application/pdf"
    } else if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}
