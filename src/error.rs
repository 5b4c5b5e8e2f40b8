//! Error types for the edgequake-doc2voice library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the stage cannot proceed at all
//!   (missing task record, malformed trigger, storage outage, a task observed
//!   in a status its predecessor never wrote). Returned as `Err` from the
//!   library entry points; stage runners convert it into a status write.
//!
//! * [`ItemError`] — **Non-fatal**: a single item failed (one page did not
//!   render, one page could not be read, one speech chunk's job failed) but
//!   the others are fine. Stored inside [`crate::output::StageReport`] next
//!   to the key of the item it belongs to, so every skip stays auditable.

use crate::pipeline::status::{Stage, TaskStatus};
use thiserror::Error;

/// All fatal errors returned by the edgequake-doc2voice library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input faults ──────────────────────────────────────────────────────
    /// No task record exists for the reference key.
    #[error("No task record for reference key '{reference_key}'")]
    TaskNotFound { reference_key: String },

    /// A trigger payload could not be mapped to a stage invocation.
    #[error("Malformed trigger payload: {detail}")]
    MalformedTrigger { detail: String },

    /// A submission request failed validation.
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// The task's language has no configured voice.
    #[error("Unsupported language '{language}'\nSupported: english, arabic")]
    UnsupportedLanguage { language: String },

    /// The task record's metadata is unusable (bad page range, bad dates).
    #[error("Task '{reference_key}' has invalid metadata: {detail}")]
    InvalidTaskRecord {
        reference_key: String,
        detail: String,
    },

    // ── State-machine faults ──────────────────────────────────────────────
    /// A stage was invoked while the task sits in a status its predecessor
    /// never produced.
    #[error("Integrity fault: {stage} stage invoked for '{reference_key}' in status {found} (expected {expected})")]
    IntegrityFault {
        reference_key: String,
        stage: Stage,
        found: TaskStatus,
        expected: TaskStatus,
    },

    /// A status write outside the transition table was attempted.
    #[error("Illegal status transition {from} → {to}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    // ── Collaborator faults ───────────────────────────────────────────────
    /// The artifact store failed for a key.
    #[error("Artifact store error for '{key}': {detail}")]
    Storage { key: String, detail: String },

    /// An artifact that must exist is missing.
    #[error("Artifact '{key}' not found")]
    ArtifactNotFound { key: String },

    /// The status store failed.
    #[error("Status store error: {0}")]
    StatusStore(String),

    /// The rasteriser could not open the document at all.
    #[error("Rasterisation of '{key}' failed: {detail}")]
    RasterisationFailed { key: String, detail: String },

    /// The text-extraction provider is not configured.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// An external job engine refused or lost a job.
    #[error("Job engine error: {0}")]
    Engine(String),

    /// The final artifact is not there yet.
    #[error("Audio for '{reference_key}' is not ready")]
    NotReady { reference_key: String },

    // ── Input resolution ──────────────────────────────────────────────────
    /// Input document was not found at the given path.
    #[error("Document not found: '{path}'")]
    FileNotFound { path: String },

    /// HTTP download of the input document failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Build a [`PipelineError::Storage`] from any displayable source.
    pub fn storage(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PipelineError::Storage {
            key: key.into(),
            detail: err.to_string(),
        }
    }
}

/// A non-fatal error for a single item of a stage.
///
/// The stage continues unless every item fails.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// Page rasterisation or upload failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: u32, detail: String },

    /// Requested pages lie past the end of the document.
    #[error("Pages {start}-{end}: out of range (document has {total} pages)")]
    PageOutOfRange { start: u32, end: u32, total: u32 },

    /// Text extraction failed after retries.
    #[error("Page {page}: extraction failed after {retries} retries: {detail}")]
    ExtractionFailed {
        page: u32,
        retries: u32,
        detail: String,
    },

    /// An artifact key did not follow the expected naming scheme.
    #[error("Unrecognised artifact key: {detail}")]
    UnrecognisedKey { detail: String },

    /// Reading the item from the store failed.
    #[error("Storage error: {detail}")]
    Storage { detail: String },

    /// The chunk's synthesis job reported failure.
    #[error("Chunk {index}: synthesis job failed: {reason}")]
    JobFailed { index: usize, reason: String },

    /// The chunk's synthesis job did not finish within its deadline.
    #[error("Chunk {index}: synthesis job timed out after {secs}s")]
    JobTimedOut { index: usize, secs: u64 },
}
