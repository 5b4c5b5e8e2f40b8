//! Output types returned by stage runners and client queries.

use crate::error::ItemError;
use crate::pipeline::status::{Stage, TaskStatus};
use serde::{Deserialize, Serialize};

/// What one stage invocation did for one task.
///
/// Every runner returns one of these instead of an `Err`: faults are turned
/// into status writes and recorded here, so nothing crosses the stage boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub reference_key: String,
    pub stage: Stage,
    pub outcome: StageOutcome,
    /// The status this run persisted, if the write went through.
    pub status_written: Option<TaskStatus>,
    /// Keys of the items this run handled successfully, in item order.
    pub processed: Vec<String>,
    /// Items skipped, each with the reason it failed.
    pub skipped: Vec<SkippedItem>,
    /// Best-effort cleanup steps that failed without affecting the outcome.
    pub cleanup_warnings: Vec<String>,
    /// Present when the stage succeeded.
    pub handoff: Option<HandoffPayload>,
    pub duration_ms: u64,
}

impl StageReport {
    pub(crate) fn new(reference_key: impl Into<String>, stage: Stage) -> Self {
        Self {
            reference_key: reference_key.into(),
            stage,
            outcome: StageOutcome::Duplicate,
            status_written: None,
            processed: Vec::new(),
            skipped: Vec::new(),
            cleanup_warnings: Vec::new(),
            handoff: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, StageOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutcome {
    /// Work done and the success status written.
    Succeeded,
    /// The stage gave up. Its failure status is written when the store allows.
    Failed(String),
    /// The task was in a status this stage must not act on. Nothing written.
    Rejected(String),
    /// This stage had already written its own terminal status. Nothing written.
    Duplicate,
}

/// An item a stage skipped, with why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub key: String,
    pub error: ItemError,
}

/// What a successful stage hands to the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffPayload {
    pub reference_key: String,
    /// Prefix under which the produced artifacts live.
    pub storage_location: String,
    pub artifacts: Vec<String>,
}

/// One row of [`crate::submit::list_requests`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub reference_key: String,
    pub display_name: String,
    /// `Voice-is-Ready`, `Failed` or `Work-In-Progress`.
    pub status: String,
}
