//! Task status values and the transition table every stage honours.
//!
//! ```text
//! Submitted ──▶ RasterizeOK ──▶ ExtractOK ──▶ SynthesizeOK
//!     │              │              │
//!     ▼              ▼              ▼
//! RasterizeFailed  ExtractFailed  SynthesizeFailed
//!
//! Submitted | RasterizeOK | ExtractOK ──▶ Failed   (stage could not begin)
//! ```
//!
//! The status store is last-writer-wins with no compare-and-swap, so this
//! table does not stop two writers racing. What it does guarantee is that a
//! runner never writes a value its own stage does not own, and never starts
//! work on a task whose predecessor did not succeed.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted status of a task record.
///
/// The serialised strings are the values exchanged with the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Submitted,
    #[serde(rename = "RasterizeOK")]
    RasterizeOk,
    RasterizeFailed,
    #[serde(rename = "ExtractOK")]
    ExtractOk,
    ExtractFailed,
    #[serde(rename = "SynthesizeOK")]
    SynthesizeOk,
    SynthesizeFailed,
    /// Catch-all written when a stage cannot even begin.
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Submitted,
        TaskStatus::RasterizeOk,
        TaskStatus::RasterizeFailed,
        TaskStatus::ExtractOk,
        TaskStatus::ExtractFailed,
        TaskStatus::SynthesizeOk,
        TaskStatus::SynthesizeFailed,
        TaskStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Submitted => "Submitted",
            TaskStatus::RasterizeOk => "RasterizeOK",
            TaskStatus::RasterizeFailed => "RasterizeFailed",
            TaskStatus::ExtractOk => "ExtractOK",
            TaskStatus::ExtractFailed => "ExtractFailed",
            TaskStatus::SynthesizeOk => "SynthesizeOK",
            TaskStatus::SynthesizeFailed => "SynthesizeFailed",
            TaskStatus::Failed => "Failed",
        }
    }

    /// True for any failure status, including the catch-all.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::RasterizeFailed
                | TaskStatus::ExtractFailed
                | TaskStatus::SynthesizeFailed
                | TaskStatus::Failed
        )
    }

    /// True when no further stage will run for the task.
    pub fn is_final(self) -> bool {
        self.is_failure() || self == TaskStatus::SynthesizeOk
    }

    /// Check whether `self → next` is in the transition table.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Submitted, RasterizeOk)
                | (Submitted, RasterizeFailed)
                | (RasterizeOk, ExtractOk)
                | (RasterizeOk, ExtractFailed)
                | (ExtractOk, SynthesizeOk)
                | (ExtractOk, SynthesizeFailed)
                | (Submitted, Failed)
                | (RasterizeOk, Failed)
                | (ExtractOk, Failed)
        )
    }

    /// Validate `self → next`, returning `next` on success.
    pub fn transition(self, next: TaskStatus) -> Result<TaskStatus, PipelineError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| PipelineError::Internal(format!("unknown task status '{s}'")))
    }
}

/// One step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Rasterize,
    Extract,
    Synthesize,
}

impl Stage {
    /// The status a task must carry before this stage may start.
    pub fn required_predecessor(self) -> TaskStatus {
        match self {
            Stage::Rasterize => TaskStatus::Submitted,
            Stage::Extract => TaskStatus::RasterizeOk,
            Stage::Synthesize => TaskStatus::ExtractOk,
        }
    }

    pub fn success_status(self) -> TaskStatus {
        match self {
            Stage::Rasterize => TaskStatus::RasterizeOk,
            Stage::Extract => TaskStatus::ExtractOk,
            Stage::Synthesize => TaskStatus::SynthesizeOk,
        }
    }

    pub fn failure_status(self) -> TaskStatus {
        match self {
            Stage::Rasterize => TaskStatus::RasterizeFailed,
            Stage::Extract => TaskStatus::ExtractFailed,
            Stage::Synthesize => TaskStatus::SynthesizeFailed,
        }
    }

    /// Whether `status` is one this stage is allowed to write.
    pub fn owns(self, status: TaskStatus) -> bool {
        status == self.success_status()
            || status == self.failure_status()
            || status == TaskStatus::Failed
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Rasterize => "rasterize",
            Stage::Extract => "extract",
            Stage::Synthesize => "synthesize",
        })
    }
}

/// Result of checking whether a stage may start on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCheck {
    /// The predecessor succeeded; run the stage.
    Proceed,
    /// The stage already wrote its own outcome (re-delivered trigger).
    AlreadyDone(TaskStatus),
}

/// Decide whether `stage` may start on a task currently in `current`.
///
/// A task already carrying one of the stage's own outcomes is a duplicate
/// delivery; anything else besides the required predecessor is an
/// integrity fault.
pub fn check_entry(
    reference_key: &str,
    stage: Stage,
    current: TaskStatus,
) -> Result<EntryCheck, PipelineError> {
    let expected = stage.required_predecessor();
    if current == expected {
        return Ok(EntryCheck::Proceed);
    }
    if current == stage.success_status() || current == stage.failure_status() {
        return Ok(EntryCheck::AlreadyDone(current));
    }
    Err(PipelineError::IntegrityFault {
        reference_key: reference_key.to_string(),
        stage,
        found: current,
        expected,
    })
}

/// Validate a status write by `stage` from `current` to `next`.
pub fn guard_write(
    stage: Stage,
    current: TaskStatus,
    next: TaskStatus,
) -> Result<TaskStatus, PipelineError> {
    if !stage.owns(next) {
        return Err(PipelineError::IllegalTransition {
            from: current,
            to: next,
        });
    }
    current.transition(next)
}
