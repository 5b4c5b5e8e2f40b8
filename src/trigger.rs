//! Mapping external events to stage invocations.
//!
//! Stages never call each other. Each is woken by an event some collaborator
//! emits: a new task record, a pages-ready notification, or the extracted
//! text object appearing in storage. [`route`] decides which stage an event
//! is for and which task it concerns.

use crate::error::PipelineError;
use crate::layout;
use crate::output::HandoffPayload;
use crate::pipeline::status::{Stage, TaskStatus};
use crate::store::PAGES_READY_TOPIC;
use crate::task::TaskRecord;
use serde::{Deserialize, Serialize};

/// An event delivered to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// A task record was inserted into the status store.
    StatusInserted { record: TaskRecord },
    /// A message arrived on a notification topic.
    Notification {
        topic: String,
        message: HandoffPayload,
    },
    /// An object was created in the artifact store.
    ObjectCreated { key: String },
}

impl TriggerEvent {
    /// Parse a JSON-encoded event.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(raw).map_err(|e| PipelineError::MalformedTrigger {
            detail: e.to_string(),
        })
    }

    /// Wrap a published notification, parsing its payload as a hand-off.
    pub fn from_notification(topic: &str, payload: &str) -> Result<Self, PipelineError> {
        let message = serde_json::from_str(payload).map_err(|e| PipelineError::MalformedTrigger {
            detail: format!("notification on '{topic}': {e}"),
        })?;
        Ok(TriggerEvent::Notification {
            topic: topic.to_string(),
            message,
        })
    }
}

/// Decide which stage `event` wakes, and for which task.
pub fn route(event: &TriggerEvent) -> Result<(Stage, String), PipelineError> {
    let malformed = |detail: String| PipelineError::MalformedTrigger { detail };
    match event {
        TriggerEvent::StatusInserted { record } => {
            if record.status != TaskStatus::Submitted {
                return Err(malformed(format!(
                    "inserted record '{}' has status {}, expected {}",
                    record.reference_key,
                    record.status,
                    TaskStatus::Submitted
                )));
            }
            Ok((Stage::Rasterize, non_empty(&record.reference_key)?))
        }
        TriggerEvent::Notification { topic, message } => {
            if topic != PAGES_READY_TOPIC {
                return Err(malformed(format!("no stage listens on topic '{topic}'")));
            }
            Ok((Stage::Extract, non_empty(&message.reference_key)?))
        }
        TriggerEvent::ObjectCreated { key } => match layout::parse_text_key(key) {
            Some(reference_key) => Ok((Stage::Synthesize, reference_key.to_string())),
            None => Err(malformed(format!("object '{key}' does not start a stage"))),
        },
    }
}

fn non_empty(reference_key: &str) -> Result<String, PipelineError> {
    if reference_key.trim().is_empty() {
        Err(PipelineError::MalformedTrigger {
            detail: "empty reference key".into(),
        })
    } else {
        Ok(reference_key.to_string())
    }
}
