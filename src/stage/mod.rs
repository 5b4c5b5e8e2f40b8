//! Stage runners: rasterize, extract, synthesize.
//!
//! Every runner follows the same shape, implemented once in [`run_stage`]:
//!
//! ```text
//! load record ──▶ entry check ──▶ validate ──▶ work ──▶ write status ──▶ signal
//!      │               │              │          │
//!      ▼               ▼              ▼          ▼
//!   Failed        Rejected /       Failed     {stage}Failed
//!              Duplicate (no write)
//! ```
//!
//! Runners never return `Err`. Every fault becomes a status write (when the
//! status store allows it) and an entry in the [`StageReport`]. A record that
//! cannot be read at all is the one exception: nothing is written, since the
//! task may already be in a terminal status.

pub mod extract;
pub mod rasterize;
pub mod synthesize;

pub use extract::ExtractRunner;
pub use rasterize::RasterizeRunner;
pub use synthesize::SynthesizeRunner;

use crate::config::PipelineConfig;
use crate::error::{ItemError, PipelineError};
use crate::output::{HandoffPayload, SkippedItem, StageOutcome, StageReport};
use crate::pipeline::status::{check_entry, guard_write, EntryCheck, Stage, TaskStatus};
use crate::store::{ArtifactStore, NotificationSink, StatusStore};
use crate::task::{FailureReason, TaskRecord};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Collaborators handed to every runner at construction.
#[derive(Clone)]
pub struct StageContext {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub status: Arc<dyn StatusStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub config: Arc<PipelineConfig>,
}

/// Why a stage's work could not produce its artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl StageFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl From<PipelineError> for StageFailure {
    fn from(e: PipelineError) -> Self {
        let reason = match &e {
            PipelineError::Storage { .. }
            | PipelineError::StatusStore(_)
            | PipelineError::Internal(_) => FailureReason::Storage,
            PipelineError::ArtifactNotFound { .. } => FailureReason::NoInputs,
            PipelineError::Engine(_) => FailureReason::ExternalJob,
            _ => FailureReason::InputFault,
        };
        Self::new(reason, e.to_string())
    }
}

/// One pipeline stage.
#[async_trait]
pub trait StageRunner: Send + Sync {
    fn stage(&self) -> Stage;

    fn context(&self) -> &StageContext;

    /// Do the stage's unit of work for a task that is cleared to run.
    ///
    /// Per-item failures go into `report.skipped`; an `Err` fails the stage.
    async fn work(
        &self,
        record: &TaskRecord,
        report: &mut StageReport,
    ) -> Result<HandoffPayload, StageFailure>;

    /// Wake the next stage after the success status is visible.
    async fn signal(&self, _handoff: &HandoffPayload) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Run the stage for `reference_key`.
    async fn run(&self, reference_key: &str) -> StageReport {
        run_stage(self, reference_key).await
    }
}

/// The shared stage skeleton behind [`StageRunner::run`].
pub async fn run_stage<R>(runner: &R, reference_key: &str) -> StageReport
where
    R: StageRunner + ?Sized,
{
    let started = Instant::now();
    let stage = runner.stage();
    let ctx = runner.context();
    let mut report = StageReport::new(reference_key, stage);
    info!("{} stage invoked for {}", stage, reference_key);

    let record = match ctx.status.get(reference_key).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            let failure = StageFailure::new(
                FailureReason::InputFault,
                format!("no task record for '{reference_key}'"),
            );
            cannot_begin(ctx, &mut report, failure).await;
            return finish(report, started);
        }
        Err(e) => {
            // Current status unknown: any write could overwrite a terminal one.
            error!("{}: could not read task record: {}", reference_key, e);
            report.outcome = StageOutcome::Failed(e.to_string());
            return finish(report, started);
        }
    };

    match check_entry(reference_key, stage, record.status) {
        Ok(EntryCheck::Proceed) => {}
        Ok(EntryCheck::AlreadyDone(status)) => {
            info!(
                "{}: {} already finished with {}; ignoring duplicate trigger",
                reference_key, stage, status
            );
            report.outcome = StageOutcome::Duplicate;
            return finish(report, started);
        }
        Err(e) => {
            error!("{}", e);
            report.outcome = StageOutcome::Rejected(e.to_string());
            return finish(report, started);
        }
    }

    if let Err(e) = record.validate() {
        let failure = StageFailure::new(FailureReason::InputFault, e.to_string());
        write_outcome(ctx, &mut report, record.status, TaskStatus::Failed, Some(failure)).await;
        return finish(report, started);
    }

    match runner.work(&record, &mut report).await {
        Ok(handoff) => {
            let written = write_outcome(
                ctx,
                &mut report,
                record.status,
                stage.success_status(),
                None,
            )
            .await;
            if written {
                if let Err(e) = runner.signal(&handoff).await {
                    error!("{}: could not signal next stage: {}", reference_key, e);
                    report.cleanup_warnings.push(format!("signal next stage: {e}"));
                }
                report.handoff = Some(handoff);
            }
        }
        Err(failure) => {
            write_outcome(
                ctx,
                &mut report,
                record.status,
                stage.failure_status(),
                Some(failure),
            )
            .await;
        }
    }
    finish(report, started)
}

/// Write `next` (with the failure's reason, if any) and record the outcome.
///
/// Returns whether the status write went through.
async fn write_outcome(
    ctx: &StageContext,
    report: &mut StageReport,
    current: TaskStatus,
    next: TaskStatus,
    failure: Option<StageFailure>,
) -> bool {
    let reason = failure.as_ref().map(|f| f.reason);
    let write = async {
        let next = guard_write(report.stage, current, next)?;
        ctx.status
            .update_status(&report.reference_key, next, reason)
            .await?;
        Ok::<_, PipelineError>(next)
    };

    let result = write.await;
    let write_error = match result {
        Ok(next) => {
            info!("{}: status {} → {}", report.reference_key, current, next);
            report.status_written = Some(next);
            None
        }
        Err(e) => {
            error!("{}: status write {} failed: {}", report.reference_key, next, e);
            Some(e.to_string())
        }
    };

    report.outcome = match (failure, write_error.as_ref()) {
        (None, None) => StageOutcome::Succeeded,
        (None, Some(e)) => StageOutcome::Failed(format!("status write failed: {e}")),
        (Some(f), None) => StageOutcome::Failed(f.detail),
        (Some(f), Some(e)) => {
            StageOutcome::Failed(format!("{} (status write failed: {e})", f.detail))
        }
    };
    write_error.is_none()
}

/// There is no task record to check against: try the catch-all status.
async fn cannot_begin(ctx: &StageContext, report: &mut StageReport, failure: StageFailure) {
    warn!("{}: {} stage cannot begin: {}", report.reference_key, report.stage, failure.detail);
    match ctx
        .status
        .update_status(&report.reference_key, TaskStatus::Failed, Some(failure.reason))
        .await
    {
        Ok(()) => report.status_written = Some(TaskStatus::Failed),
        Err(e) => warn!("{}: could not record failure: {}", report.reference_key, e),
    }
    report.outcome = StageOutcome::Failed(failure.detail);
}

fn finish(mut report: StageReport, started: Instant) -> StageReport {
    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "{} stage for {}: {:?} ({} processed, {} skipped, {}ms)",
        report.stage,
        report.reference_key,
        report.outcome,
        report.processed.len(),
        report.skipped.len(),
        report.duration_ms
    );
    report
}

/// Record a skipped item on the report.
pub(crate) fn skip(report: &mut StageReport, key: impl Into<String>, error: ItemError) {
    let key = key.into();
    warn!("{}: skipping {}: {}", report.reference_key, key, error);
    report.skipped.push(SkippedItem { key, error });
}

/// Failure reason for a stage that produced nothing: were there no inputs
/// at all, or did every input fail?
pub(crate) fn nothing_produced(report: &StageReport, no_inputs: bool) -> StageFailure {
    if no_inputs {
        StageFailure::new(FailureReason::NoInputs, "no input items found")
    } else {
        StageFailure::new(
            FailureReason::AllItemsFailed,
            format!("all {} items failed", report.skipped.len()),
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::store::{ChannelSink, MemoryStatusStore, Notification, ObjectStoreArtifacts};
    use crate::task::PageRange;
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc::UnboundedReceiver;

    pub struct Harness {
        pub ctx: StageContext,
        pub artifacts: Arc<ObjectStoreArtifacts>,
        pub status: Arc<MemoryStatusStore>,
        pub notifications: UnboundedReceiver<Notification>,
    }

    pub fn harness(config: PipelineConfig) -> Harness {
        let artifacts = Arc::new(ObjectStoreArtifacts::in_memory());
        let status = Arc::new(MemoryStatusStore::new());
        let (sink, notifications) = ChannelSink::new();
        Harness {
            ctx: StageContext {
                artifacts: artifacts.clone(),
                status: status.clone(),
                notifier: Arc::new(sink),
                config: Arc::new(config),
            },
            artifacts,
            status,
            notifications,
        }
    }

    pub fn record(reference_key: &str, status: TaskStatus, pages: (u32, u32)) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            reference_key: reference_key.into(),
            status,
            failure_reason: None,
            source_location: format!("upload/{reference_key}/doc.pdf"),
            language: "english".into(),
            page_range: PageRange {
                start: pages.0,
                end: pages.1,
            },
            owner: "owner@example.com".into(),
            display_name: "doc.pdf".into(),
            created_at: now,
            expires_at: now + Duration::weeks(1),
        }
    }

    pub async fn status_of(h: &Harness, reference_key: &str) -> TaskRecord {
        h.status.get(reference_key).await.unwrap().unwrap()
    }
}
