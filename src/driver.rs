//! Dispatching trigger events to the stage runners.
//!
//! In production each stage is its own process woken by its own event
//! source. [`Pipeline`] holds all three runners so one process can route any
//! event, and [`Pipeline::run_to_completion`] replays the event chain for a
//! single task locally, which is what the CLI and the integration tests use.

use crate::error::PipelineError;
use crate::layout;
use crate::output::StageReport;
use crate::pipeline::llm::TextExtractor;
use crate::pipeline::render::PageRasterizer;
use crate::pipeline::status::Stage;
use crate::stage::synthesize::SpeechEngine;
use crate::stage::{ExtractRunner, RasterizeRunner, StageContext, StageRunner, SynthesizeRunner};
use crate::store::{Notification, PAGES_READY_TOPIC};
use crate::trigger::{route, TriggerEvent};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

pub struct Pipeline {
    rasterize: RasterizeRunner,
    extract: ExtractRunner,
    synthesize: SynthesizeRunner,
}

impl Pipeline {
    pub fn new(
        ctx: StageContext,
        rasterizer: Arc<dyn PageRasterizer>,
        extractor: Arc<dyn TextExtractor>,
        speech: Arc<SpeechEngine>,
    ) -> Self {
        Self {
            rasterize: RasterizeRunner::new(ctx.clone(), rasterizer),
            extract: ExtractRunner::new(ctx.clone(), extractor),
            synthesize: SynthesizeRunner::new(ctx, speech),
        }
    }

    pub fn runner(&self, stage: Stage) -> &dyn StageRunner {
        match stage {
            Stage::Rasterize => &self.rasterize,
            Stage::Extract => &self.extract,
            Stage::Synthesize => &self.synthesize,
        }
    }

    /// Route `event` and run the stage it wakes.
    ///
    /// Only an unroutable event is an `Err`; whatever the stage does is in
    /// the report.
    pub async fn dispatch(&self, event: &TriggerEvent) -> Result<StageReport, PipelineError> {
        let (stage, reference_key) = route(event)?;
        Ok(self.runner(stage).run(&reference_key).await)
    }

    /// Drive `reference_key` through every stage, stopping at the first stage
    /// that does not succeed.
    ///
    /// `notifications` must be the receiving end of the context's
    /// [`crate::store::ChannelSink`]: the extract stage is woken by the
    /// pages-ready message rasterize publishes there.
    pub async fn run_to_completion(
        &self,
        reference_key: &str,
        notifications: &mut UnboundedReceiver<Notification>,
    ) -> Result<Vec<StageReport>, PipelineError> {
        let mut reports = Vec::with_capacity(3);

        let report = self.rasterize.run(reference_key).await;
        let ok = report.succeeded();
        reports.push(report);
        if !ok {
            return Ok(reports);
        }

        let event = next_pages_ready(reference_key, notifications)?;
        let report = self.dispatch(&event).await?;
        let ok = report.succeeded();
        reports.push(report);
        if !ok {
            return Ok(reports);
        }

        let event = TriggerEvent::ObjectCreated {
            key: layout::text_key(reference_key),
        };
        reports.push(self.dispatch(&event).await?);
        info!("{}: pipeline finished after {} stage(s)", reference_key, reports.len());
        Ok(reports)
    }
}

/// Take queued notifications until the pages-ready message for `reference_key`.
fn next_pages_ready(
    reference_key: &str,
    notifications: &mut UnboundedReceiver<Notification>,
) -> Result<TriggerEvent, PipelineError> {
    while let Ok(note) = notifications.try_recv() {
        if note.topic != PAGES_READY_TOPIC {
            continue;
        }
        let event = TriggerEvent::from_notification(&note.topic, &note.payload)?;
        match &event {
            TriggerEvent::Notification { message, .. } if message.reference_key == reference_key => {
                return Ok(event);
            }
            _ => warn!("{}: ignoring notification for another task", reference_key),
        }
    }
    Err(PipelineError::Internal(format!(
        "no pages-ready notification for '{reference_key}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::HandoffPayload;
    use crate::store::ChannelSink;
    use crate::store::NotificationSink;

    fn payload(reference_key: &str) -> String {
        serde_json::to_string(&HandoffPayload {
            reference_key: reference_key.into(),
            storage_location: layout::images_prefix(reference_key),
            artifacts: vec![],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn picks_the_matching_notification() {
        let (sink, mut rx) = ChannelSink::new();
        sink.publish("other-topic", "{}").await.unwrap();
        sink.publish(PAGES_READY_TOPIC, &payload("a")).await.unwrap();
        sink.publish(PAGES_READY_TOPIC, &payload("b")).await.unwrap();

        let event = next_pages_ready("b", &mut rx).unwrap();
        assert_eq!(route(&event).unwrap(), (Stage::Extract, "b".into()));
    }

    #[tokio::test]
    async fn missing_notification_is_an_error() {
        let (_sink, mut rx) = ChannelSink::new();
        assert!(next_pages_ready("a", &mut rx).is_err());
    }
}
