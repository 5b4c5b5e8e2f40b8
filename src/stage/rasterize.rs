//! Stage 1: render the requested pages of the uploaded document.

use super::{nothing_produced, skip, StageContext, StageFailure, StageRunner};
use crate::error::{ItemError, PipelineError};
use crate::layout;
use crate::output::{HandoffPayload, StageReport};
use crate::pipeline::render::PageRasterizer;
use crate::pipeline::status::Stage;
use crate::store::PAGES_READY_TOPIC;
use crate::task::{FailureReason, TaskRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Renders pages to `images/{ref}/page_{n}.png` and announces them on the
/// pages-ready topic.
pub struct RasterizeRunner {
    ctx: StageContext,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl RasterizeRunner {
    pub fn new(ctx: StageContext, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self { ctx, rasterizer }
    }
}

#[async_trait]
impl StageRunner for RasterizeRunner {
    fn stage(&self) -> Stage {
        Stage::Rasterize
    }

    fn context(&self) -> &StageContext {
        &self.ctx
    }

    async fn work(
        &self,
        record: &TaskRecord,
        report: &mut StageReport,
    ) -> Result<HandoffPayload, StageFailure> {
        let reference_key = &record.reference_key;
        let document = self
            .ctx
            .artifacts
            .get(&record.source_location)
            .await
            .map_err(|e| match e {
                PipelineError::ArtifactNotFound { .. } => StageFailure::new(
                    FailureReason::NoInputs,
                    format!("source document '{}' is missing", record.source_location),
                ),
                other => StageFailure::from(other),
            })?;
        info!("{}: rasterising {} bytes", reference_key, document.len());

        let pages = self
            .rasterizer
            .rasterize(&record.source_location, document, record.page_range)
            .await?;

        for rendered in pages {
            let key = layout::page_image_key(reference_key, rendered.page);
            let png = match rendered.png {
                Ok(png) => png,
                Err(e) => {
                    skip(report, key, e);
                    continue;
                }
            };
            match self
                .ctx
                .artifacts
                .put(&key, Bytes::from(png), "image/png")
                .await
            {
                Ok(()) => {
                    debug!("{}: stored {}", reference_key, key);
                    report.processed.push(key);
                }
                Err(e) => skip(
                    report,
                    key,
                    ItemError::RenderFailed {
                        page: rendered.page,
                        detail: format!("upload failed: {e}"),
                    },
                ),
            }
        }

        if report.processed.is_empty() {
            let no_pages = report
                .skipped
                .iter()
                .all(|s| matches!(s.error, ItemError::PageOutOfRange { .. }));
            return Err(nothing_produced(report, no_pages));
        }

        Ok(HandoffPayload {
            reference_key: reference_key.clone(),
            storage_location: layout::images_prefix(reference_key),
            artifacts: report.processed.clone(),
        })
    }

    async fn signal(&self, handoff: &HandoffPayload) -> Result<(), PipelineError> {
        let payload = serde_json::to_string(handoff)
            .map_err(|e| PipelineError::Internal(format!("serialise handoff: {e}")))?;
        self.ctx.notifier.publish(PAGES_READY_TOPIC, &payload).await
    }
}
