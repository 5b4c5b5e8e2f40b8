//! Stage 2: read the text of every page image and store it as one document.

use super::{nothing_produced, skip, StageContext, StageFailure, StageRunner};
use crate::error::ItemError;
use crate::layout;
use crate::output::{HandoffPayload, StageReport};
use crate::pipeline::llm::TextExtractor;
use crate::pipeline::status::Stage;
use crate::task::TaskRecord;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

/// Separator placed between the texts of consecutive pages.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Extracts page text to `download/{ref}/formatted_output.txt`.
///
/// Pages are read concurrently; the text is assembled in page-number order
/// whatever order the reads complete in. A page that fails is skipped.
pub struct ExtractRunner {
    ctx: StageContext,
    extractor: Arc<dyn TextExtractor>,
}

impl ExtractRunner {
    pub fn new(ctx: StageContext, extractor: Arc<dyn TextExtractor>) -> Self {
        Self { ctx, extractor }
    }

    async fn read_page(&self, page: u32, key: &str) -> Result<String, ItemError> {
        let png = self
            .ctx
            .artifacts
            .get(key)
            .await
            .map_err(|e| ItemError::Storage {
                detail: e.to_string(),
            })?;
        self.extractor.extract(page, &png).await
    }
}

#[async_trait]
impl StageRunner for ExtractRunner {
    fn stage(&self) -> Stage {
        Stage::Extract
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
        let keys = self
            .ctx
            .artifacts
            .list(&layout::images_prefix(reference_key))
            .await?;

        let mut pages: Vec<(u32, String)> = Vec::with_capacity(keys.len());
        for key in keys {
            match layout::parse_page_number(&key) {
                Some(page) => pages.push((page, key)),
                None => skip(
                    report,
                    key.clone(),
                    ItemError::UnrecognisedKey { detail: key },
                ),
            }
        }
        if pages.is_empty() {
            return Err(nothing_produced(report, report.skipped.is_empty()));
        }
        info!("{}: extracting {} pages", reference_key, pages.len());

        let concurrency = self.ctx.config.extract_concurrency.max(1);
        let mut results: Vec<(u32, String, Result<String, ItemError>)> = stream::iter(pages)
            .map(|(page, key)| async move {
                let text = self.read_page(page, &key).await;
                (page, key, text)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|(page, _, _)| *page);

        let mut texts = Vec::with_capacity(results.len());
        for (_, key, result) in results {
            match result {
                Ok(text) => {
                    if !text.is_empty() {
                        texts.push(text);
                    }
                    report.processed.push(key);
                }
                Err(e) => skip(report, key, e),
            }
        }
        if report.processed.is_empty() {
            return Err(nothing_produced(report, false));
        }

        let text_key = layout::text_key(reference_key);
        let body = texts.join(PAGE_SEPARATOR);
        self.ctx
            .artifacts
            .put(&text_key, Bytes::from(body), "text/plain; charset=utf-8")
            .await?;
        info!(
            "{}: wrote {} ({} of {} pages)",
            reference_key,
            text_key,
            report.processed.len(),
            report.processed.len() + report.skipped.len()
        );

        Ok(HandoffPayload {
            reference_key: reference_key.clone(),
            storage_location: layout::download_prefix(reference_key),
            artifacts: vec![text_key],
        })
    }
}
