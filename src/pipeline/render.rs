//! Page rasterisation: render a page range of a PDF to PNG bytes.
//!
//! pdfium keeps thread-local state and blocks the calling thread, so the
//! whole render runs under `tokio::task::spawn_blocking`. The longest edge of
//! every page is capped by `max_rendered_pixels` regardless of DPI, which
//! keeps memory bounded for poster-sized pages.

use crate::config::PipelineConfig;
use crate::error::{ItemError, PipelineError};
use crate::pipeline::encode::encode_png;
use crate::task::PageRange;
use async_trait::async_trait;
use bytes::Bytes;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// One requested page: its PNG bytes, or why it could not be produced.
#[derive(Debug)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page: u32,
    pub png: Result<Vec<u8>, ItemError>,
}

impl RenderedPage {
    /// A single entry standing for every requested page past the end of a
    /// `total`-page document, keyed by the first of them.
    pub fn beyond_end(range: PageRange, total: u32) -> Self {
        Self {
            page: range.start,
            png: Err(ItemError::PageOutOfRange {
                start: range.start,
                end: range.end,
                total,
            }),
        }
    }
}

/// Turns a document into page images.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `range` that exists, one [`RenderedPage`] each.
    ///
    /// Only a document that cannot be opened at all is an `Err`; a page that
    /// fails is reported in its entry, and the pages past the end of the
    /// document share one [`RenderedPage::beyond_end`] entry.
    async fn rasterize(
        &self,
        source_key: &str,
        document: Bytes,
        range: PageRange,
    ) -> Result<Vec<RenderedPage>, PipelineError>;
}

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    library_dir: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            library_dir: config.pdfium_library_path.clone(),
        }
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        source_key: &str,
        document: Bytes,
        range: PageRange,
    ) -> Result<Vec<RenderedPage>, PipelineError> {
        let this = self.clone();
        let key = source_key.to_string();
        tokio::task::spawn_blocking(move || this.rasterize_blocking(&key, &document, range))
            .await
            .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRasterizer {
    fn bind(&self, key: &str) -> Result<Pdfium, PipelineError> {
        let bindings = match &self.library_dir {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| PipelineError::RasterisationFailed {
            key: key.to_string(),
            detail: format!(
                "pdfium library could not be loaded ({:?}); set DOC2VOICE_PDFIUM_PATH",
                e
            ),
        })?;
        Ok(Pdfium::new(bindings))
    }

    fn rasterize_blocking(
        &self,
        key: &str,
        bytes: &[u8],
        range: PageRange,
    ) -> Result<Vec<RenderedPage>, PipelineError> {
        let pdfium = self.bind(key)?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| PipelineError::RasterisationFailed {
                key: key.to_string(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        let total = pages.len() as u32;
        info!("{}: {} pages, rendering {}-{}", key, total, range.start, range.end);

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let (present, beyond) = range.clip(total);
        let mut results = Vec::new();

        for page in present {
            let png = pages
                .get((page - 1) as u16)
                .map_err(|e| format!("{:?}", e))
                .and_then(|p| {
                    p.render_with_config(&render_config)
                        .map_err(|e| format!("{:?}", e))
                        .and_then(|bitmap| {
                            let image = bitmap.as_image();
                            debug!("Rendered page {} → {}x{} px", page, image.width(), image.height());
                            encode_png(&image).map_err(|e| e.to_string())
                        })
                })
                .map_err(|detail| ItemError::RenderFailed { page, detail });
            if let Err(e) = &png {
                warn!("{}: {}", key, e);
            }
            results.push(RenderedPage { page, png });
        }

        if let Some(beyond) = beyond {
            warn!(
                "{}: skipping pages {}-{} (out of range, total={})",
                key, beyond.start, beyond.end, total
            );
            results.push(RenderedPage::beyond_end(beyond, total));
        }

        Ok(results)
    }
}
