//! PDF rasterisation: render every page of an uploaded PDF to an image.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! [`render_document`] moves the work onto tokio's blocking pool so request
//! handlers never stall a worker thread while a 30-page scan renders.
//!
//! Rendering sits behind [`PageRasterizer`] so the normaliser can be
//! exercised without a pdfium shared library present.

use crate::error::LedgerError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Turns a PDF on disk into one image per page, in page order.
///
/// Implementations are called from a blocking thread.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf_path: &Path) -> Result<Vec<DynamicImage>, LedgerError>;
}

/// Production rasteriser backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    lib_dir: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32, max_pixels: u32, lib_dir: Option<PathBuf>) -> Self {
        Self {
            dpi,
            max_pixels,
            lib_dir,
        }
    }

    fn bind(&self) -> Result<Pdfium, LedgerError> {
        let bindings = match &self.lib_dir {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| LedgerError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf_path: &Path) -> Result<Vec<DynamicImage>, LedgerError> {
        let pdfium = self.bind()?;
        let filename = display_name(pdf_path);

        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| LedgerError::RenderFailed {
                filename: filename.clone(),
                detail: format!("{:?}", e),
            })?;

        let pages = document.pages();
        info!("{}: {} pages", filename, pages.len());

        // Points are 1/72 inch; cap the longest edge independently of DPI.
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut images = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap =
                page.render_with_config(&render_config)
                    .map_err(|e| LedgerError::RenderFailed {
                        filename: filename.clone(),
                        detail: format!("page {}: {:?}", idx + 1, e),
                    })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered {} page {} → {}x{} px",
                filename,
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }

        Ok(images)
    }
}

/// Rasterise on the blocking pool.
pub async fn render_document(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf_path: &Path,
) -> Result<Vec<DynamicImage>, LedgerError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || rasterizer.rasterize(&path))
        .await
        .map_err(|e| LedgerError::Internal(format!("Render task panicked: {}", e)))?
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
