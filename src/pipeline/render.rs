//! Page sources: where page rasters and their pixel sizes come from.
//!
//! The pipeline never touches pdfium directly. It asks a [`PageSource`] for
//! a [`LoadedPdf`] — one [`PageImage`] per selected page plus the PDF info
//! dictionary — so tests and alternative front ends can feed pages from
//! memory. [`PdfiumPageSource`] is the production implementation.
//!
//! pdfium keeps thread-local state and blocks, so all of its work runs inside
//! `tokio::task::spawn_blocking`.

use crate::config::ConversionConfig;
use crate::error::Pdf2DocError;
use crate::pipeline::input;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pixel size of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: u32,
    pub height: u32,
}

impl PageDimensions {
    /// `None` when either side is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

/// One page handed to the detection source.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Zero-based page number in the source PDF.
    pub index: usize,
    /// Pixel size of `image`; `None` when rasterisation failed.
    pub dimensions: Option<PageDimensions>,
    /// The raster, shared between detector and normalizer (for crops).
    pub image: Option<Arc<DynamicImage>>,
}

impl PageImage {
    pub fn from_image(index: usize, image: DynamicImage) -> Self {
        Self {
            index,
            dimensions: PageDimensions::new(image.width(), image.height()),
            image: Some(Arc::new(image)),
        }
    }

    /// A page with known size but no pixels (e.g. detections computed offline).
    pub fn blank(index: usize, dimensions: Option<PageDimensions>) -> Self {
        Self {
            index,
            dimensions,
            image: None,
        }
    }
}

/// Information from the PDF info dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: usize,
}

/// A PDF opened and rasterised for the selected pages.
#[derive(Debug, Clone)]
pub struct LoadedPdf {
    pub source: PathBuf,
    pub metadata: PdfMetadata,
    pub pages: Vec<PageImage>,
}

/// Anything that can turn an input reference into page rasters.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn load(&self, input: &str, config: &ConversionConfig) -> Result<LoadedPdf, Pdf2DocError>;
}

/// Renders pages with pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumPageSource;

#[async_trait]
impl PageSource for PdfiumPageSource {
    async fn load(&self, input_str: &str, config: &ConversionConfig) -> Result<LoadedPdf, Pdf2DocError> {
        let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
        let path = resolved.path().to_path_buf();
        let dpi = config.dpi;
        let max_pixels = config.max_rendered_pixels;
        let password = config.password.clone();
        let selection = config.pages.clone();

        let (metadata, pages) = tokio::task::spawn_blocking(move || {
            render_blocking(&path, dpi, max_pixels, password.as_deref(), &selection)
        })
        .await
        .map_err(|e| Pdf2DocError::Internal(format!("Render task panicked: {}", e)))??;

        // `resolved` (and any downloaded temp file) must outlive rendering.
        let source = PathBuf::from(input_str);
        drop(resolved);

        Ok(LoadedPdf {
            source,
            metadata,
            pages,
        })
    }
}

fn bind_pdfium() -> Result<Pdfium, Pdf2DocError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Pdf2DocError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn open_error(path: &Path, password: Option<&str>, e: PdfiumError) -> Pdf2DocError {
    let err_str = format!("{:?}", e);
    if err_str.to_ascii_lowercase().contains("password") {
        if password.is_some() {
            Pdf2DocError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            Pdf2DocError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        Pdf2DocError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

/// Open the PDF, read its info dictionary and rasterise the selected pages.
///
/// A page that fails to render is still returned, without pixels, so the
/// pipeline can mark it degraded instead of losing the whole document.
fn render_blocking(
    pdf_path: &Path,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    selection: &crate::config::PageSelection,
) -> Result<(PdfMetadata, Vec<PageImage>), Pdf2DocError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| open_error(pdf_path, password, e))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let info = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        info.get(tag)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let metadata = PdfMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        page_count: total_pages,
    };

    let indices = selection.to_indices(total_pages);
    if indices.is_empty() {
        return Err(Pdf2DocError::PageOutOfRange {
            page: 0,
            total: total_pages,
        });
    }

    let mut results = Vec::with_capacity(indices.len());
    for idx in indices {
        match render_page(&pages, idx, dpi, max_pixels) {
            Ok(image) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    image.width(),
                    image.height()
                );
                results.push(PageImage::from_image(idx, image));
            }
            Err(e) => {
                warn!("{}", e);
                results.push(PageImage::blank(idx, None));
            }
        }
    }

    Ok((metadata, results))
}

fn render_page(
    pages: &PdfPages,
    idx: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, Pdf2DocError> {
    let failed = |e: PdfiumError| Pdf2DocError::RasterisationFailed {
        page: idx + 1,
        detail: format!("{:?}", e),
    };
    let page = pages.get(idx as u16).map_err(failed)?;

    // Width at the requested DPI, capped so neither side exceeds max_pixels.
    let width_px = (page.width().value * dpi as f32 / 72.0).round() as i32;
    let render_config = PdfRenderConfig::new()
        .set_target_width(width_px.clamp(1, max_pixels as i32))
        .set_maximum_height(max_pixels as i32);

    let bitmap = page.render_with_config(&render_config).map_err(failed)?;
    Ok(bitmap.as_image())
}
