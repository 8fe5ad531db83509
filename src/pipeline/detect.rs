//! Detection sources: the external collaborators that look at a page.
//!
//! A [`Detector`] returns raw, detector-native results. Nothing here is
//! normalized: boxes may be pixels or fractions, rectangles or polygons,
//! confidences may be percentages or logits, and `content` is free-form JSON.
//! [`crate::pipeline::normalize`] owns the conversion into the Region Model.
//!
//! Shipped detectors:
//! - [`SidecarDetector`] — detections precomputed by an external OCR/formula
//!   engine and stored as JSON.
//! - [`MultiDetector`] — fans one page out to several detectors (e.g. a
//!   layout model plus a formula recognizer) and concatenates the results.
//! - [`crate::pipeline::llm::VlmDetector`] — a vision LLM.

use crate::error::{DetectionError, Pdf2DocError};
use crate::pipeline::render::{PageDimensions, PageImage};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Coordinate system of a raw bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordSpace {
    /// Pixels of the page raster the detector saw.
    #[default]
    Pixel,
    /// Fractions of page width/height in [0,1].
    Fractional,
}

/// A bounding box as a detector reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawBBox {
    /// `[x0, y0, x1, y1]`, corners in any order.
    Rect([f64; 4]),
    /// Polygon points, e.g. an OCR quad `[[x,y], …]`.
    Polygon(Vec<[f64; 2]>),
}

impl RawBBox {
    /// Axis-aligned extent `(x0, y0, x1, y1)` with ordered corners.
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        match self {
            RawBBox::Rect([a, b, c, d]) => Some((a.min(*c), b.min(*d), a.max(*c), b.max(*d))),
            RawBBox::Polygon(points) if !points.is_empty() => {
                let mut ext = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
                for [x, y] in points {
                    ext.0 = ext.0.min(*x);
                    ext.1 = ext.1.min(*y);
                    ext.2 = ext.2.max(*x);
                    ext.3 = ext.3.max(*y);
                }
                Some(ext)
            }
            RawBBox::Polygon(_) => None,
        }
    }
}

/// One detector-native result for one page region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Detector name, e.g. `"layout"`, `"ocr"`, `"formula_rec"`.
    pub detector: String,
    /// Detector label, e.g. `"text"`, `"display_formula"`, `"table_cell"`.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Parent region id (table cells).
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub bbox: Option<RawBBox>,
    #[serde(default)]
    pub coords: CoordSpace,
    /// Score on the detector's own scale.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Free-form payload: a string, a grid, or an object.
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub page_dimensions: Option<PageDimensions>,
}

/// External detection source for one page.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, page: &PageImage) -> Result<Vec<RawDetection>, DetectionError>;
}

// ── Sidecar JSON ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SidecarFile {
    pages: Vec<SidecarPage>,
}

#[derive(Debug, Deserialize)]
struct SidecarPage {
    page_index: usize,
    #[serde(default)]
    page_dimensions: Option<PageDimensions>,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

/// Serves detections that were computed ahead of time.
///
/// File layout:
///
/// ```json
/// { "pages": [ { "page_index": 0,
///                "page_dimensions": { "width": 1654, "height": 2339 },
///                "detections": [ { "detector": "ocr", "label": "text",
///                                  "bbox": [120, 80, 900, 140],
///                                  "confidence": 0.97, "content": "Abstract" } ] } ] }
/// ```
///
/// Page-level `page_dimensions` fill in for detections that omit their own.
/// Pages absent from the file yield no detections.
#[derive(Debug, Clone, Default)]
pub struct SidecarDetector {
    pages: HashMap<usize, Vec<RawDetection>>,
}

impl SidecarDetector {
    pub fn from_json(json: &str) -> Result<Self, Pdf2DocError> {
        let file: SidecarFile = serde_json::from_str(json)
            .map_err(|e| Pdf2DocError::InvalidConfig(format!("detections file: {e}")))?;
        let mut pages = HashMap::with_capacity(file.pages.len());
        for page in file.pages {
            let dims = page.page_dimensions;
            let detections: Vec<RawDetection> = page
                .detections
                .into_iter()
                .map(|mut d| {
                    if d.page_dimensions.is_none() {
                        d.page_dimensions = dims;
                    }
                    d
                })
                .collect();
            pages
                .entry(page.page_index)
                .or_insert_with(Vec::new)
                .extend(detections);
        }
        Ok(Self { pages })
    }

    pub fn from_path(path: &Path) -> Result<Self, Pdf2DocError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Pdf2DocError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[async_trait]
impl Detector for SidecarDetector {
    async fn detect(&self, page: &PageImage) -> Result<Vec<RawDetection>, DetectionError> {
        let found = self.pages.get(&page.index).cloned().unwrap_or_default();
        debug!("Page {}: {} sidecar detections", page.index + 1, found.len());
        Ok(found)
    }
}

// ── Fan-out ──────────────────────────────────────────────────────────────

/// Runs several detectors on the same page and concatenates their output.
///
/// The page fails only if every detector fails; a single failing detector
/// is logged and its share of the page is missing.
#[derive(Clone, Default)]
pub struct MultiDetector {
    detectors: Vec<Arc<dyn Detector>>,
}

impl MultiDetector {
    pub fn new(detectors: Vec<Arc<dyn Detector>>) -> Self {
        Self { detectors }
    }

    pub fn push(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[async_trait]
impl Detector for MultiDetector {
    async fn detect(&self, page: &PageImage) -> Result<Vec<RawDetection>, DetectionError> {
        let results = join_all(self.detectors.iter().map(|d| d.detect(page))).await;
        let mut merged = Vec::new();
        let mut first_err = None;
        let mut any_ok = false;
        for result in results {
            match result {
                Ok(found) => {
                    any_ok = true;
                    merged.extend(found);
                }
                Err(e) => {
                    warn!("{}", e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) if !any_ok => Err(e),
            _ => Ok(merged),
        }
    }
}
