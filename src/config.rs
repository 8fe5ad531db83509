//! Configuration types for PDF reconstruction.
//!
//! All pipeline behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One struct holds every knob so a job
//! can carry its own copy across threads and two runs can be diffed.

use crate::error::Pdf2DocError;
use crate::export::{ExportOptions, OutputFormat};
use crate::model::SourceDetector;
use crate::pipeline::correct::CorrectionMode;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for one conversion job.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2doc::{ConversionConfig, CorrectionMode, OutputFormat};
///
/// let config = ConversionConfig::builder()
///     .formats(vec![OutputFormat::Markdown, OutputFormat::Latex])
///     .correction_mode(CorrectionMode::Light)
///     .min_area(0.001)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps memory for oversized pages; detections are normalized against
    /// the rendered size so the cap never distorts geometry.
    pub max_rendered_pixels: u32,

    /// Pages detected concurrently, and correction batches in flight. Default: 4.
    pub concurrency: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: All pages.
    pub pages: PageSelection,

    /// Merge & Filter thresholds.
    pub thresholds: MergeThresholds,

    /// Per-detector confidence scales used by the normalizer.
    pub confidence_scales: ConfidenceScales,

    /// How aggressively Text regions are rewritten. Default: Off.
    pub correction_mode: CorrectionMode,

    /// Text regions sent per correction call. Default: 8.
    pub correction_batch_size: usize,

    /// Per-page detection timeout in seconds. Default: 120.
    pub detect_timeout_secs: u64,

    /// Per-batch correction timeout in seconds. Default: 60.
    pub correction_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Requested output formats. Default: Markdown only.
    pub formats: Vec<OutputFormat>,

    /// Renderer options shared by all formats.
    pub export: ExportOptions,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency: 4,
            password: None,
            pages: PageSelection::default(),
            thresholds: MergeThresholds::default(),
            confidence_scales: ConfidenceScales::default(),
            correction_mode: CorrectionMode::default(),
            correction_batch_size: 8,
            detect_timeout_secs: 120,
            correction_timeout_secs: 60,
            download_timeout_secs: 120,
            formats: vec![OutputFormat::Markdown],
            export: ExportOptions::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("pages", &self.pages)
            .field("thresholds", &self.thresholds)
            .field("confidence_scales", &self.confidence_scales)
            .field("correction_mode", &self.correction_mode)
            .field("correction_batch_size", &self.correction_batch_size)
            .field("detect_timeout_secs", &self.detect_timeout_secs)
            .field("correction_timeout_secs", &self.correction_timeout_secs)
            .field("formats", &self.formats)
            .field("export", &self.export)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn thresholds(mut self, thresholds: MergeThresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn min_area(mut self, v: f64) -> Self {
        self.config.thresholds.min_area = v;
        self
    }

    pub fn min_score(mut self, v: f64) -> Self {
        self.config.thresholds.min_score = v;
        self
    }

    pub fn iou_threshold(mut self, v: f64) -> Self {
        self.config.thresholds.iou_threshold = v;
        self
    }

    pub fn confidence_scale(mut self, source: SourceDetector, scale: ConfidenceScale) -> Self {
        self.config.confidence_scales.set(source, scale);
        self
    }

    pub fn correction_mode(mut self, mode: CorrectionMode) -> Self {
        self.config.correction_mode = mode;
        self
    }

    pub fn correction_batch_size(mut self, n: usize) -> Self {
        self.config.correction_batch_size = n.max(1);
        self
    }

    pub fn detect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.detect_timeout_secs = secs;
        self
    }

    pub fn correction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.correction_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn formats(mut self, formats: Vec<OutputFormat>) -> Self {
        self.config.formats = formats;
        self
    }

    pub fn export(mut self, export: ExportOptions) -> Self {
        self.config.export = export;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.export.page_separator = sep;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.export.include_metadata = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<ConversionConfig, Pdf2DocError> {
        let c = &mut self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Pdf2DocError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(Pdf2DocError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        c.thresholds
            .validate()
            .map_err(|e| Pdf2DocError::InvalidConfig(e.to_string()))?;
        if c.formats.is_empty() {
            return Err(Pdf2DocError::InvalidConfig(
                "At least one output format is required".into(),
            ));
        }
        c.formats.sort();
        c.formats.dedup();
        Ok(self.config)
    }
}

// ── Thresholds ───────────────────────────────────────────────────────────

/// Numeric knobs of the Merge & Filter engine.
///
/// All geometry is in normalized page units, so `min_area = 0.001` means
/// one thousandth of the page area regardless of DPI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeThresholds {
    /// Regions smaller than this (except formulas) are dropped. Default: 0.001.
    pub min_area: f64,
    /// Regions less confident than this are dropped. Default: 0.5.
    pub min_score: f64,
    /// Cross-detector overlaps above this IoU compete. Default: 0.5.
    pub iou_threshold: f64,
    /// Small regions with at least this many characters survive the area filter.
    pub min_text_len: Option<usize>,
    /// Merge vertically adjacent paragraphs closer than this gap.
    pub text_merge_gap: Option<f64>,
}

impl Default for MergeThresholds {
    fn default() -> Self {
        Self {
            min_area: 0.001,
            min_score: 0.5,
            iou_threshold: 0.5,
            min_text_len: None,
            text_merge_gap: None,
        }
    }
}

impl MergeThresholds {
    /// Reject NaN and out-of-range values.
    pub fn validate(&self) -> Result<(), crate::error::MergeError> {
        use crate::error::MergeError::InvalidThreshold;
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.min_area) {
            return Err(InvalidThreshold {
                name: "min_area",
                value: self.min_area,
            });
        }
        if !in_unit(self.min_score) {
            return Err(InvalidThreshold {
                name: "min_score",
                value: self.min_score,
            });
        }
        if !self.iou_threshold.is_finite() || self.iou_threshold <= 0.0 || self.iou_threshold > 1.0
        {
            return Err(InvalidThreshold {
                name: "iou_threshold",
                value: self.iou_threshold,
            });
        }
        if let Some(gap) = self.text_merge_gap {
            if !in_unit(gap) {
                return Err(InvalidThreshold {
                    name: "text_merge_gap",
                    value: gap,
                });
            }
        }
        Ok(())
    }
}

// ── Confidence scales ────────────────────────────────────────────────────

/// How a detector expresses certainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// Already a probability in [0,1].
    #[default]
    Unit,
    /// A percentage in [0,100] (Tesseract style).
    Percent,
    /// An unbounded logit; mapped through the logistic function.
    Logit,
}

impl ConfidenceScale {
    /// Map a raw score onto [0,1].
    pub fn apply(self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        let v = match self {
            ConfidenceScale::Unit => raw,
            ConfidenceScale::Percent => raw / 100.0,
            ConfidenceScale::Logit => 1.0 / (1.0 + (-raw).exp()),
        };
        v.clamp(0.0, 1.0)
    }
}

/// One [`ConfidenceScale`] per detector source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfidenceScales {
    pub layout: ConfidenceScale,
    pub formula: ConfidenceScale,
    pub ocr: ConfidenceScale,
}

impl ConfidenceScales {
    pub fn get(&self, source: SourceDetector) -> ConfidenceScale {
        match source {
            SourceDetector::Layout => self.layout,
            SourceDetector::Formula => self.formula,
            SourceDetector::Ocr => self.ocr,
        }
    }

    pub fn set(&mut self, source: SourceDetector, scale: ConfidenceScale) {
        match source {
            SourceDetector::Layout => self.layout = scale,
            SourceDetector::Formula => self.formula = scale,
            SourceDetector::Ocr => self.ocr = scale,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of the PDF to convert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// How to separate pages in Markdown output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// No separator; pages joined with a blank line. (default)
    #[default]
    None,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// HTML comment with page number: "<!-- page N -->"
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string for the given page number (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}
