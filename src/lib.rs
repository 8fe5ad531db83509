//! # edgequake-pdf2doc
//!
//! Rebuild editable documents (Markdown, LaTeX, DOCX, HTML) from PDF
//! scientific papers.
//!
//! ## Why this crate?
//!
//! Text extraction loses what makes a paper a paper: formulas come out as
//! glyph soup, tables lose their grid, figures disappear and multi-column
//! pages are read in the wrong order. This crate rasterises each page, asks
//! one or more detection sources (a layout model, OCR, a formula recogniser,
//! a vision-language model, or a sidecar JSON file) what regions the page
//! holds, reconciles their answers into one typed Region Model and writes
//! that model out in every requested format.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render     rasterise selected pages via pdfium (spawn_blocking)
//!  ├─ 2. Detect     per-page, concurrent; failures degrade the page only
//!  ├─ 3. Normalize  detector-native boxes/scores → Region Model
//!  ├─ 4. Merge      filter, resolve overlaps, assemble tables, order
//!  ├─ 5. Correct    optional, Text regions only, batched
//!  └─ 6. Export     Markdown / LaTeX / DOCX / HTML, in parallel
//! ```
//!
//! Jobs are driven by the [`Orchestrator`]; every job ends `Succeeded` or
//! `Failed` with its warnings, stats and artifact locations attached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2doc::{
//!     Collaborators, ConversionConfig, CorrectionMode, FsSink, MergeThresholds, Orchestrator,
//!     OutputFormat, PdfiumPageSource, RuleBasedCorrector, SidecarDetector,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let collab = Collaborators {
//!         pages: Arc::new(PdfiumPageSource),
//!         detector: Arc::new(SidecarDetector::from_path("paper.detections.json".as_ref())?),
//!         corrector: Arc::new(RuleBasedCorrector),
//!         sink: Arc::new(FsSink::new("out")),
//!     };
//!     let orchestrator = Orchestrator::new(ConversionConfig::default(), collab);
//!     let id = orchestrator.submit(
//!         "paper.pdf",
//!         vec![OutputFormat::Latex, OutputFormat::Docx],
//!         CorrectionMode::Light,
//!         MergeThresholds::default(),
//!     )?;
//!     let report = orchestrator.wait(&id).await?;
//!     let tex = orchestrator.get_artifact(&id, OutputFormat::Latex).await?;
//!     eprintln!("{}: {} bytes of LaTeX, {} warnings",
//!         report.status, tex.len(), report.warnings.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2doc` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2doc = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod export;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod sink;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConfidenceScale, ConfidenceScales, ConversionConfig, ConversionConfigBuilder, MergeThresholds,
    PageSelection, PageSeparator,
};
pub use convert::{Collaborators, RunReport};
pub use error::{
    CorrectionError, DetectionError, MergeError, NormalizationError, Pdf2DocError,
    SerializationError, Warning,
};
pub use export::{ExportOptions, OutputFormat};
pub use job::{Job, JobId, JobReport, JobStats, JobStatus};
pub use model::{
    BBox, Document, DocumentMetadata, FormulaDisplay, ImageRef, Page, Region, RegionContent,
    RegionKind, Script, SourceDetector, TableGrid, TextRole,
};
pub use orchestrator::Orchestrator;
pub use pipeline::correct::{BatchAnswers, CorrectionMode, Corrector, RuleBasedCorrector};
pub use pipeline::detect::{Detector, MultiDetector, RawDetection, SidecarDetector};
pub use pipeline::llm::{resolve_provider, LlmCorrector, VlmDetector};
pub use pipeline::render::{PageImage, PageSource, PdfiumPageSource};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use sink::{ArtifactSink, FsSink};
