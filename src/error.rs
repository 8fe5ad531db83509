//! Error types for the edgequake-pdf2doc library.
//!
//! Errors are split by the scope they can damage:
//!
//! * [`Pdf2DocError`] — **Fatal**: the job cannot produce a document at all
//!   (bad input file, unreadable PDF, merge failure, every page failed).
//!   Returned as `Err(Pdf2DocError)` from library entry points and stored as
//!   the terminal error of a failed [`crate::job::Job`].
//!
//! * Stage errors — [`NormalizationError`] (one page), [`DetectionError`]
//!   (one page), [`CorrectionError`] (one region or batch) and
//!   [`SerializationError`] (one output format). These never abort sibling
//!   work; the pipeline converts them into [`Warning`]s.
//!
//! * [`MergeError`] — the only stage error that is document-fatal. It is
//!   wrapped into [`Pdf2DocError::Merge`].
//!
//! * [`Warning`] — the serialisable record accumulated on a job so callers
//!   always get diagnostics alongside partial results.

use crate::export::OutputFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2doc library.
#[derive(Debug, Error)]
pub enum Pdf2DocError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Install libpdfium and make it discoverable (e.g. next to the binary or on the\n\
system library path)."
    )]
    PdfiumBindingFailed(String),

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Merge & Filter could not produce a document.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Every selected page failed detection or normalization.
    #[error("All {total} pages failed normalization.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// A requested output format produced nothing.
    #[error("{failed} of {requested} requested formats could not be exported: {formats}")]
    ExportIncomplete {
        failed: usize,
        requested: usize,
        formats: String,
    },

    /// The job was cancelled before it finished.
    #[error("Job cancelled")]
    Cancelled,

    // ── Job errors ────────────────────────────────────────────────────────
    /// No job with this id is known to the orchestrator.
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    /// The job exists but produced no artifact for this format.
    #[error("No {format} artifact for job '{job}'")]
    ArtifactNotFound { job: String, format: OutputFormat },

    /// A job status transition that would break monotonicity.
    #[error("Invalid job transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Page-local failure while turning raw detections into regions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizationError {
    /// A detection arrived without any bounding box.
    #[error("page {page}: detection #{index} from '{detector}' has no bounding box")]
    MissingBBox {
        page: usize,
        index: usize,
        detector: String,
    },

    /// Neither the detection nor the page image carried pixel dimensions.
    #[error("page {page}: page dimensions are unknown")]
    UnknownPageDimensions { page: usize },

    /// The detector name does not map to a known source.
    #[error("page {page}: unknown detector '{name}'")]
    UnknownDetector { page: usize, name: String },

    /// The content payload could not be interpreted for its label.
    #[error("page {page}: detection #{index} ({label}) has unusable content: {detail}")]
    InvalidContent {
        page: usize,
        index: usize,
        label: String,
        detail: String,
    },
}

/// Failure of the external detection source for one page.
#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    /// The detector returned an error.
    #[error("page {page}: detection failed: {detail}")]
    Failed { page: usize, detail: String },

    /// The detector did not answer in time.
    #[error("page {page}: detection timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

/// Document-fatal failure of Merge & Filter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MergeError {
    /// No page survived to be merged.
    #[error("no pages to merge")]
    NoPages,

    /// A threshold is NaN or outside its valid range.
    #[error("invalid merge threshold {name} = {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    /// A region was filed under a page it does not belong to.
    #[error("region '{region}' claims page {found} but was supplied for page {expected}")]
    PageMismatch {
        region: String,
        expected: usize,
        found: usize,
    },
}

/// Failure of the external correction function.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CorrectionError {
    /// The correction function reported an error.
    #[error("correction failed: {0}")]
    Failed(String),

    /// The correction call did not answer in time.
    #[error("correction timed out after {secs}s")]
    Timeout { secs: u64 },

    /// A batch call answered with the wrong number of texts.
    #[error("correction batch returned {got} texts for {expected} inputs")]
    BatchMismatch { expected: usize, got: usize },

    /// The correction function returned nothing for non-empty input.
    #[error("correction returned empty text")]
    EmptyOutput,
}

/// Failure of one output format.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Writing the in-memory output failed.
    #[error("{format}: write failed: {source}")]
    Io {
        format: OutputFormat,
        #[source]
        source: std::io::Error,
    },

    /// Building the DOCX zip package failed.
    #[error("{format}: packaging failed: {detail}")]
    Package { format: OutputFormat, detail: String },
}

/// A non-fatal diagnostic accumulated on a job.
///
/// Warnings never change a job's outcome on their own; they exist so a
/// caller that receives a partial result also receives the reason.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A page was marked degraded by the normalizer.
    #[error("Page {page}: normalization failed: {detail}")]
    Normalization { page: usize, detail: String },

    /// The detection source failed for a page.
    #[error("Page {page}: detection failed: {detail}")]
    Detection { page: usize, detail: String },

    /// An external call for a page timed out.
    #[error("Page {page}: {stage} timed out after {secs}s")]
    Timeout {
        page: usize,
        stage: String,
        secs: u64,
    },

    /// A text region kept its original content.
    #[error("Page {page}: correction of region '{region}' skipped: {detail}")]
    Correction {
        page: usize,
        region: String,
        detail: String,
    },

    /// An output format could not be produced.
    #[error("{format}: export failed: {detail}")]
    Serialization { format: OutputFormat, detail: String },

    /// An output format was produced with a placeholder somewhere.
    #[error("{format}: {detail}")]
    Degraded { format: OutputFormat, detail: String },

    /// A table sub-cell had no surviving parent table.
    #[error("Page {page}: dropped orphan table cell '{region}'")]
    OrphanCell { page: usize, region: String },

    /// The document snapshot or an attachment could not be persisted.
    #[error("persistence failed: {detail}")]
    Persistence { detail: String },
}

impl Warning {
    /// Page (1-indexed) the warning refers to, when it is page-scoped.
    pub fn page(&self) -> Option<usize> {
        match self {
            Warning::Normalization { page, .. }
            | Warning::Detection { page, .. }
            | Warning::Timeout { page, .. }
            | Warning::Correction { page, .. }
            | Warning::OrphanCell { page, .. } => Some(*page),
            _ => None,
        }
    }
}

impl From<&NormalizationError> for Warning {
    fn from(e: &NormalizationError) -> Self {
        let page = match e {
            NormalizationError::MissingBBox { page, .. }
            | NormalizationError::UnknownPageDimensions { page }
            | NormalizationError::UnknownDetector { page, .. }
            | NormalizationError::InvalidContent { page, .. } => *page,
        };
        Warning::Normalization {
            page,
            detail: e.to_string(),
        }
    }
}

impl From<&DetectionError> for Warning {
    fn from(e: &DetectionError) -> Self {
        match e {
            DetectionError::Failed { page, detail } => Warning::Detection {
                page: *page,
                detail: detail.clone(),
            },
            DetectionError::Timeout { page, secs } => Warning::Timeout {
                page: *page,
                stage: "detection".into(),
                secs: *secs,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pages_failed_display() {
        let e = Pdf2DocError::AllPagesFailed {
            total: 1,
            first_error: "page 1: page dimensions are unknown".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 1 pages"), "got: {msg}");
        assert!(msg.contains("dimensions are unknown"), "got: {msg}");
    }

    #[test]
    fn merge_error_is_transparent() {
        let e: Pdf2DocError = MergeError::NoPages.into();
        assert_eq!(e.to_string(), "no pages to merge");
    }

    #[test]
    fn normalization_error_becomes_page_warning() {
        let e = NormalizationError::UnknownPageDimensions { page: 2 };
        let w = Warning::from(&e);
        assert_eq!(w.page(), Some(2));
        assert!(w.to_string().contains("normalization failed"));
    }

    #[test]
    fn detection_timeout_becomes_timeout_warning() {
        let e = DetectionError::Timeout { page: 4, secs: 30 };
        let w = Warning::from(&e);
        assert!(matches!(w, Warning::Timeout { page: 4, secs: 30, .. }));
        assert!(w.to_string().contains("detection timed out after 30s"));
    }

    #[test]
    fn warning_serialises_with_kind_tag() {
        let w = Warning::OrphanCell {
            page: 1,
            region: "c7".into(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"kind\":\"orphan_cell\""), "got: {json}");
        let back: Warning = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn artifact_not_found_mentions_format() {
        let e = Pdf2DocError::ArtifactNotFound {
            job: "abc".into(),
            format: OutputFormat::Latex,
        };
        assert!(e.to_string().contains("latex"), "got: {e}");
    }
}
