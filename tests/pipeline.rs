//! Whole-pipeline tests that need neither pdfium nor an LLM.
//!
//! Pages come from an in-memory [`PageSource`]; detections come from a
//! sidecar JSON document, optionally wrapped so chosen pages fail.

use async_trait::async_trait;
use edgequake_pdf2doc::pipeline::render::{LoadedPdf, PageDimensions, PdfMetadata};
use edgequake_pdf2doc::{
    Collaborators, ConversionConfig, ConversionProgressCallback, CorrectionMode, DetectionError,
    Detector, FsSink, JobId, JobStatus, MergeThresholds, Orchestrator, OutputFormat, PageImage,
    PageSource, Pdf2DocError, RawDetection, RuleBasedCorrector, SidecarDetector, Warning,
};
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Blank pages with (or without) known pixel dimensions. Pages listed in
/// `unsized_pages` never know their dimensions.
struct BlankPages {
    count: usize,
    dimensions: Option<PageDimensions>,
    unsized_pages: Vec<usize>,
}

#[async_trait]
impl PageSource for BlankPages {
    async fn load(&self, input: &str, config: &ConversionConfig) -> Result<LoadedPdf, Pdf2DocError> {
        let pages = config
            .pages
            .to_indices(self.count)
            .into_iter()
            .map(|i| {
                let dimensions = if self.unsized_pages.contains(&i) {
                    None
                } else {
                    self.dimensions
                };
                PageImage::blank(i, dimensions)
            })
            .collect();
        Ok(LoadedPdf {
            source: PathBuf::from(input),
            metadata: PdfMetadata {
                title: Some("Circles".into()),
                author: Some("A. Author".into()),
                page_count: self.count,
            },
            pages,
        })
    }
}

/// Fails the listed 0-based pages and defers to `inner` for the rest.
struct FailPages {
    inner: SidecarDetector,
    failing: Vec<usize>,
}

#[async_trait]
impl Detector for FailPages {
    async fn detect(&self, page: &PageImage) -> Result<Vec<RawDetection>, DetectionError> {
        if self.failing.contains(&page.index) {
            return Err(DetectionError::Failed {
                page: page.index + 1,
                detail: "layout service unavailable".into(),
            });
        }
        self.inner.detect(page).await
    }
}

#[derive(Default)]
struct Counter {
    complete: AtomicUsize,
    errors: AtomicUsize,
}

impl ConversionProgressCallback for Counter {
    fn on_page_complete(&self, _page: usize, _total: usize, _regions: usize) {
        self.complete.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_error(&self, _page: usize, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// One paper page: heading, paragraph, display formula and a table.
fn paper_page(index: usize) -> serde_json::Value {
    json!({
        "page_index": index,
        "detections": [
            { "detector": "layout", "label": "paragraph_title", "bbox": [100, 80, 900, 130],
              "confidence": 0.95, "content": "1 Introduction" },
            { "detector": "ocr", "label": "text", "bbox": [100, 160, 900, 260],
              "confidence": 0.9, "content": "Points  on a circle satisfy ." },
            { "detector": "formula_rec", "label": "display_formula", "bbox": [300, 300, 700, 360],
              "confidence": 0.8, "content": "x^2+y^2=r^2" },
            { "detector": "layout", "label": "table", "bbox": [150, 420, 850, 600],
              "confidence": 0.9, "content": [["r", "area"], ["1", "3.14"]] }
        ]
    })
}

fn sidecar(pages: &[usize]) -> SidecarDetector {
    let doc = json!({ "pages": pages.iter().map(|&i| paper_page(i)).collect::<Vec<_>>() });
    SidecarDetector::from_json(&doc.to_string()).unwrap()
}

fn orchestrator(
    out: &std::path::Path,
    pages: BlankPages,
    detector: Arc<dyn Detector>,
    config: ConversionConfig,
) -> Orchestrator {
    let collab = Collaborators {
        pages: Arc::new(pages),
        detector,
        corrector: Arc::new(RuleBasedCorrector),
        sink: Arc::new(FsSink::new(out)),
    };
    Orchestrator::new(config, collab)
}

fn sized(count: usize) -> BlankPages {
    BlankPages {
        count,
        dimensions: PageDimensions::new(1000, 1000),
        unsized_pages: Vec::new(),
    }
}

async fn text_artifact(orch: &Orchestrator, id: &JobId, format: OutputFormat) -> String {
    String::from_utf8(orch.get_artifact(id, format).await.unwrap()).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn paper_exports_to_every_format() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        sized(1),
        Arc::new(sidecar(&[0])),
        ConversionConfig::default(),
    );
    let id = orch
        .submit("paper.pdf", OutputFormat::ALL.to_vec(), CorrectionMode::Light, MergeThresholds::default())
        .unwrap();
    let report = orch.wait(&id).await.unwrap();

    assert_eq!(report.status, JobStatus::Succeeded, "{:?}", report.error);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.artifacts.len(), 4);
    assert_eq!(report.stats.region_count, 4);

    let md = text_artifact(&orch, &id, OutputFormat::Markdown).await;
    assert!(md.contains("title: \"Circles\""), "{md}");
    assert!(md.contains("Introduction"), "{md}");
    assert!(md.contains("Points on a circle satisfy."), "{md}");
    assert!(md.contains("$$x^2+y^2=r^2$$"), "{md}");
    assert!(md.contains("| r | area |"), "{md}");

    let tex = text_artifact(&orch, &id, OutputFormat::Latex).await;
    assert!(tex.starts_with("\\documentclass"), "{tex}");
    assert!(tex.contains("\\begin{equation}"), "{tex}");
    assert!(tex.contains("x^2+y^2=r^2"), "{tex}");
    assert!(tex.contains("\\end{document}"), "{tex}");

    let html = text_artifact(&orch, &id, OutputFormat::Html).await;
    assert!(html.contains("<script type=\"math/tex; mode=display\">"), "{html}");
    assert!(html.contains("<td>3.14</td>"), "{html}");

    let docx = orch.get_artifact(&id, OutputFormat::Docx).await.unwrap();
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(docx)).unwrap();
    let mut body = String::new();
    zip.by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert!(body.contains("<m:oMathPara>"), "{body}");
    assert!(body.contains("<w:tbl>"), "{body}");
    assert!(!body.contains("[LaTeX]"), "{body}");
}

#[tokio::test]
async fn failed_page_is_omitted_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let config = ConversionConfig::builder()
        .progress_callback(counter.clone() as Arc<dyn ConversionProgressCallback>)
        .build()
        .unwrap();
    let detector = FailPages {
        inner: sidecar(&[0, 1]),
        failing: vec![1],
    };
    let orch = orchestrator(dir.path(), sized(2), Arc::new(detector), config);
    let id = orch
        .submit("paper.pdf", vec![OutputFormat::Markdown], CorrectionMode::Off, MergeThresholds::default())
        .unwrap();
    let report = orch.wait(&id).await.unwrap();

    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(report.stats.processed_pages, 1);
    assert_eq!(report.stats.degraded_pages, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(matches!(report.warnings[0], Warning::Detection { .. }), "{:?}", report.warnings);
    assert_eq!(counter.complete.load(Ordering::SeqCst), 1);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);

    let md = text_artifact(&orch, &id, OutputFormat::Markdown).await;
    assert!(md.contains("<!-- page 2 omitted:"), "{md}");
    assert_eq!(md.matches("$$x^2+y^2=r^2$$").count(), 1);
}

#[tokio::test]
async fn page_failing_normalization_is_omitted_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let counter = Arc::new(Counter::default());
    let config = ConversionConfig::builder()
        .progress_callback(counter.clone() as Arc<dyn ConversionProgressCallback>)
        .build()
        .unwrap();
    let pages = BlankPages {
        unsized_pages: vec![1],
        ..sized(2)
    };
    let orch = orchestrator(dir.path(), pages, Arc::new(sidecar(&[0, 1])), config);
    let id = orch
        .submit("paper.pdf", vec![OutputFormat::Markdown], CorrectionMode::Off, MergeThresholds::default())
        .unwrap();
    let report = orch.wait(&id).await.unwrap();

    assert_eq!(report.status, JobStatus::Succeeded, "{:?}", report.error);
    assert_eq!(report.stats.processed_pages, 1);
    assert_eq!(report.stats.degraded_pages, 1);
    assert_eq!(report.warnings.len(), 1);
    match &report.warnings[0] {
        Warning::Normalization { page, detail } => {
            assert_eq!(*page, 2);
            assert!(detail.contains("page dimensions are unknown"), "{detail}");
        }
        other => panic!("expected a normalization warning, got {other:?}"),
    }
    assert_eq!(counter.complete.load(Ordering::SeqCst), 1);
    assert_eq!(counter.errors.load(Ordering::SeqCst), 1);

    let md = text_artifact(&orch, &id, OutputFormat::Markdown).await;
    assert!(md.contains("<!-- page 2 omitted:"), "{md}");
    assert_eq!(md.matches("$$x^2+y^2=r^2$$").count(), 1);
}

#[tokio::test]
async fn single_page_without_dimensions_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let pages = BlankPages {
        count: 1,
        dimensions: None,
        unsized_pages: Vec::new(),
    };
    let orch = orchestrator(
        dir.path(),
        pages,
        Arc::new(sidecar(&[0])),
        ConversionConfig::default(),
    );
    let id = orch
        .submit("paper.pdf", vec![OutputFormat::Docx], CorrectionMode::Off, MergeThresholds::default())
        .unwrap();
    let report = orch.wait(&id).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    let error = report.error.unwrap();
    assert!(error.contains("All 1 pages failed"), "{error}");
    assert!(error.contains("page dimensions are unknown"), "{error}");
    assert!(report.artifacts.is_empty());
    assert!(matches!(
        orch.get_artifact(&id, OutputFormat::Docx).await,
        Err(Pdf2DocError::ArtifactNotFound { .. })
    ));
}

#[tokio::test]
async fn low_score_formula_is_filtered_by_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        sized(1),
        Arc::new(sidecar(&[0])),
        ConversionConfig::default(),
    );
    let strict = MergeThresholds {
        min_score: 0.85,
        ..Default::default()
    };
    let id = orch
        .submit("paper.pdf", vec![OutputFormat::Markdown], CorrectionMode::Off, strict)
        .unwrap();
    let report = orch.wait(&id).await.unwrap();
    assert_eq!(report.status, JobStatus::Succeeded);

    let md = text_artifact(&orch, &id, OutputFormat::Markdown).await;
    assert!(!md.contains("x^2"), "{md}");
    assert!(md.contains("Introduction"), "{md}");
}

#[tokio::test]
async fn page_selection_limits_the_work() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConversionConfig::builder()
        .pages(edgequake_pdf2doc::PageSelection::Single(2))
        .build()
        .unwrap();
    let orch = orchestrator(dir.path(), sized(3), Arc::new(sidecar(&[0, 1, 2])), config);
    let id = orch
        .submit("paper.pdf", vec![OutputFormat::Html], CorrectionMode::Off, MergeThresholds::default())
        .unwrap();
    let report = orch.wait(&id).await.unwrap();

    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(report.stats.total_pages, 3);
    assert_eq!(report.stats.selected_pages, 1);
    let html = text_artifact(&orch, &id, OutputFormat::Html).await;
    assert_eq!(html.matches("<section class=\"page\"").count(), 1, "{html}");
}

#[tokio::test]
async fn unknown_job_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(
        dir.path(),
        sized(1),
        Arc::new(sidecar(&[0])),
        ConversionConfig::default(),
    );
    let stranger = JobId::new();
    assert!(matches!(orch.get_status(&stranger), Err(Pdf2DocError::JobNotFound(_))));
    assert!(matches!(orch.cancel(&stranger), Err(Pdf2DocError::JobNotFound(_))));

    let id = orch
        .submit("paper.pdf", vec![OutputFormat::Latex], CorrectionMode::Off, MergeThresholds::default())
        .unwrap();
    let report = orch.wait(&id).await.unwrap();
    let tex = report.artifacts[&OutputFormat::Latex].clone();
    assert!(tex.exists());

    orch.cleanup(&id).await.unwrap();
    assert!(!tex.exists());
    assert!(orch.jobs().is_empty());
}
