//! One pipeline run: load → detect + normalize → merge → correct → export.
//!
//! [`run`] never returns early without a report. Whatever was produced
//! before a failure (warnings, stats, the artifacts of formats that did
//! export) is handed back next to the terminal error, so the orchestrator
//! can record partial results on the job.

use crate::config::ConversionConfig;
use crate::error::{DetectionError, Pdf2DocError, Warning};
use crate::export::{self, OutputFormat, Rendered};
use crate::job::{JobId, JobStats};
use crate::model::Document;
use crate::pipeline::correct::{self, CorrectionOptions, Corrector};
use crate::pipeline::detect::Detector;
use crate::pipeline::merge::{self, PageRegions};
use crate::pipeline::normalize::normalize;
use crate::pipeline::render::{PageImage, PageSource};
use crate::sink::ArtifactSink;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// The external collaborators a run needs, passed in as trait objects.
#[derive(Clone)]
pub struct Collaborators {
    pub pages: Arc<dyn PageSource>,
    pub detector: Arc<dyn Detector>,
    pub corrector: Arc<dyn Corrector>,
    pub sink: Arc<dyn ArtifactSink>,
}

/// Everything a run produced, successful or not.
#[derive(Debug)]
pub struct RunReport {
    pub document: Option<Arc<Document>>,
    pub artifacts: BTreeMap<OutputFormat, PathBuf>,
    pub warnings: Vec<Warning>,
    pub stats: JobStats,
    pub outcome: Result<(), Pdf2DocError>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            document: None,
            artifacts: BTreeMap::new(),
            warnings: Vec::new(),
            stats: JobStats::default(),
            outcome: Ok(()),
        }
    }
}

/// Name of the persisted document snapshot inside a job's directory.
pub const SNAPSHOT_NAME: &str = "document.json";

/// Run the full pipeline for `input` and persist the results under `job`.
pub async fn run(
    job: &JobId,
    input: &str,
    config: &ConversionConfig,
    collab: &Collaborators,
    cancel: &AtomicBool,
) -> RunReport {
    let start = Instant::now();
    let mut report = RunReport::default();
    let outcome = run_inner(job, input, config, collab, cancel, &mut report).await;
    report.outcome = outcome;
    report.stats.total_duration_ms = start.elapsed().as_millis() as u64;

    match &report.outcome {
        Ok(()) => info!(
            "Job {}: {} formats exported, {} warnings, {}ms",
            job,
            report.artifacts.len(),
            report.warnings.len(),
            report.stats.total_duration_ms
        ),
        Err(e) => warn!("Job {} failed: {}", job, e),
    }
    report
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), Pdf2DocError> {
    if cancel.load(Ordering::SeqCst) {
        Err(Pdf2DocError::Cancelled)
    } else {
        Ok(())
    }
}

async fn run_inner(
    job: &JobId,
    input: &str,
    config: &ConversionConfig,
    collab: &Collaborators,
    cancel: &AtomicBool,
    report: &mut RunReport,
) -> Result<(), Pdf2DocError> {
    check_cancel(cancel)?;
    if config.formats.is_empty() {
        return Err(Pdf2DocError::InvalidConfig(
            "At least one output format is required".into(),
        ));
    }

    // ── Step 1: Load and rasterise ───────────────────────────────────────
    info!("Job {}: loading {}", job, input);
    let loaded = collab.pages.load(input, config).await?;
    let selected = loaded.pages.len();
    report.stats.total_pages = loaded.metadata.page_count;
    report.stats.selected_pages = selected;
    if selected == 0 {
        return Err(Pdf2DocError::PageOutOfRange {
            page: 0,
            total: loaded.metadata.page_count,
        });
    }
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(selected);
    }

    // ── Step 2: Detect + normalize, pages concurrently ───────────────────
    check_cancel(cancel)?;
    let detect_start = Instant::now();
    let pages = detect_pages(loaded.pages, config, collab, cancel).await;
    report.stats.detect_duration_ms = detect_start.elapsed().as_millis() as u64;
    check_cancel(cancel)?;

    let mut page_regions = Vec::with_capacity(pages.len());
    for (regions, warning) in pages {
        report.warnings.extend(warning);
        page_regions.push(regions);
    }
    page_regions.sort_by_key(|p| p.page_index);

    let healthy = page_regions.iter().filter(|p| p.degraded.is_none()).count();
    report.stats.processed_pages = healthy;
    report.stats.degraded_pages = selected - healthy;
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(selected, healthy);
    }
    if healthy == 0 {
        let first_error = page_regions
            .iter()
            .find_map(|p| p.degraded.clone())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(Pdf2DocError::AllPagesFailed {
            total: selected,
            first_error,
        });
    }

    // ── Step 3: Merge & Filter ───────────────────────────────────────────
    let merged = merge::reconcile(page_regions, &config.thresholds)?;
    report.warnings.extend(merged.warnings);
    let mut document = merged.document;
    document.derive_metadata(loaded.metadata.title.as_deref());
    document.metadata.author = loaded.metadata.author.clone();
    document.metadata.source = Some(loaded.source.clone());
    report.stats.region_count = document.region_count();

    // ── Step 4: Correction (Text regions only) ───────────────────────────
    check_cancel(cancel)?;
    let correction_start = Instant::now();
    let options = CorrectionOptions {
        batch_size: config.correction_batch_size,
        concurrency: config.concurrency,
        timeout_secs: config.correction_timeout_secs,
    };
    let correction_warnings = correct::correct(
        &mut document,
        &collab.corrector,
        config.correction_mode,
        &options,
        cancel,
    )
    .await;
    report.warnings.extend(correction_warnings);
    report.stats.correction_duration_ms = correction_start.elapsed().as_millis() as u64;
    check_cancel(cancel)?;

    // ── Step 5: Snapshot ─────────────────────────────────────────────────
    let document = Arc::new(document);
    report.document = Some(Arc::clone(&document));
    match serde_json::to_vec_pretty(document.as_ref()) {
        Ok(json) => {
            if let Err(e) = collab.sink.write(job, SNAPSHOT_NAME, &json).await {
                report.warnings.push(Warning::Persistence {
                    detail: e.to_string(),
                });
            }
        }
        Err(e) => report.warnings.push(Warning::Persistence {
            detail: e.to_string(),
        }),
    }

    // ── Step 6: Export every format in parallel ──────────────────────────
    let export_start = Instant::now();
    let failed = export_formats(job, &document, config, collab, cancel, report).await?;
    report.stats.export_duration_ms = export_start.elapsed().as_millis() as u64;

    if !failed.is_empty() {
        let names: Vec<String> = failed.iter().map(|f| f.to_string()).collect();
        return Err(Pdf2DocError::ExportIncomplete {
            failed: failed.len(),
            requested: config.formats.len(),
            formats: names.join(", "),
        });
    }
    Ok(())
}

/// Detect and normalize every page. A failed page comes back degraded,
/// together with the warning explaining why.
async fn detect_pages(
    pages: Vec<PageImage>,
    config: &ConversionConfig,
    collab: &Collaborators,
    cancel: &AtomicBool,
) -> Vec<(PageRegions, Option<Warning>)> {
    let total = pages.len();
    let timeout = Duration::from_secs(config.detect_timeout_secs);

    stream::iter(pages)
        .map(|page| async move {
            let page_no = page.index + 1;
            if cancel.load(Ordering::SeqCst) {
                return (PageRegions::degraded(page.index, "cancelled"), None);
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(page_no, total);
            }

            let detected = match tokio::time::timeout(timeout, collab.detector.detect(&page)).await {
                Ok(res) => res,
                Err(_) => Err(DetectionError::Timeout {
                    page: page_no,
                    secs: config.detect_timeout_secs,
                }),
            };
            let outcome = match detected {
                Ok(raw) => normalize(&raw, &page, &config.confidence_scales)
                    .map_err(|e| (e.to_string(), Warning::from(&e))),
                Err(e) => Err((e.to_string(), Warning::from(&e))),
            };

            match outcome {
                Ok(regions) => {
                    debug!("Page {}: {} regions normalized", page_no, regions.len());
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_complete(page_no, total, regions.len());
                    }
                    (PageRegions::new(page.index, regions), None)
                }
                Err((reason, warning)) => {
                    warn!("Page {} degraded: {}", page_no, reason);
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_error(page_no, total, &reason);
                    }
                    (PageRegions::degraded(page.index, reason), Some(warning))
                }
            }
        })
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await
}

/// Render each requested format on a blocking thread and persist it.
/// Returns the formats that produced no artifact.
async fn export_formats(
    job: &JobId,
    document: &Arc<Document>,
    config: &ConversionConfig,
    collab: &Collaborators,
    cancel: &AtomicBool,
    report: &mut RunReport,
) -> Result<Vec<OutputFormat>, Pdf2DocError> {
    let mut tasks = Vec::with_capacity(config.formats.len());
    for &format in &config.formats {
        check_cancel(cancel)?;
        let document = Arc::clone(document);
        let options = config.export.clone();
        tasks.push(async move {
            let rendered =
                tokio::task::spawn_blocking(move || export::render(format, &document, &options))
                    .await;
            (format, rendered)
        });
    }
    let results = join_all(tasks).await;
    check_cancel(cancel)?;

    let mut failed = Vec::new();
    for (format, rendered) in results {
        let rendered = match rendered {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                report.warnings.push(Warning::Serialization {
                    format,
                    detail: e.to_string(),
                });
                failed.push(format);
                continue;
            }
            Err(join) => {
                report.warnings.push(Warning::Serialization {
                    format,
                    detail: format!("renderer panicked: {join}"),
                });
                failed.push(format);
                continue;
            }
        };

        report.warnings.extend(rendered.degradations.iter().map(|d| Warning::Degraded {
            format,
            detail: d.clone(),
        }));
        match persist(job, format, rendered, collab.sink.as_ref()).await {
            Ok(path) => {
                report.artifacts.insert(format, path);
            }
            Err(e) => {
                report.warnings.push(Warning::Serialization {
                    format,
                    detail: e.to_string(),
                });
                failed.push(format);
            }
        }
    }
    Ok(failed)
}

async fn persist(
    job: &JobId,
    format: OutputFormat,
    rendered: Rendered,
    sink: &dyn ArtifactSink,
) -> Result<PathBuf, Pdf2DocError> {
    for attachment in &rendered.attachments {
        sink.write(job, &attachment.path, &attachment.bytes).await?;
    }
    let name = format!("document.{}", format.extension());
    let path = sink.write(job, &name, &rendered.bytes).await?;
    debug!("{}: {} bytes, {} attachments", format, rendered.bytes.len(), rendered.attachments.len());
    Ok(path)
}
