//! Pipeline Orchestrator: the job registry callers talk to.
//!
//! Each submitted job runs as its own tokio task. The registry keeps the
//! job record, a cancellation flag and a completion signal per job; the
//! task is the only writer of its job's record once it starts.

use crate::config::{ConversionConfig, MergeThresholds};
use crate::convert::{self, Collaborators};
use crate::error::Pdf2DocError;
use crate::export::OutputFormat;
use crate::job::{Job, JobId, JobReport, JobStatus};
use crate::pipeline::correct::CorrectionMode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct Entry {
    job: Job,
    cancel: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

type Registry = Arc<Mutex<HashMap<JobId, Entry>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<JobId, Entry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accepts conversion jobs and tracks them to a terminal state.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2doc::{
///     Collaborators, ConversionConfig, CorrectionMode, FsSink, MergeThresholds, Orchestrator,
///     OutputFormat, PdfiumPageSource, RuleBasedCorrector, SidecarDetector,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let collab = Collaborators {
///     pages: Arc::new(PdfiumPageSource),
///     detector: Arc::new(SidecarDetector::from_path("paper.detections.json".as_ref())?),
///     corrector: Arc::new(RuleBasedCorrector),
///     sink: Arc::new(FsSink::new("out")),
/// };
/// let orchestrator = Orchestrator::new(ConversionConfig::default(), collab);
/// let id = orchestrator.submit(
///     "paper.pdf",
///     vec![OutputFormat::Markdown, OutputFormat::Docx],
///     CorrectionMode::Light,
///     MergeThresholds::default(),
/// )?;
/// let report = orchestrator.wait(&id).await?;
/// println!("{:?}: {:?}", report.status, report.artifacts);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ConversionConfig>,
    collab: Collaborators,
    jobs: Registry,
}

impl Orchestrator {
    /// `config` is the template for every job; `submit` overrides its
    /// formats, correction mode and thresholds.
    pub fn new(config: ConversionConfig, collab: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            collab,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a job and start it on the tokio runtime.
    pub fn submit(
        &self,
        pdf_path: impl Into<String>,
        requested_formats: Vec<OutputFormat>,
        correction_mode: CorrectionMode,
        thresholds: MergeThresholds,
    ) -> Result<JobId, Pdf2DocError> {
        let mut formats = requested_formats;
        formats.sort();
        formats.dedup();
        if formats.is_empty() {
            return Err(Pdf2DocError::InvalidConfig(
                "At least one output format is required".into(),
            ));
        }

        let job = Job::new(pdf_path, formats.clone(), correction_mode);
        let id = job.id;
        let input = job.input_path.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = watch::channel(false);

        let mut config = (*self.config).clone();
        config.formats = formats;
        config.correction_mode = correction_mode;
        config.thresholds = thresholds;

        lock(&self.jobs).insert(
            id,
            Entry {
                job,
                cancel: Arc::clone(&cancel),
                done: done_rx,
            },
        );
        info!("Job {} submitted: {}", id, input);

        let jobs = Arc::clone(&self.jobs);
        let collab = self.collab.clone();
        tokio::spawn(async move {
            execute(id, input, config, collab, cancel, jobs).await;
            let _ = done_tx.send(true);
        });
        Ok(id)
    }

    /// Current snapshot of a job.
    pub fn get_status(&self, id: &JobId) -> Result<JobReport, Pdf2DocError> {
        lock(&self.jobs)
            .get(id)
            .map(|e| e.job.report())
            .ok_or_else(|| Pdf2DocError::JobNotFound(id.to_string()))
    }

    /// Bytes of one produced artifact.
    pub async fn get_artifact(
        &self,
        id: &JobId,
        format: OutputFormat,
    ) -> Result<Vec<u8>, Pdf2DocError> {
        let location = {
            let jobs = lock(&self.jobs);
            let entry = jobs
                .get(id)
                .ok_or_else(|| Pdf2DocError::JobNotFound(id.to_string()))?;
            entry.job.artifacts.get(&format).cloned()
        };
        let location = location.ok_or_else(|| Pdf2DocError::ArtifactNotFound {
            job: id.to_string(),
            format,
        })?;
        self.collab.sink.read(&location).await
    }

    /// Ask a job to stop. Work already in flight finishes but is discarded.
    pub fn cancel(&self, id: &JobId) -> Result<(), Pdf2DocError> {
        let jobs = lock(&self.jobs);
        let entry = jobs
            .get(id)
            .ok_or_else(|| Pdf2DocError::JobNotFound(id.to_string()))?;
        if !entry.job.status.is_terminal() {
            entry.cancel.store(true, Ordering::SeqCst);
            debug!("Job {} cancellation requested", id);
        }
        Ok(())
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, id: &JobId) -> Result<JobReport, Pdf2DocError> {
        let mut done = {
            let jobs = lock(&self.jobs);
            jobs.get(id)
                .map(|e| e.done.clone())
                .ok_or_else(|| Pdf2DocError::JobNotFound(id.to_string()))?
        };
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                // The task ended without signalling: it panicked.
                break;
            }
        }
        let report = self.get_status(id)?;
        if !report.status.is_terminal() {
            return Err(Pdf2DocError::Internal(format!(
                "job {id} stopped in state {}",
                report.status
            )));
        }
        Ok(report)
    }

    /// Forget a job and delete its persisted snapshot and artifacts.
    /// A job that is still running is cancelled and awaited first.
    pub async fn cleanup(&self, id: &JobId) -> Result<(), Pdf2DocError> {
        let running = !self.get_status(id)?.status.is_terminal();
        if running {
            self.cancel(id)?;
            self.wait(id).await?;
        }
        self.collab.sink.remove_all(id).await?;
        lock(&self.jobs).remove(id);
        info!("Job {} cleaned up", id);
        Ok(())
    }

    /// Ids of all known jobs, oldest first.
    pub fn jobs(&self) -> Vec<JobId> {
        let jobs = lock(&self.jobs);
        let mut all: Vec<(&JobId, &Entry)> = jobs.iter().collect();
        all.sort_by_key(|(_, e)| e.job.created_at);
        all.into_iter().map(|(id, _)| *id).collect()
    }
}

/// Drive one job from Pending to a terminal state.
async fn execute(
    id: JobId,
    input: String,
    config: ConversionConfig,
    collab: Collaborators,
    cancel: Arc<AtomicBool>,
    jobs: Registry,
) {
    let start = {
        let mut registry = lock(&jobs);
        let Some(entry) = registry.get_mut(&id) else {
            return;
        };
        if cancel.load(Ordering::SeqCst) {
            record(entry.job.fail(&Pdf2DocError::Cancelled), &id);
            false
        } else {
            record(entry.job.transition(JobStatus::Running), &id);
            true
        }
    };
    if !start {
        return;
    }

    // A panicking collaborator must still leave the job in a terminal state.
    let joined =
        tokio::spawn(async move { convert::run(&id, &input, &config, &collab, &cancel).await }).await;

    let mut registry = lock(&jobs);
    let Some(entry) = registry.get_mut(&id) else {
        return;
    };
    let job = &mut entry.job;
    let report = match joined {
        Ok(report) => report,
        Err(e) => {
            warn!("Job {}: pipeline task aborted: {}", id, e);
            record(
                job.fail(&Pdf2DocError::Internal(format!("pipeline task panicked: {e}"))),
                &id,
            );
            return;
        }
    };
    job.artifacts = report.artifacts;
    job.warnings = report.warnings;
    job.stats = report.stats;
    match report.outcome {
        Ok(()) => record(job.transition(JobStatus::Succeeded), &id),
        Err(e) => record(job.fail(&e), &id),
    }
}

fn record(result: Result<(), Pdf2DocError>, id: &JobId) {
    if let Err(e) = result {
        warn!("Job {}: {}", id, e);
    }
}
