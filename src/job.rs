//! Conversion jobs: identity, lifecycle and the report handed to callers.
//!
//! ```text
//! Pending ──▶ Running ──▶ Succeeded
//!    │           │
//!    └───────────┴──────▶ Failed
//! ```
//!
//! Transitions only move forward; anything else is rejected with
//! [`Pdf2DocError::InvalidTransition`].

use crate::error::{Pdf2DocError, Warning};
use crate::export::OutputFormat;
use crate::pipeline::correct::CorrectionMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, immutable job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Pdf2DocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(JobId)
            .map_err(|_| Pdf2DocError::JobNotFound(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Succeeded) | (Running, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counters and timings collected while a job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Pages in the source PDF.
    pub total_pages: usize,
    /// Pages selected for conversion.
    pub selected_pages: usize,
    /// Selected pages that were detected, normalized and merged.
    pub processed_pages: usize,
    /// Selected pages omitted from the output.
    pub degraded_pages: usize,
    /// Regions in the finalized document.
    pub region_count: usize,
    pub detect_duration_ms: u64,
    pub correction_duration_ms: u64,
    pub export_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// One conversion request and everything known about its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input_path: String,
    pub status: JobStatus,
    pub requested_formats: Vec<OutputFormat>,
    pub correction_mode: CorrectionMode,
    pub artifacts: BTreeMap<OutputFormat, PathBuf>,
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: JobStats,
}

impl Job {
    pub fn new(
        input_path: impl Into<String>,
        requested_formats: Vec<OutputFormat>,
        correction_mode: CorrectionMode,
    ) -> Self {
        Self {
            id: JobId::new(),
            input_path: input_path.into(),
            status: JobStatus::Pending,
            requested_formats,
            correction_mode,
            artifacts: BTreeMap::new(),
            warnings: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stats: JobStats::default(),
        }
    }

    /// Move to `next`, stamping start and finish times.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), Pdf2DocError> {
        if !self.status.can_transition_to(next) {
            return Err(Pdf2DocError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Move to `Failed` and record why.
    pub fn fail(&mut self, error: &Pdf2DocError) -> Result<(), Pdf2DocError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.to_string());
        Ok(())
    }

    pub fn report(&self) -> JobReport {
        JobReport {
            id: self.id,
            status: self.status,
            error: self.error.clone(),
            warnings: self.warnings.clone(),
            artifacts: self.artifacts.clone(),
            stats: self.stats.clone(),
        }
    }
}

/// Snapshot of a job returned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
    pub warnings: Vec<Warning>,
    pub artifacts: BTreeMap<OutputFormat, PathBuf>,
    pub stats: JobStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("paper.pdf", vec![OutputFormat::Markdown], CorrectionMode::Off)
    }

    #[test]
    fn happy_path_is_monotonic() {
        let mut j = job();
        j.transition(JobStatus::Running).unwrap();
        assert!(j.started_at.is_some());
        j.transition(JobStatus::Succeeded).unwrap();
        assert!(j.finished_at.is_some());

        let err = j.transition(JobStatus::Running).unwrap_err();
        assert!(
            matches!(err, Pdf2DocError::InvalidTransition { ref from, ref to } if from == "succeeded" && to == "running")
        );
    }

    #[test]
    fn pending_can_fail_directly() {
        let mut j = job();
        j.fail(&Pdf2DocError::Cancelled).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.error.as_deref(), Some("Job cancelled"));
        assert!(j.started_at.is_none());
    }

    #[test]
    fn pending_cannot_jump_to_succeeded() {
        let mut j = job();
        assert!(j.transition(JobStatus::Succeeded).is_err());
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.fail(&Pdf2DocError::Cancelled).is_ok());
        assert!(j.fail(&Pdf2DocError::Cancelled).is_err());
    }

    #[test]
    fn job_ids_are_unique_and_parse_back() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<JobId>().unwrap(), a);
        assert!("nope".parse::<JobId>().is_err());
    }

    #[test]
    fn report_serialises() {
        let mut j = job();
        j.artifacts
            .insert(OutputFormat::Markdown, PathBuf::from("out/document.md"));
        let json = serde_json::to_string(&j.report()).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"markdown\":\"out/document.md\""));
    }
}
