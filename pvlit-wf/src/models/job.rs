//! Processing job model
//!
//! One job tracks one ingestion run: counts per terminal outcome, a durable
//! failure list for the background-retry mechanism, and a progress figure the
//! HTTP layer can poll while the pipeline runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ingestion job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Outcome counts for an ingestion job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Raw records accepted into the job
    pub found: usize,
    /// Records that got a classification result back from an endpoint
    pub classified: usize,
    /// Case records created
    pub created: usize,
    /// Records skipped because the external id already exists in the org
    pub duplicates: usize,
    /// Records that exhausted their attempt budget
    pub failed: usize,
}

impl JobMetadata {
    /// Items that reached a terminal outcome so far
    pub fn resolved(&self) -> usize {
        self.created + self.duplicates + self.failed
    }
}

/// A durable per-item failure, surfaced for background retry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub external_id: String,
    pub attempts: u32,
    pub error: String,
}

/// Tracks one ingestion run end to end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: Uuid,
    pub organization_id: Uuid,
    pub status: JobStatus,
    /// Percentage complete (0.0 - 100.0)
    pub progress: f64,
    pub metadata: JobMetadata,
    pub failures: Vec<ItemFailure>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    /// Create a new job covering `found` raw records
    pub fn new(organization_id: Uuid, found: usize) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            organization_id,
            status: JobStatus::Processing,
            progress: 0.0,
            metadata: JobMetadata {
                found,
                ..JobMetadata::default()
            },
            failures: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Recompute progress from resolved counts
    pub fn update_progress(&mut self) {
        self.progress = if self.metadata.found > 0 {
            (self.metadata.resolved() as f64 / self.metadata.found as f64) * 100.0
        } else {
            100.0
        };
    }

    /// Fraction of attempted items that ended as created cases
    ///
    /// Duplicates are excluded: they were never attempted against an endpoint.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.metadata.created + self.metadata.failed;
        if attempted == 0 {
            1.0
        } else {
            self.metadata.created as f64 / attempted as f64
        }
    }

    /// Mark the job finished; partial failure still completes
    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.ended_at = Some(Utc::now());
    }

    /// Mark the job aborted (cancellation or store outage)
    pub fn fail(&mut self) {
        self.status = JobStatus::Failed;
        self.ended_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}
