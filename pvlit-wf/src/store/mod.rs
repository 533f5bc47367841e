//! Record store adapter
//!
//! The core never assumes multi-document transactions: every mutation of
//! shared fields is a conditional write keyed on the document's version
//! token, and losing the precondition is an expected outcome reported as a
//! tagged result, not an error.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use pvlit_common::Result;
use uuid::Uuid;

use crate::models::{CaseRecord, OrgSettings, ProcessingJob, Track, WorkflowStage};
use crate::workflow::TransitionFields;

/// Outcome of a conditional write.
///
/// `PreconditionFailed` is a normal branch (a lost allocation race, a stale
/// routing token, a concurrent duplicate create); store errors are reserved
/// for actual store failures.
#[derive(Debug, Clone)]
pub enum WriteOutcome<T> {
    Applied(T),
    PreconditionFailed,
}

impl<T> WriteOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            WriteOutcome::Applied(value) => Some(value),
            WriteOutcome::PreconditionFailed => None,
        }
    }
}

/// Optional track/stage filters for assignment queries
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentScope {
    pub track: Option<Track>,
    pub stage: Option<WorkflowStage>,
}

impl AssignmentScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of(track: Track, stage: WorkflowStage) -> Self {
        Self {
            track: Some(track),
            stage: Some(stage),
        }
    }
}

/// Partitioned document store for case records and processing jobs.
///
/// Documents are keyed by (organization, id); the organization is the
/// partition scope and every operation takes it explicitly. Implementations
/// must guarantee per-document atomicity of the conditional operations -
/// nothing here requires cross-document transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_case(&self, org: Uuid, id: Uuid) -> Result<Option<CaseRecord>>;

    /// Dedup lookup by the external identifier, scoped to one organization
    async fn find_by_external_id(&self, org: Uuid, external_id: &str)
        -> Result<Option<CaseRecord>>;

    /// Create a record, with the precondition that no record with the same
    /// (organization, external id) exists. `PreconditionFailed` means a
    /// concurrent create won; the caller treats it as a duplicate.
    async fn create_case(&self, record: &CaseRecord) -> Result<WriteOutcome<CaseRecord>>;

    /// Unassigned records in a track/stage, oldest-created first (FIFO).
    ///
    /// Records without a track are held in the manual triage stage and are
    /// included when the stage matches, so they stay allocatable.
    async fn query_unassigned(
        &self,
        org: Uuid,
        track: Track,
        stage: WorkflowStage,
        limit: usize,
    ) -> Result<Vec<CaseRecord>>;

    /// Records currently assigned to a reviewer, optionally scoped
    async fn query_assigned(
        &self,
        org: Uuid,
        reviewer: Uuid,
        scope: AssignmentScope,
    ) -> Result<Vec<CaseRecord>>;

    /// Conditionally check a record out to a reviewer.
    ///
    /// Precondition: the record is still unassigned AND its version token
    /// matches. Sets `assigned_to`, `batch_id`, `allocated_at`, `locked_at`.
    async fn try_assign(
        &self,
        org: Uuid,
        id: Uuid,
        reviewer: Uuid,
        batch_id: Uuid,
        version: i64,
    ) -> Result<WriteOutcome<CaseRecord>>;

    /// Clear a reviewer's own lock on a record.
    ///
    /// A targeted update (only lock fields, only where `assigned_to` is this
    /// reviewer), not a blind overwrite. No version check: the holder is
    /// releasing its own lock. Returns `None` when the record is missing or
    /// held by someone else.
    async fn release_assignment(
        &self,
        org: Uuid,
        id: Uuid,
        reviewer: Uuid,
    ) -> Result<Option<CaseRecord>>;

    /// Apply workflow transition fields, conditioned on the version token.
    ///
    /// Lock fields are cleared unconditionally as part of the same write.
    /// A stale token yields `PreconditionFailed`; the caller re-fetches.
    async fn apply_transition(
        &self,
        org: Uuid,
        id: Uuid,
        fields: &TransitionFields,
        version: i64,
    ) -> Result<WriteOutcome<CaseRecord>>;

    /// Upsert a processing job snapshot
    async fn put_job(&self, job: &ProcessingJob) -> Result<()>;

    async fn get_job(&self, org: Uuid, job_id: Uuid) -> Result<Option<ProcessingJob>>;

    /// Mark non-terminal jobs from a previous process run as failed.
    ///
    /// A job whose pipeline died with the process will never progress; a new
    /// ingestion should start fresh.
    async fn fail_stale_jobs(&self) -> Result<usize>;

    async fn get_org_settings(&self, org: Uuid) -> Result<Option<OrgSettings>>;

    async fn put_org_settings(&self, org: Uuid, settings: OrgSettings) -> Result<()>;
}
