//! Allocation engine
//!
//! Hands a reviewer an exclusive batch of unassigned records for a track and
//! stage, with at-most-one-batch-per-reviewer-per-stage semantics. Exclusivity
//! comes entirely from the store's conditional writes - no in-process locking,
//! so any number of service instances can run concurrently.

use std::sync::Arc;

use pvlit_common::events::{EventBus, PvlitEvent};
use pvlit_common::{Error, Result};
use uuid::Uuid;

use crate::models::{CaseRecord, Decision, Track, WorkflowStage};
use crate::store::{AssignmentScope, RecordStore, WriteOutcome};
use crate::workflow;

/// Result of a batch checkout attempt.
///
/// `NoneAvailable` and `Contention` are deliberately distinct: the first
/// means the queue is empty, the second means candidates existed but every
/// conditional write lost its race and the caller should simply retry.
#[derive(Debug, Clone)]
pub enum AllocationOutcome {
    Allocated(Vec<CaseRecord>),
    NoneAvailable,
    Contention,
}

pub struct AllocationEngine {
    store: Arc<dyn RecordStore>,
    event_bus: EventBus,
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn RecordStore>, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    /// Check out a batch of unassigned records to a reviewer.
    ///
    /// Idempotent resume: if the reviewer already holds records in this
    /// track/stage, those are returned unchanged - retries and double-clicks
    /// never accumulate a second batch. Otherwise candidates are taken
    /// oldest-created-first and locked one by one with a conditional write;
    /// a candidate lost to a concurrent reviewer is skipped, never retried
    /// within this call, and never fails the rest of the batch.
    pub async fn allocate_batch(
        &self,
        org: Uuid,
        reviewer: Uuid,
        track: Track,
        stage: WorkflowStage,
        batch_size: usize,
    ) -> Result<AllocationOutcome> {
        let existing = self
            .store
            .query_assigned(org, reviewer, AssignmentScope::of(track, stage))
            .await?;
        if !existing.is_empty() {
            tracing::debug!(
                reviewer = %reviewer,
                track = %track,
                stage = %stage,
                count = existing.len(),
                "Reviewer already holds a batch, returning it unchanged"
            );
            return Ok(AllocationOutcome::Allocated(existing));
        }

        let candidates = self
            .store
            .query_unassigned(org, track, stage, batch_size)
            .await?;
        if candidates.is_empty() {
            return Ok(AllocationOutcome::NoneAvailable);
        }

        let batch_id = Uuid::new_v4();
        let mut locked = Vec::new();
        for candidate in &candidates {
            match self
                .store
                .try_assign(org, candidate.id, reviewer, batch_id, candidate.version)
                .await?
            {
                WriteOutcome::Applied(record) => locked.push(record),
                WriteOutcome::PreconditionFailed => {
                    tracing::debug!(
                        record_id = %candidate.id,
                        reviewer = %reviewer,
                        "Lost allocation race, skipping candidate"
                    );
                }
            }
        }

        if locked.is_empty() {
            return Ok(AllocationOutcome::Contention);
        }

        tracing::info!(
            reviewer = %reviewer,
            batch_id = %batch_id,
            track = %track,
            stage = %stage,
            requested = batch_size,
            locked = locked.len(),
            "Batch allocated"
        );
        self.event_bus.emit_lossy(PvlitEvent::BatchAllocated {
            organization_id: org,
            reviewer_id: reviewer,
            batch_id,
            track: track.as_db_str().to_string(),
            stage: stage.as_db_str().to_string(),
            count: locked.len(),
            timestamp: chrono::Utc::now(),
        });

        Ok(AllocationOutcome::Allocated(locked))
    }

    /// Release every record the reviewer holds in the given scope.
    ///
    /// Returns the number of records released. No version check: the
    /// reviewer is releasing their own locks, and the store update touches
    /// only the lock fields.
    pub async fn release_batch(
        &self,
        org: Uuid,
        reviewer: Uuid,
        track: Option<Track>,
        stage: Option<WorkflowStage>,
    ) -> Result<usize> {
        let scope = AssignmentScope { track, stage };
        let held = self.store.query_assigned(org, reviewer, scope).await?;

        let mut released = 0;
        for record in &held {
            if self
                .store
                .release_assignment(org, record.id, reviewer)
                .await?
                .is_some()
            {
                released += 1;
            }
        }

        tracing::info!(reviewer = %reviewer, released, "Batch released");
        self.event_bus.emit_lossy(PvlitEvent::BatchReleased {
            organization_id: org,
            reviewer_id: reviewer,
            released,
            timestamp: chrono::Utc::now(),
        });

        Ok(released)
    }

    /// Lock a single record for the legacy one-case view.
    ///
    /// The reviewer's other holdings are auto-released first (last-writer-wins
    /// UX: opening a new case drops the old one). Conflicts with another
    /// reviewer's lock surface as errors.
    pub async fn lock_single(
        &self,
        org: Uuid,
        reviewer: Uuid,
        record_id: Uuid,
    ) -> Result<CaseRecord> {
        let held = self
            .store
            .query_assigned(org, reviewer, AssignmentScope::all())
            .await?;
        for record in held {
            if record.id == record_id {
                // Already holding the target; nothing to do
                return Ok(record);
            }
            self.store
                .release_assignment(org, record.id, reviewer)
                .await?;
        }

        let target = self
            .store
            .get_case(org, record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Case record not found: {}", record_id)))?;

        if let Some(holder) = target.assigned_to {
            return Err(Error::Conflict(format!(
                "Case record is locked by another reviewer: {}",
                holder
            )));
        }

        match self
            .store
            .try_assign(org, record_id, reviewer, Uuid::new_v4(), target.version)
            .await?
        {
            WriteOutcome::Applied(record) => Ok(record),
            WriteOutcome::PreconditionFailed => Err(Error::Conflict(
                "Case record was locked concurrently, re-fetch and retry".to_string(),
            )),
        }
    }

    /// Apply a reviewer's routing decision to a record.
    ///
    /// The transition is persisted with a conditional write on the version
    /// token read here; a stale token fails the whole operation (no partial
    /// state, no silent merge) and the caller must re-fetch. An unmatched
    /// stage/decision combination still releases the reviewer's lock but
    /// leaves track and stage untouched.
    pub async fn route_record(
        &self,
        org: Uuid,
        reviewer: Uuid,
        record_id: Uuid,
        decision: Decision,
        comments: Option<&str>,
    ) -> Result<CaseRecord> {
        let record = self
            .store
            .get_case(org, record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Case record not found: {}", record_id)))?;

        let from_stage = record.stage;
        let fields = workflow::apply_decision(from_stage, decision);

        let updated = match self
            .store
            .apply_transition(org, record_id, &fields, record.version)
            .await?
        {
            WriteOutcome::Applied(updated) => updated,
            WriteOutcome::PreconditionFailed => {
                return Err(Error::Conflict(
                    "Case record was modified concurrently, re-fetch and retry".to_string(),
                ));
            }
        };

        tracing::info!(
            record_id = %record_id,
            reviewer = %reviewer,
            decision = %decision,
            from_stage = %from_stage,
            to_stage = %updated.stage,
            comments = comments.unwrap_or(""),
            "Record routed"
        );
        if fields.is_matched() {
            self.event_bus.emit_lossy(PvlitEvent::RecordRouted {
                organization_id: org,
                record_id,
                from_stage: from_stage.as_db_str().to_string(),
                to_stage: updated.stage.as_db_str().to_string(),
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(updated)
    }
}
