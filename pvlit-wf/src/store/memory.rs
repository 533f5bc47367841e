//! In-memory record store
//!
//! Zero-setup backend for tests and local development. Per-document CAS
//! atomicity comes from holding the write guard across the check-and-set of
//! each conditional operation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use pvlit_common::{Error, Result};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{CaseRecord, JobStatus, OrgSettings, ProcessingJob, Track, WorkflowStage};
use crate::workflow::TransitionFields;

use super::{AssignmentScope, RecordStore, WriteOutcome};

#[derive(Default)]
struct Inner {
    cases: HashMap<(Uuid, Uuid), CaseRecord>,
    by_external: HashMap<(Uuid, String), Uuid>,
    jobs: HashMap<(Uuid, Uuid), ProcessingJob>,
    org_settings: HashMap<Uuid, OrgSettings>,
}

/// HashMap-backed store behind a tokio RwLock
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of case records across all organizations (test helper)
    pub async fn case_count(&self) -> usize {
        self.inner.read().await.cases.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_case(&self, org: Uuid, id: Uuid) -> Result<Option<CaseRecord>> {
        Ok(self.inner.read().await.cases.get(&(org, id)).cloned())
    }

    async fn find_by_external_id(
        &self,
        org: Uuid,
        external_id: &str,
    ) -> Result<Option<CaseRecord>> {
        let inner = self.inner.read().await;
        let id = inner.by_external.get(&(org, external_id.to_string()));
        Ok(id.and_then(|id| inner.cases.get(&(org, *id)).cloned()))
    }

    async fn create_case(&self, record: &CaseRecord) -> Result<WriteOutcome<CaseRecord>> {
        let mut inner = self.inner.write().await;
        let external_key = (record.organization_id, record.external_id.clone());
        if inner.by_external.contains_key(&external_key) {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        inner.by_external.insert(external_key, record.id);
        inner
            .cases
            .insert((record.organization_id, record.id), record.clone());
        Ok(WriteOutcome::Applied(record.clone()))
    }

    async fn query_unassigned(
        &self,
        org: Uuid,
        track: Track,
        stage: WorkflowStage,
        limit: usize,
    ) -> Result<Vec<CaseRecord>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<CaseRecord> = inner
            .cases
            .values()
            .filter(|r| {
                r.organization_id == org
                    && r.stage == stage
                    && r.assigned_to.is_none()
                    && (r.track == Some(track) || r.track.is_none())
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn query_assigned(
        &self,
        org: Uuid,
        reviewer: Uuid,
        scope: AssignmentScope,
    ) -> Result<Vec<CaseRecord>> {
        let inner = self.inner.read().await;
        let mut matches: Vec<CaseRecord> = inner
            .cases
            .values()
            .filter(|r| {
                r.organization_id == org
                    && r.assigned_to == Some(reviewer)
                    && scope.track.map_or(true, |t| r.track == Some(t))
                    && scope.stage.map_or(true, |s| r.stage == s)
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matches)
    }

    async fn try_assign(
        &self,
        org: Uuid,
        id: Uuid,
        reviewer: Uuid,
        batch_id: Uuid,
        version: i64,
    ) -> Result<WriteOutcome<CaseRecord>> {
        let mut inner = self.inner.write().await;
        let record = match inner.cases.get_mut(&(org, id)) {
            Some(record) => record,
            None => return Ok(WriteOutcome::PreconditionFailed),
        };

        if record.assigned_to.is_some() || record.version != version {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        let now = Utc::now();
        record.assigned_to = Some(reviewer);
        record.batch_id = Some(batch_id);
        record.allocated_at = Some(now);
        record.locked_at = Some(now);
        record.version += 1;
        record.updated_at = now;
        Ok(WriteOutcome::Applied(record.clone()))
    }

    async fn release_assignment(
        &self,
        org: Uuid,
        id: Uuid,
        reviewer: Uuid,
    ) -> Result<Option<CaseRecord>> {
        let mut inner = self.inner.write().await;
        let record = match inner.cases.get_mut(&(org, id)) {
            Some(record) => record,
            None => return Ok(None),
        };

        if record.assigned_to != Some(reviewer) {
            return Ok(None);
        }

        record.assigned_to = None;
        record.batch_id = None;
        record.allocated_at = None;
        record.locked_at = None;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn apply_transition(
        &self,
        org: Uuid,
        id: Uuid,
        fields: &TransitionFields,
        version: i64,
    ) -> Result<WriteOutcome<CaseRecord>> {
        let mut inner = self.inner.write().await;
        let record = inner
            .cases
            .get_mut(&(org, id))
            .ok_or_else(|| Error::NotFound(format!("Case record not found: {}", id)))?;

        if record.version != version {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        if let Some(stage) = fields.stage {
            record.stage = stage;
        }
        if let Some(track) = fields.track {
            record.track = Some(track);
        }
        if let Some(sub_status) = fields.sub_status {
            record.sub_status = sub_status;
        }
        if let Some(label) = &fields.status_label {
            record.status = label.clone();
        }
        if let Some(queue_stage) = fields.last_queue_stage {
            record.last_queue_stage = Some(queue_stage);
        }

        record.assigned_to = None;
        record.batch_id = None;
        record.allocated_at = None;
        record.locked_at = None;
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(WriteOutcome::Applied(record.clone()))
    }

    async fn put_job(&self, job: &ProcessingJob) -> Result<()> {
        self.inner
            .write()
            .await
            .jobs
            .insert((job.organization_id, job.job_id), job.clone());
        Ok(())
    }

    async fn get_job(&self, org: Uuid, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self.inner.read().await.jobs.get(&(org, job_id)).cloned())
    }

    async fn fail_stale_jobs(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut failed = 0;
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing {
                job.fail();
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn get_org_settings(&self, org: Uuid) -> Result<Option<OrgSettings>> {
        Ok(self.inner.read().await.org_settings.get(&org).copied())
    }

    async fn put_org_settings(&self, org: Uuid, settings: OrgSettings) -> Result<()> {
        self.inner.write().await.org_settings.insert(org, settings);
        Ok(())
    }
}
