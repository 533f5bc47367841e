//! SQLite-backed record store
//!
//! Conditional writes are plain UPDATEs whose WHERE clause carries the
//! precondition (version token, unassigned check); `rows_affected` decides
//! Applied vs PreconditionFailed. The version column is incremented in the
//! same statement, so concurrent writers can never both succeed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pvlit_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::models::{
    CaseRecord, ItemFailure, JobMetadata, JobStatus, OrgSettings, ProcessingJob, SubStatus, Track,
    WorkflowStage,
};
use crate::workflow::TransitionFields;

use super::{AssignmentScope, RecordStore, WriteOutcome};

const CASE_COLUMNS: &str = "id, organization_id, external_id, title, payload, \
     track, classification_label, confirmed_flag, stage, sub_status, is_auto_passed, \
     last_queue_stage, assigned_to, batch_id, allocated_at, locked_at, status, \
     version, created_at, updated_at";

/// sqlx-backed store over a SQLite pool
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool and create the schema if missing
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// Open (or create) a database file and initialize the schema
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to database: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await?;
        Self::new(pool).await
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS case_records (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '',
                track TEXT,
                classification_label TEXT,
                confirmed_flag INTEGER NOT NULL DEFAULT 0,
                stage TEXT NOT NULL,
                sub_status TEXT NOT NULL,
                is_auto_passed INTEGER NOT NULL DEFAULT 0,
                last_queue_stage TEXT,
                assigned_to TEXT,
                batch_id TEXT,
                allocated_at TEXT,
                locked_at TEXT,
                status TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(organization_id, external_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_case_records_allocation
            ON case_records (organization_id, stage, assigned_to, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processing_jobs (
                job_id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0.0,
                metadata TEXT NOT NULL DEFAULT '{}',
                failures TEXT NOT NULL DEFAULT '[]',
                started_at TEXT NOT NULL,
                ended_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS org_settings (
                organization_id TEXT PRIMARY KEY,
                auto_pass_percent INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database tables initialized (case_records, processing_jobs, org_settings)");
        Ok(())
    }

    async fn fetch_case(&self, org: Uuid, id: Uuid) -> Result<Option<CaseRecord>> {
        let sql = format!(
            "SELECT {} FROM case_records WHERE id = ? AND organization_id = ?",
            CASE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(org.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_case(&row)).transpose()
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_case(&self, org: Uuid, id: Uuid) -> Result<Option<CaseRecord>> {
        self.fetch_case(org, id).await
    }

    async fn find_by_external_id(
        &self,
        org: Uuid,
        external_id: &str,
    ) -> Result<Option<CaseRecord>> {
        let sql = format!(
            "SELECT {} FROM case_records WHERE organization_id = ? AND external_id = ?",
            CASE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(org.to_string())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_case(&row)).transpose()
    }

    async fn create_case(&self, record: &CaseRecord) -> Result<WriteOutcome<CaseRecord>> {
        let result = sqlx::query(
            r#"
            INSERT INTO case_records (
                id, organization_id, external_id, title, payload,
                track, classification_label, confirmed_flag, stage, sub_status,
                is_auto_passed, last_queue_stage, assigned_to, batch_id,
                allocated_at, locked_at, status, version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(organization_id, external_id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.organization_id.to_string())
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(&record.payload)
        .bind(record.track.map(|t| t.as_db_str()))
        .bind(&record.classification_label)
        .bind(record.confirmed_flag as i64)
        .bind(record.stage.as_db_str())
        .bind(record.sub_status.as_db_str())
        .bind(record.is_auto_passed as i64)
        .bind(record.last_queue_stage.map(|s| s.as_db_str()))
        .bind(record.assigned_to.map(|u| u.to_string()))
        .bind(record.batch_id.map(|u| u.to_string()))
        .bind(record.allocated_at.map(|t| t.to_rfc3339()))
        .bind(record.locked_at.map(|t| t.to_rfc3339()))
        .bind(&record.status)
        .bind(record.version)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(WriteOutcome::PreconditionFailed);
        }
        Ok(WriteOutcome::Applied(record.clone()))
    }

    async fn query_unassigned(
        &self,
        org: Uuid,
        track: Track,
        stage: WorkflowStage,
        limit: usize,
    ) -> Result<Vec<CaseRecord>> {
        let sql = format!(
            "SELECT {} FROM case_records \
             WHERE organization_id = ? AND stage = ? AND assigned_to IS NULL \
               AND (track = ? OR track IS NULL) \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            CASE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(org.to_string())
            .bind(stage.as_db_str())
            .bind(track.as_db_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_case).collect()
    }

    async fn query_assigned(
        &self,
        org: Uuid,
        reviewer: Uuid,
        scope: AssignmentScope,
    ) -> Result<Vec<CaseRecord>> {
        let mut sql = format!(
            "SELECT {} FROM case_records WHERE organization_id = ? AND assigned_to = ?",
            CASE_COLUMNS
        );
        if scope.track.is_some() {
            sql.push_str(" AND track = ?");
        }
        if scope.stage.is_some() {
            sql.push_str(" AND stage = ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql)
            .bind(org.to_string())
            .bind(reviewer.to_string());
        if let Some(track) = scope.track {
            query = query.bind(track.as_db_str());
        }
        if let Some(stage) = scope.stage {
            query = query.bind(stage.as_db_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_case).collect()
    }

    async fn try_assign(
        &self,
        org: Uuid,
        id: Uuid,
        reviewer: Uuid,
        batch_id: Uuid,
        version: i64,
    ) -> Result<WriteOutcome<CaseRecord>> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE case_records
            SET assigned_to = ?, batch_id = ?, allocated_at = ?, locked_at = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND organization_id = ? AND version = ? AND assigned_to IS NULL
            "#,
        )
        .bind(reviewer.to_string())
        .bind(batch_id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .bind(org.to_string())
        .bind(version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        let record = self.fetch_case(org, id).await?.ok_or_else(|| {
            Error::Internal(format!("Case record vanished after assignment: {}", id))
        })?;
        Ok(WriteOutcome::Applied(record))
    }

    async fn release_assignment(
        &self,
        org: Uuid,
        id: Uuid,
        reviewer: Uuid,
    ) -> Result<Option<CaseRecord>> {
        let result = sqlx::query(
            r#"
            UPDATE case_records
            SET assigned_to = NULL, batch_id = NULL, allocated_at = NULL, locked_at = NULL,
                version = version + 1, updated_at = ?
            WHERE id = ? AND organization_id = ? AND assigned_to = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(org.to_string())
        .bind(reviewer.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.fetch_case(org, id).await
    }

    async fn apply_transition(
        &self,
        org: Uuid,
        id: Uuid,
        fields: &TransitionFields,
        version: i64,
    ) -> Result<WriteOutcome<CaseRecord>> {
        let current = self
            .fetch_case(org, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Case record not found: {}", id)))?;

        if current.version != version {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        let stage = fields.stage.unwrap_or(current.stage);
        let track = fields.track.or(current.track);
        let sub_status = fields.sub_status.unwrap_or(current.sub_status);
        let status = fields
            .status_label
            .clone()
            .unwrap_or_else(|| current.status.clone());
        let last_queue_stage = fields.last_queue_stage.or(current.last_queue_stage);

        let result = sqlx::query(
            r#"
            UPDATE case_records
            SET stage = ?, track = ?, sub_status = ?, status = ?, last_queue_stage = ?,
                assigned_to = NULL, batch_id = NULL, allocated_at = NULL, locked_at = NULL,
                version = version + 1, updated_at = ?
            WHERE id = ? AND organization_id = ? AND version = ?
            "#,
        )
        .bind(stage.as_db_str())
        .bind(track.map(|t| t.as_db_str()))
        .bind(sub_status.as_db_str())
        .bind(&status)
        .bind(last_queue_stage.map(|s| s.as_db_str()))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(org.to_string())
        .bind(version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        let record = self.fetch_case(org, id).await?.ok_or_else(|| {
            Error::Internal(format!("Case record vanished after transition: {}", id))
        })?;
        Ok(WriteOutcome::Applied(record))
    }

    async fn put_job(&self, job: &ProcessingJob) -> Result<()> {
        let metadata = serde_json::to_string(&job.metadata)
            .map_err(|e| Error::Internal(format!("Failed to serialize job metadata: {}", e)))?;
        let failures = serde_json::to_string(&job.failures)
            .map_err(|e| Error::Internal(format!("Failed to serialize job failures: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO processing_jobs (
                job_id, organization_id, status, progress, metadata, failures,
                started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                metadata = excluded.metadata,
                failures = excluded.failures,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(job.job_id.to_string())
        .bind(job.organization_id.to_string())
        .bind(job.status.as_db_str())
        .bind(job.progress)
        .bind(&metadata)
        .bind(&failures)
        .bind(job.started_at.to_rfc3339())
        .bind(job.ended_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, org: Uuid, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, organization_id, status, progress, metadata, failures,
                   started_at, ended_at
            FROM processing_jobs
            WHERE job_id = ? AND organization_id = ?
            "#,
        )
        .bind(job_id.to_string())
        .bind(org.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_job(&row)).transpose()
    }

    async fn fail_stale_jobs(&self) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE processing_jobs SET status = 'failed', ended_at = ? WHERE status = 'processing'",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn get_org_settings(&self, org: Uuid) -> Result<Option<OrgSettings>> {
        let row = sqlx::query(
            "SELECT auto_pass_percent FROM org_settings WHERE organization_id = ?",
        )
        .bind(org.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| OrgSettings {
            auto_pass_percent: row.get::<i64, _>("auto_pass_percent").clamp(0, 100) as u8,
        }))
    }

    async fn put_org_settings(&self, org: Uuid, settings: OrgSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO org_settings (organization_id, auto_pass_percent)
            VALUES (?, ?)
            ON CONFLICT(organization_id) DO UPDATE SET
                auto_pass_percent = excluded.auto_pass_percent
            "#,
        )
        .bind(org.to_string())
        .bind(settings.auto_pass_percent as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

fn row_to_case(row: &SqliteRow) -> Result<CaseRecord> {
    let track = row
        .get::<Option<String>, _>("track")
        .map(|s| Track::from_db_str(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse track: {}", e)))?;

    let stage_raw: String = row.get("stage");
    let stage = WorkflowStage::from_db_str(&stage_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown workflow stage: {}", stage_raw)))?;

    let sub_status_raw: String = row.get("sub_status");
    let sub_status = SubStatus::from_db_str(&sub_status_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown sub-status: {}", sub_status_raw)))?;

    let last_queue_stage = row
        .get::<Option<String>, _>("last_queue_stage")
        .map(|s| {
            WorkflowStage::from_db_str(&s)
                .ok_or_else(|| Error::Internal(format!("Unknown workflow stage: {}", s)))
        })
        .transpose()?;

    let assigned_to = row
        .get::<Option<String>, _>("assigned_to")
        .map(|s| parse_uuid(&s, "assigned_to"))
        .transpose()?;
    let batch_id = row
        .get::<Option<String>, _>("batch_id")
        .map(|s| parse_uuid(&s, "batch_id"))
        .transpose()?;

    let allocated_at = row
        .get::<Option<String>, _>("allocated_at")
        .map(|s| parse_timestamp(&s, "allocated_at"))
        .transpose()?;
    let locked_at = row
        .get::<Option<String>, _>("locked_at")
        .map(|s| parse_timestamp(&s, "locked_at"))
        .transpose()?;

    Ok(CaseRecord {
        id: parse_uuid(&row.get::<String, _>("id"), "id")?,
        organization_id: parse_uuid(&row.get::<String, _>("organization_id"), "organization_id")?,
        external_id: row.get("external_id"),
        title: row.get("title"),
        payload: row.get("payload"),
        track,
        classification_label: row.get("classification_label"),
        confirmed_flag: row.get::<i64, _>("confirmed_flag") != 0,
        stage,
        sub_status,
        is_auto_passed: row.get::<i64, _>("is_auto_passed") != 0,
        last_queue_stage,
        assigned_to,
        batch_id,
        allocated_at,
        locked_at,
        status: row.get("status"),
        version: row.get("version"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "created_at")?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "updated_at")?,
    })
}

fn row_to_job(row: &SqliteRow) -> Result<ProcessingJob> {
    let status_raw: String = row.get("status");
    let status = JobStatus::from_db_str(&status_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown job status: {}", status_raw)))?;

    let metadata: JobMetadata = serde_json::from_str(&row.get::<String, _>("metadata"))
        .map_err(|e| Error::Internal(format!("Failed to deserialize job metadata: {}", e)))?;
    let failures: Vec<ItemFailure> = serde_json::from_str(&row.get::<String, _>("failures"))
        .map_err(|e| Error::Internal(format!("Failed to deserialize job failures: {}", e)))?;

    let ended_at = row
        .get::<Option<String>, _>("ended_at")
        .map(|s| parse_timestamp(&s, "ended_at"))
        .transpose()?;

    Ok(ProcessingJob {
        job_id: parse_uuid(&row.get::<String, _>("job_id"), "job_id")?,
        organization_id: parse_uuid(&row.get::<String, _>("organization_id"), "organization_id")?,
        status,
        progress: row.get("progress"),
        metadata,
        failures,
        started_at: parse_timestamp(&row.get::<String, _>("started_at"), "started_at")?,
        ended_at,
    })
}
