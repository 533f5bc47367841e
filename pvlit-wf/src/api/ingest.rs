//! Ingestion API handlers
//!
//! POST /api/ingest returns a job id immediately and never blocks the caller
//! on completion; the pipeline runs in a background task and progress is
//! polled via GET /api/jobs/{id} or streamed via SSE.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{ItemFailure, JobMetadata, JobStatus, ProcessingJob, RawRecord};
use crate::pipeline::IngestPipeline;
use crate::{AppState, LiveJob};

use super::{organization_id, reviewer_id};

/// POST /api/ingest request
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub records: Vec<RawRecord>,
}

/// POST /api/ingest response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// GET /api/jobs/{id} response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    pub metadata: JobMetadata,
    pub failures: Vec<ItemFailure>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ProcessingJob> for JobStatusResponse {
    fn from(job: ProcessingJob) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            progress: job.progress,
            metadata: job.metadata,
            failures: job.failures,
            started_at: job.started_at,
            ended_at: job.ended_at,
        }
    }
}

/// POST /api/ingest
///
/// Accepts a batch of raw records, persists the new job, and spawns the
/// pipeline in the background. The response carries only the job id; callers
/// poll or subscribe for progress.
pub async fn start_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    let org = organization_id(&headers)?;
    let actor = reviewer_id(&headers)?;

    if request.records.is_empty() {
        return Err(ApiError::BadRequest("No records to ingest".to_string()));
    }
    if request.records.iter().any(|r| r.external_id.trim().is_empty()) {
        return Err(ApiError::BadRequest(
            "Every record needs a non-empty external id".to_string(),
        ));
    }

    let job = ProcessingJob::new(org, request.records.len());
    let response = IngestResponse {
        job_id: job.job_id,
        status: job.status,
        started_at: job.started_at,
    };

    state.store.put_job(&job).await.map_err(ApiError::Common)?;

    let snapshot = Arc::new(RwLock::new(job));
    let cancel = CancellationToken::new();
    state.live_jobs.write().await.insert(
        response.job_id,
        LiveJob {
            snapshot: Arc::clone(&snapshot),
            cancel: cancel.clone(),
        },
    );

    tracing::info!(
        job_id = %response.job_id,
        organization_id = %org,
        actor_id = %actor,
        records = request.records.len(),
        "Ingestion job accepted"
    );

    let job_id = response.job_id;
    let state_clone = state.clone();
    tokio::spawn(async move {
        let pipeline = IngestPipeline::new(
            state_clone.store.clone(),
            state_clone.endpoint_pool.clone(),
            state_clone.config.pipeline.clone(),
            state_clone.event_bus.clone(),
            state_clone.config.auto_pass_percent_default,
        );

        match pipeline.run(snapshot.clone(), request.records, cancel).await {
            Ok(report) => {
                tracing::info!(
                    job_id = %job_id,
                    created = report.created,
                    duplicates = report.duplicates,
                    failed = report.failed,
                    "Background ingestion task finished"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Background ingestion task failed");
                // The pipeline aborted before running (e.g. settings fetch hit
                // a store outage); make sure the job still reaches a terminal
                // state instead of looking stuck forever
                let job = {
                    let mut job = snapshot.write().await;
                    if !job.is_terminal() {
                        job.fail();
                    }
                    job.clone()
                };
                if let Err(persist_err) = state_clone.store.put_job(&job).await {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %persist_err,
                        "Could not persist failed job state"
                    );
                }
            }
        }

        state_clone.live_jobs.write().await.remove(&job_id);
    });

    Ok(Json(response))
}

/// GET /api/jobs/{job_id}
///
/// Live jobs answer from the in-memory snapshot (always current); finished
/// jobs come from the store.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<JobStatusResponse>> {
    let org = organization_id(&headers)?;

    if let Some(live) = state.live_jobs.read().await.get(&job_id) {
        let job = live.snapshot.read().await.clone();
        if job.organization_id == org {
            return Ok(Json(job.into()));
        }
    }

    let job = state
        .store
        .get_job(org, job_id)
        .await
        .map_err(ApiError::Common)?
        .ok_or_else(|| ApiError::NotFound(format!("Ingestion job not found: {}", job_id)))?;

    Ok(Json(job.into()))
}

/// POST /api/jobs/{job_id}/cancel
///
/// Stops feeding new items into a running job; in-flight items still resolve
/// and the job finishes in the failed state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<JobStatusResponse>> {
    let org = organization_id(&headers)?;

    let live = state
        .live_jobs
        .read()
        .await
        .get(&job_id)
        .cloned()
        .ok_or_else(|| {
            ApiError::BadRequest(format!("Ingestion job is not running: {}", job_id))
        })?;

    let job = live.snapshot.read().await.clone();
    if job.organization_id != org {
        return Err(ApiError::NotFound(format!(
            "Ingestion job not found: {}",
            job_id
        )));
    }

    live.cancel.cancel();
    tracing::info!(job_id = %job_id, "Ingestion job cancellation requested");

    Ok(Json(job.into()))
}

/// Build ingestion routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ingest", post(start_ingest))
        .route("/api/jobs/:job_id", get(get_job_status))
        .route("/api/jobs/:job_id/cancel", post(cancel_job))
}
