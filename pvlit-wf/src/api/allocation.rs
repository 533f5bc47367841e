//! Allocation and routing API handlers

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::allocation::{AllocationEngine, AllocationOutcome};
use crate::error::{ApiError, ApiResult};
use crate::models::{CaseRecord, Decision, Track, WorkflowStage};
use crate::workflow;
use crate::AppState;

use super::{organization_id, parse_track, reviewer_id};

/// POST allocate request body
#[derive(Debug, Default, Deserialize)]
pub struct AllocateRequest {
    pub batch_size: Option<usize>,
}

/// POST allocate response
#[derive(Debug, Serialize)]
pub struct AllocateResponse {
    pub batch_id: Option<Uuid>,
    pub cases: Vec<CaseRecord>,
}

/// POST release response
#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub released: usize,
}

/// POST /api/cases/{id}/route request
#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    /// Destination track: ICSR, AOI, or NO_CASE
    pub destination: String,
    /// Track the caller saw when loading the record; informational only
    #[serde(default)]
    pub previous_track: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

fn engine(state: &AppState) -> AllocationEngine {
    AllocationEngine::new(state.store.clone(), state.event_bus.clone())
}

async fn allocate(
    state: AppState,
    headers: HeaderMap,
    track: Track,
    stage: WorkflowStage,
    request: AllocateRequest,
) -> ApiResult<Json<AllocateResponse>> {
    let org = organization_id(&headers)?;
    let reviewer = reviewer_id(&headers)?;
    let batch_size = request
        .batch_size
        .unwrap_or(state.config.allocation_batch_size)
        .max(1);

    let outcome = engine(&state)
        .allocate_batch(org, reviewer, track, stage, batch_size)
        .await?;

    match outcome {
        AllocationOutcome::Allocated(cases) => Ok(Json(AllocateResponse {
            batch_id: cases.first().and_then(|c| c.batch_id),
            cases,
        })),
        AllocationOutcome::NoneAvailable => Err(ApiError::NoneAvailable(format!(
            "No unassigned cases in {}/{}",
            track, stage
        ))),
        AllocationOutcome::Contention => Err(ApiError::Contention(
            "All candidates were claimed concurrently, try again".to_string(),
        )),
    }
}

async fn release(
    state: AppState,
    headers: HeaderMap,
    track: Track,
    stage: WorkflowStage,
) -> ApiResult<Json<ReleaseResponse>> {
    let org = organization_id(&headers)?;
    let reviewer = reviewer_id(&headers)?;

    let released = engine(&state)
        .release_batch(org, reviewer, Some(track), Some(stage))
        .await?;
    Ok(Json(ReleaseResponse { released }))
}

/// POST /api/allocation/{track}/allocate - triage batch checkout
pub async fn allocate_triage_batch(
    State(state): State<AppState>,
    Path(track): Path<String>,
    headers: HeaderMap,
    request: Option<Json<AllocateRequest>>,
) -> ApiResult<Json<AllocateResponse>> {
    let track = parse_track(&track)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    allocate(state, headers, track, workflow::triage_stage(track), request).await
}

/// POST /api/allocation/{track}/release - triage batch release
pub async fn release_triage_batch(
    State(state): State<AppState>,
    Path(track): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ReleaseResponse>> {
    let track = parse_track(&track)?;
    release(state, headers, track, workflow::triage_stage(track)).await
}

/// POST /api/allocation/{track}/assessment/allocate - assessment batch checkout
pub async fn allocate_assessment_batch(
    State(state): State<AppState>,
    Path(track): Path<String>,
    headers: HeaderMap,
    request: Option<Json<AllocateRequest>>,
) -> ApiResult<Json<AllocateResponse>> {
    let track = parse_track(&track)?;
    allocate(
        state,
        headers,
        track,
        workflow::assessment_stage(track),
        request.map(|Json(r)| r).unwrap_or_default(),
    )
    .await
}

/// POST /api/allocation/{track}/assessment/release - assessment batch release
pub async fn release_assessment_batch(
    State(state): State<AppState>,
    Path(track): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ReleaseResponse>> {
    let track = parse_track(&track)?;
    release(state, headers, track, workflow::assessment_stage(track)).await
}

/// POST /api/cases/{id}/lock - legacy single-case lock
pub async fn lock_case(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Json<CaseRecord>> {
    let org = organization_id(&headers)?;
    let reviewer = reviewer_id(&headers)?;

    let record = engine(&state).lock_single(org, reviewer, record_id).await?;
    Ok(Json(record))
}

/// POST /api/cases/{id}/route - apply a reviewer's routing decision
pub async fn route_case(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<RouteRequest>,
) -> ApiResult<Json<CaseRecord>> {
    let org = organization_id(&headers)?;
    let reviewer = reviewer_id(&headers)?;

    let decision = Decision::from_destination(&request.destination).ok_or_else(|| {
        ApiError::BadRequest(format!("Unknown destination: {}", request.destination))
    })?;

    if let Some(previous) = &request.previous_track {
        tracing::debug!(
            record_id = %record_id,
            previous_track = %previous,
            "Routing request carries caller-side track"
        );
    }

    let record = engine(&state)
        .route_record(org, reviewer, record_id, decision, request.comments.as_deref())
        .await?;
    Ok(Json(record))
}

/// Build allocation and routing routes
pub fn allocation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/allocation/:track/allocate", post(allocate_triage_batch))
        .route("/api/allocation/:track/release", post(release_triage_batch))
        .route(
            "/api/allocation/:track/assessment/allocate",
            post(allocate_assessment_batch),
        )
        .route(
            "/api/allocation/:track/assessment/release",
            post(release_assessment_batch),
        )
        .route("/api/cases/:id/lock", post(lock_case))
        .route("/api/cases/:id/route", post(route_case))
}
