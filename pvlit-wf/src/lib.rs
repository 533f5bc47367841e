//! pvlit-wf - Workflow allocation and guaranteed-ingestion service
//!
//! The core of the literature triage backend: classifies incoming literature
//! records into processing tracks, hands out exclusive work batches to
//! concurrent reviewers without double-assignment, advances records through
//! the triage/allocation/assessment workflow, and drives an unreliable pool
//! of classification endpoints hard enough that every ingested record ends in
//! exactly one persisted case or one durable failure.

pub mod allocation;
pub mod api;
pub mod classifier;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pvlit_common::events::EventBus;

use crate::config::ServiceConfig;
use crate::endpoints::EndpointPool;
use crate::models::ProcessingJob;
use crate::store::RecordStore;

/// One running ingestion job: the polled snapshot plus its abandon switch
#[derive(Clone)]
pub struct LiveJob {
    pub snapshot: Arc<RwLock<ProcessingJob>>,
    pub cancel: CancellationToken,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub event_bus: EventBus,
    pub endpoint_pool: Arc<EndpointPool>,
    pub config: Arc<ServiceConfig>,
    /// Running ingestion jobs, keyed by job id
    pub live_jobs: Arc<RwLock<HashMap<Uuid, LiveJob>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        event_bus: EventBus,
        endpoint_pool: Arc<EndpointPool>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            event_bus,
            endpoint_pool,
            config: Arc::new(config),
            live_jobs: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;
    use tower_http::trace::TraceLayer;

    Router::new()
        .merge(api::ingest_routes())
        .merge(api::allocation_routes())
        .route("/api/jobs/events", get(api::job_event_stream))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
