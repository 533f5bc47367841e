//! pvlit-wf - Workflow allocation and ingestion service
//!
//! Exposes the triage/allocation/assessment workflow core over HTTP REST +
//! SSE. Storage backend is SQLite when a database path is configured, the
//! in-memory store otherwise.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pvlit_common::events::EventBus;
use pvlit_wf::config::ServiceConfig;
use pvlit_wf::endpoints::{ClassifyEndpoint, EndpointPool, HttpClassifyEndpoint};
use pvlit_wf::store::{MemoryStore, RecordStore, SqliteStore};
use pvlit_wf::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::load()?;

    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting pvlit-wf (workflow allocation and ingestion) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Storage backend
    let store: Arc<dyn RecordStore> = match &config.database_path {
        Some(path) => {
            info!("Database: {}", path);
            Arc::new(SqliteStore::connect(Path::new(path)).await?)
        }
        None => {
            warn!("No database_path configured, running on the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Jobs from a previous process run will never progress; fail them now
    let stale = store.fail_stale_jobs().await?;
    if stale > 0 {
        warn!(stale, "Marked stale ingestion jobs from a previous run as failed");
    }

    // Classification endpoint pool
    if config.endpoints.is_empty() {
        warn!("No classification endpoints configured, ingestion will not run");
    }
    let mut clients: Vec<Arc<dyn ClassifyEndpoint>> = Vec::new();
    for endpoint in &config.endpoints {
        match HttpClassifyEndpoint::new(endpoint) {
            Ok(client) => {
                info!(name = %endpoint.name, url = %endpoint.url, "Endpoint registered");
                clients.push(Arc::new(client));
            }
            Err(e) => {
                warn!(name = %endpoint.name, error = %e, "Skipping unusable endpoint");
            }
        }
    }

    let event_bus = EventBus::new(1000);
    let pool = Arc::new(EndpointPool::new(
        clients,
        &config.pipeline,
        event_bus.clone(),
    ));

    let bind_address = config.bind_address.clone();
    let state = AppState::new(store, event_bus, pool, config);
    let app = pvlit_wf::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
