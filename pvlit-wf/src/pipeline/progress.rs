//! Progress reporting for ingestion jobs
//!
//! Workers push one outcome per resolved item onto a channel; this task owns
//! the authoritative in-memory job snapshot (always readable on demand),
//! emits an event per item, and writes the snapshot through to the store at a
//! throttled rate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pvlit_common::events::{EventBus, PvlitEvent};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::models::{ItemFailure, ProcessingJob};
use crate::store::RecordStore;

/// Terminal outcome of one pipeline item
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Created {
        external_id: String,
    },
    Duplicate {
        external_id: String,
    },
    Failed {
        external_id: String,
        attempts: u32,
        error: String,
        /// Whether a classification result was obtained before the failure
        classified: bool,
    },
}

/// Spawn the progress consumer task.
///
/// Runs until every outcome sender is dropped, then performs a final
/// write-through. Persistence failures are logged and retried at the next
/// throttle window rather than killing the task: the in-memory snapshot stays
/// correct regardless.
pub fn spawn_progress_task(
    store: Arc<dyn RecordStore>,
    event_bus: EventBus,
    snapshot: Arc<RwLock<ProcessingJob>>,
    mut rx: mpsc::UnboundedReceiver<ItemOutcome>,
    persist_items: usize,
    persist_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut since_persist = 0usize;
        let mut last_persist = Instant::now();

        while let Some(outcome) = rx.recv().await {
            let event = {
                let mut job = snapshot.write().await;
                match outcome {
                    ItemOutcome::Created { external_id } => {
                        job.metadata.created += 1;
                        job.metadata.classified += 1;
                        tracing::debug!(external_id = %external_id, "Case record created");
                    }
                    ItemOutcome::Duplicate { external_id } => {
                        job.metadata.duplicates += 1;
                        tracing::info!(
                            external_id = %external_id,
                            "Duplicate external id, skipped"
                        );
                    }
                    ItemOutcome::Failed {
                        external_id,
                        attempts,
                        error,
                        classified,
                    } => {
                        job.metadata.failed += 1;
                        if classified {
                            job.metadata.classified += 1;
                        }
                        tracing::warn!(
                            external_id = %external_id,
                            attempts,
                            error = %error,
                            "Item durably failed, recorded for background retry"
                        );
                        job.failures.push(ItemFailure {
                            external_id,
                            attempts,
                            error,
                        });
                    }
                }
                job.update_progress();

                PvlitEvent::IngestProgressUpdate {
                    job_id: job.job_id,
                    progress: job.progress,
                    found: job.metadata.found,
                    created: job.metadata.created,
                    duplicates: job.metadata.duplicates,
                    failed: job.metadata.failed,
                    current_operation: format!(
                        "Processing records: {}/{}",
                        job.metadata.resolved(),
                        job.metadata.found
                    ),
                    timestamp: chrono::Utc::now(),
                }
            };

            event_bus.emit_lossy(event);

            since_persist += 1;
            if since_persist >= persist_items || last_persist.elapsed() >= persist_interval {
                let job = snapshot.read().await.clone();
                if let Err(e) = store.put_job(&job).await {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Job snapshot persist failed");
                } else {
                    since_persist = 0;
                    last_persist = Instant::now();
                }
            }
        }

        // Channel closed: one final write-through of the latest snapshot
        let job = snapshot.read().await.clone();
        if let Err(e) = store.put_job(&job).await {
            tracing::warn!(job_id = %job.job_id, error = %e, "Final job snapshot persist failed");
        }
    })
}
