//! Guaranteed processing pipeline
//!
//! Consumes a batch of raw literature records and fans the work out across
//! the classification endpoint pool under the circuit-breaker and backoff
//! policy. Every input item reaches exactly one terminal outcome - created,
//! duplicate-skipped, or durably-failed - and none is ever silently dropped
//! or double-created. Partial failure is a normal, reportable result.

mod progress;

pub use progress::ItemOutcome;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pvlit_common::events::{EventBus, PvlitEvent};
use pvlit_common::Result;
use rand::Rng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classifier;
use crate::config::PipelineConfig;
use crate::endpoints::EndpointPool;
use crate::models::{CaseRecord, ProcessingJob, RawRecord};
use crate::store::{RecordStore, WriteOutcome};
use crate::workflow::{self, autopass};

/// How long a worker waits before re-checking the pool when every endpoint is
/// saturated or cooling down
const CHECKOUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Final counts for one ingestion run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineReport {
    pub created: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// One unit of pipeline work with its retry bookkeeping
#[derive(Debug, Clone)]
struct ItemJob {
    record: RawRecord,
    auto_pass: bool,
    attempts: u32,
    tried_endpoints: HashSet<usize>,
    last_error: Option<String>,
}

struct WorkerCtx {
    store: Arc<dyn RecordStore>,
    pool: Arc<EndpointPool>,
    config: PipelineConfig,
    organization_id: Uuid,
    /// Requeue path for failed items
    queue_tx: mpsc::UnboundedSender<ItemJob>,
    outcome_tx: mpsc::UnboundedSender<ItemOutcome>,
    /// Unresolved item count; reaching zero completes the run
    outstanding: AtomicUsize,
    /// Fires when every item is terminal
    all_resolved: CancellationToken,
    /// External abandon signal: stop feeding new items
    cancel: CancellationToken,
    /// Set on store outage; the job finishes failed
    halted: AtomicBool,
}

impl WorkerCtx {
    fn resolve_item(&self, outcome: ItemOutcome) {
        let _ = self.outcome_tx.send(outcome);
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.all_resolved.cancel();
        }
    }
}

/// Guaranteed ingestion pipeline over one endpoint pool and one store
pub struct IngestPipeline {
    store: Arc<dyn RecordStore>,
    pool: Arc<EndpointPool>,
    config: PipelineConfig,
    event_bus: EventBus,
    auto_pass_default: u8,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        pool: Arc<EndpointPool>,
        config: PipelineConfig,
        event_bus: EventBus,
        auto_pass_default: u8,
    ) -> Self {
        config.validate(pool.len());
        Self {
            store,
            pool,
            config,
            event_bus,
            auto_pass_default,
        }
    }

    /// Run the pipeline to completion for one ingestion job.
    ///
    /// `snapshot` is the shared in-memory job the HTTP layer polls; it is
    /// updated per item and persisted at a throttled rate. Cancelling `cancel`
    /// stops feeding unprocessed items (they resolve as failures); in-flight
    /// items still finish and are counted.
    pub async fn run(
        &self,
        snapshot: Arc<RwLock<ProcessingJob>>,
        records: Vec<RawRecord>,
        cancel: CancellationToken,
    ) -> Result<PipelineReport> {
        let (organization_id, job_id) = {
            let job = snapshot.read().await;
            (job.organization_id, job.job_id)
        };
        let total = records.len();

        tracing::info!(
            job_id = %job_id,
            organization_id = %organization_id,
            total,
            endpoints = self.pool.len(),
            "Ingestion pipeline starting"
        );
        self.event_bus.emit_lossy(PvlitEvent::IngestJobStarted {
            job_id,
            organization_id,
            total,
            timestamp: chrono::Utc::now(),
        });

        let jobs = self.build_jobs(organization_id, records).await?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<ItemJob>();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel::<ItemOutcome>();

        let ctx = Arc::new(WorkerCtx {
            store: Arc::clone(&self.store),
            pool: Arc::clone(&self.pool),
            config: self.config.clone(),
            organization_id,
            queue_tx: queue_tx.clone(),
            outcome_tx,
            outstanding: AtomicUsize::new(total),
            all_resolved: CancellationToken::new(),
            cancel,
            halted: AtomicBool::new(false),
        });

        let progress_handle = progress::spawn_progress_task(
            Arc::clone(&self.store),
            self.event_bus.clone(),
            Arc::clone(&snapshot),
            outcome_rx,
            self.config.progress_persist_items,
            Duration::from_secs(self.config.progress_persist_secs),
        );

        for job in jobs {
            let _ = queue_tx.send(job);
        }
        drop(queue_tx);

        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.max_concurrency.max(1) {
            let ctx = Arc::clone(&ctx);
            let queue_rx = Arc::clone(&queue_rx);
            workers.spawn(async move {
                worker_loop(worker_id, ctx, queue_rx).await;
            });
        }

        if total == 0 {
            ctx.all_resolved.cancel();
        }
        ctx.all_resolved.cancelled().await;

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Pipeline worker panicked");
            }
        }

        let halted = ctx.halted.load(Ordering::SeqCst);
        let cancelled = ctx.cancel.is_cancelled();

        // Dropping the last ctx handle drops the outcome sender; the progress
        // task drains the channel and does its final write-through.
        drop(ctx);
        let _ = progress_handle.await;
        let report = self
            .finalize(&snapshot, job_id, halted, cancelled)
            .await;

        tracing::info!(
            job_id = %job_id,
            created = report.created,
            duplicates = report.duplicates,
            failed = report.failed,
            success_rate = report.success_rate,
            "Ingestion pipeline finished"
        );
        Ok(report)
    }

    /// Seed item jobs, applying auto-pass selection per in-memory batch
    async fn build_jobs(&self, organization_id: Uuid, records: Vec<RawRecord>) -> Result<Vec<ItemJob>> {
        let auto_pass_percent = self
            .store
            .get_org_settings(organization_id)
            .await?
            .map(|s| s.auto_pass_percent)
            .unwrap_or(self.auto_pass_default);

        let batch_size = self.config.batch_size.max(1);
        let mut jobs = Vec::with_capacity(records.len());
        let mut rng = rand::thread_rng();

        for chunk in records.chunks(batch_size) {
            let flags = autopass::select_auto_pass(chunk.len(), auto_pass_percent, &mut rng);
            for (record, auto_pass) in chunk.iter().cloned().zip(flags) {
                jobs.push(ItemJob {
                    record,
                    auto_pass,
                    attempts: 0,
                    tried_endpoints: HashSet::new(),
                    last_error: None,
                });
            }
        }

        Ok(jobs)
    }

    async fn finalize(
        &self,
        snapshot: &Arc<RwLock<ProcessingJob>>,
        job_id: Uuid,
        halted: bool,
        cancelled: bool,
    ) -> PipelineReport {
        let job = {
            let mut job = snapshot.write().await;
            if halted {
                job.fail();
            } else if cancelled {
                job.fail();
            } else {
                job.complete();
            }
            job.clone()
        };

        if let Err(e) = self.store.put_job(&job).await {
            tracing::warn!(job_id = %job_id, error = %e, "Final job persist failed");
        }

        let report = PipelineReport {
            created: job.metadata.created,
            duplicates: job.metadata.duplicates,
            failed: job.metadata.failed,
            success_rate: job.success_rate(),
        };

        if halted || cancelled {
            let reason = if halted {
                "record store unavailable, intake halted"
            } else {
                "ingestion job cancelled"
            };
            self.event_bus.emit_lossy(PvlitEvent::IngestJobFailed {
                job_id,
                error: reason.to_string(),
                timestamp: chrono::Utc::now(),
            });
        } else {
            self.event_bus.emit_lossy(PvlitEvent::IngestJobCompleted {
                job_id,
                created: report.created,
                duplicates: report.duplicates,
                failed: report.failed,
                success_rate: report.success_rate,
                timestamp: chrono::Utc::now(),
            });
        }

        report
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerCtx>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<ItemJob>>>,
) {
    loop {
        let item = tokio::select! {
            _ = ctx.all_resolved.cancelled() => break,
            item = async { queue_rx.lock().await.recv().await } => item,
        };

        let Some(item) = item else { break };
        process_item(worker_id, &ctx, item).await;
    }
}

async fn process_item(worker_id: usize, ctx: &WorkerCtx, mut item: ItemJob) {
    let external_id = item.record.external_id.clone();

    // Abandoned jobs stop feeding unprocessed items; they still resolve
    if ctx.cancel.is_cancelled() || ctx.halted.load(Ordering::SeqCst) {
        ctx.resolve_item(ItemOutcome::Failed {
            external_id,
            attempts: item.attempts,
            error: item
                .last_error
                .take()
                .unwrap_or_else(|| "ingestion job abandoned".to_string()),
            classified: false,
        });
        return;
    }

    // Dedup before dispatch: never spend an endpoint call on a known id
    match ctx
        .store
        .find_by_external_id(ctx.organization_id, &external_id)
        .await
    {
        Ok(Some(_)) => {
            ctx.resolve_item(ItemOutcome::Duplicate { external_id });
            return;
        }
        Ok(None) => {}
        Err(e) => {
            halt_on_store_outage(ctx, &e);
            ctx.resolve_item(ItemOutcome::Failed {
                external_id,
                attempts: item.attempts,
                error: format!("store unavailable: {}", e),
                classified: false,
            });
            return;
        }
    }

    let Some(lease) = checkout_endpoint(ctx, &item).await else {
        // Cancelled while waiting for an endpoint slot
        ctx.resolve_item(ItemOutcome::Failed {
            external_id,
            attempts: item.attempts,
            error: "ingestion job abandoned".to_string(),
            classified: false,
        });
        return;
    };

    tracing::debug!(
        worker_id,
        endpoint = lease.client.name(),
        external_id = %external_id,
        attempt = item.attempts + 1,
        "Dispatching classification call"
    );

    let started = Instant::now();
    let result = tokio::time::timeout(
        ctx.config.request_timeout(),
        lease.client.classify(
            &external_id,
            item.record.sponsor_hint.as_deref(),
            item.record.subject_name.as_deref(),
        ),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => {
            ctx.pool.record_success(lease.index, started.elapsed());

            let track = classifier::classify(
                &outcome.label,
                outcome.confirmed_flag,
                outcome.secondary_label.as_deref(),
            );
            let (stage, auto_passed) = match (item.auto_pass, track) {
                (true, Some(track)) => (workflow::assessment_stage(track), true),
                _ => (workflow::initial_stage(track), false),
            };

            let record = CaseRecord::new(
                ctx.organization_id,
                &item.record,
                track,
                Some(outcome.label),
                outcome.confirmed_flag,
                stage,
                auto_passed,
            );

            match ctx.store.create_case(&record).await {
                Ok(WriteOutcome::Applied(_)) => {
                    ctx.resolve_item(ItemOutcome::Created { external_id });
                }
                Ok(WriteOutcome::PreconditionFailed) => {
                    // A concurrent run created this id first; still a skip
                    ctx.resolve_item(ItemOutcome::Duplicate { external_id });
                }
                Err(e) => {
                    halt_on_store_outage(ctx, &e);
                    ctx.resolve_item(ItemOutcome::Failed {
                        external_id,
                        attempts: item.attempts + 1,
                        error: format!("store unavailable: {}", e),
                        classified: true,
                    });
                }
            }
        }
        Ok(Err(e)) => {
            ctx.pool.record_failure(lease.index, &e.to_string());
            retry_or_fail(ctx, item, lease.index, e.to_string());
        }
        Err(_) => {
            let error = format!(
                "request timed out after {}s",
                ctx.config.request_timeout_secs
            );
            ctx.pool.record_failure(lease.index, &error);
            retry_or_fail(ctx, item, lease.index, error);
        }
    }
}

/// Wait for an endpoint with spare capacity, bailing out on cancellation
async fn checkout_endpoint(
    ctx: &WorkerCtx,
    item: &ItemJob,
) -> Option<crate::endpoints::EndpointLease> {
    loop {
        if let Some(lease) = ctx.pool.checkout(&item.tried_endpoints) {
            return Some(lease);
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => return None,
            _ = tokio::time::sleep(CHECKOUT_POLL_INTERVAL) => {}
        }
    }
}

/// Requeue a failed item with exponential backoff plus jitter, or record it
/// as a durable failure once the attempt budget is exhausted
fn retry_or_fail(ctx: &WorkerCtx, mut item: ItemJob, endpoint_index: usize, error: String) {
    item.attempts += 1;
    item.tried_endpoints.insert(endpoint_index);
    item.last_error = Some(error.clone());

    if item.attempts >= ctx.config.max_attempts_per_item {
        ctx.resolve_item(ItemOutcome::Failed {
            external_id: item.record.external_id.clone(),
            attempts: item.attempts,
            error,
            classified: false,
        });
        return;
    }

    let backoff = ctx
        .config
        .backoff_base()
        .saturating_mul(item.attempts)
        .min(ctx.config.backoff_cap());
    let jitter = Duration::from_millis(
        rand::thread_rng().gen_range(0..=ctx.config.backoff_base_ms.max(1)),
    );
    let delay = backoff + jitter;

    tracing::debug!(
        external_id = %item.record.external_id,
        attempt = item.attempts,
        delay_ms = delay.as_millis() as u64,
        "Requeueing item after backoff"
    );

    let queue_tx = ctx.queue_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // Send failure means the run already wound down; the item was
        // accounted for by the abandon path
        let _ = queue_tx.send(item);
    });
}

fn halt_on_store_outage(ctx: &WorkerCtx, error: &pvlit_common::Error) {
    if !ctx.halted.swap(true, Ordering::SeqCst) {
        tracing::error!(error = %error, "Record store unavailable, halting intake");
        ctx.cancel.cancel();
    }
}
