//! Shared test helpers: scripted endpoints and record builders
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use pvlit_wf::endpoints::{ClassificationOutcome, ClassifyEndpoint, EndpointError};
use pvlit_wf::config::PipelineConfig;
use pvlit_wf::models::{CaseRecord, RawRecord, Track, WorkflowStage};
use pvlit_wf::store::{RecordStore, WriteOutcome};

/// Scripted endpoint behavior
pub enum Behavior {
    /// Always return this classification
    Succeed {
        label: String,
        confirmed: bool,
        secondary: Option<String>,
    },
    /// Fail the first `n` calls, then succeed with the label
    FailFirstN { n: u32, label: String },
    /// Every call errors
    AlwaysFail,
    /// Sleep before answering; with a shorter request timeout this models a
    /// hung endpoint
    SlowSucceed { sleep: Duration, label: String },
}

/// Deterministic in-process endpoint for pipeline tests
pub struct ScriptedEndpoint {
    name: String,
    behavior: Behavior,
    calls: AtomicU32,
}

impl ScriptedEndpoint {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassifyEndpoint for ScriptedEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify(
        &self,
        _external_id: &str,
        _sponsor_hint: Option<&str>,
        _subject_name: Option<&str>,
    ) -> Result<ClassificationOutcome, EndpointError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Succeed {
                label,
                confirmed,
                secondary,
            } => Ok(outcome(label, *confirmed, secondary.clone())),
            Behavior::FailFirstN { n, label } => {
                if call < *n {
                    Err(EndpointError::Network("scripted failure".to_string()))
                } else {
                    Ok(outcome(label, false, None))
                }
            }
            Behavior::AlwaysFail => Err(EndpointError::Api(503, "scripted outage".to_string())),
            Behavior::SlowSucceed { sleep, label } => {
                tokio::time::sleep(*sleep).await;
                Ok(outcome(label, false, None))
            }
        }
    }
}

fn outcome(label: &str, confirmed: bool, secondary: Option<String>) -> ClassificationOutcome {
    ClassificationOutcome {
        label: label.to_string(),
        confirmed_flag: confirmed,
        secondary_label: secondary,
        raw_payload: serde_json::json!({ "label": label }),
    }
}

/// Pipeline config tuned for fast tests
pub fn fast_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 50,
        max_concurrency: 4,
        per_endpoint_concurrency: 2,
        request_timeout_secs: 1,
        max_attempts_per_item: 6,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
        circuit_breaker_threshold: 2,
        circuit_breaker_cooldown_secs: 60,
        endpoint_cooldown_ms: 0,
        progress_persist_items: 2,
        progress_persist_secs: 1,
    }
}

pub fn raw_record(external_id: &str) -> RawRecord {
    RawRecord {
        external_id: external_id.to_string(),
        title: format!("Article {}", external_id),
        payload: String::new(),
        sponsor_hint: None,
        subject_name: None,
    }
}

/// Seed one unassigned record; `age_rank` staggers `created_at` so FIFO
/// ordering is deterministic (higher rank = newer)
pub async fn seed_record(
    store: &dyn RecordStore,
    org: Uuid,
    external_id: &str,
    track: Track,
    stage: WorkflowStage,
    age_rank: i64,
) -> CaseRecord {
    let mut record = CaseRecord::new(
        org,
        &raw_record(external_id),
        Some(track),
        Some("probable case".to_string()),
        false,
        stage,
        false,
    );
    record.created_at = Utc::now() + ChronoDuration::seconds(age_rank);
    record.updated_at = record.created_at;

    match store.create_case(&record).await.unwrap() {
        WriteOutcome::Applied(record) => record,
        WriteOutcome::PreconditionFailed => panic!("seed collision for {}", external_id),
    }
}
