//! Integration tests for the allocation engine
//!
//! Exclusivity properties are exercised with real concurrency (JoinSet
//! fan-out) against the in-memory store, whose conditional writes carry the
//! same semantics as the SQLite backend.

mod helpers;

use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use helpers::seed_record;
use pvlit_common::events::EventBus;
use pvlit_common::Error;
use pvlit_wf::allocation::{AllocationEngine, AllocationOutcome};
use pvlit_wf::models::{
    CaseRecord, Decision, OrgSettings, ProcessingJob, Track, WorkflowStage,
};
use pvlit_wf::store::{
    AssignmentScope, MemoryStore, RecordStore, WriteOutcome,
};
use pvlit_wf::workflow::TransitionFields;

fn engine(store: Arc<dyn RecordStore>) -> AllocationEngine {
    AllocationEngine::new(store, EventBus::new(64))
}

#[tokio::test]
async fn test_allocate_none_available_when_queue_empty() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let engine = engine(store);

    let outcome = engine
        .allocate_batch(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Track::Icsr,
            WorkflowStage::TriageIcsr,
            5,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, AllocationOutcome::NoneAvailable));
}

#[tokio::test]
async fn test_allocate_locks_oldest_first() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let reviewer = Uuid::new_v4();

    // Seed newest-first so FIFO has to reorder
    for i in (0..8).rev() {
        seed_record(
            store.as_ref(),
            org,
            &format!("pmid-{}", i),
            Track::Icsr,
            WorkflowStage::TriageIcsr,
            i,
        )
        .await;
    }

    let engine = engine(store.clone());
    let outcome = engine
        .allocate_batch(org, reviewer, Track::Icsr, WorkflowStage::TriageIcsr, 3)
        .await
        .unwrap();

    let AllocationOutcome::Allocated(cases) = outcome else {
        panic!("expected allocation");
    };
    assert_eq!(cases.len(), 3);
    let ids: Vec<&str> = cases.iter().map(|c| c.external_id.as_str()).collect();
    assert_eq!(ids, vec!["pmid-0", "pmid-1", "pmid-2"]);

    // Lock fields are set by the conditional write
    for case in &cases {
        assert_eq!(case.assigned_to, Some(reviewer));
        assert!(case.locked_at.is_some());
        assert!(case.batch_id.is_some());
    }
    // All cases of one checkout share a batch id
    let batch_ids: HashSet<_> = cases.iter().map(|c| c.batch_id).collect();
    assert_eq!(batch_ids.len(), 1);
}

#[tokio::test]
async fn test_idempotent_resume_returns_same_batch() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let reviewer = Uuid::new_v4();

    for i in 0..6 {
        seed_record(
            store.as_ref(),
            org,
            &format!("pmid-{}", i),
            Track::Aoi,
            WorkflowStage::TriageQueueAoi,
            i,
        )
        .await;
    }

    let engine = engine(store.clone());
    let first = engine
        .allocate_batch(org, reviewer, Track::Aoi, WorkflowStage::TriageQueueAoi, 4)
        .await
        .unwrap();
    let second = engine
        .allocate_batch(org, reviewer, Track::Aoi, WorkflowStage::TriageQueueAoi, 4)
        .await
        .unwrap();

    let (AllocationOutcome::Allocated(first), AllocationOutcome::Allocated(second)) =
        (first, second)
    else {
        panic!("expected allocations");
    };

    let first_ids: HashSet<Uuid> = first.iter().map(|c| c.id).collect();
    let second_ids: HashSet<Uuid> = second.iter().map(|c| c.id).collect();
    assert_eq!(first_ids, second_ids);

    // The resume did not bump versions (records returned unchanged)
    assert_eq!(
        first.iter().map(|c| c.version).collect::<Vec<_>>(),
        second.iter().map(|c| c.version).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_release_roundtrip_makes_records_allocatable_again() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let reviewer = Uuid::new_v4();

    for i in 0..3 {
        seed_record(
            store.as_ref(),
            org,
            &format!("pmid-{}", i),
            Track::NoCase,
            WorkflowStage::TriageQueueNoCase,
            i,
        )
        .await;
    }

    let engine = engine(store.clone());
    let outcome = engine
        .allocate_batch(
            org,
            reviewer,
            Track::NoCase,
            WorkflowStage::TriageQueueNoCase,
            3,
        )
        .await
        .unwrap();
    let AllocationOutcome::Allocated(cases) = outcome else {
        panic!("expected allocation");
    };
    assert_eq!(cases.len(), 3);

    let released = engine
        .release_batch(
            org,
            reviewer,
            Some(Track::NoCase),
            Some(WorkflowStage::TriageQueueNoCase),
        )
        .await
        .unwrap();
    assert_eq!(released, 3);

    // Released records have their lock fields cleared
    for case in &cases {
        let stored = store.get_case(org, case.id).await.unwrap().unwrap();
        assert!(stored.assigned_to.is_none());
        assert!(stored.locked_at.is_none());
        assert!(stored.batch_id.is_none());
    }

    // A different reviewer can now take the whole pool
    let outcome = engine
        .allocate_batch(
            org,
            Uuid::new_v4(),
            Track::NoCase,
            WorkflowStage::TriageQueueNoCase,
            3,
        )
        .await
        .unwrap();
    let AllocationOutcome::Allocated(cases) = outcome else {
        panic!("expected allocation after release");
    };
    assert_eq!(cases.len(), 3);
}

#[tokio::test]
async fn test_concurrent_reviewers_never_share_a_record() {
    // 5 reviewers, 12 unassigned records, batch size 5: the union of all
    // returned ids is a set of exactly 12, and empty-handed reviewers get the
    // explicit none-available/contention signal rather than an empty success.
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();

    for i in 0..12 {
        seed_record(
            store.as_ref(),
            org,
            &format!("pmid-{}", i),
            Track::Icsr,
            WorkflowStage::TriageIcsr,
            i,
        )
        .await;
    }

    let engine = Arc::new(engine(store.clone()));
    let mut join_set = JoinSet::new();
    for _ in 0..5 {
        let engine = Arc::clone(&engine);
        let reviewer = Uuid::new_v4();
        join_set.spawn(async move {
            engine
                .allocate_batch(org, reviewer, Track::Icsr, WorkflowStage::TriageIcsr, 5)
                .await
                .unwrap()
        });
    }

    let mut all_ids = Vec::new();
    let mut empty_handed = 0;
    while let Some(result) = join_set.join_next().await {
        match result.unwrap() {
            AllocationOutcome::Allocated(cases) => {
                assert!(!cases.is_empty());
                assert!(cases.len() <= 5);
                all_ids.extend(cases.iter().map(|c| c.id));
            }
            AllocationOutcome::NoneAvailable | AllocationOutcome::Contention => {
                empty_handed += 1;
            }
        }
    }

    let unique: HashSet<_> = all_ids.iter().copied().collect();
    assert_eq!(unique.len(), all_ids.len(), "a record was double-allocated");
    assert_eq!(unique.len(), 12, "every record allocated exactly once");
    assert!(empty_handed >= 1, "12 records cannot fill 5x5 batches");
}

/// Store wrapper whose try_assign always loses the race; drives the
/// all-candidates-raced-away branch deterministically
struct ContendedStore(MemoryStore);

#[async_trait::async_trait]
impl RecordStore for ContendedStore {
    async fn get_case(&self, org: Uuid, id: Uuid) -> pvlit_common::Result<Option<CaseRecord>> {
        self.0.get_case(org, id).await
    }

    async fn find_by_external_id(
        &self,
        org: Uuid,
        external_id: &str,
    ) -> pvlit_common::Result<Option<CaseRecord>> {
        self.0.find_by_external_id(org, external_id).await
    }

    async fn create_case(
        &self,
        record: &CaseRecord,
    ) -> pvlit_common::Result<WriteOutcome<CaseRecord>> {
        self.0.create_case(record).await
    }

    async fn query_unassigned(
        &self,
        org: Uuid,
        track: Track,
        stage: WorkflowStage,
        limit: usize,
    ) -> pvlit_common::Result<Vec<CaseRecord>> {
        self.0.query_unassigned(org, track, stage, limit).await
    }

    async fn query_assigned(
        &self,
        org: Uuid,
        reviewer: Uuid,
        scope: AssignmentScope,
    ) -> pvlit_common::Result<Vec<CaseRecord>> {
        self.0.query_assigned(org, reviewer, scope).await
    }

    async fn try_assign(
        &self,
        _org: Uuid,
        _id: Uuid,
        _reviewer: Uuid,
        _batch_id: Uuid,
        _version: i64,
    ) -> pvlit_common::Result<WriteOutcome<CaseRecord>> {
        Ok(WriteOutcome::PreconditionFailed)
    }

    async fn release_assignment(
        &self,
        org: Uuid,
        id: Uuid,
        reviewer: Uuid,
    ) -> pvlit_common::Result<Option<CaseRecord>> {
        self.0.release_assignment(org, id, reviewer).await
    }

    async fn apply_transition(
        &self,
        org: Uuid,
        id: Uuid,
        fields: &TransitionFields,
        version: i64,
    ) -> pvlit_common::Result<WriteOutcome<CaseRecord>> {
        self.0.apply_transition(org, id, fields, version).await
    }

    async fn put_job(&self, job: &ProcessingJob) -> pvlit_common::Result<()> {
        self.0.put_job(job).await
    }

    async fn get_job(
        &self,
        org: Uuid,
        job_id: Uuid,
    ) -> pvlit_common::Result<Option<ProcessingJob>> {
        self.0.get_job(org, job_id).await
    }

    async fn fail_stale_jobs(&self) -> pvlit_common::Result<usize> {
        self.0.fail_stale_jobs().await
    }

    async fn get_org_settings(&self, org: Uuid) -> pvlit_common::Result<Option<OrgSettings>> {
        self.0.get_org_settings(org).await
    }

    async fn put_org_settings(
        &self,
        org: Uuid,
        settings: OrgSettings,
    ) -> pvlit_common::Result<()> {
        self.0.put_org_settings(org, settings).await
    }
}

#[tokio::test]
async fn test_all_candidates_raced_away_reports_contention() {
    let inner = MemoryStore::new();
    let org = Uuid::new_v4();
    for i in 0..3 {
        seed_record(
            &inner,
            org,
            &format!("pmid-{}", i),
            Track::Icsr,
            WorkflowStage::TriageIcsr,
            i,
        )
        .await;
    }

    let store: Arc<dyn RecordStore> = Arc::new(ContendedStore(inner));
    let engine = engine(store);

    let outcome = engine
        .allocate_batch(
            org,
            Uuid::new_v4(),
            Track::Icsr,
            WorkflowStage::TriageIcsr,
            5,
        )
        .await
        .unwrap();

    // Candidates existed but every lock was lost: "try again", not "empty"
    assert!(matches!(outcome, AllocationOutcome::Contention));
}

#[tokio::test]
async fn test_lock_single_conflicts_with_other_holder() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let record = seed_record(
        store.as_ref(),
        org,
        "pmid-1",
        Track::Icsr,
        WorkflowStage::AssessmentIcsr,
        0,
    )
    .await;

    let engine = engine(store.clone());
    let holder = Uuid::new_v4();
    engine.lock_single(org, holder, record.id).await.unwrap();

    let result = engine.lock_single(org, Uuid::new_v4(), record.id).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_lock_single_auto_releases_previous_holding() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let reviewer = Uuid::new_v4();

    let first = seed_record(
        store.as_ref(),
        org,
        "pmid-1",
        Track::Icsr,
        WorkflowStage::AssessmentIcsr,
        0,
    )
    .await;
    let second = seed_record(
        store.as_ref(),
        org,
        "pmid-2",
        Track::Icsr,
        WorkflowStage::AssessmentIcsr,
        1,
    )
    .await;

    let engine = engine(store.clone());
    engine.lock_single(org, reviewer, first.id).await.unwrap();
    engine.lock_single(org, reviewer, second.id).await.unwrap();

    // Last-writer-wins: the earlier holding was dropped automatically
    let stored_first = store.get_case(org, first.id).await.unwrap().unwrap();
    assert!(stored_first.assigned_to.is_none());
    let stored_second = store.get_case(org, second.id).await.unwrap().unwrap();
    assert_eq!(stored_second.assigned_to, Some(reviewer));
}

#[tokio::test]
async fn test_route_record_applies_transition_and_clears_lock() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let reviewer = Uuid::new_v4();
    let record = seed_record(
        store.as_ref(),
        org,
        "pmid-1",
        Track::NoCase,
        WorkflowStage::TriageQueueNoCase,
        0,
    )
    .await;

    let engine = engine(store.clone());
    engine.lock_single(org, reviewer, record.id).await.unwrap();

    // The safety-net rule: AOI decision in the no-case queue escalates to
    // full ICSR triage
    let updated = engine
        .route_record(org, reviewer, record.id, Decision::MoveToAoi, Some("looks AOI"))
        .await
        .unwrap();

    assert_eq!(updated.stage, WorkflowStage::TriageIcsr);
    assert_eq!(updated.track, Some(Track::Icsr));
    assert!(updated.assigned_to.is_none());
    assert!(updated.locked_at.is_none());
    assert!(updated.batch_id.is_none());
}

#[tokio::test]
async fn test_route_record_unmatched_decision_releases_without_moving() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let reviewer = Uuid::new_v4();
    let record = seed_record(
        store.as_ref(),
        org,
        "pmid-1",
        Track::Icsr,
        WorkflowStage::AssessmentIcsr,
        0,
    )
    .await;

    let engine = engine(store.clone());
    engine.lock_single(org, reviewer, record.id).await.unwrap();

    // No transition rule exists for assessment stages: the lock is released,
    // track and stage stay put, and the call does not error
    let updated = engine
        .route_record(org, reviewer, record.id, Decision::MoveToNoCase, None)
        .await
        .unwrap();

    assert_eq!(updated.stage, WorkflowStage::AssessmentIcsr);
    assert_eq!(updated.track, Some(Track::Icsr));
    assert!(updated.assigned_to.is_none());
}

#[tokio::test]
async fn test_stale_version_fails_transition_without_partial_state() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();
    let record = seed_record(
        store.as_ref(),
        org,
        "pmid-1",
        Track::Icsr,
        WorkflowStage::TriageIcsr,
        0,
    )
    .await;

    // Another writer bumps the version
    let reviewer = Uuid::new_v4();
    store
        .try_assign(org, record.id, reviewer, Uuid::new_v4(), record.version)
        .await
        .unwrap();

    // A write against the stale token is refused outright
    let fields = pvlit_wf::workflow::apply_decision(record.stage, Decision::MoveToIcsr);
    let outcome = store
        .apply_transition(org, record.id, &fields, record.version)
        .await
        .unwrap();
    assert!(matches!(outcome, WriteOutcome::PreconditionFailed));

    // Nothing moved
    let stored = store.get_case(org, record.id).await.unwrap().unwrap();
    assert_eq!(stored.stage, WorkflowStage::TriageIcsr);
    assert_eq!(stored.assigned_to, Some(reviewer));
}

#[tokio::test]
async fn test_unset_track_records_surface_in_manual_triage_queue() {
    let store = Arc::new(MemoryStore::new());
    let org = Uuid::new_v4();

    // A record held without a track sits in the ICSR triage stage
    let raw = helpers::raw_record("pmid-unset");
    let mut record = CaseRecord::new(
        org,
        &raw,
        None,
        Some("inconclusive".to_string()),
        false,
        WorkflowStage::TriageIcsr,
        false,
    );
    record.created_at = chrono::Utc::now();
    store.create_case(&record).await.unwrap();

    let engine = engine(store.clone());
    let outcome = engine
        .allocate_batch(
            org,
            Uuid::new_v4(),
            Track::Icsr,
            WorkflowStage::TriageIcsr,
            5,
        )
        .await
        .unwrap();

    let AllocationOutcome::Allocated(cases) = outcome else {
        panic!("expected the unset-track record to be allocatable");
    };
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0].track, None);
}
