//! Workflow state machine
//!
//! Owns initial placement at creation and the transition rules for triage,
//! allocation, assessment, and routing between tracks. Transitions compute
//! field updates; the store applies them under its conditional-write
//! primitive, so this module stays pure and unit-testable.

pub mod autopass;

use crate::models::{Decision, SubStatus, Track, WorkflowStage};

/// Field updates produced by a workflow transition.
///
/// `None` fields are left untouched by the store. Lock fields (`assigned_to`,
/// `allocated_at`, `locked_at`, `batch_id`) are cleared unconditionally on
/// every transition, matched or not, so a reviewed record never stays locked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionFields {
    pub stage: Option<WorkflowStage>,
    pub track: Option<Track>,
    pub sub_status: Option<SubStatus>,
    pub status_label: Option<String>,
    pub last_queue_stage: Option<WorkflowStage>,
}

impl TransitionFields {
    /// A transition that only releases the reviewer's lock
    pub fn release_only() -> Self {
        Self::default()
    }

    fn to_stage(stage: WorkflowStage, track: Track) -> Self {
        Self {
            stage: Some(stage),
            track: Some(track),
            sub_status: Some(stage.sub_status()),
            status_label: Some(stage.status_label().to_string()),
            last_queue_stage: None,
        }
    }

    fn with_breadcrumb(mut self, from: WorkflowStage) -> Self {
        self.last_queue_stage = Some(from);
        self
    }

    /// Whether this transition moves the record (vs. lock release only)
    pub fn is_matched(&self) -> bool {
        self.stage.is_some()
    }
}

/// Initial stage for a freshly classified record.
///
/// Records without a track are held in the ICSR triage stage for manual
/// review; they are not committed to any track.
pub fn initial_stage(track: Option<Track>) -> WorkflowStage {
    match track {
        Some(Track::Icsr) | None => WorkflowStage::TriageIcsr,
        Some(Track::Aoi) => WorkflowStage::TriageQueueAoi,
        Some(Track::NoCase) => WorkflowStage::TriageQueueNoCase,
    }
}

/// Assessment stage for a track (auto-pass target)
pub fn assessment_stage(track: Track) -> WorkflowStage {
    match track {
        Track::Icsr => WorkflowStage::AssessmentIcsr,
        Track::Aoi => WorkflowStage::AssessmentAoi,
        Track::NoCase => WorkflowStage::AssessmentNoCase,
    }
}

/// Triage stage for a track (default allocation scope)
pub fn triage_stage(track: Track) -> WorkflowStage {
    match track {
        Track::Icsr => WorkflowStage::TriageIcsr,
        Track::Aoi => WorkflowStage::TriageQueueAoi,
        Track::NoCase => WorkflowStage::TriageQueueNoCase,
    }
}

/// Apply a reviewer decision to the record's current stage.
///
/// Transition table:
///
/// | From | Decision | New stage | New track |
/// |---|---|---|---|
/// | TRIAGE_ICSR | ICSR | ASSESSMENT_ICSR | ICSR |
/// | TRIAGE_ICSR | AOI | ASSESSMENT_AOI | AOI |
/// | TRIAGE_ICSR | NoCase | ASSESSMENT_NO_CASE | NoCase |
/// | TRIAGE_QUEUE_AOI | ICSR | TRIAGE_ICSR | ICSR |
/// | TRIAGE_QUEUE_AOI | AOI | ASSESSMENT_AOI | AOI (breadcrumb) |
/// | TRIAGE_QUEUE_AOI | NoCase | ASSESSMENT_NO_CASE | NoCase |
/// | TRIAGE_QUEUE_NO_CASE | ICSR | TRIAGE_ICSR | ICSR |
/// | TRIAGE_QUEUE_NO_CASE | AOI | TRIAGE_ICSR | ICSR |
/// | TRIAGE_QUEUE_NO_CASE | NoCase | ASSESSMENT_NO_CASE | NoCase |
///
/// An AOI finding in the no-case queue escalates to full ICSR triage rather
/// than going straight to AOI assessment; the classification label is left
/// untouched on that row. Unmatched (stage, decision) pairs log a warning and
/// release the lock without moving the record - a data-quality signal, never
/// an error.
pub fn apply_decision(current: WorkflowStage, decision: Decision) -> TransitionFields {
    use Decision::*;
    use WorkflowStage::*;

    match (current, decision) {
        (TriageIcsr, MoveToIcsr) => {
            TransitionFields::to_stage(AssessmentIcsr, Track::Icsr)
        }
        (TriageIcsr, MoveToAoi) => TransitionFields::to_stage(AssessmentAoi, Track::Aoi),
        (TriageIcsr, MoveToNoCase) => {
            TransitionFields::to_stage(AssessmentNoCase, Track::NoCase)
        }

        (TriageQueueAoi, MoveToIcsr) => TransitionFields::to_stage(TriageIcsr, Track::Icsr),
        (TriageQueueAoi, MoveToAoi) => {
            TransitionFields::to_stage(AssessmentAoi, Track::Aoi).with_breadcrumb(TriageQueueAoi)
        }
        (TriageQueueAoi, MoveToNoCase) => {
            TransitionFields::to_stage(AssessmentNoCase, Track::NoCase)
        }

        (TriageQueueNoCase, MoveToIcsr) => TransitionFields::to_stage(TriageIcsr, Track::Icsr),
        (TriageQueueNoCase, MoveToAoi) => TransitionFields::to_stage(TriageIcsr, Track::Icsr),
        (TriageQueueNoCase, MoveToNoCase) => {
            TransitionFields::to_stage(AssessmentNoCase, Track::NoCase)
        }

        (stage, decision) => {
            tracing::warn!(
                stage = %stage,
                decision = %decision,
                "No transition rule for stage/decision pair, releasing lock only"
            );
            TransitionFields::release_only()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_placement() {
        assert_eq!(initial_stage(Some(Track::Icsr)), WorkflowStage::TriageIcsr);
        assert_eq!(
            initial_stage(Some(Track::Aoi)),
            WorkflowStage::TriageQueueAoi
        );
        assert_eq!(
            initial_stage(Some(Track::NoCase)),
            WorkflowStage::TriageQueueNoCase
        );
        // Unset track is held at ICSR triage without committing to a track
        assert_eq!(initial_stage(None), WorkflowStage::TriageIcsr);
    }

    #[test]
    fn test_transition_table_complete() {
        use Decision::*;
        use WorkflowStage::*;

        // Every (stage, decision) pair from the table, in order
        let table = [
            (TriageIcsr, MoveToIcsr, AssessmentIcsr, Track::Icsr),
            (TriageIcsr, MoveToAoi, AssessmentAoi, Track::Aoi),
            (TriageIcsr, MoveToNoCase, AssessmentNoCase, Track::NoCase),
            (TriageQueueAoi, MoveToIcsr, TriageIcsr, Track::Icsr),
            (TriageQueueAoi, MoveToAoi, AssessmentAoi, Track::Aoi),
            (TriageQueueAoi, MoveToNoCase, AssessmentNoCase, Track::NoCase),
            (TriageQueueNoCase, MoveToIcsr, TriageIcsr, Track::Icsr),
            (TriageQueueNoCase, MoveToAoi, TriageIcsr, Track::Icsr),
            (TriageQueueNoCase, MoveToNoCase, AssessmentNoCase, Track::NoCase),
        ];

        for (from, decision, expected_stage, expected_track) in table {
            let fields = apply_decision(from, decision);
            assert_eq!(fields.stage, Some(expected_stage), "{from} + {decision}");
            assert_eq!(fields.track, Some(expected_track), "{from} + {decision}");
            assert_eq!(
                fields.sub_status,
                Some(expected_stage.sub_status()),
                "{from} + {decision}"
            );
            assert_eq!(
                fields.status_label.as_deref(),
                Some(expected_stage.status_label()),
                "{from} + {decision}"
            );
        }
    }

    #[test]
    fn test_aoi_queue_confirmation_records_breadcrumb() {
        let fields = apply_decision(WorkflowStage::TriageQueueAoi, Decision::MoveToAoi);
        assert_eq!(fields.last_queue_stage, Some(WorkflowStage::TriageQueueAoi));

        // Other transitions leave the breadcrumb alone
        let fields = apply_decision(WorkflowStage::TriageQueueAoi, Decision::MoveToIcsr);
        assert_eq!(fields.last_queue_stage, None);
    }

    #[test]
    fn test_no_case_queue_aoi_escalates_to_icsr_triage() {
        // The safety-net row: an AOI finding while reviewing no-case records
        // goes to full ICSR triage, not straight to AOI assessment
        let fields = apply_decision(WorkflowStage::TriageQueueNoCase, Decision::MoveToAoi);
        assert_eq!(fields.stage, Some(WorkflowStage::TriageIcsr));
        assert_eq!(fields.track, Some(Track::Icsr));
    }

    #[test]
    fn test_unmatched_pairs_release_lock_only() {
        use Decision::*;
        use WorkflowStage::*;

        for stage in [
            AllocationIcsr,
            AllocationAoi,
            AllocationNoCase,
            AssessmentIcsr,
            AssessmentAoi,
            AssessmentNoCase,
        ] {
            for decision in [MoveToIcsr, MoveToAoi, MoveToNoCase] {
                let fields = apply_decision(stage, decision);
                assert!(!fields.is_matched(), "{stage} + {decision}");
                assert_eq!(fields, TransitionFields::release_only());
            }
        }
    }
}
