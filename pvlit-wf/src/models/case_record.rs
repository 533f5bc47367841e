//! Case record model and workflow enums
//!
//! A case record is the unit of work: one literature article inside one
//! organization, carrying its classification track, workflow stage, and
//! allocation lock fields. Fields are flat (no nested workflow object) so the
//! store can filter on any of them individually.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Processing track a record is routed into after classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Track {
    /// Confirmed/probable individual case safety report
    Icsr,
    /// Area of interest: worth assessment, not a case
    Aoi,
    /// No case
    NoCase,
}

impl Track {
    /// Convert to database string representation
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Track::Icsr => "ICSR",
            Track::Aoi => "AOI",
            Track::NoCase => "NO_CASE",
        }
    }

    /// Parse from database string representation
    pub fn from_db_str(s: &str) -> Result<Self, TrackParseError> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "ICSR" => Ok(Track::Icsr),
            "AOI" => Ok(Track::Aoi),
            "NO_CASE" | "NOCASE" => Ok(Track::NoCase),
            _ => Err(TrackParseError(s.to_string())),
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Track {
    type Err = TrackParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid track string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackParseError(pub String);

impl fmt::Display for TrackParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid track: {}", self.0)
    }
}

impl std::error::Error for TrackParseError {}

/// Coarse phase within the workflow, used for query filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubStatus {
    Triage,
    Allocation,
    Assessment,
}

impl SubStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SubStatus::Triage => "triage",
            SubStatus::Allocation => "allocation",
            SubStatus::Assessment => "assessment",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "triage" => Some(SubStatus::Triage),
            "allocation" => Some(SubStatus::Allocation),
            "assessment" => Some(SubStatus::Assessment),
            _ => None,
        }
    }
}

/// Workflow state-machine node a record currently occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStage {
    TriageIcsr,
    TriageQueueAoi,
    TriageQueueNoCase,
    AllocationIcsr,
    AllocationAoi,
    AllocationNoCase,
    AssessmentIcsr,
    AssessmentAoi,
    AssessmentNoCase,
}

impl WorkflowStage {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            WorkflowStage::TriageIcsr => "TRIAGE_ICSR",
            WorkflowStage::TriageQueueAoi => "TRIAGE_QUEUE_AOI",
            WorkflowStage::TriageQueueNoCase => "TRIAGE_QUEUE_NO_CASE",
            WorkflowStage::AllocationIcsr => "ALLOCATION_ICSR",
            WorkflowStage::AllocationAoi => "ALLOCATION_AOI",
            WorkflowStage::AllocationNoCase => "ALLOCATION_NO_CASE",
            WorkflowStage::AssessmentIcsr => "ASSESSMENT_ICSR",
            WorkflowStage::AssessmentAoi => "ASSESSMENT_AOI",
            WorkflowStage::AssessmentNoCase => "ASSESSMENT_NO_CASE",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "TRIAGE_ICSR" => Some(WorkflowStage::TriageIcsr),
            "TRIAGE_QUEUE_AOI" => Some(WorkflowStage::TriageQueueAoi),
            "TRIAGE_QUEUE_NO_CASE" => Some(WorkflowStage::TriageQueueNoCase),
            "ALLOCATION_ICSR" => Some(WorkflowStage::AllocationIcsr),
            "ALLOCATION_AOI" => Some(WorkflowStage::AllocationAoi),
            "ALLOCATION_NO_CASE" => Some(WorkflowStage::AllocationNoCase),
            "ASSESSMENT_ICSR" => Some(WorkflowStage::AssessmentIcsr),
            "ASSESSMENT_AOI" => Some(WorkflowStage::AssessmentAoi),
            "ASSESSMENT_NO_CASE" => Some(WorkflowStage::AssessmentNoCase),
            _ => None,
        }
    }

    /// Coarse phase this stage belongs to
    pub fn sub_status(&self) -> SubStatus {
        match self {
            WorkflowStage::TriageIcsr
            | WorkflowStage::TriageQueueAoi
            | WorkflowStage::TriageQueueNoCase => SubStatus::Triage,
            WorkflowStage::AllocationIcsr
            | WorkflowStage::AllocationAoi
            | WorkflowStage::AllocationNoCase => SubStatus::Allocation,
            WorkflowStage::AssessmentIcsr
            | WorkflowStage::AssessmentAoi
            | WorkflowStage::AssessmentNoCase => SubStatus::Assessment,
        }
    }

    /// Human-readable status label mirroring the stage
    pub fn status_label(&self) -> &'static str {
        match self {
            WorkflowStage::TriageIcsr => "Under Triage Review",
            WorkflowStage::TriageQueueAoi => "In AOI Triage Queue",
            WorkflowStage::TriageQueueNoCase => "In No-Case Triage Queue",
            WorkflowStage::AllocationIcsr
            | WorkflowStage::AllocationAoi
            | WorkflowStage::AllocationNoCase => "Awaiting Allocation",
            WorkflowStage::AssessmentIcsr => "Under Case Assessment",
            WorkflowStage::AssessmentAoi => "Under AOI Assessment",
            WorkflowStage::AssessmentNoCase => "Under No-Case Assessment",
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Reviewer decision fed into the workflow transition function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    MoveToIcsr,
    MoveToAoi,
    MoveToNoCase,
}

impl Decision {
    /// Parse a routing destination as submitted by the HTTP layer
    pub fn from_destination(s: &str) -> Option<Self> {
        match Track::from_db_str(s) {
            Ok(Track::Icsr) => Some(Decision::MoveToIcsr),
            Ok(Track::Aoi) => Some(Decision::MoveToAoi),
            Ok(Track::NoCase) => Some(Decision::MoveToNoCase),
            Err(_) => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::MoveToIcsr => "MOVE_TO_ICSR",
            Decision::MoveToAoi => "MOVE_TO_AOI",
            Decision::MoveToNoCase => "MOVE_TO_NO_CASE",
        };
        write!(f, "{}", s)
    }
}

/// A raw literature record as submitted for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// External identifier (PMID or equivalent), the dedup key within an org
    pub external_id: String,
    pub title: String,
    /// Free-text payload (abstract or full-text excerpt)
    #[serde(default)]
    pub payload: String,
    /// Sponsor name passed through to the classification endpoints
    #[serde(default)]
    pub sponsor_hint: Option<String>,
    /// Subject (drug) name passed through to the classification endpoints
    #[serde(default)]
    pub subject_name: Option<String>,
}

/// Per-organization settings read through the store
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrgSettings {
    /// Percentage of an ingestion batch that skips triage (0-100)
    pub auto_pass_percent: u8,
}

/// The unit of work: one literature record inside one organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// External identifier (PMID or equivalent), unique per organization
    pub external_id: String,
    pub title: String,
    pub payload: String,

    /// Track is set at most once at creation; only an explicit re-route
    /// transition changes it afterwards. `None` means the record is held for
    /// manual triage without a track.
    pub track: Option<Track>,
    /// Raw upstream classification string
    pub classification_label: Option<String>,
    /// Upstream confirmation hint, independent of the label
    pub confirmed_flag: bool,

    pub stage: WorkflowStage,
    pub sub_status: SubStatus,
    pub is_auto_passed: bool,
    /// Breadcrumb for the escalation return path
    pub last_queue_stage: Option<WorkflowStage>,

    pub assigned_to: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Human-readable label mirroring the stage
    pub status: String,

    /// Version token minted by the store; required on conditional mutations
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaseRecord {
    /// Create a new record in the given stage
    ///
    /// Lock fields start clear; version starts at 1 and the store bumps it on
    /// every subsequent write.
    pub fn new(
        organization_id: Uuid,
        raw: &RawRecord,
        track: Option<Track>,
        classification_label: Option<String>,
        confirmed_flag: bool,
        stage: WorkflowStage,
        is_auto_passed: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            external_id: raw.external_id.clone(),
            title: raw.title.clone(),
            payload: raw.payload.clone(),
            track,
            classification_label,
            confirmed_flag,
            stage,
            sub_status: stage.sub_status(),
            is_auto_passed,
            last_queue_stage: None,
            assigned_to: None,
            batch_id: None,
            allocated_at: None,
            locked_at: None,
            status: stage.status_label().to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record is currently checked out to a reviewer
    pub fn is_assigned(&self) -> bool {
        self.assigned_to.is_some()
    }
}
