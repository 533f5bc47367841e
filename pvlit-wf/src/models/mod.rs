//! Domain models for the workflow core

mod case_record;
mod job;

pub use case_record::{
    CaseRecord, Decision, OrgSettings, RawRecord, SubStatus, Track, TrackParseError,
    WorkflowStage,
};
pub use job::{ItemFailure, JobMetadata, JobStatus, ProcessingJob};
