//! Job records and the job table.
//!
//! A job is created when a generation request is accepted and owns every
//! mind-map node produced while it runs. Its terminal record is written once.

pub mod results;
pub mod table;
pub mod types;

pub use results::{
    AgentExecutionDetail, ClinicalAssessmentRecord, JobResults, PerformanceMetrics,
    PrivacyAssessmentRecord,
};
pub use table::{JobEntry, JobTable};
pub use types::{
    CancelOutcome, GenerationRequest, Job, JobFailure, JobId, JobSnapshot, JobStatus,
    PhaseResult, PrivacyLevel, ResultSummary, SubmitReceipt,
};
