//! Job definitions for the orchestrator.
//!
//! This module defines the core job types:
//!
//! - `GenerationRequest`: what the client asked for
//! - `JobStatus`: the job state machine
//! - `Job`: the mutable job record owned by the orchestrator
//! - `JobSnapshot`: a consistent read-only copy for status queries

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agents::{Finding, RiskLevel};
use crate::error::JobError;
use crate::mindmap::NodeId;

/// Unique identifier of a job.
pub type JobId = Uuid;

// ============================================================================
// Request
// ============================================================================

/// Requested strength of privacy protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivacyLevel::Low => write!(f, "low"),
            PrivacyLevel::Medium => write!(f, "medium"),
            PrivacyLevel::High => write!(f, "high"),
        }
    }
}

/// A synthetic cohort generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Number of synthetic patients to generate.
    pub population_size: u64,
    /// Target condition, e.g. "CKD+Diabetes".
    pub condition: String,
    /// Opaque configuration passed through to agents.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    /// Whether adversarial agents run.
    #[serde(default)]
    pub enable_adversarial_testing: bool,
    /// Whether the clinical reviewer runs.
    #[serde(default)]
    pub require_clinical_review: bool,
    #[serde(default)]
    pub privacy_level: PrivacyLevel,
}

impl GenerationRequest {
    pub fn new(population_size: u64, condition: impl Into<String>) -> Self {
        Self {
            population_size,
            condition: condition.into(),
            config: BTreeMap::new(),
            enable_adversarial_testing: false,
            require_clinical_review: false,
            privacy_level: PrivacyLevel::default(),
        }
    }

    pub fn with_adversarial_testing(mut self, enabled: bool) -> Self {
        self.enable_adversarial_testing = enabled;
        self
    }

    pub fn with_clinical_review(mut self, required: bool) -> Self {
        self.require_clinical_review = required;
        self
    }

    pub fn with_privacy_level(mut self, level: PrivacyLevel) -> Self {
        self.privacy_level = level;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Validates the request against the configured population limit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the population is zero or above `max_population`,
    /// or if the condition is blank.
    pub fn validate(&self, max_population: u64) -> Result<(), JobError> {
        if self.population_size == 0 {
            return Err(JobError::InvalidRequest(
                "population_size must be greater than 0".to_string(),
            ));
        }
        if self.population_size > max_population {
            return Err(JobError::InvalidRequest(format!(
                "population_size {} exceeds the maximum of {}",
                self.population_size, max_population
            )));
        }
        if self.condition.trim().is_empty() {
            return Err(JobError::InvalidRequest(
                "condition must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Returns true if the state machine allows moving to `next`.
    ///
    /// Pending -> Running -> {Completed | Failed | Cancelled}; a pending job
    /// may also be cancelled before it starts.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ============================================================================
// Job record
// ============================================================================

/// Output of one completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub index: u32,
    pub name: String,
    /// Outputs of the phase's agents keyed by agent id.
    pub output: Value,
    /// Nodes created by the phase, in creation order.
    pub nodes: Vec<NodeId>,
    pub findings: Vec<Finding>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Where and why a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub phase: String,
    pub phase_index: u32,
    pub agent: String,
    pub reason: String,
}

/// Summary populated when a job completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub phases_completed: usize,
    pub total_nodes: usize,
    pub agent_run_count: u32,
    pub findings_count: usize,
    pub duration_ms: u64,
    #[serde(default)]
    pub privacy_risk: Option<RiskLevel>,
    #[serde(default)]
    pub clinical_approved: Option<bool>,
}

/// The mutable record of one job.
///
/// Only the orchestrator task driving the job writes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: GenerationRequest,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress in [0, 100].
    pub progress: f64,
    pub current_phase: Option<String>,
    pub current_phase_index: Option<u32>,
    pub current_agent: Option<String>,
    pub root_node: Option<NodeId>,
    pub agent_run_count: u32,
    pub phase_results: BTreeMap<String, PhaseResult>,
    pub failure: Option<JobFailure>,
    pub result_summary: Option<ResultSummary>,
    pub estimated_completion: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job expected to take `estimate`.
    pub fn new(request: GenerationRequest, estimate: std::time::Duration) -> Self {
        let created_at = Utc::now();
        let estimate = ChronoDuration::from_std(estimate).unwrap_or_else(|_| ChronoDuration::zero());
        Self {
            id: Uuid::new_v4(),
            request,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            current_phase: None,
            current_phase_index: None,
            current_agent: None,
            root_node: None,
            agent_run_count: 0,
            phase_results: BTreeMap::new(),
            failure: None,
            result_summary: None,
            estimated_completion: created_at + estimate,
        }
    }

    /// Moves the job to `next`, stamping start and completion times.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the state machine forbids the move.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
            self.current_agent = None;
        }
        if next == JobStatus::Completed {
            self.progress = 100.0;
        }
        self.status = next;
        Ok(())
    }

    /// Raises progress to `value`; never lowers it.
    pub fn advance_progress(&mut self, value: f64) {
        let value = value.clamp(0.0, 100.0);
        if value > self.progress {
            self.progress = value;
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            (Some(start), None) => (Utc::now() - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    /// Returns a read-only copy for status queries.
    pub fn snapshot(&self, cancel_requested: bool) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            status: self.status,
            progress: self.progress,
            current_phase: self.current_phase.clone(),
            current_phase_index: self.current_phase_index,
            current_agent: self.current_agent.clone(),
            agent_run_count: self.agent_run_count,
            root_node: self.root_node,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            estimated_completion: self.estimated_completion,
            failure: self.failure.clone(),
            cancel_requested,
        }
    }
}

/// Consistent status snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: f64,
    pub current_phase: Option<String>,
    pub current_phase_index: Option<u32>,
    pub current_agent: Option<String>,
    pub agent_run_count: u32,
    pub root_node: Option<NodeId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: DateTime<Utc>,
    pub failure: Option<JobFailure>,
    /// True once cancellation was requested, even if the job is still winding down.
    pub cancel_requested: bool,
}

/// Returned to the caller of `submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    /// Always "started".
    pub status: String,
    pub estimated_completion_time: DateTime<Utc>,
}

impl SubmitReceipt {
    pub fn started(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: "started".to_string(),
            estimated_completion_time: job.estimated_completion,
        }
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Cancellation was signalled to the running job.
    Requested,
    /// The job was already terminal; nothing changed.
    AlreadyTerminal,
}
