//! Error types for cohort-forge operations.
//!
//! Defines the error taxonomy shared across the orchestration subsystems:
//! - Agent registry configuration
//! - Mind-map node storage and traversal
//! - Job submission, lookup, and lifecycle transitions

use thiserror::Error;

use crate::jobs::{JobId, JobStatus};
use crate::mindmap::NodeId;
use crate::storage::StorageError;

/// Errors raised while building or querying the agent registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("Agent '{0}' not found in registry")]
    AgentNotFound(String),

    #[error("Phase '{phase}' references unregistered agent '{agent}'")]
    UnknownAgentInPlan { phase: String, agent: String },

    #[error("Invalid phase plan: {0}")]
    InvalidPlan(String),
}

/// Errors raised by the mind-map store.
#[derive(Debug, Error)]
pub enum MindMapError {
    #[error("Node '{0}' not found")]
    NodeNotFound(NodeId),

    #[error("No mind-map registered for job '{0}'")]
    JobNotFound(JobId),

    #[error("Parent node '{0}' not found")]
    ParentNotFound(NodeId),

    /// A terminal node was re-opened or written twice.
    #[error("Node '{0}' already has a terminal status and cannot be modified")]
    NodeImmutable(NodeId),

    #[error("Edge {parent} -> {child_phase} points backwards from phase {parent_phase}")]
    BackwardEdge {
        parent: NodeId,
        parent_phase: u32,
        child_phase: u32,
    },

    #[error("Parent node '{parent}' belongs to job '{parent_job}', not '{job}'")]
    CrossJobEdge {
        parent: NodeId,
        parent_job: JobId,
        job: JobId,
    },

    #[error("Job '{0}' already has a root node")]
    DuplicateRoot(JobId),

    #[error("Node '{0}' was committed without any reasoning steps")]
    MissingReasoning(NodeId),

    #[error("Invalid node record: {0}")]
    InvalidRecord(String),
}

/// Errors surfaced by the job orchestrator to its callers.
#[derive(Debug, Error)]
pub enum JobError {
    /// The submission failed validation; no state was created.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Results were requested before the job completed.
    #[error("Job '{job_id}' is not ready (status: {status})")]
    NotReady { job_id: JobId, status: JobStatus },

    #[error("Invalid status transition from '{from}' to '{to}'")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Mind-map error: {0}")]
    MindMap(MindMapError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::pipeline::ConfigError),
}

impl From<MindMapError> for JobError {
    fn from(err: MindMapError) -> Self {
        match err {
            MindMapError::NodeNotFound(id) => JobError::NotFound(format!("node '{}'", id)),
            MindMapError::JobNotFound(id) => JobError::NotFound(format!("job '{}'", id)),
            other => JobError::MindMap(other),
        }
    }
}

impl JobError {
    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::NotReady { .. })
    }
}
