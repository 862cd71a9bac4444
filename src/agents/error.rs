//! Error types for agent invocations.
//!
//! Distinguishes genuine agent failures from timeouts and from contract
//! violations detected by the registry's invocation wrapper.

use thiserror::Error;

/// Errors that can occur during a single agent invocation.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent could not produce its output.
    #[error("Agent failure: {0}")]
    Failure(String),

    /// The agent exceeded its configured time budget.
    #[error("Agent '{agent}' timed out after {millis} ms")]
    Timeout { agent: String, millis: u64 },

    /// The invocation observed a cancellation request before finishing.
    #[error("Invocation cancelled")]
    Cancelled,

    /// An agent emitted an assessment its category is not allowed to produce.
    #[error("Agent '{agent}' is not authorized to emit a {kind} assessment")]
    UnauthorizedAssessment { agent: String, kind: String },

    /// The agent returned an outcome without any chain-of-thought steps.
    #[error("Agent '{0}' returned no reasoning steps")]
    MissingReasoning(String),

    /// A required upstream output was missing from the invocation input.
    #[error("Missing input '{0}'")]
    MissingInput(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Returns true if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::Timeout { .. })
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
