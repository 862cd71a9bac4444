//! Agents: role-tagged computation units and their registry.
//!
//! Every agent implements the single [`Agent`] trait. The registry and the
//! phase runner treat agents uniformly; role-specific ordering lives in the
//! phase runner, not in the agents.

pub mod catalog;
pub mod error;
pub mod registry;
pub mod types;

pub use catalog::{builtin_agents, register_builtin, BuiltinAgent, ROOT_AGENT};
pub use error::{AgentError, AgentResult};
pub use registry::{Agent, AgentRegistry, InvocationReport, DEFAULT_AGENT_TIMEOUT};
pub use types::{
    AgentCategory, AgentDescriptor, AgentOutcome, AgentRole, ClinicalAssessment, Finding,
    FindingSeverity, InvocationContext, PrivacyAssessment, RiskLevel,
};
