//! Core types shared by agents, the registry, and the phase runner.
//!
//! An agent is an opaque computation with a declared role. The registry and
//! phase runner only ever see the uniform [`InvocationContext`] going in and
//! the [`AgentOutcome`] coming out.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::jobs::{GenerationRequest, JobId};
use crate::mindmap::{PhaseRef, ReasoningStep};

// ============================================================================
// Roles and categories
// ============================================================================

/// The three fixed agent roles.
///
/// Within a phase, roles execute in tier order: Doers first, then
/// Coordinators on Doer output, then Adversarial agents on coordinated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Primary producer of phase content.
    Doer,
    /// Validates and sequences Doer output.
    Coordinator,
    /// Stress-tests coordinated output; never gates completion.
    Adversarial,
}

impl AgentRole {
    /// Execution tier within a phase (lower runs first).
    pub fn tier(&self) -> u8 {
        match self {
            AgentRole::Doer => 0,
            AgentRole::Coordinator => 1,
            AgentRole::Adversarial => 2,
        }
    }

    /// Returns all roles in tier order.
    pub fn all() -> [AgentRole; 3] {
        [
            AgentRole::Doer,
            AgentRole::Coordinator,
            AgentRole::Adversarial,
        ]
    }

    /// Returns true if a failure of this role fails the owning phase.
    pub fn gates_phase(&self) -> bool {
        !matches!(self, AgentRole::Adversarial)
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Doer => write!(f, "doer"),
            AgentRole::Coordinator => write!(f, "coordinator"),
            AgentRole::Adversarial => write!(f, "adversarial"),
        }
    }
}

/// Functional category of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    Orchestration,
    Research,
    Modeling,
    Synthesis,
    /// Privacy guards; the only category allowed to emit privacy assessments.
    Privacy,
    /// Clinical reviewers; the only category allowed to emit clinical assessments.
    Clinical,
    QualityAssurance,
    Export,
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentCategory::Orchestration => "orchestration",
            AgentCategory::Research => "research",
            AgentCategory::Modeling => "modeling",
            AgentCategory::Synthesis => "synthesis",
            AgentCategory::Privacy => "privacy",
            AgentCategory::Clinical => "clinical",
            AgentCategory::QualityAssurance => "quality_assurance",
            AgentCategory::Export => "export",
        };
        write!(f, "{}", name)
    }
}

/// Static description of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent identifier.
    pub id: String,
    /// Declared role.
    pub role: AgentRole,
    /// Functional category.
    pub category: AgentCategory,
    /// Short human-readable description of the contract.
    pub description: String,
    /// Names of the upstream outputs this agent reads.
    #[serde(default)]
    pub consumes: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        role: AgentRole,
        category: AgentCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            category,
            description: description.into(),
            consumes: Vec::new(),
        }
    }

    pub fn consuming(mut self, inputs: &[&str]) -> Self {
        self.consumes = inputs.iter().map(|s| s.to_string()).collect();
        self
    }
}

// ============================================================================
// Findings and assessments
// ============================================================================

/// Severity of an adversarial finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Info,
    Minor,
    Major,
    Critical,
}

impl std::fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingSeverity::Info => write!(f, "info"),
            FindingSeverity::Minor => write!(f, "minor"),
            FindingSeverity::Major => write!(f, "major"),
            FindingSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A flaw surfaced by an adversarial agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: FindingSeverity,
    pub summary: String,
    /// Agent whose output the finding concerns, if any.
    #[serde(default)]
    pub target_agent: Option<String>,
}

impl Finding {
    pub fn new(severity: FindingSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            target_agent: None,
        }
    }

    pub fn targeting(mut self, agent: impl Into<String>) -> Self {
        self.target_agent = Some(agent.into());
        self
    }
}

/// Re-identification risk category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Privacy characteristics of a generated cohort.
///
/// Immutable once produced; downstream QA agents only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyAssessment {
    pub risk: RiskLevel,
    /// Anonymity score in [0, 1]; higher is safer.
    pub anonymity_score: f64,
    pub safeguards: Vec<String>,
}

/// Clinical plausibility review of a generated cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalAssessment {
    pub approved: bool,
    /// Plausibility score in [0, 1].
    pub plausibility_score: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}

// ============================================================================
// Invocation input and output
// ============================================================================

/// Everything an agent receives for one invocation.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub job_id: JobId,
    pub phase: PhaseRef,
    /// 1 for the first attempt, 2 for a retry.
    pub attempt: u32,
    /// The job's original request parameters.
    pub request: Arc<GenerationRequest>,
    /// Accumulated outputs of all earlier phases, keyed by phase name.
    pub phase_input: Arc<Value>,
    /// Outputs produced earlier in the same phase, keyed by agent id.
    pub sibling_outputs: Arc<BTreeMap<String, Value>>,
    /// Cooperative cancellation signal for the owning job.
    pub cancel: CancellationToken,
}

impl InvocationContext {
    /// Returns an earlier sibling's output.
    pub fn sibling(&self, agent_id: &str) -> Option<&Value> {
        self.sibling_outputs.get(agent_id)
    }

    /// Returns the output an agent produced in an earlier phase.
    pub fn upstream(&self, phase: &str, agent_id: &str) -> Option<&Value> {
        self.phase_input.get(phase).and_then(|p| p.get(agent_id))
    }
}

/// Everything an agent returns from a successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Structured output handed to later tiers and phases.
    pub output: Value,
    /// Short decision summary.
    pub decision: String,
    /// Ordered chain-of-thought steps.
    pub reasoning: Vec<ReasoningStep>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub privacy: Option<PrivacyAssessment>,
    #[serde(default)]
    pub clinical: Option<ClinicalAssessment>,
}

impl AgentOutcome {
    pub fn new(output: Value, decision: impl Into<String>) -> Self {
        Self {
            output,
            decision: decision.into(),
            reasoning: Vec::new(),
            findings: Vec::new(),
            privacy: None,
            clinical: None,
        }
    }

    pub fn with_reasoning(mut self, steps: Vec<ReasoningStep>) -> Self {
        self.reasoning = steps;
        self
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_privacy(mut self, assessment: PrivacyAssessment) -> Self {
        self.privacy = Some(assessment);
        self
    }

    pub fn with_clinical(mut self, assessment: ClinicalAssessment) -> Self {
        self.clinical = Some(assessment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_tiers_are_ordered() {
        let tiers: Vec<u8> = AgentRole::all().iter().map(|r| r.tier()).collect();
        assert_eq!(tiers, vec![0, 1, 2]);
        assert!(AgentRole::Doer.gates_phase());
        assert!(AgentRole::Coordinator.gates_phase());
        assert!(!AgentRole::Adversarial.gates_phase());
    }

    #[test]
    fn test_role_serde_is_snake_case() {
        let json = serde_json::to_string(&AgentRole::Adversarial).expect("serialize");
        assert_eq!(json, "\"adversarial\"");
        let role: AgentRole = serde_json::from_str("\"coordinator\"").expect("deserialize");
        assert_eq!(role, AgentRole::Coordinator);
    }

    #[test]
    fn test_finding_builder() {
        let finding = Finding::new(FindingSeverity::Major, "outlier lab values")
            .targeting("lab_panel_generator");
        assert_eq!(finding.target_agent.as_deref(), Some("lab_panel_generator"));
        assert!(finding.severity > FindingSeverity::Minor);
    }
}
