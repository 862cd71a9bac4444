//! Mind-map node types.
//!
//! A node records one agent invocation: who ran, in which phase, what it
//! decided and why. Nodes are opened as `Running` and committed exactly once
//! with a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::{AgentRole, ClinicalAssessment, Finding, PrivacyAssessment};
use crate::jobs::JobId;

/// Unique identifier of a mind-map node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a pipeline phase by index and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseRef {
    /// 1-based phase index.
    pub index: u32,
    pub name: String,
}

impl PhaseRef {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PhaseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.name)
    }
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Opened, invocation in flight.
    Running,
    Completed,
    Failed,
    Timeout,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Running)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Completed => write!(f, "completed"),
            NodeStatus::Failed => write!(f, "failed"),
            NodeStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// A weighted decision criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionCriterion {
    pub name: String,
    pub weight: f64,
}

/// One chain-of-thought step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Inputs the agent looked at.
    pub inputs_considered: Vec<String>,
    /// Hypotheses or options weighed.
    pub hypotheses: Vec<String>,
    /// Criteria and their relative weights.
    pub criteria: Vec<DecisionCriterion>,
    /// The option chosen.
    pub choice: String,
}

impl ReasoningStep {
    /// Renders the step as a single free-text reasoning statement.
    pub fn statement(&self) -> String {
        let criteria: Vec<String> = self
            .criteria
            .iter()
            .map(|c| format!("{} ({:.2})", c.name, c.weight))
            .collect();
        format!(
            "considered [{}]; weighed [{}]; criteria [{}]; chose {}",
            self.inputs_considered.join(", "),
            self.hypotheses.join(", "),
            criteria.join(", "),
            self.choice
        )
    }
}

/// A recorded agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub id: NodeId,
    pub job_id: JobId,
    /// None only for the job's root node.
    pub parent: Option<NodeId>,
    /// Creation order within the job.
    pub ordinal: u32,
    pub agent_id: String,
    pub role: AgentRole,
    pub phase: PhaseRef,
    pub attempt: u32,
    pub status: NodeStatus,
    pub decision: String,
    pub chain_of_thought: Vec<ReasoningStep>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub privacy: Option<PrivacyAssessment>,
    #[serde(default)]
    pub clinical: Option<ClinicalAssessment>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

/// Parameters for opening a new node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub job_id: JobId,
    pub parent: Option<NodeId>,
    pub agent_id: String,
    pub role: AgentRole,
    pub phase: PhaseRef,
    pub attempt: u32,
}

/// Terminal data written to a node exactly once.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub status: NodeStatus,
    pub decision: String,
    pub chain_of_thought: Vec<ReasoningStep>,
    pub findings: Vec<Finding>,
    pub privacy: Option<PrivacyAssessment>,
    pub clinical: Option<ClinicalAssessment>,
    pub error: Option<String>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A node together with its children, as returned by queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: MindMapNode,
    pub children: Vec<NodeId>,
}

/// The full mind-map of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MindMapView {
    pub job_id: JobId,
    pub root: Option<NodeId>,
    /// Nodes in creation order.
    pub nodes: Vec<NodeView>,
    /// Node ids in completion order.
    pub execution_sequence: Vec<NodeId>,
    pub total_nodes: usize,
}

/// The decision and reasoning of a single selected node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    pub node_id: NodeId,
    pub agent_id: String,
    pub phase: PhaseRef,
    pub status: NodeStatus,
    pub decision: String,
    pub chain_of_thought: Vec<ReasoningStep>,
    pub findings: Vec<Finding>,
}

impl From<&MindMapNode> for NodeDetail {
    fn from(node: &MindMapNode) -> Self {
        Self {
            node_id: node.id,
            agent_id: node.agent_id.clone(),
            phase: node.phase.clone(),
            status: node.status,
            decision: node.decision.clone(),
            chain_of_thought: node.chain_of_thought.clone(),
            findings: node.findings.clone(),
        }
    }
}
