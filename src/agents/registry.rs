//! Agent registry and the uniform invocation wrapper.
//!
//! The registry is a lookup table from agent id to implementation. Its only
//! behavior is [`AgentRegistry::invoke`], which times the call, enforces the
//! per-agent timeout, checks the outcome contract, and classifies the result
//! as Completed, Failed, or Timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::RegistryError;
use crate::mindmap::{InvocationRecord, NodeStatus, ThoughtRecorder};

use super::error::{AgentError, AgentResult};
use super::types::{AgentCategory, AgentDescriptor, AgentOutcome, InvocationContext};

/// Default time budget for a single invocation.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30);

/// A role-tagged computation unit.
///
/// Implementations must be safe to invoke concurrently for different jobs.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Static description of this agent.
    fn descriptor(&self) -> &AgentDescriptor;

    /// Runs the agent once.
    async fn invoke(&self, ctx: &InvocationContext) -> AgentResult<AgentOutcome>;
}

/// Classified result of one invocation.
#[derive(Debug)]
pub struct InvocationReport {
    pub descriptor: AgentDescriptor,
    pub status: NodeStatus,
    /// Present only when `status` is Completed.
    pub outcome: Option<AgentOutcome>,
    pub error: Option<AgentError>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
}

impl InvocationReport {
    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Completed
    }

    /// Human-readable failure reason.
    pub fn failure_reason(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// Converts the report into the terminal record of its mind-map node.
    ///
    /// Unsuccessful invocations still get one reasoning step so that every
    /// node carries a chain-of-thought.
    pub fn to_record(&self) -> InvocationRecord {
        let duration_ms = self.duration.as_millis() as u64;
        match &self.outcome {
            Some(outcome) => InvocationRecord {
                status: self.status,
                decision: outcome.decision.clone(),
                chain_of_thought: outcome.reasoning.clone(),
                findings: outcome.findings.clone(),
                privacy: outcome.privacy.clone(),
                clinical: outcome.clinical.clone(),
                error: None,
                ended_at: self.ended_at,
                duration_ms,
            },
            None => {
                let reason = self
                    .failure_reason()
                    .unwrap_or_else(|| "no output".to_string());
                InvocationRecord {
                    status: self.status,
                    decision: format!("{} {}", self.descriptor.id, self.status),
                    chain_of_thought: vec![ThoughtRecorder::failure_step(
                        &self.descriptor.id,
                        &reason,
                    )],
                    findings: Vec::new(),
                    privacy: None,
                    clinical: None,
                    error: Some(reason),
                    ended_at: self.ended_at,
                    duration_ms,
                }
            }
        }
    }
}

/// Catalog of agents keyed by id.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
    /// Registration order, used for listings.
    order: Vec<String>,
    default_timeout: Duration,
    timeouts: HashMap<String, Duration>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.order)
            .field("default_timeout", &self.default_timeout)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            order: Vec::new(),
            default_timeout: DEFAULT_AGENT_TIMEOUT,
            timeouts: HashMap::new(),
        }
    }

    /// Sets the timeout applied to agents without an override.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Overrides the timeout of one agent.
    pub fn with_timeout(mut self, agent_id: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(agent_id.into(), timeout);
        self
    }

    pub fn set_timeout(&mut self, agent_id: impl Into<String>, timeout: Duration) {
        self.timeouts.insert(agent_id.into(), timeout);
    }

    /// Registers an agent.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateAgent` if the id is already taken.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let id = agent.descriptor().id.clone();
        if self.agents.contains_key(&id) {
            return Err(RegistryError::DuplicateAgent(id));
        }
        self.order.push(id.clone());
        self.agents.insert(id, agent);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        agents: impl IntoIterator<Item = Arc<dyn Agent>>,
    ) -> Result<(), RegistryError> {
        for agent in agents {
            self.register(agent)?;
        }
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Result<Arc<dyn Agent>, RegistryError> {
        self.agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::AgentNotFound(agent_id.to_string()))
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn descriptor(&self, agent_id: &str) -> Result<AgentDescriptor, RegistryError> {
        self.get(agent_id).map(|a| a.descriptor().clone())
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.agents.get(id))
            .map(|a| a.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn timeout_for(&self, agent_id: &str) -> Duration {
        self.timeouts
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Invokes an agent and classifies the result.
    ///
    /// Agent errors never escape: they are folded into the report's status.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` only if the id is not registered.
    pub async fn invoke(
        &self,
        agent_id: &str,
        ctx: &InvocationContext,
    ) -> Result<InvocationReport, RegistryError> {
        let agent = self.get(agent_id)?;
        let descriptor = agent.descriptor().clone();
        let timeout = self.timeout_for(agent_id);

        let started_at = Utc::now();
        let start = Instant::now();
        let result = tokio::time::timeout(timeout, agent.invoke(ctx)).await;
        let duration = start.elapsed();
        let ended_at = Utc::now();

        let (status, outcome, error) = match result {
            Err(_) => (
                NodeStatus::Timeout,
                None,
                Some(AgentError::Timeout {
                    agent: descriptor.id.clone(),
                    millis: timeout.as_millis() as u64,
                }),
            ),
            Ok(Err(err)) => (NodeStatus::Failed, None, Some(err)),
            Ok(Ok(outcome)) => match check_contract(&descriptor, &outcome) {
                Ok(()) => (NodeStatus::Completed, Some(outcome), None),
                Err(err) => (NodeStatus::Failed, None, Some(err)),
            },
        };

        debug!(
            job_id = %ctx.job_id,
            agent = %descriptor.id,
            role = %descriptor.role,
            phase = %ctx.phase,
            attempt = ctx.attempt,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            "Agent invocation finished"
        );

        Ok(InvocationReport {
            descriptor,
            status,
            outcome,
            error,
            started_at,
            ended_at,
            duration,
        })
    }
}

/// Checks an outcome against the agent's declared category.
fn check_contract(descriptor: &AgentDescriptor, outcome: &AgentOutcome) -> AgentResult<()> {
    if outcome.reasoning.is_empty() {
        return Err(AgentError::MissingReasoning(descriptor.id.clone()));
    }
    if outcome.privacy.is_some() && descriptor.category != AgentCategory::Privacy {
        return Err(AgentError::UnauthorizedAssessment {
            agent: descriptor.id.clone(),
            kind: "privacy".to_string(),
        });
    }
    if outcome.clinical.is_some() && descriptor.category != AgentCategory::Clinical {
        return Err(AgentError::UnauthorizedAssessment {
            agent: descriptor.id.clone(),
            kind: "clinical".to_string(),
        });
    }
    Ok(())
}
