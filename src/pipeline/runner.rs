//! Phase runner for executing the agents of one phase.
//!
//! This module provides the `PhaseRunner`, which invokes a phase's agents tier
//! by tier (Doers, then Coordinators, then Adversarials), records one
//! mind-map node per invocation and folds the agents' outputs into a single
//! phase output.
//!
//! Agents in the same tier run concurrently. A tier starts only after the
//! previous tier has fully resolved, and cancellation is checked before each
//! tier is launched.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::agents::{AgentRegistry, AgentRole, Finding, InvocationContext, InvocationReport};
use crate::error::{MindMapError, RegistryError};
use crate::jobs::{GenerationRequest, JobEntry, JobId};
use crate::metrics::MetricsCollector;
use crate::mindmap::{MindMapNode, MindMapStore, NewNode, NodeId, NodeStatus};
use crate::storage::RecordStore;

use super::events::JobEvent;
use super::phase::PhaseDefinition;

/// Errors that end a phase early.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Cancellation was requested before the next tier started.
    #[error("Phase cancelled")]
    Cancelled,

    /// A Doer or Coordinator could not complete.
    #[error("Agent '{agent}' ({role}) failed: {reason}")]
    AgentFailed {
        agent: String,
        role: AgentRole,
        reason: String,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Mind-map error: {0}")]
    MindMap(#[from] MindMapError),
}

/// The result of a completed phase.
#[derive(Debug, Clone)]
pub struct PhaseOutput {
    /// Outputs of the phase's successful agents keyed by agent id.
    pub value: Value,
    /// Nodes created by the phase, in completion order.
    pub nodes: Vec<NodeId>,
    pub findings: Vec<Finding>,
    /// The node the next phase hangs off.
    pub anchor: NodeId,
    pub duration: Duration,
}

/// Per-job inputs shared by every invocation of one phase.
pub struct PhaseJob<'a> {
    pub entry: &'a JobEntry,
    pub job_id: JobId,
    pub request: Arc<GenerationRequest>,
    /// Outputs of all earlier phases keyed by phase name.
    pub phase_input: Arc<Value>,
    pub completed_phases: usize,
    pub total_phases: usize,
}

/// Progress as a percentage, crediting the running phase by its finished
/// invocations. A running phase never reaches its full share.
pub fn partial_progress(
    completed_phases: usize,
    total_phases: usize,
    finished: usize,
    planned: usize,
) -> f64 {
    if total_phases == 0 {
        return 0.0;
    }
    let within = (finished as f64 / planned.max(1) as f64).min(0.99);
    (completed_phases as f64 + within) / total_phases as f64 * 100.0
}

/// A committed invocation.
struct Completed {
    node: MindMapNode,
    report: InvocationReport,
}

/// An unsuccessful invocation inside a tier.
struct TierFailure {
    agent: String,
    role: AgentRole,
    status: NodeStatus,
    reason: String,
}

impl From<TierFailure> for PhaseError {
    fn from(failure: TierFailure) -> Self {
        PhaseError::AgentFailed {
            agent: failure.agent,
            role: failure.role,
            reason: failure.reason,
        }
    }
}

/// Accumulated state of the phase being run.
#[derive(Default)]
struct PhaseState {
    outputs: BTreeMap<String, Value>,
    nodes: Vec<NodeId>,
    findings: Vec<Finding>,
    finished: usize,
    planned: usize,
    last_doer: Option<NodeId>,
    last_coordinator: Option<NodeId>,
}

/// Executes phases for jobs.
#[derive(Clone)]
pub struct PhaseRunner {
    registry: Arc<AgentRegistry>,
    mindmap: Arc<MindMapStore>,
    store: Arc<dyn RecordStore>,
    events: broadcast::Sender<JobEvent>,
    metrics: MetricsCollector,
}

impl PhaseRunner {
    pub fn new(
        registry: Arc<AgentRegistry>,
        mindmap: Arc<MindMapStore>,
        store: Arc<dyn RecordStore>,
        events: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            registry,
            mindmap,
            store,
            events,
            metrics: MetricsCollector::new(),
        }
    }

    /// Invokes the root agent, creating the job's root node in the first phase.
    ///
    /// Returns the root node id and the root agent's output.
    pub async fn run_root(
        &self,
        job: &PhaseJob<'_>,
        root_agent: &str,
        first_phase: &PhaseDefinition,
    ) -> Result<(NodeId, Value), PhaseError> {
        if job.entry.is_cancel_requested() {
            return Err(PhaseError::Cancelled);
        }

        let done = self
            .invoke(job, first_phase, root_agent, None, 1, Arc::new(BTreeMap::new()))
            .await?;
        self.record(job, &done, None).await;

        if !done.report.is_success() {
            return Err(PhaseError::AgentFailed {
                agent: done.node.agent_id,
                role: done.node.role,
                reason: done
                    .node
                    .error
                    .unwrap_or_else(|| done.node.status.to_string()),
            });
        }

        let output = done.report.outcome.map(|o| o.output).unwrap_or(Value::Null);
        Ok((done.node.id, output))
    }

    /// Runs every scheduled agent of `phase`.
    ///
    /// Doers hang off `anchor`, Coordinators off the last Doer to finish and
    /// Adversarials off the last Coordinator to finish.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if cancellation was requested before a tier started, or
    ///   while a tier that had failures was running
    /// - `AgentFailed` if any agent timed out, a Doer failed, or a Coordinator
    ///   failed again after the preceding Doer was retried
    pub async fn run_phase(
        &self,
        job: &PhaseJob<'_>,
        phase: &PhaseDefinition,
        anchor: NodeId,
    ) -> Result<PhaseOutput, PhaseError> {
        let start = Instant::now();
        let tiers = self.tiers(job, phase)?;

        info!(
            job_id = %job.job_id,
            phase = %phase.name,
            index = phase.index,
            agents = tiers.iter().map(|(_, a)| a.len()).sum::<usize>(),
            "Phase started"
        );
        let _ = self.events.send(JobEvent::PhaseStarted {
            job_id: job.job_id,
            index: phase.index,
            name: phase.name.clone(),
        });

        let mut state = PhaseState {
            planned: tiers.iter().map(|(_, a)| a.len()).sum(),
            ..PhaseState::default()
        };

        for (role, agents) in &tiers {
            if job.entry.is_cancel_requested() {
                info!(job_id = %job.job_id, phase = %phase.name, tier = %role, "Cancellation observed before tier");
                return Err(PhaseError::Cancelled);
            }

            let parent = match role {
                AgentRole::Doer => anchor,
                AgentRole::Coordinator => state.last_doer.unwrap_or(anchor),
                AgentRole::Adversarial => state
                    .last_coordinator
                    .or(state.last_doer)
                    .unwrap_or(anchor),
            };

            let mut failures = self
                .run_tier(job, phase, agents, parent, 1, &mut state)
                .await?;
            if failures.is_empty() {
                continue;
            }

            // Agents that bail out on cancellation are not failures.
            if job.entry.is_cancel_requested() {
                return Err(PhaseError::Cancelled);
            }

            // A timeout fails the phase whatever the role.
            if let Some(at) = failures.iter().position(|f| f.status == NodeStatus::Timeout) {
                return Err(failures.swap_remove(at).into());
            }

            match role {
                AgentRole::Doer => return Err(failures.remove(0).into()),
                AgentRole::Coordinator => {
                    let doers = tiers
                        .iter()
                        .find(|(r, _)| *r == AgentRole::Doer)
                        .map(|(_, a)| a.as_slice())
                        .unwrap_or(&[]);
                    self.retry_coordinators(job, phase, anchor, doers, failures, &mut state)
                        .await?;
                }
                AgentRole::Adversarial => {
                    for failure in failures {
                        warn!(
                            job_id = %job.job_id,
                            phase = %phase.name,
                            agent = %failure.agent,
                            reason = %failure.reason,
                            "Adversarial agent did not complete"
                        );
                    }
                }
            }
        }

        let duration = start.elapsed();
        info!(
            job_id = %job.job_id,
            phase = %phase.name,
            nodes = state.nodes.len(),
            findings = state.findings.len(),
            duration_ms = duration.as_millis() as u64,
            "Phase completed"
        );

        Ok(PhaseOutput {
            anchor: state.last_coordinator.or(state.last_doer).unwrap_or(anchor),
            value: Value::Object(state.outputs.into_iter().collect()),
            nodes: state.nodes,
            findings: state.findings,
            duration,
        })
    }

    /// Groups the scheduled agents of a phase by role, in tier order.
    fn tiers(
        &self,
        job: &PhaseJob<'_>,
        phase: &PhaseDefinition,
    ) -> Result<Vec<(AgentRole, Vec<String>)>, PhaseError> {
        let scheduled = phase.scheduled_agents(&job.request);
        let mut roles = Vec::with_capacity(scheduled.len());
        for agent in &scheduled {
            roles.push((*agent, self.registry.descriptor(agent)?.role));
        }

        let mut tiers = Vec::new();
        for role in AgentRole::all() {
            if role == AgentRole::Adversarial && !job.request.enable_adversarial_testing {
                continue;
            }
            let agents: Vec<String> = roles
                .iter()
                .filter(|(_, r)| *r == role)
                .map(|(agent, _)| agent.to_string())
                .collect();
            if !agents.is_empty() {
                tiers.push((role, agents));
            }
        }
        Ok(tiers)
    }

    /// Retries the last Doer, then the failed Coordinators, once each.
    async fn retry_coordinators(
        &self,
        job: &PhaseJob<'_>,
        phase: &PhaseDefinition,
        anchor: NodeId,
        doers: &[String],
        mut failures: Vec<TierFailure>,
        state: &mut PhaseState,
    ) -> Result<(), PhaseError> {
        let Some(doer) = doers.last() else {
            return Err(failures.remove(0).into());
        };
        if job.entry.is_cancel_requested() {
            return Err(PhaseError::Cancelled);
        }

        warn!(
            job_id = %job.job_id,
            phase = %phase.name,
            coordinator = %failures[0].agent,
            reason = %failures[0].reason,
            doer = %doer,
            "Coordinator failed, retrying preceding doer"
        );

        let mut doer_failures = self
            .run_tier(job, phase, std::slice::from_ref(doer), anchor, 2, state)
            .await?;
        if !doer_failures.is_empty() {
            return Err(doer_failures.remove(0).into());
        }

        if job.entry.is_cancel_requested() {
            return Err(PhaseError::Cancelled);
        }
        let coordinators: Vec<String> = failures.into_iter().map(|f| f.agent).collect();
        let parent = state.last_doer.unwrap_or(anchor);
        let mut again = self
            .run_tier(job, phase, &coordinators, parent, 2, state)
            .await?;
        if !again.is_empty() {
            return Err(again.remove(0).into());
        }
        Ok(())
    }

    /// Runs one tier concurrently, committing nodes in completion order.
    ///
    /// Every launched invocation is awaited and recorded before this returns.
    async fn run_tier(
        &self,
        job: &PhaseJob<'_>,
        phase: &PhaseDefinition,
        agents: &[String],
        parent: NodeId,
        attempt: u32,
        state: &mut PhaseState,
    ) -> Result<Vec<TierFailure>, PhaseError> {
        let siblings = Arc::new(state.outputs.clone());
        let mut pending: FuturesUnordered<_> = agents
            .iter()
            .map(|agent| self.invoke(job, phase, agent, Some(parent), attempt, siblings.clone()))
            .collect();

        let mut failures = Vec::new();
        let mut first_error = None;

        while let Some(result) = pending.next().await {
            let done = match result {
                Ok(done) => done,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            state.finished += 1;
            let progress = partial_progress(
                job.completed_phases,
                job.total_phases,
                state.finished,
                state.planned,
            );
            self.record(job, &done, Some(progress)).await;

            let Completed { node, report } = done;
            state.nodes.push(node.id);
            state.findings.extend(node.findings.iter().cloned());

            let success = report.is_success();
            match report.outcome {
                Some(outcome) if success => {
                    match node.role {
                        AgentRole::Doer => state.last_doer = Some(node.id),
                        AgentRole::Coordinator => state.last_coordinator = Some(node.id),
                        AgentRole::Adversarial => {}
                    }
                    state.outputs.insert(node.agent_id, outcome.output);
                }
                _ => failures.push(TierFailure {
                    agent: node.agent_id,
                    role: node.role,
                    status: node.status,
                    reason: node.error.unwrap_or_else(|| node.status.to_string()),
                }),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(failures),
        }
    }

    /// Opens a node, invokes the agent and commits the node.
    async fn invoke(
        &self,
        job: &PhaseJob<'_>,
        phase: &PhaseDefinition,
        agent_id: &str,
        parent: Option<NodeId>,
        attempt: u32,
        siblings: Arc<BTreeMap<String, Value>>,
    ) -> Result<Completed, PhaseError> {
        let descriptor = self.registry.descriptor(agent_id)?;
        let node_id = self.mindmap.open_node(NewNode {
            job_id: job.job_id,
            parent,
            agent_id: agent_id.to_string(),
            role: descriptor.role,
            phase: phase.phase_ref(),
            attempt,
        })?;

        job.entry
            .update(|j| j.current_agent = Some(agent_id.to_string()))
            .await;

        let ctx = InvocationContext {
            job_id: job.job_id,
            phase: phase.phase_ref(),
            attempt,
            request: job.request.clone(),
            phase_input: job.phase_input.clone(),
            sibling_outputs: siblings,
            cancel: job.entry.cancel_token(),
        };
        let report = self.registry.invoke(agent_id, &ctx).await?;
        let node = self.mindmap.commit(node_id, report.to_record())?;

        Ok(Completed { node, report })
    }

    /// Persists a committed node and publishes its metrics and events.
    ///
    /// Persistence failures are logged and counted; they never fail the job.
    async fn record(&self, job: &PhaseJob<'_>, done: &Completed, progress: Option<f64>) {
        let node = &done.node;

        if let Err(e) = self.store.append_node(node).await {
            error!(
                job_id = %node.job_id,
                node_id = %node.id,
                error = %e,
                "Failed to persist mind-map node"
            );
            self.metrics.record_persistence_failure();
        }

        job.entry
            .update(|j| {
                j.agent_run_count += 1;
                if let Some(progress) = progress {
                    j.advance_progress(progress);
                }
            })
            .await;

        self.metrics
            .record_invocation(&node.agent_id, node.role, node.status, done.report.duration);
        let _ = self.events.send(JobEvent::AgentCompleted {
            job_id: node.job_id,
            node_id: node.id,
            agent_id: node.agent_id.clone(),
            role: node.role,
            phase: node.phase.name.clone(),
            status: node.status,
        });

        if node.findings.is_empty() {
            return;
        }
        self.metrics.record_findings(&node.findings);
        for finding in &node.findings {
            warn!(
                job_id = %node.job_id,
                agent = %node.agent_id,
                severity = %finding.severity,
                summary = %finding.summary,
                "Adversarial finding raised"
            );
            let _ = self.events.send(JobEvent::FindingRaised {
                job_id: node.job_id,
                node_id: node.id,
                agent_id: node.agent_id.clone(),
                finding: finding.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{
        Agent, AgentCategory, AgentDescriptor, AgentError, AgentOutcome, AgentResult,
        FindingSeverity,
    };
    use crate::jobs::Job;
    use crate::mindmap::ThoughtRecorder;
    use crate::pipeline::PhaseAgent;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Test agent that fails on the listed attempts, or stalls past any
    /// reasonable timeout.
    struct ScriptedAgent {
        descriptor: AgentDescriptor,
        fail_on: Vec<u32>,
        stall: bool,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn invoke(&self, ctx: &InvocationContext) -> AgentResult<AgentOutcome> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            if self.fail_on.contains(&ctx.attempt) {
                return Err(AgentError::Failure("scripted failure".to_string()));
            }
            let mut recorder = ThoughtRecorder::new();
            recorder
                .consider(format!("{} siblings", ctx.sibling_outputs.len()))
                .choose("emit");
            let mut outcome = AgentOutcome::new(json!({ "attempt": ctx.attempt }), "emitted");
            if self.descriptor.role == AgentRole::Adversarial {
                outcome = outcome.with_findings(vec![Finding::new(
                    FindingSeverity::Major,
                    "scripted flaw",
                )]);
            }
            Ok(outcome.with_reasoning(recorder.finish()))
        }
    }

    fn agent(id: &str, role: AgentRole, fail_on: &[u32]) -> Arc<dyn Agent> {
        Arc::new(ScriptedAgent {
            descriptor: AgentDescriptor::new(id, role, AgentCategory::QualityAssurance, id),
            fail_on: fail_on.to_vec(),
            stall: false,
        })
    }

    fn stalling(id: &str, role: AgentRole) -> Arc<dyn Agent> {
        Arc::new(ScriptedAgent {
            descriptor: AgentDescriptor::new(id, role, AgentCategory::QualityAssurance, id),
            fail_on: Vec::new(),
            stall: true,
        })
    }

    struct Fixture {
        runner: PhaseRunner,
        mindmap: Arc<MindMapStore>,
        entry: JobEntry,
        request: Arc<GenerationRequest>,
    }

    impl Fixture {
        fn new(agents: Vec<Arc<dyn Agent>>) -> Self {
            Self::with_timeouts(agents, &[])
        }

        /// Gives each agent in `short` a 20ms timeout.
        fn with_timeouts(agents: Vec<Arc<dyn Agent>>, short: &[&str]) -> Self {
            let mut registry = AgentRegistry::new();
            for agent_id in short {
                registry.set_timeout(*agent_id, Duration::from_millis(20));
            }
            registry.register(agent("root", AgentRole::Coordinator, &[])).unwrap();
            registry.register_all(agents).unwrap();

            let request = GenerationRequest::new(5, "CKD").with_adversarial_testing(true);
            let job = Job::new(request.clone(), Duration::from_secs(1));
            let mindmap = Arc::new(MindMapStore::new());
            mindmap.register_job(job.id);
            let (events, _) = broadcast::channel(64);

            Self {
                runner: PhaseRunner::new(
                    Arc::new(registry),
                    mindmap.clone(),
                    Arc::new(MemoryStore::new()),
                    events,
                ),
                mindmap,
                entry: JobEntry::new(job),
                request: Arc::new(request),
            }
        }

        async fn job(&self) -> PhaseJob<'_> {
            PhaseJob {
                entry: &self.entry,
                job_id: self.entry.read().await.id,
                request: self.request.clone(),
                phase_input: Arc::new(json!({})),
                completed_phases: 0,
                total_phases: 1,
            }
        }

        /// Runs the root and then `agents` as a single phase.
        async fn run(&self, agents: &[&str]) -> (JobId, Result<PhaseOutput, PhaseError>) {
            let job = self.job().await;
            let definition = PhaseDefinition::new(
                1,
                "design",
                agents.iter().map(|a| PhaseAgent::always(*a)).collect(),
            );
            let (root, _) = self
                .runner
                .run_root(&job, "root", &definition)
                .await
                .unwrap();
            let result = self.runner.run_phase(&job, &definition, root).await;
            (job.job_id, result)
        }

        fn agents_in_sequence(&self, job_id: JobId) -> Vec<String> {
            self.mindmap
                .get_sequence(job_id)
                .unwrap()
                .iter()
                .map(|id| self.mindmap.get_node(*id).unwrap().node.agent_id)
                .collect()
        }
    }

    #[test]
    fn test_partial_progress_never_completes_a_phase() {
        assert_eq!(partial_progress(0, 4, 0, 3), 0.0);
        assert!((partial_progress(1, 4, 3, 3) - 49.75).abs() < 1e-9);
        assert_eq!(partial_progress(0, 0, 1, 1), 0.0);
    }

    #[tokio::test]
    async fn test_tiers_run_in_role_order() {
        let fixture = Fixture::new(vec![
            agent("challenger", AgentRole::Adversarial, &[]),
            agent("checker", AgentRole::Coordinator, &[]),
            agent("maker", AgentRole::Doer, &[]),
        ]);
        let (job_id, result) = fixture.run(&["challenger", "checker", "maker"]).await;
        let output = result.unwrap();

        assert_eq!(
            fixture.agents_in_sequence(job_id),
            vec!["root", "maker", "checker", "challenger"]
        );

        let sequence = fixture.mindmap.get_sequence(job_id).unwrap();
        let checker = fixture.mindmap.get_node(sequence[2]).unwrap().node;
        assert_eq!(checker.parent, Some(sequence[1]));
        let challenger = fixture.mindmap.get_node(sequence[3]).unwrap().node;
        assert_eq!(challenger.parent, Some(sequence[2]));

        assert_eq!(output.anchor, sequence[2]);
        assert_eq!(output.findings.len(), 1);
        assert!(output.value.get("challenger").is_some());
        assert_eq!(fixture.entry.read().await.agent_run_count, 4);
    }

    #[tokio::test]
    async fn test_sibling_doers_share_a_tier() {
        let fixture = Fixture::new(vec![
            agent("maker_a", AgentRole::Doer, &[]),
            agent("maker_b", AgentRole::Doer, &[]),
            agent("checker", AgentRole::Coordinator, &[]),
        ]);
        let (job_id, result) = fixture.run(&["maker_a", "maker_b", "checker"]).await;
        let output = result.unwrap();

        // Doers see no siblings; the coordinator sees both doers.
        assert_eq!(output.nodes.len(), 3);
        let nodes = fixture.mindmap.nodes(job_id).unwrap();
        let checker = nodes.iter().find(|n| n.agent_id == "checker").unwrap();
        assert_eq!(
            checker.chain_of_thought[0].inputs_considered,
            vec!["2 siblings".to_string()]
        );
        let progress = fixture.entry.read().await.progress;
        assert!(progress > 0.0 && progress < 100.0);
    }

    #[tokio::test]
    async fn test_doer_failure_fails_phase_without_running_later_tiers() {
        let fixture = Fixture::new(vec![
            agent("maker", AgentRole::Doer, &[1]),
            agent("checker", AgentRole::Coordinator, &[]),
        ]);
        let (job_id, result) = fixture.run(&["maker", "checker"]).await;

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            PhaseError::AgentFailed { ref agent, role: AgentRole::Doer, .. } if agent == "maker"
        ));
        assert_eq!(fixture.agents_in_sequence(job_id), vec!["root", "maker"]);
    }

    #[tokio::test]
    async fn test_coordinator_failure_retries_preceding_doer_once() {
        let fixture = Fixture::new(vec![
            agent("maker", AgentRole::Doer, &[]),
            agent("checker", AgentRole::Coordinator, &[1]),
        ]);
        let (job_id, result) = fixture.run(&["maker", "checker"]).await;
        let output = result.unwrap();
        assert_eq!(output.nodes.len(), 4);

        let nodes = fixture.mindmap.nodes(job_id).unwrap();
        let summary: Vec<(String, u32, NodeStatus)> = nodes
            .iter()
            .skip(1)
            .map(|n| (n.agent_id.clone(), n.attempt, n.status))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("maker".to_string(), 1, NodeStatus::Completed),
                ("checker".to_string(), 1, NodeStatus::Failed),
                ("maker".to_string(), 2, NodeStatus::Completed),
                ("checker".to_string(), 2, NodeStatus::Completed),
            ]
        );
        assert_eq!(nodes[4].parent, Some(nodes[3].id));
        assert_eq!(output.value["checker"]["attempt"], 2);
    }

    #[tokio::test]
    async fn test_coordinator_failing_twice_fails_phase() {
        let fixture = Fixture::new(vec![
            agent("maker", AgentRole::Doer, &[]),
            agent("checker", AgentRole::Coordinator, &[1, 2]),
        ]);
        let (job_id, result) = fixture.run(&["maker", "checker"]).await;

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            PhaseError::AgentFailed { ref agent, role: AgentRole::Coordinator, .. } if agent == "checker"
        ));
        assert_eq!(fixture.mindmap.node_count(job_id).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_adversarial_failure_does_not_fail_phase() {
        let fixture = Fixture::new(vec![
            agent("maker", AgentRole::Doer, &[]),
            agent("challenger", AgentRole::Adversarial, &[1]),
        ]);
        let (_, result) = fixture.run(&["maker", "challenger"]).await;

        let output = result.unwrap();
        assert_eq!(output.nodes.len(), 2);
        assert!(output.value.get("challenger").is_none());
    }

    #[tokio::test]
    async fn test_timeout_fails_phase_for_every_role() {
        for (slow, role) in [
            ("maker", AgentRole::Doer),
            ("checker", AgentRole::Coordinator),
            ("challenger", AgentRole::Adversarial),
        ] {
            let mut agents = Vec::new();
            for (id, r) in [
                ("maker", AgentRole::Doer),
                ("checker", AgentRole::Coordinator),
                ("challenger", AgentRole::Adversarial),
            ] {
                agents.push(if id == slow { stalling(id, r) } else { agent(id, r, &[]) });
            }
            let fixture = Fixture::with_timeouts(agents, &[slow]);
            let (job_id, result) = fixture.run(&["maker", "checker", "challenger"]).await;

            let err = result.unwrap_err();
            assert!(
                matches!(
                    err,
                    PhaseError::AgentFailed { ref agent, role: r, .. } if agent == slow && r == role
                ),
                "{}: {:?}",
                slow,
                err
            );

            // No retry and no later tier after a timeout.
            let nodes = fixture.mindmap.nodes(job_id).unwrap();
            let last = nodes.last().unwrap();
            assert_eq!(last.agent_id, slow);
            assert_eq!(last.status, NodeStatus::Timeout);
            assert!(nodes.iter().all(|n| n.attempt == 1));
        }
    }

    /// Doer that requests cancellation of its own job, then bails out.
    struct CancellingAgent {
        descriptor: AgentDescriptor,
    }

    #[async_trait]
    impl Agent for CancellingAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn invoke(&self, ctx: &InvocationContext) -> AgentResult<AgentOutcome> {
            ctx.cancel.cancel();
            Err(AgentError::Cancelled)
        }
    }

    #[tokio::test]
    async fn test_cancelled_invocation_cancels_phase() {
        let fixture = Fixture::new(vec![
            Arc::new(CancellingAgent {
                descriptor: AgentDescriptor::new(
                    "maker",
                    AgentRole::Doer,
                    AgentCategory::QualityAssurance,
                    "maker",
                ),
            }),
            agent("checker", AgentRole::Coordinator, &[]),
        ]);
        let (job_id, result) = fixture.run(&["maker", "checker"]).await;

        assert!(matches!(result.unwrap_err(), PhaseError::Cancelled));
        assert_eq!(fixture.agents_in_sequence(job_id), vec!["root", "maker"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_tier() {
        let fixture = Fixture::new(vec![agent("maker", AgentRole::Doer, &[])]);
        let job = fixture.job().await;
        let definition = PhaseDefinition::new(1, "design", vec![PhaseAgent::always("maker")]);
        let (root, _) = fixture
            .runner
            .run_root(&job, "root", &definition)
            .await
            .unwrap();

        fixture.entry.cancel_token().cancel();
        let err = fixture
            .runner
            .run_phase(&job, &definition, root)
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Cancelled));
        assert_eq!(fixture.mindmap.node_count(job.job_id).unwrap(), 1);
    }
}
