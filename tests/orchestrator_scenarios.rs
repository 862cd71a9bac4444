//! End-to-end job scenarios against the orchestrator's public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use cohort_forge::agents::{
    Agent, AgentCategory, AgentDescriptor, AgentError, AgentOutcome, AgentRegistry, AgentResult,
    AgentRole, FindingSeverity, InvocationContext, ROOT_AGENT,
};
use cohort_forge::error::JobError;
use cohort_forge::jobs::{CancelOutcome, GenerationRequest, JobStatus, PrivacyLevel};
use cohort_forge::mindmap::{
    MindMapNode, MindMapStore, NodeId, NodeStatus, ReplayCommand, ReplayEngine, ThoughtRecorder,
};
use cohort_forge::pipeline::{
    JobOrchestrator, OrchestratorConfig, PhaseAgent, PhaseDefinition, PhasePlan,
};
use cohort_forge::storage::{RecordStore, SqliteStore};

// ============================================================================
// Test agents
// ============================================================================

enum Script {
    Succeed,
    Fail,
    /// Signals `started`, then runs until cancelled or the delay elapses.
    Block { started: Arc<Notify> },
    /// Ignores cancellation and outlasts any short timeout.
    Stall,
}

struct TestAgent {
    descriptor: AgentDescriptor,
    script: Script,
}

#[async_trait]
impl Agent for TestAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, ctx: &InvocationContext) -> AgentResult<AgentOutcome> {
        let mut recorder = ThoughtRecorder::new();
        recorder
            .consider(format!("phase {}", ctx.phase.name))
            .choose("proceed");

        match &self.script {
            Script::Succeed => {}
            Script::Fail => return Err(AgentError::Failure("upstream data unusable".to_string())),
            Script::Block { started } => {
                started.notify_one();
                tokio::select! {
                    _ = ctx.cancel.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                }
            }
            Script::Stall => tokio::time::sleep(Duration::from_secs(10)).await,
        }

        Ok(
            AgentOutcome::new(json!({ "agent": self.descriptor.id }), "done")
                .with_reasoning(recorder.finish()),
        )
    }
}

fn agent(id: &str, role: AgentRole, script: Script) -> Arc<dyn Agent> {
    Arc::new(TestAgent {
        descriptor: AgentDescriptor::new(id, role, AgentCategory::Synthesis, id),
        script,
    })
}

/// Four phases, each with one Doer and one Coordinator. `overrides` replace
/// the default succeeding Doer of a phase.
fn four_phase_orchestrator(
    overrides: HashMap<u32, Script>,
    config: OrchestratorConfig,
) -> JobOrchestrator {
    let mut overrides = overrides;
    let mut registry = AgentRegistry::new();
    registry
        .register(agent("planner", AgentRole::Coordinator, Script::Succeed))
        .unwrap();

    let mut phases = Vec::new();
    for index in 1..=4u32 {
        let doer = format!("doer_{}", index);
        let reviewer = format!("reviewer_{}", index);
        let script = overrides.remove(&index).unwrap_or(Script::Succeed);
        registry.register(agent(&doer, AgentRole::Doer, script)).unwrap();
        registry
            .register(agent(&reviewer, AgentRole::Coordinator, Script::Succeed))
            .unwrap();
        phases.push(PhaseDefinition::new(
            index,
            format!("phase_{}", index),
            vec![PhaseAgent::always(doer), PhaseAgent::always(reviewer)],
        ));
    }

    JobOrchestrator::builder()
        .config(config)
        .registry(registry)
        .plan(PhasePlan {
            root_agent: "planner".to_string(),
            phases,
        })
        .build()
        .unwrap()
}

fn phase_indices(nodes: &[MindMapNode]) -> Vec<u32> {
    nodes.iter().map(|n| n.phase.index).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_adversarial_job_runs_every_phase() {
    let orchestrator = JobOrchestrator::with_defaults().unwrap();
    let receipt = orchestrator
        .submit(GenerationRequest::new(5, "CKD+Diabetes").with_adversarial_testing(true))
        .await
        .unwrap();

    let snapshot = orchestrator.wait(receipt.job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100.0);
    assert_eq!(snapshot.agent_run_count, 21);

    let view = orchestrator.get_mind_map(receipt.job_id).await.unwrap();
    assert_eq!(view.total_nodes, 21);
    assert_eq!(view.execution_sequence.len(), 21);
    assert_eq!(view.root, snapshot.root_node);
    assert_eq!(view.nodes.iter().filter(|n| n.node.parent.is_none()).count(), 1);

    let results = orchestrator.get_results(receipt.job_id).await.unwrap();
    assert_eq!(results.phase_results.len(), 6);
    assert_eq!(results.agent_execution_details.len(), 21);
    assert_eq!(results.execution_summary.total_nodes, 21);
    assert_eq!(results.privacy_assessments.len(), 1);
    assert!(results.clinical_assessments.is_empty());
    assert!(results
        .agent_execution_details
        .iter()
        .any(|d| d.role == AgentRole::Adversarial));
}

#[tokio::test]
async fn test_clinical_review_adds_reviewer_node() {
    let orchestrator = JobOrchestrator::with_defaults().unwrap();
    let receipt = orchestrator
        .submit(
            GenerationRequest::new(50, "CKD+Diabetes")
                .with_adversarial_testing(true)
                .with_clinical_review(true),
        )
        .await
        .unwrap();
    orchestrator.wait(receipt.job_id).await.unwrap();

    let results = orchestrator.get_results(receipt.job_id).await.unwrap();
    assert_eq!(results.agent_execution_details.len(), 22);
    assert_eq!(results.clinical_assessments.len(), 1);
    assert_eq!(results.execution_summary.clinical_approved, Some(true));
}

#[tokio::test]
async fn test_zero_population_is_rejected_without_state() {
    let orchestrator = JobOrchestrator::with_defaults().unwrap();
    let err = orchestrator
        .submit(GenerationRequest::new(0, "CKD"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidRequest(_)));
    assert!(orchestrator.list_jobs().await.is_empty());
}

#[tokio::test]
async fn test_results_of_unknown_job_are_not_found() {
    let orchestrator = JobOrchestrator::with_defaults().unwrap();
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        orchestrator.get_results(missing).await,
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.get_status(missing).await,
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.select_node(NodeId::new()),
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_during_phase_three_keeps_earlier_work() {
    let started = Arc::new(Notify::new());
    let orchestrator = four_phase_orchestrator(
        HashMap::from([(
            3,
            Script::Block {
                started: started.clone(),
            },
        )]),
        OrchestratorConfig::new(),
    );

    let receipt = orchestrator
        .submit(GenerationRequest::new(10, "asthma"))
        .await
        .unwrap();
    started.notified().await;

    let running = orchestrator.get_status(receipt.job_id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.current_phase_index, Some(3));
    assert!(matches!(
        orchestrator.get_results(receipt.job_id).await,
        Err(JobError::NotReady { .. })
    ));

    assert_eq!(
        orchestrator.cancel(receipt.job_id).await.unwrap(),
        CancelOutcome::Requested
    );
    let snapshot = orchestrator.wait(receipt.job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert!(snapshot.cancel_requested);

    let partial = orchestrator.partial_results(receipt.job_id).await.unwrap();
    assert_eq!(partial.phase_results.len(), 2);

    let nodes = orchestrator.mindmap().nodes(receipt.job_id).unwrap();
    let agents: Vec<&str> = nodes.iter().map(|n| n.agent_id.as_str()).collect();
    assert!(agents.contains(&"doer_3"));
    assert!(!agents.contains(&"reviewer_3"));
    assert!(phase_indices(&nodes).iter().all(|&i| i <= 3));
}

#[tokio::test]
async fn test_pending_job_can_be_cancelled_before_it_starts() {
    let started = Arc::new(Notify::new());
    let orchestrator = four_phase_orchestrator(
        HashMap::from([(
            1,
            Script::Block {
                started: started.clone(),
            },
        )]),
        OrchestratorConfig::new().with_max_concurrent_jobs(1),
    );

    let first = orchestrator
        .submit(GenerationRequest::new(5, "gout"))
        .await
        .unwrap();
    started.notified().await;

    let second = orchestrator
        .submit(GenerationRequest::new(5, "gout"))
        .await
        .unwrap();
    assert_eq!(
        orchestrator.get_status(second.job_id).await.unwrap().status,
        JobStatus::Pending
    );

    orchestrator.cancel(second.job_id).await.unwrap();
    let snapshot = orchestrator.wait(second.job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert!(snapshot.started_at.is_none());
    assert_eq!(orchestrator.mindmap().node_count(second.job_id).unwrap(), 0);

    orchestrator.cancel(first.job_id).await.unwrap();
    assert_eq!(
        orchestrator.wait(first.job_id).await.unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn test_doer_failure_fails_job_at_that_phase() {
    let orchestrator =
        four_phase_orchestrator(HashMap::from([(2, Script::Fail)]), OrchestratorConfig::new());

    let receipt = orchestrator
        .submit(GenerationRequest::new(10, "asthma"))
        .await
        .unwrap();
    let snapshot = orchestrator.wait(receipt.job_id).await.unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.current_phase_index, Some(2));
    let failure = snapshot.failure.expect("failure recorded");
    assert_eq!(failure.phase_index, 2);
    assert_eq!(failure.agent, "doer_2");

    let nodes = orchestrator.mindmap().nodes(receipt.job_id).unwrap();
    assert!(phase_indices(&nodes).iter().all(|&i| i <= 2));
    let failed = nodes.iter().find(|n| n.agent_id == "doer_2").unwrap();
    assert!(failed.error.is_some());
    assert!(!failed.chain_of_thought.is_empty());
}

/// Three phases of Doer, Coordinator and Adversarial, where `slow` stalls
/// past a 20ms timeout.
fn orchestrator_with_slow_agent(slow: &str) -> JobOrchestrator {
    let mut registry = AgentRegistry::new();
    registry
        .register(agent("planner", AgentRole::Coordinator, Script::Succeed))
        .unwrap();

    let mut phases = Vec::new();
    for index in 1..=3u32 {
        let mut members = Vec::new();
        for (prefix, role) in [
            ("doer", AgentRole::Doer),
            ("reviewer", AgentRole::Coordinator),
            ("attacker", AgentRole::Adversarial),
        ] {
            let id = format!("{}_{}", prefix, index);
            let script = if id == slow { Script::Stall } else { Script::Succeed };
            registry.register(agent(&id, role, script)).unwrap();
            members.push(PhaseAgent::always(id));
        }
        phases.push(PhaseDefinition::new(index, format!("phase_{}", index), members));
    }

    JobOrchestrator::builder()
        .config(OrchestratorConfig::new().with_agent_timeout(slow, Duration::from_millis(20)))
        .registry(registry)
        .plan(PhasePlan {
            root_agent: "planner".to_string(),
            phases,
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_timeout_fails_job_whatever_the_role() {
    for slow in ["doer_2", "reviewer_2", "attacker_2"] {
        let orchestrator = orchestrator_with_slow_agent(slow);
        let receipt = orchestrator
            .submit(GenerationRequest::new(5, "asthma").with_adversarial_testing(true))
            .await
            .unwrap();
        let snapshot = orchestrator.wait(receipt.job_id).await.unwrap();

        assert_eq!(snapshot.status, JobStatus::Failed, "{}", slow);
        assert_eq!(snapshot.current_phase_index, Some(2));
        let failure = snapshot.failure.expect("failure recorded");
        assert_eq!(failure.agent, slow);
        assert_eq!(failure.phase_index, 2);

        let nodes = orchestrator.mindmap().nodes(receipt.job_id).unwrap();
        assert!(phase_indices(&nodes).iter().all(|&i| i <= 2), "{}", slow);
        let timed_out: Vec<&str> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Timeout)
            .map(|n| n.agent_id.as_str())
            .collect();
        assert_eq!(timed_out, vec![slow]);
        assert!(nodes.iter().all(|n| n.attempt == 1));
    }
}

#[tokio::test]
async fn test_adversarial_finding_reaches_results() {
    let orchestrator = JobOrchestrator::with_defaults().unwrap();
    let receipt = orchestrator
        .submit(
            GenerationRequest::new(20, "CKD")
                .with_adversarial_testing(true)
                .with_privacy_level(PrivacyLevel::Low),
        )
        .await
        .unwrap();
    orchestrator.wait(receipt.job_id).await.unwrap();

    let results = orchestrator.get_results(receipt.job_id).await.unwrap();
    let attacker = results
        .agent_execution_details
        .iter()
        .find(|d| d.agent_id == "reidentification_attacker")
        .expect("attacker ran");
    assert!(attacker
        .findings
        .iter()
        .any(|f| f.severity == FindingSeverity::Major));
    assert!(results.execution_summary.findings_count >= 1);
}

#[tokio::test]
async fn test_edges_never_point_backwards() {
    let orchestrator = JobOrchestrator::with_defaults().unwrap();
    let receipt = orchestrator
        .submit(GenerationRequest::new(30, "COPD").with_adversarial_testing(true))
        .await
        .unwrap();
    orchestrator.wait(receipt.job_id).await.unwrap();

    let nodes = orchestrator.mindmap().nodes(receipt.job_id).unwrap();
    let by_id: HashMap<NodeId, &MindMapNode> = nodes.iter().map(|n| (n.id, n)).collect();
    for node in &nodes {
        assert!(node.status.is_terminal());
        if let Some(parent) = node.parent {
            let parent = by_id[&parent];
            assert_eq!(parent.job_id, node.job_id);
            assert!(parent.phase.index <= node.phase.index);
        } else {
            assert_eq!(node.agent_id, ROOT_AGENT);
        }
    }
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let orchestrator = JobOrchestrator::with_defaults().unwrap();
    let receipt = orchestrator
        .submit(GenerationRequest::new(15, "sepsis"))
        .await
        .unwrap();
    let snapshot = orchestrator.wait(receipt.job_id).await.unwrap();
    let root = snapshot.root_node.unwrap();

    let first = orchestrator.replay(root, ReplayCommand::Play).unwrap();
    let second = orchestrator.replay(root, ReplayCommand::Play).unwrap();
    assert_eq!(first.frames, second.frames);
    assert_eq!(first.total_frames, snapshot.agent_run_count as usize);
    assert_eq!(first.frames[0].node_id, root);
    assert_eq!(first.frames[0].depth, 0);

    let step = orchestrator
        .replay(root, ReplayCommand::Step { cursor: 1 })
        .unwrap();
    assert_eq!(step.frames, vec![first.frames[1].clone()]);
    assert_eq!(step.next_cursor, Some(2));

    assert!(matches!(
        orchestrator.replay(NodeId::new(), ReplayCommand::Play),
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_sqlite_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("cohort.db").display());

    let orchestrator =
        JobOrchestrator::from_config(OrchestratorConfig::new().with_database_url(url.clone()))
            .await
            .unwrap();
    let receipt = orchestrator
        .submit(GenerationRequest::new(40, "CKD+Diabetes").with_adversarial_testing(true))
        .await
        .unwrap();
    let snapshot = orchestrator.wait(receipt.job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    let live = orchestrator
        .replay(snapshot.root_node.unwrap(), ReplayCommand::Play)
        .unwrap();

    let store = SqliteStore::open(&url).await.unwrap();
    let job = store.load_job(receipt.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.phase_results.len(), 6);

    let records = store.load_nodes(receipt.job_id).await.unwrap();
    assert_eq!(records.len(), 21);
    let restored = MindMapStore::from_records(receipt.job_id, records).unwrap();
    assert_eq!(restored.root(receipt.job_id).unwrap(), snapshot.root_node);

    let replayed = ReplayEngine::new(Arc::new(restored))
        .execute(snapshot.root_node.unwrap(), ReplayCommand::Play)
        .unwrap();
    assert_eq!(replayed.frames, live.frames);
}
