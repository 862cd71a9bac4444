//! Job orchestrator.
//!
//! The `JobOrchestrator` accepts generation requests, runs each job's phases
//! on its own Tokio task and answers status, results, mind-map and replay
//! queries while jobs are in flight.
//!
//! All writes to a job's record happen on the task that drives the job.
//! Queries read consistent snapshots and never wait for pipeline progress.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::Stream;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, info_span, Instrument};

use crate::agents::{register_builtin, AgentDescriptor, AgentRegistry};
use crate::error::JobError;
use crate::jobs::results::summarize;
use crate::jobs::{
    CancelOutcome, GenerationRequest, Job, JobEntry, JobFailure, JobId, JobResults, JobSnapshot,
    JobStatus, JobTable, PhaseResult, SubmitReceipt,
};
use crate::metrics::MetricsCollector;
use crate::mindmap::{
    MindMapNode, MindMapStore, MindMapView, NodeDetail, NodeId, ReplayCommand, ReplayEngine,
    ReplayFrame, ReplayResponse,
};
use crate::storage::{MemoryStore, RecordStore, SqliteStore};

use super::config::OrchestratorConfig;
use super::events::JobEvent;
use super::phase::PhasePlan;
use super::runner::{PhaseError, PhaseJob, PhaseRunner};

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`JobOrchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    plan: Option<PhasePlan>,
    registry: Option<AgentRegistry>,
    store: Option<Arc<dyn RecordStore>>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `plan` instead of the configured or built-in plan.
    pub fn plan(mut self, plan: PhasePlan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Uses `registry` instead of the built-in agents.
    pub fn registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses `store` for persistence instead of an in-memory store.
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the orchestrator.
    ///
    /// Agent timeouts are taken from the configuration. The phase plan is
    /// validated against the registry.
    ///
    /// # Errors
    ///
    /// - `Config` if the configuration or plan file is invalid
    /// - `Registry` if the plan references unknown agents or the built-in
    ///   agents cannot be registered
    pub fn build(self) -> Result<JobOrchestrator, JobError> {
        let config = self.config;
        config.validate()?;

        let mut registry = match self.registry {
            Some(registry) => registry,
            None => {
                let mut registry = AgentRegistry::new();
                register_builtin(&mut registry)?;
                registry
            }
        };
        registry = registry.with_default_timeout(config.default_agent_timeout);
        for (agent_id, timeout) in &config.agent_timeouts {
            registry.set_timeout(agent_id.clone(), *timeout);
        }

        let plan = match (self.plan, &config.phase_plan_path) {
            (Some(plan), _) => plan,
            (None, Some(path)) => PhasePlan::from_file(path)?,
            (None, None) => PhasePlan::builtin(),
        };
        plan.validate(&registry)?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>);
        let registry = Arc::new(registry);
        let mindmap = Arc::new(MindMapStore::new());
        let (events, _) = broadcast::channel(config.event_buffer);
        let runner = PhaseRunner::new(
            registry.clone(),
            mindmap.clone(),
            store.clone(),
            events.clone(),
        );

        info!(
            phases = plan.total_phases(),
            agents = registry.len(),
            max_concurrent_jobs = config.max_concurrent_jobs,
            "Job orchestrator ready"
        );

        Ok(JobOrchestrator {
            inner: Arc::new(Inner {
                limiter: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                config,
                plan,
                registry,
                mindmap,
                jobs: JobTable::new(),
                store,
                events,
                metrics: MetricsCollector::new(),
                runner,
            }),
        })
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

struct Inner {
    config: OrchestratorConfig,
    plan: PhasePlan,
    registry: Arc<AgentRegistry>,
    mindmap: Arc<MindMapStore>,
    jobs: JobTable,
    store: Arc<dyn RecordStore>,
    events: broadcast::Sender<JobEvent>,
    limiter: Arc<Semaphore>,
    metrics: MetricsCollector,
    runner: PhaseRunner,
}

/// Coordinates job submission, execution and queries.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Built-in agents and plan with default configuration.
    pub fn with_defaults() -> Result<Self, JobError> {
        Self::builder().build()
    }

    /// Builds an orchestrator from configuration, opening the SQLite store
    /// when a database URL is configured.
    pub async fn from_config(config: OrchestratorConfig) -> Result<Self, JobError> {
        let builder = match &config.database_url {
            Some(url) => {
                let store = SqliteStore::open(url).await?;
                Self::builder().store(Arc::new(store))
            }
            None => Self::builder(),
        };
        builder.config(config).build()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.inner.plan
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.inner.registry
    }

    /// Descriptors of every registered agent, in registration order.
    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.inner.registry.descriptors()
    }

    pub fn mindmap(&self) -> &Arc<MindMapStore> {
        &self.inner.mindmap
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    /// Subscribes to events of all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Validates and accepts a request, then runs it in the background.
    ///
    /// Returns as soon as the job is recorded; it never waits on the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if validation fails. No job or node is
    /// created in that case.
    pub async fn submit(&self, request: GenerationRequest) -> Result<SubmitReceipt, JobError> {
        request.validate(self.inner.config.max_population_size)?;

        let job = Job::new(request, self.inner.plan.estimated_total());
        let receipt = SubmitReceipt::started(&job);
        let job_id = job.id;

        info!(
            job_id = %job_id,
            population_size = job.request.population_size,
            condition = %job.request.condition,
            adversarial = job.request.enable_adversarial_testing,
            "Job submitted"
        );

        self.inner.mindmap.register_job(job_id);
        self.inner.persist(&job).await;
        let entry = self.inner.jobs.insert(job).await;

        let inner = self.inner.clone();
        tokio::spawn(
            async move { inner.drive(entry).await }.instrument(info_span!("job", job_id = %job_id)),
        );

        Ok(receipt)
    }

    /// Requests cooperative cancellation.
    ///
    /// The invocation in flight finishes; nothing new is launched. The job
    /// becomes Cancelled shortly after, with its nodes kept.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, JobError> {
        let entry = self.inner.jobs.get(job_id).await?;
        let status = entry.read().await.status;
        if status.is_terminal() {
            debug!(job_id = %job_id, status = %status, "Cancel ignored for terminal job");
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        entry.cancel_token().cancel();
        info!(job_id = %job_id, status = %status, "Cancellation requested");
        Ok(CancelOutcome::Requested)
    }

    /// Waits until the job is terminal and its final record is persisted.
    pub async fn wait(&self, job_id: JobId) -> Result<JobSnapshot, JobError> {
        let entry = self.inner.jobs.get(job_id).await?;
        let mut status = entry.subscribe_status();
        loop {
            if status.borrow_and_update().is_terminal() {
                break;
            }
            if status.changed().await.is_err() {
                break;
            }
        }
        Ok(entry.snapshot().await)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns a consistent snapshot of the job.
    pub async fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, JobError> {
        Ok(self.inner.jobs.get(job_id).await?.snapshot().await)
    }

    /// Snapshots of every job, newest first.
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.inner.jobs.snapshots().await
    }

    /// Returns the results of a completed job.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown ids
    /// - `NotReady` unless the job is Completed
    pub async fn get_results(&self, job_id: JobId) -> Result<JobResults, JobError> {
        let (job, nodes) = self.job_and_nodes(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::NotReady {
                job_id,
                status: job.status,
            });
        }
        Ok(JobResults::assemble(&job, &nodes))
    }

    /// Returns whatever the job has produced so far, in any status.
    pub async fn partial_results(&self, job_id: JobId) -> Result<JobResults, JobError> {
        let (job, nodes) = self.job_and_nodes(job_id).await?;
        Ok(JobResults::assemble(&job, &nodes))
    }

    /// Returns the job's full mind-map.
    pub async fn get_mind_map(&self, job_id: JobId) -> Result<MindMapView, JobError> {
        self.inner.jobs.get(job_id).await?;
        Ok(self.inner.mindmap.view(job_id)?)
    }

    /// Returns the decision and chain-of-thought of one node.
    pub fn select_node(&self, node_id: NodeId) -> Result<NodeDetail, JobError> {
        let view = self.inner.mindmap.get_node(node_id)?;
        Ok(NodeDetail::from(&view.node))
    }

    pub fn get_children(&self, node_id: NodeId) -> Result<Vec<MindMapNode>, JobError> {
        Ok(self.inner.mindmap.get_children(node_id)?)
    }

    /// Replays the subtree under `node_id`.
    pub fn replay(
        &self,
        node_id: NodeId,
        command: ReplayCommand,
    ) -> Result<ReplayResponse, JobError> {
        Ok(ReplayEngine::new(self.inner.mindmap.clone()).execute(node_id, command)?)
    }

    /// Streams the replay frames of the subtree under `node_id`.
    pub fn replay_stream(
        &self,
        node_id: NodeId,
    ) -> Result<impl Stream<Item = ReplayFrame> + Send + 'static, JobError> {
        Ok(ReplayEngine::new(self.inner.mindmap.clone()).stream(node_id)?)
    }

    async fn job_and_nodes(&self, job_id: JobId) -> Result<(Job, Vec<MindMapNode>), JobError> {
        let entry = self.inner.jobs.get(job_id).await?;
        let job = entry.read().await.clone();
        let nodes = self.inner.mindmap.nodes(job_id)?;
        Ok((job, nodes))
    }
}

// ============================================================================
// Job execution
// ============================================================================

impl Inner {
    /// Drives one job from Pending to a terminal status.
    async fn drive(self: Arc<Self>, entry: Arc<JobEntry>) {
        let token = entry.cancel_token();

        // Jobs past the concurrency limit wait here, still Pending.
        let permit = tokio::select! {
            permit = self.limiter.clone().acquire_owned() => permit.ok(),
            _ = token.cancelled() => None,
        };
        let Some(_permit) = permit else {
            self.finish(&entry, JobStatus::Cancelled, None, false).await;
            return;
        };
        if token.is_cancelled() {
            self.finish(&entry, JobStatus::Cancelled, None, false).await;
            return;
        }

        if let Err(e) = entry.transition(JobStatus::Running).await {
            error!(error = %e, "Could not start job");
            return;
        }
        let job_id = entry.read().await.id;
        info!(job_id = %job_id, "Job started");
        self.metrics.job_started();
        let _ = self.events.send(JobEvent::JobStarted { job_id });
        self.persist(&*entry.read().await).await;

        let started = Instant::now();
        match self.run_phases(&entry).await {
            Ok(()) => {
                info!(
                    job_id = %job_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.finish(&entry, JobStatus::Completed, None, true).await;
            }
            Err(PhaseError::Cancelled) => {
                info!(job_id = %job_id, "Job cancelled");
                self.finish(&entry, JobStatus::Cancelled, None, true).await;
            }
            Err(e) => {
                let failure = {
                    let job = entry.read().await;
                    let (agent, reason) = match e {
                        PhaseError::AgentFailed { agent, reason, .. } => (agent, reason),
                        other => (
                            job.current_agent
                                .clone()
                                .unwrap_or_else(|| self.plan.root_agent.clone()),
                            other.to_string(),
                        ),
                    };
                    JobFailure {
                        phase: job.current_phase.clone().unwrap_or_default(),
                        phase_index: job.current_phase_index.unwrap_or(0),
                        agent,
                        reason,
                    }
                };
                error!(
                    job_id = %job_id,
                    phase = %failure.phase,
                    agent = %failure.agent,
                    reason = %failure.reason,
                    "Job failed"
                );
                self.finish(&entry, JobStatus::Failed, Some(failure), true)
                    .await;
            }
        }
    }

    /// Invokes the root agent, then every phase in order.
    async fn run_phases(&self, entry: &JobEntry) -> Result<(), PhaseError> {
        let (job_id, request) = {
            let job = entry.read().await;
            (job.id, Arc::new(job.request.clone()))
        };
        let total_phases = self.plan.total_phases();
        let Some(first) = self.plan.phases.first() else {
            return Ok(());
        };

        entry
            .update(|job| {
                job.current_phase = Some(first.name.clone());
                job.current_phase_index = Some(first.index);
            })
            .await;

        let mut accumulated = Map::new();
        let root_job = PhaseJob {
            entry,
            job_id,
            request: request.clone(),
            phase_input: Arc::new(Value::Object(Map::new())),
            completed_phases: 0,
            total_phases,
        };
        let (root, plan_output) = self
            .runner
            .run_root(&root_job, &self.plan.root_agent, first)
            .await?;
        entry.update(|job| job.root_node = Some(root)).await;
        accumulated.insert(self.plan.root_agent.clone(), plan_output);

        let mut anchor = root;
        for (position, phase) in self.plan.phases.iter().enumerate() {
            if entry.is_cancel_requested() {
                info!(job_id = %job_id, phase = %phase.name, "Cancellation observed before phase");
                return Err(PhaseError::Cancelled);
            }

            entry
                .update(|job| {
                    job.current_phase = Some(phase.name.clone());
                    job.current_phase_index = Some(phase.index);
                })
                .await;

            let phase_job = PhaseJob {
                entry,
                job_id,
                request: request.clone(),
                phase_input: Arc::new(Value::Object(accumulated.clone())),
                completed_phases: position,
                total_phases,
            };
            let output = self.runner.run_phase(&phase_job, phase, anchor).await?;
            anchor = output.anchor;

            let progress = (position + 1) as f64 / total_phases as f64 * 100.0;
            let result = PhaseResult {
                index: phase.index,
                name: phase.name.clone(),
                output: output.value.clone(),
                nodes: output.nodes,
                findings: output.findings,
                duration_ms: output.duration.as_millis() as u64,
                completed_at: Utc::now(),
            };
            accumulated.insert(phase.name.clone(), output.value);

            entry
                .update(|job| {
                    job.phase_results.insert(phase.name.clone(), result);
                    job.advance_progress(progress);
                })
                .await;
            self.persist(&*entry.read().await).await;
            let _ = self.events.send(JobEvent::PhaseCompleted {
                job_id,
                index: phase.index,
                name: phase.name.clone(),
                progress,
            });
        }

        Ok(())
    }

    /// Moves the job to a terminal status, persists it, then notifies waiters.
    async fn finish(
        &self,
        entry: &JobEntry,
        status: JobStatus,
        failure: Option<JobFailure>,
        was_running: bool,
    ) {
        let job_id = entry.read().await.id;
        let nodes = self.mindmap.nodes(job_id).unwrap_or_default();

        let transition = entry
            .transition_with(status, |job| {
                if status == JobStatus::Completed {
                    job.result_summary = Some(summarize(job, &nodes));
                }
                job.failure = failure;
            })
            .await;
        if let Err(e) = transition {
            error!(job_id = %job_id, error = %e, "Could not finish job");
            return;
        }

        let job = entry.read().await.clone();
        self.persist(&job).await;
        self.metrics.job_finished(
            status,
            std::time::Duration::from_millis(job.duration_ms()),
            was_running,
        );
        let _ = self.events.send(JobEvent::JobFinished { job_id, status });
        entry.settle().await;
    }

    /// Saves the job record. Failures are logged and counted only.
    async fn persist(&self, job: &Job) {
        match self.store.save_job(job).await {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job.id, "Stored job record is already terminal"),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to persist job record");
                self.metrics.record_persistence_failure();
            }
        }
    }
}
