//! Result reports assembled from a job record and its mind-map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agents::{AgentRole, ClinicalAssessment, Finding, PrivacyAssessment};
use crate::mindmap::{MindMapNode, NodeId, NodeStatus, PhaseRef};

use super::types::{Job, JobFailure, JobId, JobStatus, PhaseResult, ResultSummary};

/// Per-invocation detail row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecutionDetail {
    pub node_id: NodeId,
    pub agent_id: String,
    pub role: AgentRole,
    pub phase: PhaseRef,
    pub attempt: u32,
    pub status: NodeStatus,
    pub decision: String,
    pub findings: Vec<Finding>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl From<&MindMapNode> for AgentExecutionDetail {
    fn from(node: &MindMapNode) -> Self {
        Self {
            node_id: node.id,
            agent_id: node.agent_id.clone(),
            role: node.role,
            phase: node.phase.clone(),
            attempt: node.attempt,
            status: node.status,
            decision: node.decision.clone(),
            findings: node.findings.clone(),
            error: node.error.clone(),
            duration_ms: node.duration_ms,
        }
    }
}

/// A privacy assessment and the node that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyAssessmentRecord {
    pub node_id: NodeId,
    pub agent_id: String,
    pub assessment: PrivacyAssessment,
}

/// A clinical assessment and the node that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalAssessmentRecord {
    pub node_id: NodeId,
    pub agent_id: String,
    pub assessment: ClinicalAssessment,
}

/// Timing figures for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_duration_ms: u64,
    pub phase_durations_ms: BTreeMap<String, u64>,
    pub mean_agent_latency_ms: f64,
    pub slowest_agent: Option<String>,
}

/// Full results of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    pub execution_summary: ResultSummary,
    pub phase_results: BTreeMap<String, PhaseResult>,
    pub agent_execution_details: Vec<AgentExecutionDetail>,
    pub privacy_assessments: Vec<PrivacyAssessmentRecord>,
    pub clinical_assessments: Vec<ClinicalAssessmentRecord>,
    pub performance_metrics: PerformanceMetrics,
    pub failure: Option<JobFailure>,
}

impl JobResults {
    /// Builds the report from a job and its nodes in execution order.
    ///
    /// Works for any status; unfinished jobs get a summary of what exists so far.
    pub fn assemble(job: &Job, nodes: &[MindMapNode]) -> Self {
        let execution_summary = job
            .result_summary
            .clone()
            .unwrap_or_else(|| summarize(job, nodes));

        let privacy_assessments = nodes
            .iter()
            .filter_map(|n| {
                n.privacy.as_ref().map(|a| PrivacyAssessmentRecord {
                    node_id: n.id,
                    agent_id: n.agent_id.clone(),
                    assessment: a.clone(),
                })
            })
            .collect();
        let clinical_assessments = nodes
            .iter()
            .filter_map(|n| {
                n.clinical.as_ref().map(|a| ClinicalAssessmentRecord {
                    node_id: n.id,
                    agent_id: n.agent_id.clone(),
                    assessment: a.clone(),
                })
            })
            .collect();

        let slowest_agent = nodes
            .iter()
            .max_by_key(|n| n.duration_ms)
            .map(|n| n.agent_id.clone());
        let mean_agent_latency_ms = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| n.duration_ms as f64).sum::<f64>() / nodes.len() as f64
        };

        Self {
            job_id: job.id,
            status: job.status,
            execution_summary,
            phase_results: job.phase_results.clone(),
            agent_execution_details: nodes.iter().map(AgentExecutionDetail::from).collect(),
            privacy_assessments,
            clinical_assessments,
            performance_metrics: PerformanceMetrics {
                total_duration_ms: job.duration_ms(),
                phase_durations_ms: job
                    .phase_results
                    .iter()
                    .map(|(name, r)| (name.clone(), r.duration_ms))
                    .collect(),
                mean_agent_latency_ms,
                slowest_agent,
            },
            failure: job.failure.clone(),
        }
    }
}

/// Computes the execution summary from a job and its committed nodes.
pub fn summarize(job: &Job, nodes: &[MindMapNode]) -> ResultSummary {
    ResultSummary {
        phases_completed: job.phase_results.len(),
        total_nodes: nodes.len(),
        agent_run_count: job.agent_run_count,
        findings_count: nodes.iter().map(|n| n.findings.len()).sum(),
        duration_ms: job.duration_ms(),
        privacy_risk: nodes.iter().rev().find_map(|n| n.privacy.as_ref().map(|p| p.risk)),
        clinical_approved: nodes
            .iter()
            .rev()
            .find_map(|n| n.clinical.as_ref().map(|c| c.approved)),
    }
}
