//! Live job events.
//!
//! Events are published on a broadcast channel while jobs run. Slow
//! subscribers may miss events; the job record stays authoritative.

use serde::{Deserialize, Serialize};

use crate::agents::{AgentRole, Finding};
use crate::jobs::{JobId, JobStatus};
use crate::mindmap::{NodeId, NodeStatus};

/// A progress event for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobStarted {
        job_id: JobId,
    },
    PhaseStarted {
        job_id: JobId,
        index: u32,
        name: String,
    },
    AgentCompleted {
        job_id: JobId,
        node_id: NodeId,
        agent_id: String,
        role: AgentRole,
        phase: String,
        status: NodeStatus,
    },
    FindingRaised {
        job_id: JobId,
        node_id: NodeId,
        agent_id: String,
        finding: Finding,
    },
    PhaseCompleted {
        job_id: JobId,
        index: u32,
        name: String,
        progress: f64,
    },
    JobFinished {
        job_id: JobId,
        status: JobStatus,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::JobStarted { job_id }
            | JobEvent::PhaseStarted { job_id, .. }
            | JobEvent::AgentCompleted { job_id, .. }
            | JobEvent::FindingRaised { job_id, .. }
            | JobEvent::PhaseCompleted { job_id, .. }
            | JobEvent::JobFinished { job_id, .. } => *job_id,
        }
    }

    /// Event name, used as the SSE event type.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::JobStarted { .. } => "job_started",
            JobEvent::PhaseStarted { .. } => "phase_started",
            JobEvent::AgentCompleted { .. } => "agent_completed",
            JobEvent::FindingRaised { .. } => "finding_raised",
            JobEvent::PhaseCompleted { .. } => "phase_completed",
            JobEvent::JobFinished { .. } => "job_finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::JobFinished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_serializes_with_tag() {
        let job_id = Uuid::new_v4();
        let event = JobEvent::PhaseStarted {
            job_id,
            index: 3,
            name: "record_synthesis".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "phase_started");
        assert_eq!(value["index"], 3);
        assert_eq!(event.job_id(), job_id);
        assert_eq!(event.name(), "phase_started");
        assert!(!event.is_terminal());
    }
}
