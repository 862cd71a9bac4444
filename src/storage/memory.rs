//! In-memory record store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::jobs::{Job, JobId};
use crate::mindmap::{MindMapNode, NodeId};

use super::{RecordStore, StorageError};

#[derive(Debug, Default)]
struct MemoryInner {
    jobs: HashMap<JobId, Job>,
    nodes: HashMap<JobId, Vec<MindMapNode>>,
    node_ids: HashSet<NodeId>,
}

/// Record store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        if let Some(stored) = inner.jobs.get(&job.id) {
            if stored.status.is_terminal() {
                return Ok(false);
            }
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(true)
    }

    async fn append_node(&self, node: &MindMapNode) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if !inner.node_ids.insert(node.id) {
            return Err(StorageError::DuplicateNode(node.id));
        }
        inner.nodes.entry(node.job_id).or_default().push(node.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: JobId) -> Result<Option<Job>, StorageError> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn load_nodes(&self, job_id: JobId) -> Result<Vec<MindMapNode>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .nodes
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StorageError> {
        let mut jobs: Vec<Job> = self.inner.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRole;
    use crate::jobs::{GenerationRequest, JobStatus};
    use crate::mindmap::{NodeStatus, PhaseRef};
    use chrono::Utc;
    use std::time::Duration;

    fn node(job_id: JobId, ordinal: u32) -> MindMapNode {
        MindMapNode {
            id: NodeId::new(),
            job_id,
            parent: None,
            ordinal,
            agent_id: "literature_miner".to_string(),
            role: AgentRole::Doer,
            phase: PhaseRef::new(1, "literature_research"),
            attempt: 1,
            status: NodeStatus::Completed,
            decision: "done".to_string(),
            chain_of_thought: Vec::new(),
            findings: Vec::new(),
            privacy: None,
            clinical: None,
            error: None,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_overwritten() {
        let store = MemoryStore::new();
        let mut job = Job::new(GenerationRequest::new(10, "asthma"), Duration::from_secs(1));
        assert!(store.save_job(&job).await.unwrap());

        job.transition(JobStatus::Cancelled).unwrap();
        assert!(store.save_job(&job).await.unwrap());

        let mut stale = job.clone();
        stale.status = JobStatus::Running;
        assert!(!store.save_job(&stale).await.unwrap());

        let loaded = store.load_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_nodes_keep_append_order_and_reject_duplicates() {
        let store = MemoryStore::new();
        let job_id = uuid::Uuid::new_v4();
        let first = node(job_id, 2);
        let second = node(job_id, 1);

        store.append_node(&first).await.unwrap();
        store.append_node(&second).await.unwrap();
        let err = store.append_node(&first).await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateNode(id) if id == first.id));

        let loaded = store.load_nodes(job_id).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, first.id);
        assert_eq!(loaded[1].id, second.id);
    }
}
