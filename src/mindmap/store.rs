//! Arena-backed mind-map store.
//!
//! Each job owns its own graph: nodes live in an append-only arena indexed by
//! creation order, with a parallel adjacency list and the chronological
//! execution sequence. Edges can only point from an existing node to a node
//! in the same job at an equal or later phase, so the graph is always a DAG.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::error;

use crate::error::MindMapError;
use crate::jobs::JobId;

use super::node::{
    InvocationRecord, MindMapNode, MindMapView, NewNode, NodeId, NodeStatus, NodeView,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Graph of a single job.
#[derive(Debug)]
struct JobGraph {
    job_id: JobId,
    nodes: Vec<MindMapNode>,
    slots: HashMap<NodeId, usize>,
    children: Vec<Vec<usize>>,
    sequence: Vec<usize>,
    root: Option<usize>,
}

impl JobGraph {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            nodes: Vec::new(),
            slots: HashMap::new(),
            children: Vec::new(),
            sequence: Vec::new(),
            root: None,
        }
    }

    fn slot(&self, id: NodeId) -> Result<usize, MindMapError> {
        self.slots
            .get(&id)
            .copied()
            .ok_or(MindMapError::NodeNotFound(id))
    }

    fn view(&self, slot: usize) -> NodeView {
        NodeView {
            node: self.nodes[slot].clone(),
            children: self.children[slot]
                .iter()
                .map(|&c| self.nodes[c].id)
                .collect(),
        }
    }

    /// Appends a node to the arena, wiring its parent edge.
    fn push(&mut self, node: MindMapNode) -> usize {
        let slot = self.nodes.len();
        if let Some(parent) = node.parent {
            if let Some(&parent_slot) = self.slots.get(&parent) {
                self.children[parent_slot].push(slot);
            }
        } else {
            self.root = Some(slot);
        }
        self.slots.insert(node.id, slot);
        self.nodes.push(node);
        self.children.push(Vec::new());
        slot
    }

    /// Depth-first pre-order walk from `start`, children in recorded order.
    fn preorder(&self, start: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(slot) = stack.pop() {
            order.push(slot);
            for &child in self.children[slot].iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

/// Store of all jobs' mind-maps.
///
/// Graphs are locked per job; the global node index is only touched briefly
/// to resolve a node id to its owning job.
#[derive(Debug, Default)]
pub struct MindMapStore {
    graphs: RwLock<HashMap<JobId, Arc<RwLock<JobGraph>>>>,
    index: RwLock<HashMap<NodeId, JobId>>,
}

impl MindMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an empty graph for a job. Idempotent.
    pub fn register_job(&self, job_id: JobId) {
        write(&self.graphs)
            .entry(job_id)
            .or_insert_with(|| Arc::new(RwLock::new(JobGraph::new(job_id))));
    }

    pub fn contains_job(&self, job_id: JobId) -> bool {
        read(&self.graphs).contains_key(&job_id)
    }

    fn graph(&self, job_id: JobId) -> Result<Arc<RwLock<JobGraph>>, MindMapError> {
        read(&self.graphs)
            .get(&job_id)
            .cloned()
            .ok_or(MindMapError::JobNotFound(job_id))
    }

    fn graph_of(&self, node_id: NodeId) -> Result<Arc<RwLock<JobGraph>>, MindMapError> {
        let job_id = read(&self.index)
            .get(&node_id)
            .copied()
            .ok_or(MindMapError::NodeNotFound(node_id))?;
        self.graph(job_id)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Opens a `Running` node and appends its parent edge.
    ///
    /// # Errors
    ///
    /// - `JobNotFound` if the job has no registered graph
    /// - `CrossJobEdge` if the parent belongs to another job
    /// - `ParentNotFound` if the parent does not exist yet
    /// - `BackwardEdge` if the parent is in a later phase than the child
    /// - `DuplicateRoot` if a parentless node already exists for the job
    pub fn open_node(&self, new: NewNode) -> Result<NodeId, MindMapError> {
        let graph = self.graph(new.job_id)?;
        let mut graph = write(&graph);

        match new.parent {
            Some(parent) => {
                let parent_slot = match graph.slots.get(&parent) {
                    Some(&slot) => slot,
                    None => {
                        return Err(match read(&self.index).get(&parent) {
                            Some(&other) => MindMapError::CrossJobEdge {
                                parent,
                                parent_job: other,
                                job: new.job_id,
                            },
                            None => MindMapError::ParentNotFound(parent),
                        });
                    }
                };
                let parent_phase = graph.nodes[parent_slot].phase.index;
                if new.phase.index < parent_phase {
                    return Err(MindMapError::BackwardEdge {
                        parent,
                        parent_phase,
                        child_phase: new.phase.index,
                    });
                }
            }
            None => {
                if graph.root.is_some() {
                    return Err(MindMapError::DuplicateRoot(new.job_id));
                }
            }
        }

        let id = NodeId::new();
        let node = MindMapNode {
            id,
            job_id: new.job_id,
            parent: new.parent,
            ordinal: graph.nodes.len() as u32,
            agent_id: new.agent_id,
            role: new.role,
            phase: new.phase,
            attempt: new.attempt,
            status: NodeStatus::Running,
            decision: String::new(),
            chain_of_thought: Vec::new(),
            findings: Vec::new(),
            privacy: None,
            clinical: None,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: 0,
        };
        graph.push(node);
        write(&self.index).insert(id, new.job_id);

        Ok(id)
    }

    /// Records a node's terminal data and appends it to the execution sequence.
    ///
    /// # Errors
    ///
    /// Returns `NodeImmutable` if the node already has a terminal status.
    pub fn commit(
        &self,
        node_id: NodeId,
        record: InvocationRecord,
    ) -> Result<MindMapNode, MindMapError> {
        if !record.status.is_terminal() {
            return Err(MindMapError::InvalidRecord(format!(
                "node '{}' committed with non-terminal status",
                node_id
            )));
        }
        if record.chain_of_thought.is_empty() {
            return Err(MindMapError::MissingReasoning(node_id));
        }

        let graph = self.graph_of(node_id)?;
        let mut graph = write(&graph);
        let slot = graph.slot(node_id)?;

        let node = &mut graph.nodes[slot];
        if node.status.is_terminal() {
            error!(
                node_id = %node_id,
                agent = %node.agent_id,
                status = %node.status,
                "Rejected write to terminal mind-map node"
            );
            return Err(MindMapError::NodeImmutable(node_id));
        }

        node.status = record.status;
        node.decision = record.decision;
        node.chain_of_thought = record.chain_of_thought;
        node.findings = record.findings;
        node.privacy = record.privacy;
        node.clinical = record.clinical;
        node.error = record.error;
        node.ended_at = Some(record.ended_at);
        node.duration_ms = record.duration_ms;
        let committed = node.clone();

        graph.sequence.push(slot);
        Ok(committed)
    }

    /// Builds a store holding a single job rebuilt from persisted records.
    pub fn from_records(job_id: JobId, records: Vec<MindMapNode>) -> Result<Self, MindMapError> {
        let store = Self::new();
        store.restore_job(job_id, records)?;
        Ok(store)
    }

    /// Rebuilds a job's graph from persisted, committed node records.
    ///
    /// `records` must be in completion order; creation order is restored from
    /// each node's ordinal.
    pub fn restore_job(
        &self,
        job_id: JobId,
        records: Vec<MindMapNode>,
    ) -> Result<(), MindMapError> {
        let mut graph = JobGraph::new(job_id);
        let completion: Vec<NodeId> = records.iter().map(|n| n.id).collect();

        let mut by_creation = records;
        by_creation.sort_by_key(|n| n.ordinal);

        for node in by_creation {
            if node.job_id != job_id {
                return Err(MindMapError::InvalidRecord(format!(
                    "node '{}' belongs to job '{}'",
                    node.id, node.job_id
                )));
            }
            if !node.status.is_terminal() {
                return Err(MindMapError::InvalidRecord(format!(
                    "node '{}' was persisted without a terminal status",
                    node.id
                )));
            }
            match node.parent {
                Some(parent) => {
                    let parent_slot = graph.slot(parent).map_err(|_| MindMapError::ParentNotFound(parent))?;
                    let parent_phase = graph.nodes[parent_slot].phase.index;
                    if node.phase.index < parent_phase {
                        return Err(MindMapError::BackwardEdge {
                            parent,
                            parent_phase,
                            child_phase: node.phase.index,
                        });
                    }
                }
                None if graph.root.is_some() => {
                    return Err(MindMapError::DuplicateRoot(job_id));
                }
                None => {}
            }
            graph.push(node);
        }

        for id in completion {
            let slot = graph.slot(id)?;
            graph.sequence.push(slot);
        }

        {
            let mut index = write(&self.index);
            for node in &graph.nodes {
                index.insert(node.id, job_id);
            }
        }
        write(&self.graphs).insert(job_id, Arc::new(RwLock::new(graph)));
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns a node and its children ids.
    pub fn get_node(&self, node_id: NodeId) -> Result<NodeView, MindMapError> {
        let graph = self.graph_of(node_id)?;
        let graph = read(&graph);
        let slot = graph.slot(node_id)?;
        Ok(graph.view(slot))
    }

    /// Returns the direct children of a node in recorded order.
    pub fn get_children(&self, node_id: NodeId) -> Result<Vec<MindMapNode>, MindMapError> {
        let graph = self.graph_of(node_id)?;
        let graph = read(&graph);
        let slot = graph.slot(node_id)?;
        Ok(graph.children[slot]
            .iter()
            .map(|&c| graph.nodes[c].clone())
            .collect())
    }

    /// Returns node ids in the order their invocations completed.
    pub fn get_sequence(&self, job_id: JobId) -> Result<Vec<NodeId>, MindMapError> {
        let graph = self.graph(job_id)?;
        let graph = read(&graph);
        Ok(graph.sequence.iter().map(|&s| graph.nodes[s].id).collect())
    }

    pub fn root(&self, job_id: JobId) -> Result<Option<NodeId>, MindMapError> {
        let graph = self.graph(job_id)?;
        let graph = read(&graph);
        Ok(graph.root.map(|s| graph.nodes[s].id))
    }

    /// Returns all nodes of a job in creation order.
    pub fn nodes(&self, job_id: JobId) -> Result<Vec<MindMapNode>, MindMapError> {
        let graph = self.graph(job_id)?;
        let graph = read(&graph);
        Ok(graph.nodes.clone())
    }

    pub fn node_count(&self, job_id: JobId) -> Result<usize, MindMapError> {
        let graph = self.graph(job_id)?;
        let count = read(&graph).nodes.len();
        Ok(count)
    }

    /// Returns a consistent snapshot of a job's full mind-map.
    pub fn view(&self, job_id: JobId) -> Result<MindMapView, MindMapError> {
        let graph = self.graph(job_id)?;
        let graph = read(&graph);
        let nodes: Vec<NodeView> = (0..graph.nodes.len()).map(|s| graph.view(s)).collect();
        Ok(MindMapView {
            job_id: graph.job_id,
            root: graph.root.map(|s| graph.nodes[s].id),
            total_nodes: nodes.len(),
            execution_sequence: graph.sequence.iter().map(|&s| graph.nodes[s].id).collect(),
            nodes,
        })
    }

    /// Returns the subtree rooted at `node_id` in depth-first pre-order.
    ///
    /// The walk happens under a single read lock, so the result is a
    /// consistent snapshot even while the job is still running.
    pub fn subtree(&self, node_id: NodeId) -> Result<Vec<MindMapNode>, MindMapError> {
        let graph = self.graph_of(node_id)?;
        let graph = read(&graph);
        let start = graph.slot(node_id)?;
        Ok(graph
            .preorder(start)
            .into_iter()
            .map(|s| graph.nodes[s].clone())
            .collect())
    }
}
