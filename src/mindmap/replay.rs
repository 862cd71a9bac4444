//! Historical playback of recorded reasoning.
//!
//! Replay walks a node's subtree depth-first, children in recorded order,
//! and emits each node's decision and chain-of-thought. Nothing is
//! re-executed and no state is touched, so replaying the same node always
//! yields the same frames.

use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::MindMapError;
use crate::agents::{AgentRole, Finding};

use super::node::{MindMapNode, NodeId, NodeStatus, PhaseRef, ReasoningStep};
use super::store::MindMapStore;

/// One replayed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub node_id: NodeId,
    pub parent: Option<NodeId>,
    /// Distance from the replayed node (0 for the node itself).
    pub depth: usize,
    pub agent_id: String,
    pub role: AgentRole,
    pub phase: PhaseRef,
    pub status: NodeStatus,
    pub decision: String,
    pub chain_of_thought: Vec<ReasoningStep>,
    pub findings: Vec<Finding>,
}

/// How much of a replay to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ReplayCommand {
    /// Every frame of the subtree.
    #[default]
    Play,
    /// The single frame at `cursor`.
    Step { cursor: usize },
}

/// Result of a replay command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponse {
    pub node_id: NodeId,
    pub frames: Vec<ReplayFrame>,
    pub total_frames: usize,
    /// Cursor of the following frame, if any remain.
    pub next_cursor: Option<usize>,
}

/// Read-only replay over a [`MindMapStore`].
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    store: Arc<MindMapStore>,
}

impl ReplayEngine {
    pub fn new(store: Arc<MindMapStore>) -> Self {
        Self { store }
    }

    /// Returns every frame of the subtree rooted at `node_id`.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node id is unknown.
    pub fn frames(&self, node_id: NodeId) -> Result<Vec<ReplayFrame>, MindMapError> {
        let nodes = self.store.subtree(node_id)?;
        Ok(to_frames(node_id, nodes))
    }

    /// Executes a replay command against a node.
    pub fn execute(
        &self,
        node_id: NodeId,
        command: ReplayCommand,
    ) -> Result<ReplayResponse, MindMapError> {
        let frames = self.frames(node_id)?;
        let total_frames = frames.len();

        let (frames, next_cursor) = match command {
            ReplayCommand::Play => (frames, None),
            ReplayCommand::Step { cursor } => {
                let frame: Vec<ReplayFrame> = frames.into_iter().skip(cursor).take(1).collect();
                let next = cursor + 1;
                (frame, (next < total_frames).then_some(next))
            }
        };

        Ok(ReplayResponse {
            node_id,
            frames,
            total_frames,
            next_cursor,
        })
    }

    /// Streams the subtree frames in replay order.
    ///
    /// The subtree is snapshotted up front; the stream itself cannot fail.
    pub fn stream(
        &self,
        node_id: NodeId,
    ) -> Result<impl Stream<Item = ReplayFrame> + Send + 'static, MindMapError> {
        let frames = self.frames(node_id)?;
        Ok(async_stream::stream! {
            for frame in frames {
                yield frame;
            }
        })
    }
}

fn to_frames(start: NodeId, nodes: Vec<MindMapNode>) -> Vec<ReplayFrame> {
    let mut depths: std::collections::HashMap<NodeId, usize> = std::collections::HashMap::new();
    nodes
        .into_iter()
        .map(|node| {
            let depth = match node.parent {
                Some(parent) if node.id != start => depths.get(&parent).map_or(0, |d| d + 1),
                _ => 0,
            };
            depths.insert(node.id, depth);
            ReplayFrame {
                node_id: node.id,
                parent: node.parent,
                depth,
                agent_id: node.agent_id,
                role: node.role,
                phase: node.phase,
                status: node.status,
                decision: node.decision,
                chain_of_thought: node.chain_of_thought,
                findings: node.findings,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mindmap::{InvocationRecord, NewNode, ThoughtRecorder};
    use chrono::Utc;
    use futures::StreamExt;
    use uuid::Uuid;

    fn build() -> (Arc<MindMapStore>, NodeId, NodeId) {
        let store = Arc::new(MindMapStore::new());
        let job_id = Uuid::new_v4();
        store.register_job(job_id);

        let open = |parent: Option<NodeId>, agent: &str, phase: u32| {
            let id = store
                .open_node(NewNode {
                    job_id,
                    parent,
                    agent_id: agent.to_string(),
                    role: AgentRole::Doer,
                    phase: PhaseRef::new(phase, "p"),
                    attempt: 1,
                })
                .expect("open");
            let mut recorder = ThoughtRecorder::new();
            recorder.consider(format!("{} input", agent)).choose(format!("{} choice", agent));
            store
                .commit(
                    id,
                    InvocationRecord {
                        status: NodeStatus::Completed,
                        decision: format!("{} decided", agent),
                        chain_of_thought: recorder.finish(),
                        findings: Vec::new(),
                        privacy: None,
                        clinical: None,
                        error: None,
                        ended_at: Utc::now(),
                        duration_ms: 1,
                    },
                )
                .expect("commit");
            id
        };

        let root = open(None, "root", 1);
        let a = open(Some(root), "a", 1);
        open(Some(a), "a1", 2);
        open(Some(root), "b", 1);
        (store, root, a)
    }

    #[test]
    fn test_play_is_depth_first_and_deterministic() {
        let (store, root, _) = build();
        let engine = ReplayEngine::new(store);

        let first = engine.frames(root).expect("frames");
        let agents: Vec<&str> = first.iter().map(|f| f.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["root", "a", "a1", "b"]);
        assert_eq!(first.iter().map(|f| f.depth).collect::<Vec<_>>(), vec![0, 1, 2, 1]);

        let second = engine.frames(root).expect("frames");
        assert_eq!(
            serde_json::to_vec(&first).expect("json"),
            serde_json::to_vec(&second).expect("json")
        );
    }

    #[test]
    fn test_step_walks_with_cursor() {
        let (store, _, a) = build();
        let engine = ReplayEngine::new(store);

        let step = engine
            .execute(a, ReplayCommand::Step { cursor: 0 })
            .expect("step");
        assert_eq!(step.total_frames, 2);
        assert_eq!(step.frames[0].agent_id, "a");
        assert_eq!(step.next_cursor, Some(1));

        let last = engine
            .execute(a, ReplayCommand::Step { cursor: 1 })
            .expect("step");
        assert_eq!(last.frames[0].agent_id, "a1");
        assert_eq!(last.next_cursor, None);

        let past = engine
            .execute(a, ReplayCommand::Step { cursor: 9 })
            .expect("step");
        assert!(past.frames.is_empty());
    }

    #[test]
    fn test_unknown_node_is_not_found() {
        let (store, _, _) = build();
        let engine = ReplayEngine::new(store);
        assert!(matches!(
            engine.frames(NodeId::new()),
            Err(MindMapError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_matches_frames() {
        let (store, root, _) = build();
        let engine = ReplayEngine::new(store);
        let streamed: Vec<ReplayFrame> = engine.stream(root).expect("stream").collect().await;
        assert_eq!(streamed, engine.frames(root).expect("frames"));
    }

    #[test]
    fn test_command_serde() {
        let cmd: ReplayCommand =
            serde_json::from_str(r#"{"command":"step","cursor":3}"#).expect("parse");
        assert_eq!(cmd, ReplayCommand::Step { cursor: 3 });
        let cmd: ReplayCommand = serde_json::from_str(r#"{"command":"play"}"#).expect("parse");
        assert_eq!(cmd, ReplayCommand::Play);
    }
}
