//! Mind-map: the provenance graph of agent invocations.
//!
//! Every agent invocation produces one node carrying the agent's decision and
//! its chain-of-thought. Nodes form a DAG per job (edges only point forward in
//! phase order) and are also listed in the order their invocations completed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cohort_forge::mindmap::{MindMapStore, ReplayEngine, ReplayCommand};
//!
//! let store = Arc::new(MindMapStore::new());
//! store.register_job(job_id);
//!
//! let node = store.open_node(new_node)?;
//! store.commit(node, record)?;
//!
//! let replay = ReplayEngine::new(store.clone());
//! let response = replay.execute(node, ReplayCommand::Play)?;
//! ```

pub mod node;
pub mod recorder;
pub mod replay;
pub mod store;

pub use node::{
    DecisionCriterion, InvocationRecord, MindMapNode, MindMapView, NewNode, NodeDetail, NodeId,
    NodeStatus, NodeView, PhaseRef, ReasoningStep,
};
pub use recorder::ThoughtRecorder;
pub use replay::{ReplayCommand, ReplayEngine, ReplayFrame, ReplayResponse};
pub use store::MindMapStore;
