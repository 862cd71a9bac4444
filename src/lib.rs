//! cohort-forge: orchestration of multi-phase, multi-agent synthetic cohort
//! generation.
//!
//! A job runs a root planning agent and then a fixed sequence of phases. Each
//! phase invokes Doer, Coordinator and Adversarial agents, and every
//! invocation is recorded as a node in an append-only mind-map together with
//! its chain of thought, so the whole run can be inspected and replayed.

pub mod agents;
pub mod cli;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod mindmap;
pub mod pipeline;
pub mod server;
pub mod storage;

pub use error::{JobError, MindMapError, RegistryError};
pub use jobs::{GenerationRequest, JobId, JobResults, JobSnapshot, JobStatus};
pub use mindmap::{MindMapStore, NodeId, ReplayEngine};
pub use pipeline::{JobOrchestrator, OrchestratorConfig, PhasePlan};
