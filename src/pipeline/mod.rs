//! Pipeline orchestration for synthetic cohort generation.
//!
//! This module runs jobs through a fixed sequence of phases, invoking each
//! phase's agents and recording every invocation in the mind-map.
//!
//! # Architecture
//!
//! - **Phase plan**: the root agent plus ordered phases, built in or loaded from YAML
//! - **Runner**: executes one phase, tier by tier (Doers, Coordinators, Adversarials)
//! - **Orchestrator**: accepts jobs, drives them on background tasks, answers queries
//! - **Config**: limits, timeouts and storage settings
//!
//! # Job Flow
//!
//! 1. **Submission**: the request is validated and a Pending job is recorded
//! 2. **Root**: the root agent plans the job and becomes the mind-map root
//! 3. **Phases**: each phase runs after the previous one returns; its output
//!    becomes input to every later phase
//! 4. **Completion**: the job ends Completed, Failed or Cancelled and its
//!    record is persisted
//!
//! # Example
//!
//! ```rust,ignore
//! use cohort_forge::jobs::GenerationRequest;
//! use cohort_forge::pipeline::{JobOrchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig::new().with_max_concurrent_jobs(4);
//! let orchestrator = JobOrchestrator::from_config(config).await?;
//!
//! let receipt = orchestrator
//!     .submit(GenerationRequest::new(5, "CKD+Diabetes").with_adversarial_testing(true))
//!     .await?;
//! orchestrator.wait(receipt.job_id).await?;
//! let results = orchestrator.get_results(receipt.job_id).await?;
//! ```

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod phase;
pub mod runner;

pub use config::{ConfigError, OrchestratorConfig};
pub use events::JobEvent;
pub use orchestrator::{JobOrchestrator, OrchestratorBuilder};
pub use phase::{AgentCondition, PhaseAgent, PhaseDefinition, PhasePlan};
pub use runner::{partial_progress, PhaseError, PhaseJob, PhaseOutput, PhaseRunner};
