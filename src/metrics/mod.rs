//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for cohort_forge
//! operations: job outcomes and durations, agent invocations and latency,
//! adversarial findings, and persistence failures.
//!
//! # Example
//!
//! ```ignore
//! use cohort_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.job_started();
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    ADVERSARIAL_FINDINGS, AGENT_INVOCATIONS_TOTAL, AGENT_LATENCY, JOBS_IN_PROGRESS, JOBS_TOTAL,
    JOB_DURATION, PERSISTENCE_FAILURES, REGISTRY,
};
