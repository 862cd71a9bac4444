//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by cohort_forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all cohort_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total jobs that reached a terminal status, labeled by status.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job wall-clock duration in seconds, labeled by terminal status.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs currently running.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Total agent invocations, labeled by role and node status.
pub static AGENT_INVOCATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Agent invocation latency in seconds, labeled by agent.
pub static AGENT_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Adversarial findings raised, labeled by severity.
pub static ADVERSARIAL_FINDINGS: OnceLock<CounterVec> = OnceLock::new();

/// Failed writes to the record store.
pub static PERSISTENCE_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup; later calls keep the first set of metrics.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Job metrics
    let jobs_total = CounterVec::new(
        Opts::new("cohort_forge_jobs_total", "Total jobs by terminal status"),
        &["status"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cohort_forge_job_duration_seconds",
            "Job duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["status"],
    )?;

    let jobs_in_progress = Gauge::new(
        "cohort_forge_jobs_in_progress",
        "Number of jobs currently running",
    )?;

    // Agent metrics
    let agent_invocations_total = CounterVec::new(
        Opts::new(
            "cohort_forge_agent_invocations_total",
            "Total agent invocations",
        ),
        &["role", "status"],
    )?;

    let agent_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "cohort_forge_agent_latency_seconds",
            "Agent invocation latency in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["agent"],
    )?;

    let adversarial_findings = CounterVec::new(
        Opts::new(
            "cohort_forge_adversarial_findings_total",
            "Adversarial findings raised",
        ),
        &["severity"],
    )?;

    // Storage metrics
    let persistence_failures = Counter::new(
        "cohort_forge_persistence_failures_total",
        "Failed writes to the record store",
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(agent_invocations_total.clone()))?;
    registry.register(Box::new(agent_latency.clone()))?;
    registry.register(Box::new(adversarial_findings.clone()))?;
    registry.register(Box::new(persistence_failures.clone()))?;

    // A concurrent initializer may have won; its metrics stay in place.
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = AGENT_INVOCATIONS_TOTAL.set(agent_invocations_total);
    let _ = AGENT_LATENCY.set(agent_latency);
    let _ = ADVERSARIAL_FINDINGS.set(adversarial_findings);
    let _ = PERSISTENCE_FAILURES.set(persistence_failures);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead if the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics().expect("first init");
        init_metrics().expect("second init");
        assert!(REGISTRY.get().is_some());
        assert!(JOBS_TOTAL.get().is_some());
    }

    #[test]
    fn test_export_contains_metric_names() {
        init_metrics().expect("init");
        if let Some(counter) = JOBS_TOTAL.get() {
            counter.with_label_values(&["completed"]).inc();
        }
        let text = export_metrics();
        assert!(text.contains("cohort_forge_jobs_total"));
    }
}
