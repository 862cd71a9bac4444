//! Metric recording helpers for orchestration events.
//!
//! The `MetricsCollector` wraps the raw Prometheus metrics with methods that
//! take domain types, so call sites never build label arrays by hand.
//! Recording before `init_metrics()` is a no-op.

use std::time::Duration;

use crate::agents::{AgentRole, Finding};
use crate::jobs::JobStatus;
use crate::mindmap::NodeStatus;

use super::prometheus::{
    ADVERSARIAL_FINDINGS, AGENT_INVOCATIONS_TOTAL, AGENT_LATENCY, JOBS_IN_PROGRESS, JOBS_TOTAL,
    JOB_DURATION, PERSISTENCE_FAILURES,
};

/// Records orchestration metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Marks a job as started.
    pub fn job_started(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    /// Records a job reaching a terminal status.
    ///
    /// `was_running` is false for jobs cancelled while still pending.
    pub fn job_finished(&self, status: JobStatus, duration: Duration, was_running: bool) {
        let label = status.to_string();

        if was_running {
            if let Some(gauge) = JOBS_IN_PROGRESS.get() {
                gauge.dec();
            }
        }

        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[label.as_str()]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[label.as_str()])
                .observe(duration.as_secs_f64());
        }

        tracing::trace!(status = %label, duration_secs = duration.as_secs_f64(), "Recorded job metric");
    }

    /// Records one agent invocation.
    pub fn record_invocation(
        &self,
        agent_id: &str,
        role: AgentRole,
        status: NodeStatus,
        latency: Duration,
    ) {
        let role = role.to_string();
        let status = status.to_string();

        if let Some(invocations) = AGENT_INVOCATIONS_TOTAL.get() {
            invocations
                .with_label_values(&[role.as_str(), status.as_str()])
                .inc();
        }

        if let Some(agent_latency) = AGENT_LATENCY.get() {
            agent_latency
                .with_label_values(&[agent_id])
                .observe(latency.as_secs_f64());
        }
    }

    pub fn record_findings(&self, findings: &[Finding]) {
        if let Some(counter) = ADVERSARIAL_FINDINGS.get() {
            for finding in findings {
                counter
                    .with_label_values(&[finding.severity.to_string().as_str()])
                    .inc();
            }
        }
    }

    pub fn record_persistence_failure(&self) {
        if let Some(counter) = PERSISTENCE_FAILURES.get() {
            counter.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::FindingSeverity;
    use crate::metrics::init_metrics;

    #[test]
    fn test_recording_updates_counters() {
        init_metrics().expect("init");
        let collector = MetricsCollector::new();

        let before = AGENT_INVOCATIONS_TOTAL
            .get()
            .map(|c| c.with_label_values(&["doer", "timeout"]).get())
            .unwrap_or_default();
        collector.record_invocation(
            "patient_generator",
            AgentRole::Doer,
            NodeStatus::Timeout,
            Duration::from_millis(5),
        );
        let after = AGENT_INVOCATIONS_TOTAL
            .get()
            .map(|c| c.with_label_values(&["doer", "timeout"]).get())
            .unwrap_or_default();
        assert!(after >= before + 1.0);

        collector.record_findings(&[Finding::new(FindingSeverity::Critical, "x")]);
        let critical = ADVERSARIAL_FINDINGS
            .get()
            .map(|c| c.with_label_values(&["critical"]).get())
            .unwrap_or_default();
        assert!(critical >= 1.0);
    }

    #[test]
    fn test_job_lifecycle_metrics() {
        init_metrics().expect("init");
        let collector = MetricsCollector::new();
        collector.job_started();
        collector.job_finished(JobStatus::Completed, Duration::from_millis(20), true);
        collector.record_persistence_failure();
        assert!(PERSISTENCE_FAILURES.get().map(|c| c.get()).unwrap_or_default() >= 1.0);
    }
}
