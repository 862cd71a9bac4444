//! In-process job table.
//!
//! Each entry pairs the job record with its cancellation token and a status
//! watch channel. The record sits behind its own lock, so jobs never contend
//! with each other; the table lock is only held to look an entry up.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::JobError;

use super::types::{Job, JobId, JobSnapshot, JobStatus};

/// One job and its control handles.
#[derive(Debug)]
pub struct JobEntry {
    job: RwLock<Job>,
    cancel: CancellationToken,
    status_tx: watch::Sender<JobStatus>,
}

impl JobEntry {
    pub fn new(job: Job) -> Self {
        let (status_tx, _) = watch::channel(job.status);
        Self {
            job: RwLock::new(job),
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    /// Returns a consistent snapshot of the job.
    pub async fn snapshot(&self) -> JobSnapshot {
        let job = self.job.read().await;
        job.snapshot(self.cancel.is_cancelled())
    }

    /// Read access to the full record.
    pub async fn read(&self) -> RwLockReadGuard<'_, Job> {
        self.job.read().await
    }

    /// Applies `f` to the record under the write lock.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        let mut job = self.job.write().await;
        f(&mut job)
    }

    /// Moves the job to `next`.
    ///
    /// `prepare` runs under the same write lock right before the transition,
    /// so terminal fields land atomically with the status change. Watchers
    /// see non-terminal statuses immediately; a terminal status is published
    /// by [`JobEntry::settle`] once the final record has been persisted.
    pub async fn transition_with(
        &self,
        next: JobStatus,
        prepare: impl FnOnce(&mut Job),
    ) -> Result<(), JobError> {
        let mut job = self.job.write().await;
        if !job.status.can_transition_to(next) {
            error!(
                job_id = %job.id,
                from = %job.status,
                to = %next,
                "Rejected job status transition"
            );
            return Err(JobError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }
        prepare(&mut job);
        job.transition(next)?;
        if !next.is_terminal() {
            self.status_tx.send_replace(next);
        }
        Ok(())
    }

    /// Publishes the current status to watchers.
    pub async fn settle(&self) {
        let status = self.job.read().await.status;
        self.status_tx.send_replace(status);
    }

    pub async fn transition(&self, next: JobStatus) -> Result<(), JobError> {
        self.transition_with(next, |_| {}).await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }
}

/// All jobs known to this process.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) -> Arc<JobEntry> {
        let id = job.id;
        let entry = Arc::new(JobEntry::new(job));
        self.jobs.write().await.insert(id, entry.clone());
        entry
    }

    /// Looks up a job.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids.
    pub async fn get(&self, job_id: JobId) -> Result<Arc<JobEntry>, JobError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(format!("job '{}'", job_id)))
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Snapshots of every job, newest first.
    pub async fn snapshots(&self) -> Vec<JobSnapshot> {
        let entries: Vec<Arc<JobEntry>> = self.jobs.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.snapshot().await);
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::GenerationRequest;
    use std::time::Duration;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(GenerationRequest::new(5, "CKD"), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let table = JobTable::new();
        assert!(matches!(
            table.get(Uuid::new_v4()).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_notifies_watchers() {
        let table = JobTable::new();
        let entry = table.insert(job()).await;
        let mut rx = entry.subscribe_status();

        entry.transition(JobStatus::Running).await.expect("start");
        rx.changed().await.expect("changed");
        assert_eq!(*rx.borrow(), JobStatus::Running);

        entry
            .transition_with(JobStatus::Cancelled, |job| job.current_phase = None)
            .await
            .expect("cancel");
        assert_eq!(entry.snapshot().await.status, JobStatus::Cancelled);
        assert_eq!(*rx.borrow(), JobStatus::Running);

        entry.settle().await;
        rx.changed().await.expect("settled");
        assert_eq!(*rx.borrow(), JobStatus::Cancelled);
        assert!(entry.transition(JobStatus::Completed).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_reports_cancel_request() {
        let table = JobTable::new();
        let entry = table.insert(job()).await;
        assert!(!entry.snapshot().await.cancel_requested);
        entry.cancel_token().cancel();
        assert!(entry.snapshot().await.cancel_requested);
        assert_eq!(table.len().await, 1);
    }
}
