use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::jobs::{Job, JobId, JobSnapshot, JobStatus};
use super::QueueError;

/// Counts of jobs per status
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Bookkeeping for every job the service knows about.
///
/// Each job has a single writer (its worker), so readers may observe an older status
/// than the one being written but never a torn record.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        let mut guard = self.inner.write().await;
        guard.insert(job.id, job);
    }

    pub async fn get(&self, job_id: &JobId) -> Option<Job> {
        let guard = self.inner.read().await;
        guard.get(job_id).cloned()
    }

    pub async fn snapshot(&self, job_id: &JobId) -> Option<JobSnapshot> {
        let guard = self.inner.read().await;
        guard.get(job_id).map(Job::snapshot)
    }

    pub async fn remove(&self, job_id: &JobId) -> Option<Job> {
        let mut guard = self.inner.write().await;
        guard.remove(job_id)
    }

    /// Move a job to `next`, stamping start/completion times. Rejects any move that
    /// is not a forward step of the lifecycle.
    pub async fn transition(
        &self,
        job_id: &JobId,
        next: JobStatus,
        error: Option<String>,
    ) -> Result<JobSnapshot, QueueError> {
        let mut guard = self.inner.write().await;
        let job = guard.get_mut(job_id).ok_or(QueueError::NotFound(*job_id))?;

        if !job.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                job_id: *job_id,
                from: job.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            JobStatus::Processing => job.started_at = Some(now),
            status if status.is_terminal() => job.completed_at = Some(now),
            _ => {}
        }
        if error.is_some() {
            job.error = error;
        }
        job.status = next;

        debug!(job_id = %job_id, status = %next, "Job transitioned");
        Ok(job.snapshot())
    }

    pub async fn counts(&self) -> JobCounts {
        let guard = self.inner.read().await;
        let mut counts = JobCounts::default();
        for job in guard.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Drop terminal jobs that finished before `cutoff`, returning their ids
    pub async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<JobId> {
        let mut guard = self.inner.write().await;
        let expired: Vec<JobId> = guard
            .values()
            .filter(|job| {
                job.status.is_terminal()
                    && job.completed_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|job| job.id)
            .collect();

        for id in &expired {
            guard.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::jobs::{ChatPayload, JobPayload};
    use tokio_util::sync::CancellationToken;

    fn chat_job(message: &str) -> Job {
        Job::new(
            JobPayload::Chat(ChatPayload {
                message: message.to_string(),
                history: vec![],
                conversation_id: None,
                pdf_ids: None,
            }),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let registry = JobRegistry::new();
        let job = chat_job("hello");
        let id = job.id;

        registry.insert(job).await;

        let snapshot = registry.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert!(registry.get(&uuid::Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_transition_stamps_timestamps() {
        let registry = JobRegistry::new();
        let job = chat_job("hello");
        let id = job.id;
        registry.insert(job).await;

        let processing = registry.transition(&id, JobStatus::Processing, None).await.unwrap();
        assert!(processing.started_at.is_some());
        assert!(processing.completed_at.is_none());

        let failed = registry
            .transition(&id, JobStatus::Failed, Some("backend down".to_string()))
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("backend down"));
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_rejects_backwards_moves() {
        let registry = JobRegistry::new();
        let job = chat_job("hello");
        let id = job.id;
        registry.insert(job).await;

        let skipped = registry.transition(&id, JobStatus::Completed, None).await;
        assert!(matches!(
            skipped,
            Err(QueueError::InvalidTransition { from: JobStatus::Queued, to: JobStatus::Completed, .. })
        ));

        registry.transition(&id, JobStatus::Processing, None).await.unwrap();
        registry.transition(&id, JobStatus::Completed, None).await.unwrap();

        let revisit = registry.transition(&id, JobStatus::Processing, None).await;
        assert!(matches!(revisit, Err(QueueError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_transition_unknown_job() {
        let registry = JobRegistry::new();
        let result = registry
            .transition(&uuid::Uuid::new_v4(), JobStatus::Processing, None)
            .await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_counts_and_eviction() {
        let registry = JobRegistry::new();
        let done = chat_job("done");
        let done_id = done.id;
        let waiting = chat_job("waiting");
        let waiting_id = waiting.id;
        registry.insert(done).await;
        registry.insert(waiting).await;

        registry.transition(&done_id, JobStatus::Processing, None).await.unwrap();
        registry.transition(&done_id, JobStatus::Completed, None).await.unwrap();

        let counts = registry.counts().await;
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.completed, 1);

        // Nothing finished before an old cutoff
        let none = registry
            .evict_finished_before(Utc::now() - chrono::Duration::hours(1))
            .await;
        assert!(none.is_empty());

        let evicted = registry
            .evict_finished_before(Utc::now() + chrono::Duration::seconds(1))
            .await;
        assert_eq!(evicted, vec![done_id]);
        assert!(registry.get(&done_id).await.is_none());
        assert!(registry.get(&waiting_id).await.is_some());
        assert_eq!(registry.counts().await.completed, 0);
    }
}
