//! Job storage abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{ErrorLogEntry, Job, JobId, JobOutcome, JobStatus, NewJob};

/// Durable queue of jobs with atomic status transitions.
///
/// All writes to a job go through these primitives; callers never hold
/// locks of their own.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `pending` job.
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError>;

    /// Get a job by ID.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Atomically claim the oldest `pending` job (by `created_at`, then
    /// insertion order) and move it to `processing`.
    ///
    /// Under concurrent callers each pending job is returned to exactly one.
    async fn claim_next_pending(&self) -> Result<Option<Job>, JobStoreError>;

    /// Persist mid-run counters. Counters never decrease.
    ///
    /// `failure` is the log entry of the item that just failed, if any. It is
    /// appended in the same write as the counters, so a job abandoned mid-run
    /// still has one entry per counted failure.
    async fn record_progress(
        &self,
        job_id: JobId,
        items_processed: u32,
        items_failed: u32,
        failure: Option<ErrorLogEntry>,
    ) -> Result<(), JobStoreError>;

    /// Terminal write. Only valid from `processing`.
    async fn finalize(&self, job_id: JobId, outcome: JobOutcome) -> Result<Job, JobStoreError>;

    /// Most recent jobs first.
    async fn list_recent(&self, filter: JobFilter) -> Result<Vec<Job>, JobStoreError>;

    /// Fail every `processing` job started before `started_before`, appending
    /// a synthetic log entry with `reason`.
    async fn reclaim_stuck(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobId>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("invalid progress for job {0}: counters would exceed items_total")]
    InvalidProgress(JobId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Filter for [`JobStore::list_recent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            limit: 50,
        }
    }
}

#[derive(Debug, Default)]
struct Queue {
    jobs: HashMap<JobId, Job>,
    /// Insertion order, used to break `created_at` ties.
    order: Vec<JobId>,
}

/// In-memory job store for tests/dev.
///
/// Claim selection and transition happen under one lock, which is the
/// in-process equivalent of a single conditional `UPDATE`.
#[derive(Debug)]
pub struct InMemoryJobStore {
    queue: Mutex<Queue>,
    available: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backing store going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Queue>, JobStoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(JobStoreError::Unavailable("in-memory store offline".to_string()));
        }
        self.queue
            .lock()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let mut queue = self.lock()?;
        let job = Job::new(new);
        queue.order.push(job.id);
        queue.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let queue = self.lock()?;
        Ok(queue.jobs.get(&job_id).cloned())
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>, JobStoreError> {
        let mut queue = self.lock()?;

        let next = queue
            .order
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| queue.jobs.get(id).map(|job| (seq, job)))
            .filter(|(_, job)| job.status == JobStatus::Pending)
            .min_by_key(|(seq, job)| (job.created_at, *seq))
            .map(|(_, job)| job.id);

        let Some(job_id) = next else {
            return Ok(None);
        };

        let job = queue
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        job.mark_claimed(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn record_progress(
        &self,
        job_id: JobId,
        items_processed: u32,
        items_failed: u32,
        failure: Option<ErrorLogEntry>,
    ) -> Result<(), JobStoreError> {
        let mut queue = self.lock()?;
        let job = queue
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        if job.status != JobStatus::Processing {
            return Err(JobStoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Processing,
            });
        }

        let processed = job.items_processed.max(items_processed);
        let failed = job.items_failed.max(items_failed);
        if processed + failed > job.items_total {
            return Err(JobStoreError::InvalidProgress(job_id));
        }

        job.items_processed = processed;
        job.items_failed = failed;
        job.error_log.extend(failure);
        Ok(())
    }

    async fn finalize(&self, job_id: JobId, outcome: JobOutcome) -> Result<Job, JobStoreError> {
        let mut queue = self.lock()?;
        let job = queue
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        if !job.status.can_transition_to(outcome.status) || !outcome.status.is_terminal() {
            return Err(JobStoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: outcome.status,
            });
        }

        job.status = outcome.status;
        job.items_processed = outcome.items_processed;
        job.items_failed = outcome.items_failed;
        job.items_total = job
            .items_total
            .max(outcome.items_processed + outcome.items_failed);
        job.error_log = outcome.error_log;
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn list_recent(&self, filter: JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let queue = self.lock()?;
        let mut result: Vec<(usize, &Job)> = queue
            .order
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| queue.jobs.get(id).map(|job| (seq, job)))
            .filter(|(_, job)| filter.status.is_none_or(|s| job.status == s))
            .filter(|(_, job)| {
                filter
                    .job_type
                    .as_deref()
                    .is_none_or(|t| job.job_type.as_str() == t)
            })
            .collect();

        result.sort_by_key(|(seq, job)| std::cmp::Reverse((job.created_at, *seq)));
        Ok(result
            .into_iter()
            .take(filter.limit)
            .map(|(_, job)| job.clone())
            .collect())
    }

    async fn reclaim_stuck(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<JobId>, JobStoreError> {
        let mut queue = self.lock()?;
        let now = Utc::now();
        let mut reclaimed = Vec::new();

        for id in queue.order.clone() {
            let Some(job) = queue.jobs.get_mut(&id) else {
                continue;
            };
            let stale = job.status == JobStatus::Processing
                && job.started_at.is_some_and(|t| t < started_before);
            if !stale {
                continue;
            }

            job.error_log.push(ErrorLogEntry::synthetic(reason));
            job.items_failed += 1;
            job.items_total = job.items_total.max(job.items_processed + job.items_failed);
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
            reclaimed.push(id);
        }

        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn items(n: usize) -> serde_json::Value {
        json!({ "items": (0..n).map(|i| json!({ "id": format!("r{i}") })).collect::<Vec<_>>() })
    }

    #[tokio::test]
    async fn enqueue_and_claim() {
        let store = InMemoryJobStore::new();

        let job = store.enqueue(NewJob::new("psi_check", items(3))).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.items_total, 0);

        let claimed = store.claim_next_pending().await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.items_total, 3);
        assert!(claimed.started_at.is_some());

        // No more jobs
        assert!(store.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_in_fifo_order() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let job = store
                .enqueue(NewJob::new("psi_check", json!({ "n": i })))
                .await
                .unwrap();
            ids.push(job.id);
        }

        let mut claimed = Vec::new();
        while let Some(job) = store.claim_next_pending().await.unwrap() {
            claimed.push(job.id);
        }
        assert_eq!(claimed, ids);
    }

    #[tokio::test]
    async fn unavailable_store_reports_unavailable() {
        let store = InMemoryJobStore::new();
        store.enqueue(NewJob::new("psi_check", json!({}))).await.unwrap();
        store.set_available(false);

        assert!(matches!(
            store.claim_next_pending().await,
            Err(JobStoreError::Unavailable(_))
        ));

        store.set_available(true);
        assert!(store.claim_next_pending().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_bounded() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(NewJob::new("psi_check", items(3))).await.unwrap();

        // Not yet claimed.
        assert!(matches!(
            store.record_progress(job.id, 1, 0, None).await,
            Err(JobStoreError::InvalidTransition { .. })
        ));

        store.claim_next_pending().await.unwrap();
        store.record_progress(job.id, 2, 0, None).await.unwrap();
        store.record_progress(job.id, 1, 0, None).await.unwrap();

        let current = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(current.items_processed, 2);

        assert!(matches!(
            store.record_progress(job.id, 2, 2, None).await,
            Err(JobStoreError::InvalidProgress(_))
        ));
    }

    #[tokio::test]
    async fn finalize_is_terminal() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(NewJob::new("psi_check", items(1))).await.unwrap();

        // Cannot finalize a pending job.
        assert!(matches!(
            store
                .finalize(job.id, JobOutcome::completed(1, 0, vec![]))
                .await,
            Err(JobStoreError::InvalidTransition { from: JobStatus::Pending, .. })
        ));

        store.claim_next_pending().await.unwrap();
        let done = store
            .finalize(job.id, JobOutcome::completed(1, 0, vec![]))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(done.completed_at.is_some());

        // Second finalize is rejected and does not change state.
        let err = store
            .finalize(job.id, JobOutcome::completed(0, 1, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { from: JobStatus::Done, .. }));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn reclaim_stuck_fails_only_stale_processing_jobs() {
        let store = InMemoryJobStore::new();
        let stale = store.enqueue(NewJob::new("psi_check", items(2))).await.unwrap();
        let pending = store.enqueue(NewJob::new("psi_check", items(2))).await.unwrap();

        store.claim_next_pending().await.unwrap();
        store.record_progress(stale.id, 1, 0, None).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let reclaimed = store.reclaim_stuck(cutoff, "timeout: abandoned").await.unwrap();
        assert_eq!(reclaimed, vec![stale.id]);

        let job = store.get(stale.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.items_processed, 1);
        assert_eq!(job.items_failed, 1);
        assert_eq!(job.error_log.len(), 1);
        assert!(job.error_log[0].is_synthetic());

        let untouched = store.get(pending.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn reclaimed_job_keeps_one_log_entry_per_failure() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(NewJob::new("psi_check", items(3))).await.unwrap();
        store.claim_next_pending().await.unwrap();

        let first = json!({ "id": "r0" });
        let second = json!({ "id": "r1" });
        store
            .record_progress(job.id, 0, 1, Some(ErrorLogEntry::for_item(&first, "record not found")))
            .await
            .unwrap();
        store
            .record_progress(job.id, 0, 2, Some(ErrorLogEntry::for_item(&second, "expired on 2025-12-31")))
            .await
            .unwrap();

        // The run dies here; the sweep picks the job up.
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        store.reclaim_stuck(cutoff, "timeout: abandoned").await.unwrap();

        let failed = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.items_failed, 3);
        assert_eq!(failed.error_log.len() as u32, failed.items_failed);
        assert_eq!(failed.error_log[0].item, r#"{"id":"r0"}"#);
        assert_eq!(failed.error_log[1].error, "expired on 2025-12-31");
        assert!(failed.error_log[2].is_synthetic());
    }

    #[tokio::test]
    async fn rejected_progress_does_not_append_to_the_log() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(NewJob::new("psi_check", items(1))).await.unwrap();
        store.claim_next_pending().await.unwrap();

        let item = json!({ "id": "r0" });
        assert!(matches!(
            store
                .record_progress(job.id, 1, 1, Some(ErrorLogEntry::for_item(&item, "late")))
                .await,
            Err(JobStoreError::InvalidProgress(_))
        ));
        assert!(store.get(job.id).await.unwrap().unwrap().error_log.is_empty());
    }

    #[tokio::test]
    async fn list_recent_filters_and_orders_newest_first() {
        let store = InMemoryJobStore::new();
        let a = store.enqueue(NewJob::new("psi_check", json!({}))).await.unwrap();
        let b = store.enqueue(NewJob::new("medical_check", json!({}))).await.unwrap();
        let c = store.enqueue(NewJob::new("psi_check", json!({}))).await.unwrap();

        let all = store.list_recent(JobFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|j| j.id).collect::<Vec<_>>(), vec![c.id, b.id, a.id]);

        let psi = store
            .list_recent(JobFilter {
                job_type: Some("psi_check".to_string()),
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(psi.len(), 1);
        assert_eq!(psi[0].id, c.id);

        store.claim_next_pending().await.unwrap();
        let processing = store
            .list_recent(JobFilter {
                status: Some(JobStatus::Processing),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, a.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_hand_out_each_job_once() {
        let store = Arc::new(InMemoryJobStore::new());
        let mut expected = HashSet::new();
        for i in 0..20 {
            let job = store.enqueue(NewJob::new("psi_check", json!({ "n": i }))).await.unwrap();
            expected.insert(job.id);
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(job) = store.claim_next_pending().await.unwrap() {
                    mine.push(job.id);
                }
                mine
            }));
        }

        let mut seen = Vec::new();
        for t in tasks {
            seen.extend(t.await.unwrap());
        }

        assert_eq!(seen.len(), expected.len());
        assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
    }

    proptest! {
        /// Property: whatever progress updates a run sends, the stored
        /// counters never exceed `items_total`.
        #[test]
        fn counters_never_exceed_total(
            total in 1usize..12,
            updates in prop::collection::vec((0u32..15, 0u32..15), 0..20)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryJobStore::new();
                let job = store.enqueue(NewJob::new("psi_check", items(total))).await.unwrap();
                store.claim_next_pending().await.unwrap();

                for (processed, failed) in updates {
                    let _ = store.record_progress(job.id, processed, failed, None).await;
                    let current = store.get(job.id).await.unwrap().unwrap();
                    assert!(current.items_processed + current.items_failed <= current.items_total);
                }
            });
        }
    }

}
