//! Stuck-job reconciliation.
//!
//! A run killed mid-job (or one whose finalize write was lost) leaves its job
//! in `processing` forever. The sweep fails such jobs once they have been
//! processing for longer than the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::JobId;

pub struct StuckJobReconciler {
    store: Arc<dyn JobStore>,
    timeout: Duration,
}

impl StuckJobReconciler {
    pub fn new(store: Arc<dyn JobStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fail every job that has been `processing` for longer than the timeout.
    pub async fn sweep(&self) -> Result<Vec<JobId>, JobStoreError> {
        let age = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return Ok(Vec::new());
        };

        let reason = format!("timeout: job exceeded {:?} in processing", self.timeout);
        let reclaimed = self.store.reclaim_stuck(cutoff, &reason).await?;

        if reclaimed.is_empty() {
            info!("no stuck jobs");
        } else {
            for job_id in &reclaimed {
                warn!(job_id = %job_id, timeout_secs = self.timeout.as_secs(), "reclaimed stuck job");
            }
        }
        Ok(reclaimed)
    }
}
