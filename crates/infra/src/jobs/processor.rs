//! Single-pass job processor.
//!
//! Each trigger claims at most one job, runs it to completion (or until the
//! run budget runs out) and finalizes it. There is no polling loop here; the
//! scheduler calling the trigger endpoint is the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::reconcile::StuckJobReconciler;
use super::registry::{HandlerError, HandlerRegistry, ItemContext, JobHandler, ScopeContext};
use super::store::JobStore;
use super::types::{ErrorLogEntry, ExecutionMode, Job, JobId, JobOutcome, JobStatus, JobType};

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Upper bound for a single `process_item` call
    pub item_timeout: Duration,
    /// Wall-clock budget for a whole run
    pub run_budget: Duration,
    /// Sweep stuck jobs older than this before claiming
    pub reconcile_before_claim: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(30),
            run_budget: Duration::from_secs(280),
            reconcile_before_claim: None,
        }
    }
}

impl ProcessorConfig {
    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    pub fn with_run_budget(mut self, run_budget: Duration) -> Self {
        self.run_budget = run_budget;
        self
    }

    pub fn with_reconcile_before_claim(mut self, stuck_after: Duration) -> Self {
        self.reconcile_before_claim = Some(stuck_after);
        self
    }
}

/// Failure that aborts a whole job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("run budget of {budget:?} exceeded after {completed} of {total} items")]
    BudgetExceeded {
        budget: Duration,
        completed: usize,
        total: usize,
    },
}

/// Result of one processor invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// `false` when there was nothing to claim.
    pub processed: bool,
    pub job_id: Option<JobId>,
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub items_processed: Option<u32>,
    pub items_failed: Option<u32>,
    pub duration_ms: u64,
    /// Pipeline-level failure, or a lost finalize write.
    pub error: Option<String>,
}

impl RunSummary {
    fn idle(started: Instant) -> Self {
        Self {
            processed: false,
            job_id: None,
            job_type: None,
            status: None,
            items_processed: None,
            items_failed: None,
            duration_ms: elapsed_ms(started),
            error: None,
        }
    }

    fn finished(job: &Job, outcome: &JobOutcome, started: Instant, error: Option<String>) -> Self {
        Self {
            processed: true,
            job_id: Some(job.id),
            job_type: Some(job.job_type.clone()),
            status: Some(outcome.status),
            items_processed: Some(outcome.items_processed),
            items_failed: Some(outcome.items_failed),
            duration_ms: elapsed_ms(started),
            error,
        }
    }

    /// A run succeeded unless the pipeline itself failed.
    ///
    /// A finished job whose items all failed is still a successful run.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Claims and runs one job per call.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    config: ProcessorConfig,
}

impl JobProcessor {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>, config: ProcessorConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Claim the oldest pending job and run it.
    ///
    /// Never returns an error: store outages at claim time read as "nothing
    /// to do", and everything after the claim ends in a finalize attempt.
    pub async fn run_once(&self) -> RunSummary {
        let started = Instant::now();

        if let Some(stuck_after) = self.config.reconcile_before_claim {
            let reconciler = StuckJobReconciler::new(self.store.clone(), stuck_after);
            if let Err(e) = reconciler.sweep().await {
                warn!(error = %e, "stuck-job sweep failed");
            }
        }

        let job = match self.store.claim_next_pending().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!("no pending jobs");
                return RunSummary::idle(started);
            }
            Err(e) => {
                warn!(error = %e, "failed to claim job, treating as idle");
                return RunSummary::idle(started);
            }
        };

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            org_id = ?job.org_id,
            items_total = job.items_total,
            "claimed job"
        );

        let (outcome, failure) = self.execute(&job, started).await;
        let mut error = failure.map(|e| e.to_string());

        match self.store.finalize(job.id, outcome.clone()).await {
            Ok(done) => info!(
                job_id = %done.id,
                status = %done.status,
                items_processed = done.items_processed,
                items_failed = done.items_failed,
                "job finalized"
            ),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to finalize job");
                error = Some(match error {
                    Some(pipeline) => format!("{pipeline}; finalize failed: {e}"),
                    None => format!("finalize failed: {e}"),
                });
            }
        }

        RunSummary::finished(&job, &outcome, started, error)
    }

    async fn execute(&self, job: &Job, started: Instant) -> (JobOutcome, Option<ProcessError>) {
        let handler = match self.registry.get(&job.job_type) {
            Ok(handler) => handler,
            Err(e) => {
                error!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    "no handler registered for job type"
                );
                return aborted(0, 0, Vec::new(), e.into());
            }
        };

        match job.execution_mode() {
            ExecutionMode::Items(items) => self.run_items(job, handler.as_ref(), items, started).await,
            ExecutionMode::Scope => self.run_scope(job, handler.as_ref(), started).await,
        }
    }

    async fn run_items(
        &self,
        job: &Job,
        handler: &dyn JobHandler,
        items: &[Value],
        started: Instant,
    ) -> (JobOutcome, Option<ProcessError>) {
        let mut processed = 0u32;
        let mut failed = 0u32;
        let mut log = Vec::new();

        for (idx, item) in items.iter().enumerate() {
            let remaining = self.config.run_budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return self.budget_exhausted(job, processed, failed, log, idx, items.len());
            }
            let budget_bound = remaining < self.config.item_timeout;
            let limit = self.config.item_timeout.min(remaining);

            let ctx = ItemContext {
                org_id: job.org_id,
                item,
            };
            let result = match timeout(limit, handler.process_item(ctx)).await {
                Ok(result) => result,
                // Cut short by the run budget, not by its own timeout.
                Err(_) if budget_bound => {
                    return self.budget_exhausted(job, processed, failed, log, idx, items.len());
                }
                Err(_) => Err(HandlerError::Timeout(limit)),
            };

            let failure = match result {
                Ok(()) => {
                    processed += 1;
                    None
                }
                Err(e) => {
                    failed += 1;
                    debug!(job_id = %job.id, item = idx, error = %e, "item failed");
                    let entry = ErrorLogEntry::for_item(item, e.to_string());
                    log.push(entry.clone());
                    Some(entry)
                }
            };

            if let Err(e) = self
                .store
                .record_progress(job.id, processed, failed, failure)
                .await
            {
                warn!(job_id = %job.id, error = %e, "failed to persist progress");
            }
        }

        (JobOutcome::completed(processed, failed, log), None)
    }

    async fn run_scope(
        &self,
        job: &Job,
        handler: &dyn JobHandler,
        started: Instant,
    ) -> (JobOutcome, Option<ProcessError>) {
        let remaining = self
            .config
            .run_budget
            .saturating_sub(started.elapsed());
        let ctx = ScopeContext {
            org_id: job.org_id,
            payload: &job.payload,
        };

        let result = match timeout(remaining, handler.process_scope(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(remaining)),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.store.record_progress(job.id, 1, 0, None).await {
                    warn!(job_id = %job.id, error = %e, "failed to persist progress");
                }
                (JobOutcome::completed(1, 0, Vec::new()), None)
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "scope pass failed");
                aborted(0, 0, Vec::new(), e.into())
            }
        }
    }

    /// Finish a run whose budget ran out before item `completed`.
    ///
    /// The abandoned items are not counted against themselves; the cut-off is
    /// logged once as a synthetic entry.
    fn budget_exhausted(
        &self,
        job: &Job,
        processed: u32,
        failed: u32,
        log: Vec<ErrorLogEntry>,
        completed: usize,
        total: usize,
    ) -> (JobOutcome, Option<ProcessError>) {
        let e = ProcessError::BudgetExceeded {
            budget: self.config.run_budget,
            completed,
            total,
        };
        warn!(job_id = %job.id, error = %e, "abandoning remaining items");
        let outcome = JobOutcome::incomplete(processed, failed, log, e.to_string());
        (outcome, Some(e))
    }
}

fn aborted(
    processed: u32,
    failed: u32,
    log: Vec<ErrorLogEntry>,
    error: ProcessError,
) -> (JobOutcome, Option<ProcessError>) {
    let outcome = JobOutcome::aborted(processed, failed, log, error.to_string());
    (outcome, Some(error))
}
