//! Core job types and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use vigil_core::OrgId;

/// Maximum length (in characters) of an item snapshot stored in the error log.
pub const ITEM_SNAPSHOT_MAX_CHARS: usize = 200;

/// Item name used for pipeline-level entries in the error log.
pub const SYNTHETIC_ITEM: &str = "job";

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Job type tag, used to route a job to its handler.
///
/// Tags are open strings: a producer may enqueue a type this consumer does
/// not know, which surfaces as an unknown-type failure at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub const PSI_CHECK: &'static str = "psi_check";
    pub const MEDICAL_CHECK: &'static str = "medical_check";
    pub const ISCIR_CHECK: &'static str = "iscir_check";
    pub const LEGISLATIVE_UPDATE: &'static str = "legislative_update";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Job lifecycle status.
///
/// `pending --claim--> processing --finalize--> done | failed`. Transitions
/// only move forward; a claimed job never returns to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by exactly one processor run
    Processing,
    /// Finished with at least one successful unit of work
    Done,
    /// Finished with zero successful units of work
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("invalid job status: {other}")),
        }
    }
}

/// One failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    /// Truncated JSON snapshot of the failing item, or `"job"` for
    /// pipeline-level failures.
    pub item: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn for_item(item: &Value, error: impl Into<String>) -> Self {
        Self {
            item: snapshot(item),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn synthetic(error: impl Into<String>) -> Self {
        Self {
            item: SYNTHETIC_ITEM.to_string(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.item == SYNTHETIC_ITEM
    }
}

fn snapshot(item: &Value) -> String {
    let json = item.to_string();
    match json.char_indices().nth(ITEM_SNAPSHOT_MAX_CHARS) {
        Some((cut, _)) => json[..cut].to_string(),
        None => json,
    }
}

/// Request to create a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub org_id: Option<OrgId>,
}

impl NewJob {
    pub fn new(job_type: impl Into<JobType>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            org_id: None,
        }
    }

    pub fn for_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }
}

/// How a claimed job is executed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExecutionMode<'a> {
    /// One handler call per entry of `payload.items`, in order.
    Items(&'a [Value]),
    /// A single organization-wide (or global) pass.
    Scope,
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: Value,
    pub org_id: Option<OrgId>,
    pub status: JobStatus,
    pub items_total: u32,
    pub items_processed: u32,
    pub items_failed: u32,
    pub error_log: Vec<ErrorLogEntry>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job. `items_total` stays 0 until the job is claimed.
    pub fn new(new: NewJob) -> Self {
        Self {
            id: JobId::new(),
            job_type: new.job_type,
            payload: new.payload,
            org_id: new.org_id,
            status: JobStatus::Pending,
            items_total: 0,
            items_processed: 0,
            items_failed: 0,
            error_log: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Item mode iff the payload carries a non-empty `items` array.
    pub fn execution_mode(&self) -> ExecutionMode<'_> {
        match self.payload.get("items").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => ExecutionMode::Items(items),
            _ => ExecutionMode::Scope,
        }
    }

    /// Units of work a run of this job will attempt.
    pub fn units_of_work(&self) -> u32 {
        match self.execution_mode() {
            ExecutionMode::Items(items) => u32::try_from(items.len()).unwrap_or(u32::MAX),
            ExecutionMode::Scope => 1,
        }
    }

    /// Transition `pending -> processing`, stamping `started_at` and `items_total`.
    pub fn mark_claimed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(JobStatus::Processing) {
            return false;
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.items_total = self.units_of_work();
        true
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds().max(0) as u64)
    }
}

/// Terminal write produced by a processor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub items_processed: u32,
    pub items_failed: u32,
    pub error_log: Vec<ErrorLogEntry>,
}

impl JobOutcome {
    /// Outcome of a run that reached the end of its work.
    ///
    /// `failed` only when nothing succeeded; any success makes the run
    /// `done`, even with failures (inspect `items_failed` for degraded runs).
    pub fn completed(items_processed: u32, items_failed: u32, error_log: Vec<ErrorLogEntry>) -> Self {
        let status = if items_failed > 0 && items_processed == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Done
        };
        Self {
            status,
            items_processed,
            items_failed,
            error_log,
        }
    }

    /// Outcome of a run aborted by a pipeline-level error.
    ///
    /// Appends one synthetic `"job"` entry and counts it as a failure.
    pub fn aborted(
        items_processed: u32,
        items_failed: u32,
        mut error_log: Vec<ErrorLogEntry>,
        error: impl Into<String>,
    ) -> Self {
        error_log.push(ErrorLogEntry::synthetic(error));
        Self {
            status: JobStatus::Failed,
            items_processed,
            items_failed: items_failed + 1,
            error_log,
        }
    }

    /// Outcome of a run that stopped before its last item (run budget).
    ///
    /// Records the cut-off as one synthetic failure, but the status follows
    /// [`JobOutcome::completed`]: items that already succeeded keep the job `done`.
    pub fn incomplete(
        items_processed: u32,
        items_failed: u32,
        mut error_log: Vec<ErrorLogEntry>,
        reason: impl Into<String>,
    ) -> Self {
        error_log.push(ErrorLogEntry::synthetic(reason));
        Self::completed(items_processed, items_failed + 1, error_log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_moves_forward_only() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Processing.can_transition_to(Pending));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Done));
    }

    #[test]
    fn execution_mode_follows_items_list() {
        let with_items = Job::new(NewJob::new("psi_check", json!({"items": [{"id": "a"}]})));
        assert!(matches!(with_items.execution_mode(), ExecutionMode::Items(items) if items.len() == 1));

        let empty_items = Job::new(NewJob::new("psi_check", json!({"items": []})));
        assert_eq!(empty_items.execution_mode(), ExecutionMode::Scope);

        let no_payload = Job::new(NewJob::new("psi_check", Value::Null));
        assert_eq!(no_payload.execution_mode(), ExecutionMode::Scope);
        assert_eq!(no_payload.units_of_work(), 1);
    }

    #[test]
    fn claim_stamps_total_and_start() {
        let mut job = Job::new(NewJob::new("medical_check", json!({"items": [{"id": 1}, {"id": 2}]})));
        assert_eq!(job.items_total, 0);

        let now = Utc::now();
        assert!(job.mark_claimed(now));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.items_total, 2);
        assert_eq!(job.started_at, Some(now));

        // Second claim is rejected.
        assert!(!job.mark_claimed(now));
    }

    #[test]
    fn snapshot_is_truncated_to_limit() {
        let long = "x".repeat(500);
        let entry = ErrorLogEntry::for_item(&json!({"id": "a", "note": long}), "boom");
        assert_eq!(entry.item.chars().count(), ITEM_SNAPSHOT_MAX_CHARS);
        assert!(entry.item.starts_with(r#"{"id":"a""#));
    }

    #[test]
    fn snapshot_truncation_respects_char_boundaries() {
        let long = "ș".repeat(300);
        let entry = ErrorLogEntry::for_item(&json!(long), "boom");
        assert_eq!(entry.item.chars().count(), ITEM_SNAPSHOT_MAX_CHARS);
    }

    #[test]
    fn completed_outcome_is_failed_only_without_successes() {
        assert_eq!(JobOutcome::completed(3, 2, vec![]).status, JobStatus::Done);
        assert_eq!(JobOutcome::completed(0, 3, vec![]).status, JobStatus::Failed);
        assert_eq!(JobOutcome::completed(1, 0, vec![]).status, JobStatus::Done);
    }

    #[test]
    fn aborted_outcome_adds_synthetic_failure() {
        let earlier = ErrorLogEntry::for_item(&json!({"id": "a"}), "expired on 2025-01-01");
        let outcome = JobOutcome::aborted(2, 1, vec![earlier], "boom");
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.items_failed, 2);
        assert_eq!(outcome.error_log.len(), 2);
        assert!(!outcome.error_log[0].is_synthetic());
        assert!(outcome.error_log[1].is_synthetic());
        assert_eq!(outcome.error_log[1].error, "boom");
    }

    #[test]
    fn incomplete_outcome_keeps_partial_successes_done() {
        let partial = JobOutcome::incomplete(2, 0, vec![], "run budget exceeded");
        assert_eq!(partial.status, JobStatus::Done);
        assert_eq!(partial.items_failed, 1);
        assert!(partial.error_log[0].is_synthetic());

        let nothing_done = JobOutcome::incomplete(0, 0, vec![], "run budget exceeded");
        assert_eq!(nothing_done.status, JobStatus::Failed);
    }

    #[test]
    fn job_serializes_type_field() {
        let job = Job::new(NewJob::new("iscir_check", json!({})));
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["type"], "iscir_check");
        assert_eq!(v["status"], "pending");
    }
}
