use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_auth::TriggerError;
use vigil_core::OrgId;
use vigil_infra::feed::{QueuedAct, ScanReport};
use vigil_infra::jobs::{Job, JobId, JobStatus, JobType, RunSummary};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub org_id: Option<OrgId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

/// Processor invocation result.
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub processed: bool,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(rename = "itemsProcessed", skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<u32>,
    #[serde(rename = "itemsFailed", skip_serializing_if = "Option::is_none")]
    pub items_failed: Option<u32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessResponse {
    pub fn from_summary(summary: RunSummary, duration_ms: u64) -> Self {
        Self {
            success: summary.is_success(),
            processed: summary.processed,
            job_id: summary.job_id,
            job_type: summary.job_type,
            status: summary.status,
            items_processed: summary.items_processed,
            items_failed: summary.items_failed,
            duration_ms,
            error: summary.error,
        }
    }

    pub fn rejected(err: &TriggerError, duration_ms: u64) -> Self {
        Self {
            success: false,
            processed: false,
            job_id: None,
            job_type: None,
            status: None,
            items_processed: None,
            items_failed: None,
            duration_ms,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActResponse {
    pub title: String,
    pub url: String,
    #[serde(rename = "jobId")]
    pub job_id: JobId,
}

impl From<QueuedAct> for ActResponse {
    fn from(act: QueuedAct) -> Self {
        Self {
            title: act.title,
            url: act.url,
            job_id: act.job_id,
        }
    }
}

/// Scanner invocation result.
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    pub message: String,
    pub scanned: usize,
    pub relevant: usize,
    pub queued: usize,
    pub acts: Vec<ActResponse>,
    #[serde(rename = "usedFallback")]
    pub used_fallback: bool,
    pub duration_ms: u64,
}

impl ScanResponse {
    pub fn from_report(report: ScanReport, duration_ms: u64) -> Self {
        Self {
            success: true,
            message: report.message(),
            scanned: report.scanned,
            relevant: report.relevant,
            queued: report.queued,
            acts: report.acts.into_iter().map(ActResponse::from).collect(),
            used_fallback: report.used_fallback,
            duration_ms,
        }
    }
}

/// Failed invocation that never reached the pipeline, or broke inside it.
#[derive(Debug, Serialize)]
pub struct InvocationError {
    pub success: bool,
    pub error: String,
    pub message: String,
    pub duration_ms: u64,
}

impl InvocationError {
    pub fn new(code: &str, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            error: code.to_string(),
            message: message.into(),
            duration_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    pub success: bool,
    pub reclaimed: Vec<JobId>,
    pub duration_ms: u64,
}
