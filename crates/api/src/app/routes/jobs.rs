use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{info, warn};

use vigil_infra::jobs::{JobFilter, JobId, JobStatus, NewJob};

use crate::app::{
    dto::{EnqueueJobRequest, InvocationError, JobListResponse, ListJobsQuery, ReconcileResponse},
    errors,
    routes::authorize_operator,
    services::AppServices,
};
use crate::middleware::RequestStart;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

/// `POST /jobs`: enqueue a job by hand.
pub async fn enqueue(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<EnqueueJobRequest>, JsonRejection>,
) -> Response {
    let caller = match authorize_operator(&services, &headers) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(rejection.status(), "invalid_request", rejection.body_text());
        }
    };

    let job_type = body.job_type.trim();
    if job_type.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "type is required");
    }
    let payload = match body.payload {
        Value::Null => Value::Object(Default::default()),
        p @ Value::Object(_) => p,
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "payload must be a JSON object",
            );
        }
    };

    let mut new = NewJob::new(job_type, payload);
    if let Some(org_id) = body.org_id {
        new = new.for_org(org_id);
    }

    match services.store.enqueue(new).await {
        Ok(job) => {
            info!(job_id = %job.id, job_type = %job.job_type, caller = %caller.label(), "job enqueued");
            (StatusCode::CREATED, Json(job)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `GET /jobs?status=&type=&limit=`: most recent jobs first.
pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Response {
    if let Err(resp) = authorize_operator(&services, &headers) {
        return resp;
    }
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text());
        }
    };

    let status = match query.status.as_deref().map(str::parse::<JobStatus>).transpose() {
        Ok(s) => s,
        Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", msg),
    };

    let filter = JobFilter {
        status,
        job_type: query.job_type,
        limit: query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT),
    };

    match services.store.list_recent(filter).await {
        Ok(jobs) => Json(JobListResponse { jobs }).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `GET /jobs/:id`
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = authorize_operator(&services, &headers) {
        return resp;
    }

    let job_id: JobId = match id.parse() {
        Ok(id) => id,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.store.get(job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job {job_id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// `POST /jobs/reconcile`: fail jobs stuck in `processing`.
pub async fn reconcile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(started): Extension<RequestStart>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize_operator(&services, &headers) {
        return resp;
    }

    match services.reconciler.sweep().await {
        Ok(reclaimed) => Json(ReconcileResponse {
            success: true,
            reclaimed,
            duration_ms: started.elapsed_ms(),
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "stuck-job sweep failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InvocationError::new("reconcile_failed", e.to_string(), started.elapsed_ms())),
            )
                .into_response()
        }
    }
}
