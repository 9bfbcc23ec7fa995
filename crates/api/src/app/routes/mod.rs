use axum::{
    Router,
    http::HeaderMap,
    routing::{get, post},
};
use chrono::Utc;

use vigil_auth::Caller;

use crate::app::{errors, services::AppServices};
use crate::middleware::bearer_token;

pub mod jobs;
pub mod process;
pub mod scan;
pub mod system;

/// Router for all trigger and job endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(jobs::enqueue).get(jobs::list))
        .route("/jobs/process", post(process::run))
        .route("/jobs/reconcile", post(jobs::reconcile))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/feed/scan", post(scan::run))
}

/// Scheduler secret or a privileged session.
pub(crate) fn authorize_operator(
    services: &AppServices,
    headers: &HeaderMap,
) -> Result<Caller, axum::response::Response> {
    services
        .gate
        .authorize_processor(bearer_token(headers), Utc::now())
        .map_err(|e| errors::trigger_error_to_response(&e))
}
