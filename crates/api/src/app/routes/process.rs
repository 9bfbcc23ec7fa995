use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tracing::{info, warn};

use crate::app::{dto::ProcessResponse, errors, services::AppServices};
use crate::middleware::{RequestStart, bearer_token};

/// `POST /jobs/process`: claim and run the oldest pending job.
///
/// Rejected callers get a structured body and no job is touched.
pub async fn run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(started): Extension<RequestStart>,
    headers: HeaderMap,
) -> Response {
    let caller = match services
        .gate
        .authorize_processor(bearer_token(&headers), Utc::now())
    {
        Ok(caller) => caller,
        Err(e) => {
            warn!(error = %e, "processor trigger rejected");
            let (status, _) = errors::trigger_status(&e);
            return (status, Json(ProcessResponse::rejected(&e, started.elapsed_ms()))).into_response();
        }
    };

    info!(caller = %caller.label(), "processor triggered");
    let summary = services.processor.run_once().await;

    (
        StatusCode::OK,
        Json(ProcessResponse::from_summary(summary, started.elapsed_ms())),
    )
        .into_response()
}
