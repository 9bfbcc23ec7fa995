use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use crate::app::{
    dto::{InvocationError, ScanResponse},
    errors,
    services::AppServices,
};
use crate::middleware::{RequestStart, bearer_token};

/// `POST /feed/scan`: queue new relevant acts from the legislation feed.
///
/// Scheduler secret only; sessions are not accepted here.
pub async fn run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(started): Extension<RequestStart>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = services.gate.authorize_scanner(bearer_token(&headers)) {
        warn!("scanner trigger rejected");
        let (status, code) = errors::trigger_status(&e);
        return (
            status,
            Json(InvocationError::new(code, e.to_string(), started.elapsed_ms())),
        )
            .into_response();
    }

    info!("feed scan triggered");
    match services.scanner.scan().await {
        Ok(report) => (
            StatusCode::OK,
            Json(ScanResponse::from_report(report, started.elapsed_ms())),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "feed scan failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InvocationError::new("scan_failed", e.to_string(), started.elapsed_ms())),
            )
                .into_response()
        }
    }
}
