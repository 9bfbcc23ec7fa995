use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use vigil_auth::TriggerError;
use vigil_infra::jobs::JobStoreError;

pub fn trigger_status(err: &TriggerError) -> (StatusCode, &'static str) {
    match err {
        TriggerError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        TriggerError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
    }
}

pub fn trigger_error_to_response(err: &TriggerError) -> axum::response::Response {
    let (status, code) = trigger_status(err);
    json_error(status, code, err.to_string())
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        JobStoreError::InvalidTransition { .. } | JobStoreError::InvalidProgress(_) => {
            json_error(StatusCode::CONFLICT, "conflict", err.to_string())
        }
        JobStoreError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        JobStoreError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
