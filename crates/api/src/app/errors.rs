use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use docpipe_core::DomainError;
use docpipe_infra::output_store::OutputStoreError;
use docpipe_infra::rendering::ResolveError;
use docpipe_infra::work_store::WorkStoreError;
use docpipe_loadtest::{LoadTestError, RunStoreError};

pub fn work_store_error_to_response(err: WorkStoreError) -> axum::response::Response {
    match err {
        WorkStoreError::Domain(e) => domain_error_to_response(e),
        // Foreign requests are indistinguishable from missing ones.
        WorkStoreError::RequestNotFound(_) | WorkStoreError::TenantIsolation(_) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "request not found")
        }
        WorkStoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        WorkStoreError::Storage(msg) => {
            error!(error = %msg, "work store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage unavailable")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::Invariant(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "illegal_transition", msg)
        }
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
    }
}

pub fn load_test_error_to_response(err: LoadTestError) -> axum::response::Response {
    match err {
        LoadTestError::Validation(e) => domain_error_to_response(e),
        LoadTestError::WorkStore(e) => work_store_error_to_response(e),
        LoadTestError::RunStore(RunStoreError::NotFound(_)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "load test not found")
        }
        LoadTestError::RunStore(RunStoreError::Storage(msg)) => {
            error!(error = %msg, "run store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage unavailable")
        }
    }
}

pub fn output_store_error_to_response(err: OutputStoreError) -> axum::response::Response {
    error!(error = %err, "output store failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage unavailable")
}

pub fn resolve_error_to_response(err: ResolveError) -> axum::response::Response {
    match err {
        ResolveError::Backend(msg) => {
            error!(error = %msg, "template catalog failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "catalog_error", "template catalog unavailable")
        }
        other => json_error(StatusCode::NOT_FOUND, "template_not_found", other.to_string()),
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

pub fn invalid_id(what: &str) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}
