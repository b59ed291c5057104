use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::error;

use docpipe_core::LoadTestRunId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(start_load_test))
        .route("/:id", get(get_load_test))
        .route("/:id/cancel", post(cancel_load_test))
}

fn parse_id(id: &str) -> Result<LoadTestRunId, axum::response::Response> {
    id.parse().map_err(|_| errors::invalid_id("load test"))
}

/// Record the run and drive it in the background; poll `GET /load-tests/:id` for results.
pub async fn start_load_test(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::CreateLoadTestRequest>,
) -> axum::response::Response {
    let plan = match body.into_plan() {
        Ok(plan) => plan,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let run = match services.load_tests.create_run(tenant.tenant_id(), &plan).await {
        Ok(run) => run,
        Err(e) => return errors::load_test_error_to_response(e),
    };

    let harness = services.load_tests.clone();
    let background = run.clone();
    tokio::spawn(async move {
        let run_id = background.id;
        if let Err(e) = harness.execute(background, plan).await {
            error!(run_id = %run_id, error = %e, "load test aborted");
        }
    });

    (StatusCode::ACCEPTED, Json(run)).into_response()
}

pub async fn get_load_test(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let run_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.load_tests.get(tenant.tenant_id(), run_id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "load test not found"),
        Err(e) => errors::load_test_error_to_response(e),
    }
}

pub async fn cancel_load_test(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let run_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.load_tests.cancel(tenant.tenant_id(), run_id).await {
        Ok(cancelled) => Json(dto::CancelResponse { cancelled }).into_response(),
        Err(e) => errors::load_test_error_to_response(e),
    }
}
