use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new().route("/", post(submit_batch))
}

pub async fn submit_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::SubmitBatchRequest>,
) -> axum::response::Response {
    let concurrency = body.concurrency;
    let specs = match body.into_specs() {
        Ok(specs) => specs,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services
        .generation
        .submit_batch(tenant.tenant_id(), specs, concurrency)
        .await
    {
        Ok(receipt) => (
            StatusCode::CREATED,
            Json(dto::BatchSubmittedResponse {
                batch_id: receipt.batch_id,
                request_id: receipt.request_id,
                item_count: receipt.item_count,
            }),
        )
            .into_response(),
        Err(e) => errors::work_store_error_to_response(e),
    }
}
