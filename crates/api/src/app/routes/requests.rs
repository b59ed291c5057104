use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use docpipe_core::RequestId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(submit_single).get(list_requests))
        .route("/:id", get(get_request))
        .route("/:id/items", get(list_items))
        .route("/:id/cancel", post(cancel_request))
}

fn parse_id(id: &str) -> Result<RequestId, axum::response::Response> {
    id.parse().map_err(|_| errors::invalid_id("request"))
}

pub async fn submit_single(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::ItemRequest>,
) -> axum::response::Response {
    let spec = match body.into_spec() {
        Ok(spec) => spec,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.generation.submit_single(tenant.tenant_id(), spec).await {
        Ok(request_id) => (StatusCode::CREATED, Json(dto::SubmittedResponse { request_id })).into_response(),
        Err(e) => errors::work_store_error_to_response(e),
    }
}

pub async fn list_requests(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ListRequestsQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.generation.list_requests(tenant.tenant_id(), filter).await {
        Ok(requests) => Json(requests).into_response(),
        Err(e) => errors::work_store_error_to_response(e),
    }
}

pub async fn get_request(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let request_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.generation.get_status(tenant.tenant_id(), request_id).await {
        Ok(Some(view)) => Json(dto::RequestResponse::from(view)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "request not found"),
        Err(e) => errors::work_store_error_to_response(e),
    }
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let request_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.generation.list_items(tenant.tenant_id(), request_id).await {
        Ok(items) => Json(
            items
                .into_iter()
                .map(dto::ItemResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::work_store_error_to_response(e),
    }
}

pub async fn cancel_request(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let request_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.generation.cancel(tenant.tenant_id(), request_id).await {
        Ok(cancelled) => Json(dto::CancelResponse { cancelled }).into_response(),
        Err(e) => errors::work_store_error_to_response(e),
    }
}
