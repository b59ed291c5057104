//! Template catalog maintenance for the built-in placeholder renderer.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::put,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/:template/:variant/versions/:version", put(publish_version))
        .route("/:template/:variant/environments/:environment", put(activate_version))
}

pub async fn publish_version(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((template, variant, version)): Path<(String, String, String)>,
    Json(body): Json<dto::PublishTemplateRequest>,
) -> Result<StatusCode, axum::response::Response> {
    services
        .catalog
        .publish(tenant.tenant_id(), &template, &variant, version, body.body)
        .map_err(errors::resolve_error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_version(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path((template, variant, environment)): Path<(String, String, String)>,
    Json(body): Json<dto::ActivateVersionRequest>,
) -> Result<StatusCode, axum::response::Response> {
    services
        .catalog
        .activate(tenant.tenant_id(), &template, &variant, environment, body.version)
        .map_err(errors::resolve_error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}
