use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};

use docpipe_generation::OutputRef;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new().route("/:id", get(download_output))
}

/// Raw bytes of one generated document.
pub async fn download_output(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let output_ref = match id.parse::<uuid::Uuid>() {
        Ok(uuid) => OutputRef(uuid),
        Err(_) => return errors::invalid_id("output"),
    };

    match services.outputs.get(tenant.tenant_id(), output_ref).await {
        Ok(Some(output)) => {
            let filename = output
                .filename
                .unwrap_or_else(|| format!("{}.out", output.output_ref));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename.replace('"', "")),
                    ),
                ],
                output.content,
            )
                .into_response()
        }
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "output not found"),
        Err(e) => errors::output_store_error_to_response(e),
    }
}
