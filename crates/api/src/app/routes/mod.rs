use axum::Router;

pub mod batches;
pub mod load_tests;
pub mod outputs;
pub mod requests;
pub mod system;
pub mod templates;

/// Router for all tenant-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/requests", requests::router())
        .nest("/batches", batches::router())
        .nest("/outputs", outputs::router())
        .nest("/load-tests", load_tests::router())
        .nest("/templates", templates::router())
}
