use std::convert::Infallible;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, routing::put, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/me", get(handlers::get_me))
        .route("/auth/update", put(handlers::update_details))
        .route("/auth/change-password", put(handlers::change_password))
}

pub fn admin() -> Router<AppState> {
    Router::new().route("/admin/users/:id/role", put(handlers::set_user_role))
}

pub fn streams() -> Router<AppState> {
    Router::new()
        .route(
            "/streams",
            get(handlers::list_streams).post(handlers::create_stream),
        )
        .route("/streams/live", get(handlers::list_live_streams))
        .route(
            "/streams/:id",
            get(handlers::get_stream)
                .put(handlers::update_stream)
                .delete(handlers::delete_stream),
        )
        .route("/streams/:id/start", put(handlers::start_stream))
        .route("/streams/:id/end", put(handlers::end_stream))
}

/// `upload_max_bytes` caps the whole multipart body of an upload.
pub fn documents(upload_max_bytes: usize) -> Router<AppState> {
    let upload = post(handlers::create_document)
        .layer::<_, Infallible>(DefaultBodyLimit::disable())
        .layer::<_, Infallible>(RequestBodyLimitLayer::new(upload_max_bytes));

    Router::new()
        .route(
            "/documents",
            get(handlers::list_documents).merge(upload),
        )
        .route(
            "/documents/:id",
            get(handlers::get_document)
                .put(handlers::update_document)
                .delete(handlers::delete_document),
        )
        .route("/documents/:id/download", get(handlers::download_document))
}

pub fn ingest() -> Router<AppState> {
    Router::new()
        .route("/ingest/publish", post(handlers::ingest_publish))
        .route("/ingest/unpublish", post(handlers::ingest_unpublish))
}
