use axum::Router;
use std::path::Path;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::AppState;

mod auth;
mod error;
mod extract;
mod handlers;
mod routes;

pub use auth::{AdminToken, AdminUser, AuthUser, IngestCaller};
pub use error::AppError;
pub use extract::{ApiJson, ApiPath, ApiQuery};

/// The REST API under `/api`, with the built frontend served for every other path.
pub fn router(state: AppState) -> Router {
    let frontend = ServeDir::new(&state.static_dir)
        .not_found_service(ServeFile::new(state.static_dir.join("index.html")));

    let api = Router::new()
        .merge(routes::auth())
        .merge(routes::admin())
        .merge(routes::streams())
        .merge(routes::documents(state.upload_max_bytes))
        .merge(routes::ingest())
        .fallback(handlers::api_not_found);

    Router::new()
        .merge(routes::health())
        .nest("/api", api)
        .fallback_service(frontend)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves HLS/DASH output and recordings from the media root.
pub fn media_router(media_root: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(media_root))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
