//! Router construction for the certificate registry server.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};
use cert_registry_core::Registry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::files::FileService;
use crate::handlers;

/// Build the full axum router. `files` is `None` when no document drive is
/// configured; the file routes then answer 503.
pub fn build_router(registry: Arc<Registry>, files: Option<Arc<FileService>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/:entity", get(handlers::entities::list))
        .route("/api/:entity/all", get(handlers::entities::find))
        .route("/api/:entity/count", get(handlers::entities::count))
        .route("/api/:entity/search", get(handlers::entities::search))
        .route("/api/:entity/resolve", post(handlers::entities::resolve))
        .route(
            "/api/:entity/populate-by-prop",
            post(handlers::entities::populate_by_prop),
        )
        .route("/api/:entity/files/:id", get(handlers::files::list_files))
        .route(
            "/api/:entity/download/:id/:name",
            get(handlers::files::download),
        )
        .route("/api/:entity/:id", get(handlers::entities::get))
        .layer(Extension(registry))
        .layer(Extension(files))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
