//! Route definitions.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        // Upload sessions
        .route("/v1/uploads", post(handlers::init_upload))
        .route("/v1/uploads/{fingerprint}", get(handlers::get_upload))
        .route(
            "/v1/uploads/{fingerprint}/chunks/{index}",
            put(handlers::upload_chunk),
        )
        .route(
            "/v1/uploads/{fingerprint}/complete",
            post(handlers::complete_upload),
        )
        // Completed files
        .route("/v1/files", get(handlers::list_files))
        .route(
            "/v1/files/{file_id}",
            get(handlers::download_file).delete(handlers::delete_file),
        );

    let mut router = Router::new().merge(api_routes);

    // Network-restrict this endpoint when enabled; see crate::metrics.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
