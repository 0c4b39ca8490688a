use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::exercises::{exercise_routes, legacy_routes};
use super::health::health_check;
use super::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let api_v1 = exercise_routes(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1)
        // Maintain backward compatibility with existing routes
        .merge(legacy_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
