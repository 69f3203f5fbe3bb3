use axum::{
    Router,
    routing::get,
};

use crate::state::AppState;

pub mod health;
pub mod redirect;
pub mod stats;

/// Build router with all routes configured
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health_check", get(health::health_check))
        .route(
            "/redirect",
            get(redirect::redirect_location).post(redirect::redirect_json),
        )
        .route("/stats", get(stats::stats))
        .with_state(state)
}
