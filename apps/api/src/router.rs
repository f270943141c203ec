use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use scheduling_cell::create_scheduling_router;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/scheduling", create_scheduling_router(state.clone()))
}
