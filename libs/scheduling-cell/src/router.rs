use std::sync::Arc;
use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;
use crate::handlers::{
    submit_request,
    approve_request,
    reject_request,
    get_pending_requests,
    get_pending_count,
    cancel_appointment,
    get_slot_occupancy,
};

pub fn create_scheduling_router(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/requests", post(submit_request))
        .route("/requests/pending", get(get_pending_requests))
        .route("/requests/pending/count", get(get_pending_count))
        .route("/requests/{request_id}/approve", post(approve_request))
        .route("/requests/{request_id}/reject", post(reject_request))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/slots/{slot_id}/occupancy", get(get_slot_occupancy))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
