// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, Extension},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::error::SchedulingError;
use crate::models::{PendingRequestsQuery, RejectRequestRequest, SubmitRequestRequest};
use crate::services::lifecycle::RequestLifecycleService;

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

fn map_scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::SlotResolution { .. } => AppError::Unprocessable(e.to_string()),
        SchedulingError::SlotAtCapacity { .. }
        | SchedulingError::TimeConflict { .. }
        | SchedulingError::RequestAlreadyProcessed(_) => AppError::Conflict(e.to_string()),
        SchedulingError::MissingAssignedTime(_)
        | SchedulingError::MissingReason
        | SchedulingError::Validation(_) => AppError::BadRequest(e.to_string()),
        SchedulingError::SlotUnavailable(_) => {
            AppError::ServiceUnavailable("Slot data is temporarily unavailable".to_string())
        }
        SchedulingError::RequestNotFound(_) | SchedulingError::AppointmentNotFound(_) => {
            AppError::NotFound(e.to_string())
        }
        SchedulingError::InvalidCancellation { .. } => AppError::Conflict(e.to_string()),
        SchedulingError::PatientDirectory(_) | SchedulingError::Database(_) => {
            error!("Scheduling operation failed: {}", e);
            AppError::Internal("Operation failed".to_string())
        }
    }
}

fn require_staff(user: &User) -> Result<(), AppError> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(AppError::Auth("Staff role required".to_string()))
    }
}

// ==============================================================================
// REQUEST LIFECYCLE HANDLERS
// ==============================================================================

/// Submit a new appointment request. Any authenticated user may submit.
#[axum::debug_handler]
pub async fn submit_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(payload): Json<SubmitRequestRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    info!("Appointment request submission from user: {}", user.id);

    let service = RequestLifecycleService::new(&state);
    let request = service
        .submit_request(payload, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "request": request,
        "message": "Appointment request submitted"
    })))
}

/// Approve a pending request, creating the scheduled appointment.
#[axum::debug_handler]
pub async fn approve_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let token = auth.token();
    info!("Approval of request {} by staff user: {}", request_id, user.id);

    let service = RequestLifecycleService::new(&state);
    let (request, appointment) = service
        .approve_request(request_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "request": request,
        "appointment": appointment,
        "message": "Request approved"
    })))
}

/// Reject a pending request. The reason is mandatory.
#[axum::debug_handler]
pub async fn reject_request(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<RejectRequestRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let token = auth.token();
    info!("Rejection of request {} by staff user: {}", request_id, user.id);

    let service = RequestLifecycleService::new(&state);
    let request = service
        .reject_request(request_id, &payload.reason, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "request": request,
        "message": "Request rejected"
    })))
}

/// Pending queue in submission order, for the staff worklist.
#[axum::debug_handler]
pub async fn get_pending_requests(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<PendingRequestsQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let token = auth.token();

    let service = RequestLifecycleService::new(&state);
    let requests = service
        .list_pending(&query, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "count": requests.len(),
        "requests": requests
    })))
}

/// Pending count badge.
#[axum::debug_handler]
pub async fn get_pending_count(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<PendingRequestsQuery>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let token = auth.token();

    let service = RequestLifecycleService::new(&state);
    let count = service
        .pending_count(&query, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "pending_count": count
    })))
}

// ==============================================================================
// CANCELLATION AND OCCUPANCY HANDLERS
// ==============================================================================

/// Cancel an active appointment and gap-fill the freed capacity.
#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let token = auth.token();
    info!("Cancellation of appointment {} by staff user: {}", appointment_id, user.id);

    let service = RequestLifecycleService::new(&state);
    let summary = service
        .handle_cancellation(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "recalculation": summary,
        "message": "Appointment cancelled"
    })))
}

/// Live occupancy snapshot for one slot.
#[axum::debug_handler]
pub async fn get_slot_occupancy(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;
    let token = auth.token();

    let service = RequestLifecycleService::new(&state);
    let (slot, occupancy) = service
        .slot_occupancy(slot_id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "slot_id": slot.id,
        "slot_label": slot.label(),
        "max_capacity": slot.max_capacity,
        "active_count": occupancy.active_count,
        "pending_count": occupancy.pending_count,
        "used_capacity": occupancy.used_capacity(),
        "is_full": occupancy.is_full(slot.max_capacity)
    })))
}
