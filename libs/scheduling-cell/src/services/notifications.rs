// libs/scheduling-cell/src/services/notifications.rs
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentRequest};

/// Notification dispatch is informed, not consulted: delivery failures are
/// logged and swallowed, never blocking or reversing a state transition.
pub struct NotificationService {
    supabase: Arc<SupabaseClient>,
}

impl NotificationService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn notify_request_approved(
        &self,
        request: &AppointmentRequest,
        appointment: &Appointment,
        auth_token: &str,
    ) {
        let event = json!({
            "kind": "appointment_request_approved",
            "recipient_email": request.patient_email,
            "payload": {
                "request_id": request.id,
                "appointment_id": appointment.id,
                "appointment_datetime": appointment.appointment_datetime.to_rfc3339(),
                "doctor_id": appointment.doctor_id,
            },
            "created_at": chrono::Utc::now().to_rfc3339(),
        });

        self.dispatch(event, auth_token).await;
    }

    pub async fn notify_request_rejected(
        &self,
        request: &AppointmentRequest,
        reason: &str,
        auth_token: &str,
    ) {
        let event = json!({
            "kind": "appointment_request_rejected",
            "recipient_email": request.patient_email,
            "payload": {
                "request_id": request.id,
                "reason": reason,
            },
            "created_at": chrono::Utc::now().to_rfc3339(),
        });

        self.dispatch(event, auth_token).await;
    }

    async fn dispatch(&self, event: Value, auth_token: &str) {
        match self.supabase.request::<Value>(
            Method::POST,
            "/rest/v1/notifications",
            Some(auth_token),
            Some(event),
        ).await {
            Ok(_) => debug!("Notification event dispatched"),
            Err(e) => warn!("Notification dispatch failed (ignored): {}", e),
        }
    }
}
