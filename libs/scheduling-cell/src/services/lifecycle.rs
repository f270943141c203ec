// libs/scheduling-cell/src/services/lifecycle.rs
//
// Request lifecycle orchestration: submission, approval, rejection, and the
// cancellation callback. Every slot-mutating path runs under the slot lock
// and re-reads its guards after acquisition.

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::SchedulingError;
use crate::models::{
    Appointment, AppointmentRequest, AppointmentStatus, PendingRequestsQuery,
    RecalculationSummary, RequestPriority, RequestStatus, SubmitRequestRequest, TimeSlot,
};
use crate::services::assignment::next_free_time;
use crate::services::directory::SlotDirectoryService;
use crate::services::locks::SlotLockRegistry;
use crate::services::notifications::NotificationService;
use crate::services::occupancy::OccupancyService;
use crate::services::patients::PatientDirectoryService;
use crate::services::recalculation::QueueRecalculationService;

pub struct RequestLifecycleService {
    supabase: Arc<SupabaseClient>,
    directory: SlotDirectoryService,
    occupancy: OccupancyService,
    recalculation: QueueRecalculationService,
    patients: PatientDirectoryService,
    notifications: NotificationService,
    interval_minutes: i64,
}

impl RequestLifecycleService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            directory: SlotDirectoryService::new(Arc::clone(&supabase)),
            occupancy: OccupancyService::new(Arc::clone(&supabase)),
            recalculation: QueueRecalculationService::new(
                Arc::clone(&supabase),
                config.appointment_interval_minutes,
            ),
            patients: PatientDirectoryService::new(Arc::clone(&supabase)),
            notifications: NotificationService::new(Arc::clone(&supabase)),
            interval_minutes: config.appointment_interval_minutes,
            supabase,
        }
    }

    // ==========================================================================
    // SUBMISSION
    // ==========================================================================

    /// Intake of a new request. Resolves the target slot from the preferred
    /// time, then pins `requested_datetime`/`assigned_time` to the first free
    /// offset the assignment algorithm produces under the slot lock.
    pub async fn submit_request(
        &self,
        payload: SubmitRequestRequest,
        auth_token: &str,
    ) -> Result<AppointmentRequest, SchedulingError> {
        validate_contact(&payload.patient_name, &payload.patient_phone, &payload.patient_email)?;

        let preferred = payload.preferred_datetime;
        let slot = self
            .directory
            .find_slot(
                payload.doctor_id,
                preferred.date_naive(),
                preferred.time(),
                auth_token,
            )
            .await?;

        let lock = SlotLockRegistry::global().lock_for(slot.id);
        let _guard = lock.lock().await;

        // Guards evaluate against state read after lock acquisition.
        let occupancy = self.occupancy.occupancy(&slot, None, auth_token).await?;
        if occupancy.is_full(slot.max_capacity) {
            return Err(SchedulingError::SlotAtCapacity {
                slot_id: slot.id,
                slot_label: slot.label(),
                used: occupancy.used_capacity(),
                max: slot.max_capacity,
            });
        }

        let mut occupied = occupancy.occupied_timestamps.clone();
        for taken in self.pending_assigned_times(&slot, auth_token).await? {
            occupied.insert(taken);
        }

        let assigned = next_free_time(&slot, &occupied, self.interval_minutes).ok_or(
            SchedulingError::SlotAtCapacity {
                slot_id: slot.id,
                slot_label: slot.label(),
                used: occupancy.used_capacity(),
                max: slot.max_capacity,
            },
        )?;

        let now = Utc::now().to_rfc3339();
        let request_data = json!({
            "clinic_id": payload.clinic_id,
            "doctor_id": payload.doctor_id,
            "target_slot_id": slot.id,
            "patient_name": payload.patient_name,
            "patient_phone": payload.patient_phone,
            "patient_email": payload.patient_email,
            "requested_datetime": assigned.to_rfc3339(),
            "assigned_time": assigned.to_rfc3339(),
            "ordinal_position": occupancy.pending_count,
            "priority": payload.priority.unwrap_or(RequestPriority::Normal).to_string(),
            "status": RequestStatus::Pending.to_string(),
            "created_at": now,
            "updated_at": now,
        });

        let created: Vec<AppointmentRequest> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointment_requests",
                Some(auth_token),
                Some(request_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let request = created
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::Database("request insert returned no row".to_string()))?;

        self.occupancy.resync_booking_counter(&slot, auth_token).await;

        info!(
            "Request {} submitted for slot {} at {}",
            request.id, slot.id, assigned
        );
        Ok(request)
    }

    // ==========================================================================
    // APPROVAL
    // ==========================================================================

    /// Convert a pending request into a scheduled appointment.
    ///
    /// All guards re-run against fresh state under the slot lock; the only
    /// write pair is appointment insert then request finalize, and a failed
    /// finalize cancels the just-created appointment so no orphan survives.
    pub async fn approve_request(
        &self,
        request_id: Uuid,
        auth_token: &str,
    ) -> Result<(AppointmentRequest, Appointment), SchedulingError> {
        // **Step 1**: Load the request and fail fast on the cheap guards.
        let request = self.load_request(request_id, auth_token).await?;
        if !request.is_pending() {
            return Err(SchedulingError::RequestAlreadyProcessed(request_id));
        }

        // **Step 2**: The operative booking time must exist before any write.
        let booking_time = request
            .requested_datetime
            .ok_or(SchedulingError::MissingAssignedTime(request_id))?;

        // **Step 3**: Resolve (or create) the patient record outside the lock;
        // the directory is idempotent, so a later abort leaves nothing broken.
        let patient_id = self
            .patients
            .find_or_create_patient(
                &request.patient_name,
                &request.patient_phone,
                &request.patient_email,
                auth_token,
            )
            .await?;

        // **Step 4**: Resolve the slot containing the booking time.
        let slot = self
            .directory
            .find_slot(
                request.doctor_id,
                booking_time.date_naive(),
                booking_time.time(),
                auth_token,
            )
            .await?;

        // **Step 5**: Serialize against every other writer touching this slot.
        let lock = SlotLockRegistry::global().lock_for(slot.id);
        let _guard = lock.lock().await;

        // **Step 6**: Re-read the request; another staff member may have
        // finalized it while we waited for the lock.
        let request = self.load_request(request_id, auth_token).await?;
        if !request.is_pending() {
            return Err(SchedulingError::RequestAlreadyProcessed(request_id));
        }

        // **Step 7**: Fresh occupancy, excluding this request from its own
        // pending count.
        let occupancy = self
            .occupancy
            .occupancy(&slot, Some(request_id), auth_token)
            .await?;

        if occupancy.is_full(slot.max_capacity) {
            return Err(SchedulingError::SlotAtCapacity {
                slot_id: slot.id,
                slot_label: slot.label(),
                used: occupancy.used_capacity(),
                max: slot.max_capacity,
            });
        }

        // **Step 8**: The exact timestamp must still be free.
        if occupancy.is_taken(booking_time) {
            return Err(SchedulingError::TimeConflict {
                slot_id: slot.id,
                slot_label: slot.label(),
                datetime: booking_time,
            });
        }

        // **Step 9**: Create the appointment, then finalize the request. A
        // failed finalize rolls the appointment back to cancelled.
        let appointment = self
            .create_appointment(&request, &slot, patient_id, occupancy.active_count, auth_token)
            .await?;

        let finalized = match self
            .finalize_request(&request, appointment.id, auth_token)
            .await
        {
            Ok(finalized) => finalized,
            Err(e) => {
                warn!(
                    "Request {} finalize failed after appointment {} was created, rolling back: {}",
                    request_id, appointment.id, e
                );
                self.cancel_orphan_appointment(appointment.id, auth_token).await;
                self.occupancy.resync_booking_counter(&slot, auth_token).await;
                return Err(e);
            }
        };

        // **Step 10**: Compact the surviving queue (approval is a recompute
        // trigger: sibling ordinals close the freed position), resync the
        // counter and notify. None of these can undo the approval.
        if let Err(e) = self.recalculation.recalculate(&slot, auth_token).await {
            warn!(
                "Queue recalculation after approving {} failed: {}",
                request_id, e
            );
        }
        self.occupancy.resync_booking_counter(&slot, auth_token).await;
        self.notifications
            .notify_request_approved(&finalized, &appointment, auth_token)
            .await;

        info!(
            "Request {} approved as appointment {} at {}",
            request_id, appointment.id, booking_time
        );
        Ok((finalized, appointment))
    }

    // ==========================================================================
    // REJECTION
    // ==========================================================================

    /// Reject a pending request with a mandatory reason, then gap-fill the
    /// slot's remaining queue.
    pub async fn reject_request(
        &self,
        request_id: Uuid,
        reason: &str,
        auth_token: &str,
    ) -> Result<AppointmentRequest, SchedulingError> {
        if reason.trim().is_empty() {
            return Err(SchedulingError::MissingReason);
        }

        let request = self.load_request(request_id, auth_token).await?;
        if !request.is_pending() {
            return Err(SchedulingError::RequestAlreadyProcessed(request_id));
        }

        // Resolve the slot before mutating so the status write, the
        // recalculation batch and the counter resync all run under one
        // slot guard.
        let slot = match self.resolve_request_slot(&request, auth_token).await {
            Ok(slot) => Some(slot),
            Err(e) => {
                warn!(
                    "Slot resolution for request {} failed, rejecting without queue recalculation: {}",
                    request_id, e
                );
                None
            }
        };

        let rejected = match &slot {
            Some(slot) => {
                let lock = SlotLockRegistry::global().lock_for(slot.id);
                let _guard = lock.lock().await;

                let rejected = self.mark_rejected(request_id, reason, auth_token).await?;

                // The rejection is durable at this point; queue maintenance
                // failures are reported but do not reverse it.
                if let Err(e) = self.recalculation.recalculate(slot, auth_token).await {
                    warn!(
                        "Queue recalculation after rejecting {} failed: {}",
                        request_id, e
                    );
                }
                self.occupancy.resync_booking_counter(slot, auth_token).await;
                rejected
            }
            None => self.mark_rejected(request_id, reason, auth_token).await?,
        };

        self.notifications
            .notify_request_rejected(&rejected, reason.trim(), auth_token)
            .await;

        info!("Request {} rejected", request_id);
        Ok(rejected)
    }

    // ==========================================================================
    // CANCELLATION CALLBACK
    // ==========================================================================

    /// Cancel an active appointment and gap-fill the freed capacity into the
    /// slot's pending queue.
    pub async fn handle_cancellation(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<RecalculationSummary, SchedulingError> {
        let appointment = self.load_appointment(appointment_id, auth_token).await?;
        if !appointment.status.is_active() {
            return Err(SchedulingError::InvalidCancellation {
                appointment_id,
                status: appointment.status.to_string(),
            });
        }

        let slot = self.directory.get_slot(appointment.slot_id, auth_token).await?;

        let lock = SlotLockRegistry::global().lock_for(slot.id);
        let _guard = lock.lock().await;

        // Fresh re-read under the lock; the operational state machine is an
        // external writer and may have moved the appointment on meanwhile.
        let appointment = self.load_appointment(appointment_id, auth_token).await?;
        if !appointment.status.is_active() {
            return Err(SchedulingError::InvalidCancellation {
                appointment_id,
                status: appointment.status.to_string(),
            });
        }

        let body = json!({
            "status": AppointmentStatus::Cancelled.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });
        // The status filter makes the write a compare-and-set: an appointment
        // that left the active set after the re-read is never flipped back
        // to cancelled.
        let cancelled: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &format!(
                    "/rest/v1/appointments?id=eq.{}&status=in.(scheduled,checked_in,in_progress)",
                    appointment_id
                ),
                Some(auth_token),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        if cancelled.is_empty() {
            return Err(SchedulingError::InvalidCancellation {
                appointment_id,
                status: appointment.status.to_string(),
            });
        }

        // The cancellation is durable; the counter resync runs even when the
        // gap-filling pass fails.
        let summary = self.recalculation.recalculate(&slot, auth_token).await;
        self.occupancy.resync_booking_counter(&slot, auth_token).await;
        let summary = summary?;

        info!(
            "Appointment {} cancelled, slot {} queue recalculated",
            appointment_id, slot.id
        );
        Ok(summary)
    }

    // ==========================================================================
    // QUEUE VIEWS
    // ==========================================================================

    /// Pending requests in fairness order, optionally filtered.
    pub async fn list_pending(
        &self,
        query: &PendingRequestsQuery,
        auth_token: &str,
    ) -> Result<Vec<AppointmentRequest>, SchedulingError> {
        let mut path = String::from(
            "/rest/v1/appointment_requests?status=eq.pending&order=created_at.asc",
        );
        if let Some(doctor_id) = query.doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }
        if let Some(clinic_id) = query.clinic_id {
            path.push_str(&format!("&clinic_id=eq.{}", clinic_id));
        }
        if let Some(priority) = query.priority {
            path.push_str(&format!("&priority=eq.{}", priority));
        }
        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit.clamp(1, 200)));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset.max(0)));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AppointmentRequest>, _>>()
            .map_err(|e| SchedulingError::Database(format!("Failed to parse requests: {}", e)))
    }

    /// Lightweight pending count for dashboard badges. Read-only, so it does
    /// not take the slot lock.
    pub async fn pending_count(
        &self,
        query: &PendingRequestsQuery,
        auth_token: &str,
    ) -> Result<usize, SchedulingError> {
        let mut path = String::from("/rest/v1/appointment_requests?status=eq.pending&select=id");
        if let Some(doctor_id) = query.doctor_id {
            path.push_str(&format!("&doctor_id=eq.{}", doctor_id));
        }
        if let Some(clinic_id) = query.clinic_id {
            path.push_str(&format!("&clinic_id=eq.{}", clinic_id));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        Ok(result.len())
    }

    /// Occupancy snapshot for one slot, for staff tooling.
    pub async fn slot_occupancy(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<(TimeSlot, crate::models::SlotOccupancy), SchedulingError> {
        let slot = self.directory.get_slot(slot_id, auth_token).await?;
        let occupancy = self.occupancy.occupancy(&slot, None, auth_token).await?;
        Ok((slot, occupancy))
    }

    // ==========================================================================
    // INTERNAL HELPERS
    // ==========================================================================

    async fn load_request(
        &self,
        request_id: Uuid,
        auth_token: &str,
    ) -> Result<AppointmentRequest, SchedulingError> {
        let path = format!("/rest/v1/appointment_requests?id=eq.{}", request_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or(SchedulingError::RequestNotFound(request_id))?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::Database(format!("Failed to parse request: {}", e)))
    }

    async fn load_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let row = result
            .into_iter()
            .next()
            .ok_or(SchedulingError::AppointmentNotFound(appointment_id))?;

        serde_json::from_value(row)
            .map_err(|e| SchedulingError::Database(format!("Failed to parse appointment: {}", e)))
    }

    async fn create_appointment(
        &self,
        request: &AppointmentRequest,
        slot: &TimeSlot,
        patient_id: Uuid,
        booking_order: i32,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let booking_time = request
            .requested_datetime
            .ok_or(SchedulingError::MissingAssignedTime(request.id))?;

        let now = Utc::now().to_rfc3339();
        let appointment_data = json!({
            "clinic_id": request.clinic_id,
            "doctor_id": request.doctor_id,
            "patient_id": patient_id,
            "slot_id": slot.id,
            "appointment_datetime": booking_time.to_rfc3339(),
            "booking_order": booking_order,
            "status": AppointmentStatus::Scheduled.to_string(),
            "created_at": now,
            "updated_at": now,
        });

        let created: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        created
            .into_iter()
            .next()
            .ok_or_else(|| SchedulingError::Database("appointment insert returned no row".to_string()))
    }

    async fn finalize_request(
        &self,
        request: &AppointmentRequest,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<AppointmentRequest, SchedulingError> {
        let body = json!({
            "status": RequestStatus::Approved.to_string(),
            "appointment_id": appointment_id,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let updated: Vec<AppointmentRequest> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &format!(
                    "/rest/v1/appointment_requests?id=eq.{}&status=eq.pending",
                    request.id
                ),
                Some(auth_token),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        updated
            .into_iter()
            .next()
            .ok_or(SchedulingError::RequestAlreadyProcessed(request.id))
    }

    /// Compensating write for an appointment whose request finalize failed.
    /// Log-and-continue: the caller already has the primary error to report.
    async fn cancel_orphan_appointment(&self, appointment_id: Uuid, auth_token: &str) {
        let body = json!({
            "status": AppointmentStatus::Cancelled.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        if let Err(e) = self
            .supabase
            .request::<Value>(
                Method::PATCH,
                &format!("/rest/v1/appointments?id=eq.{}", appointment_id),
                Some(auth_token),
                Some(body),
            )
            .await
        {
            warn!(
                "Rollback of orphan appointment {} failed, manual cleanup needed: {}",
                appointment_id, e
            );
        } else {
            debug!("Orphan appointment {} rolled back to cancelled", appointment_id);
        }
    }

    /// Assigned times already promised to other pending requests in the slot,
    /// so submission never double-books an offset inside the pending pool.
    async fn pending_assigned_times(
        &self,
        slot: &TimeSlot,
        auth_token: &str,
    ) -> Result<Vec<chrono::DateTime<Utc>>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointment_requests?target_slot_id=eq.{}&status=eq.pending&order=created_at.asc",
            slot.id
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        let requests: Vec<AppointmentRequest> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AppointmentRequest>, _>>()
            .map_err(|e| SchedulingError::Database(format!("Failed to parse requests: {}", e)))?;

        Ok(requests
            .into_iter()
            .filter_map(|request| request.assigned_time)
            .collect())
    }

    /// The slot a request's occupancy belongs to, from its slot link or its
    /// operative booking time.
    async fn resolve_request_slot(
        &self,
        request: &AppointmentRequest,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        match request.target_slot_id {
            Some(slot_id) => self.directory.get_slot(slot_id, auth_token).await,
            None => {
                let booking_time = request
                    .requested_datetime
                    .ok_or(SchedulingError::MissingAssignedTime(request.id))?;
                self.directory
                    .find_slot(
                        request.doctor_id,
                        booking_time.date_naive(),
                        booking_time.time(),
                        auth_token,
                    )
                    .await
            }
        }
    }

    /// Compare-and-set on the pending status. An empty representation means
    /// another caller finalized the request first.
    async fn mark_rejected(
        &self,
        request_id: Uuid,
        reason: &str,
        auth_token: &str,
    ) -> Result<AppointmentRequest, SchedulingError> {
        let body = json!({
            "status": RequestStatus::Rejected.to_string(),
            "rejection_reason": reason.trim(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let updated: Vec<AppointmentRequest> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &format!(
                    "/rest/v1/appointment_requests?id=eq.{}&status=eq.pending",
                    request_id
                ),
                Some(auth_token),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| SchedulingError::Database(e.to_string()))?;

        updated
            .into_iter()
            .next()
            .ok_or(SchedulingError::RequestAlreadyProcessed(request_id))
    }
}

fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

fn validate_contact(name: &str, phone: &str, email: &str) -> Result<(), SchedulingError> {
    if name.trim().is_empty() {
        return Err(SchedulingError::Validation("patient name is required".to_string()));
    }
    if phone.trim().is_empty() && email.trim().is_empty() {
        return Err(SchedulingError::Validation(
            "at least one of phone or email is required".to_string(),
        ));
    }
    if !email.trim().is_empty() && !email.contains('@') {
        return Err(SchedulingError::Validation("email address is malformed".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn contact_validation_requires_a_name() {
        let result = validate_contact("", "+15550100", "patient@example.com");
        assert_matches!(result, Err(SchedulingError::Validation(_)));
    }

    #[test]
    fn contact_validation_requires_phone_or_email() {
        assert_matches!(
            validate_contact("Test Patient", "", ""),
            Err(SchedulingError::Validation(_))
        );
        assert!(validate_contact("Test Patient", "+15550100", "").is_ok());
        assert!(validate_contact("Test Patient", "", "patient@example.com").is_ok());
    }

    #[test]
    fn contact_validation_rejects_malformed_email() {
        let result = validate_contact("Test Patient", "", "not-an-email");
        assert_matches!(result, Err(SchedulingError::Validation(_)));
    }
}
