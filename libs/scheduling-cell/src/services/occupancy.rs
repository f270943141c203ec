// libs/scheduling-cell/src/services/occupancy.rs
//
// The single occupancy computation every capacity decision goes through.
// `active appointments + in-window pending requests` is the authoritative
// used-capacity figure; the `current_bookings` column on the slot is only a
// cache refreshed from here after each mutation.

use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::SchedulingError;
use crate::models::{Appointment, AppointmentRequest, SlotOccupancy, TimeSlot};

pub struct OccupancyService {
    supabase: Arc<SupabaseClient>,
}

impl OccupancyService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Current occupancy of a slot from freshly-read state.
    ///
    /// `exclude_request` drops one pending request from the count - approval
    /// uses it for the request that is about to leave the pending pool.
    pub async fn occupancy(
        &self,
        slot: &TimeSlot,
        exclude_request: Option<Uuid>,
        auth_token: &str,
    ) -> Result<SlotOccupancy, SchedulingError> {
        let appointments = self.active_appointments(slot.id, auth_token).await?;
        let pending = self.pending_requests_for_doctor(slot.doctor_id, auth_token).await?;

        let occupancy = Self::compute(slot, &appointments, &pending, exclude_request);
        debug!(
            "Occupancy for slot {}: {} active, {} pending",
            slot.id, occupancy.active_count, occupancy.pending_count
        );
        Ok(occupancy)
    }

    /// Pure occupancy computation over fetched rows.
    pub fn compute(
        slot: &TimeSlot,
        appointments: &[Appointment],
        pending: &[AppointmentRequest],
        exclude_request: Option<Uuid>,
    ) -> SlotOccupancy {
        let active: Vec<&Appointment> = appointments
            .iter()
            .filter(|appointment| appointment.status.is_active())
            .collect();

        let pending_count = pending
            .iter()
            .filter(|request| request.is_pending())
            .filter(|request| Some(request.id) != exclude_request)
            .filter(|request| {
                request
                    .requested_datetime
                    .map(|datetime| slot.contains_datetime(datetime))
                    .unwrap_or(false)
            })
            .count() as i32;

        SlotOccupancy {
            active_count: active.len() as i32,
            pending_count,
            occupied_timestamps: active
                .iter()
                .map(|appointment| appointment.appointment_datetime)
                .collect(),
        }
    }

    /// Active appointments holding capacity in the slot.
    pub async fn active_appointments(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?slot_id=eq.{}&status=in.(scheduled,checked_in,in_progress)&order=appointment_datetime.asc",
            slot_id
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::SlotUnavailable(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| SchedulingError::SlotUnavailable(format!("Failed to parse appointments: {}", e)))
    }

    /// Pending requests for the doctor; the window filter happens in
    /// `compute` so the caller decides which slot they count against.
    async fn pending_requests_for_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<AppointmentRequest>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointment_requests?doctor_id=eq.{}&status=eq.pending&order=created_at.asc",
            doctor_id
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::SlotUnavailable(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AppointmentRequest>, _>>()
            .map_err(|e| SchedulingError::SlotUnavailable(format!("Failed to parse requests: {}", e)))
    }

    /// Refresh the denormalized `current_bookings` hint from a fresh
    /// occupancy computation. Mandatory after every mutating operation; a
    /// failure here is logged, not propagated, so it can run unconditionally
    /// on paths that are already reporting another error.
    pub async fn resync_booking_counter(&self, slot: &TimeSlot, auth_token: &str) {
        let used = match self.occupancy(slot, None, auth_token).await {
            Ok(occupancy) => occupancy.used_capacity(),
            Err(e) => {
                warn!("Skipping booking counter resync for slot {}: {}", slot.id, e);
                return;
            }
        };

        let path = format!("/rest/v1/time_slots?id=eq.{}", slot.id);
        let body = json!({
            "current_bookings": used,
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });

        if let Err(e) = self.supabase.request::<Value>(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
        ).await {
            warn!("Failed to resync booking counter for slot {}: {}", slot.id, e);
        } else {
            debug!("Booking counter for slot {} resynced to {}", slot.id, used);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, RequestPriority, RequestStatus};
    use chrono::{DateTime, Utc};

    fn slot() -> TimeSlot {
        TimeSlot {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            slot_date: "2025-03-10".parse().unwrap(),
            start_time: "09:00:00".parse().unwrap(),
            end_time: "12:00:00".parse().unwrap(),
            max_capacity: 4,
            current_bookings: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn at(time: &str) -> DateTime<Utc> {
        format!("2025-03-10T{}Z", time).parse().unwrap()
    }

    fn appointment(slot: &TimeSlot, datetime: DateTime<Utc>, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            clinic_id: slot.clinic_id,
            doctor_id: slot.doctor_id,
            patient_id: Uuid::new_v4(),
            slot_id: slot.id,
            appointment_datetime: datetime,
            booking_order: 0,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn pending(slot: &TimeSlot, requested: Option<DateTime<Utc>>) -> AppointmentRequest {
        AppointmentRequest {
            id: Uuid::new_v4(),
            clinic_id: slot.clinic_id,
            doctor_id: slot.doctor_id,
            target_slot_id: Some(slot.id),
            patient_name: "Test Patient".to_string(),
            patient_phone: "+15550100".to_string(),
            patient_email: "patient@example.com".to_string(),
            requested_datetime: requested,
            assigned_time: requested,
            ordinal_position: requested.map(|_| 0),
            priority: RequestPriority::Normal,
            status: RequestStatus::Pending,
            rejection_reason: None,
            appointment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cancelled_appointments_do_not_hold_capacity() {
        let slot = slot();
        let appointments = vec![
            appointment(&slot, at("09:00:00"), AppointmentStatus::Scheduled),
            appointment(&slot, at("09:40:00"), AppointmentStatus::Cancelled),
            appointment(&slot, at("10:20:00"), AppointmentStatus::CheckedIn),
        ];

        let occupancy = OccupancyService::compute(&slot, &appointments, &[], None);
        assert_eq!(occupancy.active_count, 2);
        assert!(occupancy.is_taken(at("09:00:00")));
        assert!(!occupancy.is_taken(at("09:40:00")));
    }

    #[test]
    fn pending_requests_outside_the_window_are_not_counted() {
        let slot = slot();
        let requests = vec![
            pending(&slot, Some(at("09:40:00"))),
            pending(&slot, Some("2025-03-10T14:00:00Z".parse().unwrap())),
            pending(&slot, None),
        ];

        let occupancy = OccupancyService::compute(&slot, &[], &requests, None);
        assert_eq!(occupancy.pending_count, 1);
    }

    #[test]
    fn excluded_request_leaves_the_pending_count() {
        let slot = slot();
        let first = pending(&slot, Some(at("09:00:00")));
        let second = pending(&slot, Some(at("09:40:00")));
        let excluded = first.id;

        let occupancy =
            OccupancyService::compute(&slot, &[], &[first, second], Some(excluded));
        assert_eq!(occupancy.pending_count, 1);
    }
}
