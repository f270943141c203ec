// libs/scheduling-cell/src/services/recalculation.rs
//
// Gap-filling: after a pending request leaves the pool or an appointment is
// cancelled, every remaining pending request in the slot gets its time and
// ordinal re-derived from scratch. Pure given (active appointments, ordered
// pending requests), so running it twice on unchanged state yields identical
// assignments.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::SchedulingError;
use crate::models::{AppointmentRequest, RecalculationSummary, TimeSlot};
use crate::services::assignment::candidate_times;
use crate::services::occupancy::OccupancyService;

/// Planned outcome for one pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAssignment {
    pub request_id: Uuid,
    /// `None` marks the request unassignable: more pending requests than
    /// free offsets. Surfaced to staff, never silently kept stale.
    pub assignment: Option<(DateTime<Utc>, i32)>,
}

pub struct QueueRecalculationService {
    supabase: Arc<SupabaseClient>,
    occupancy_service: OccupancyService,
    interval_minutes: i64,
}

impl QueueRecalculationService {
    pub fn new(supabase: Arc<SupabaseClient>, interval_minutes: i64) -> Self {
        let occupancy_service = OccupancyService::new(Arc::clone(&supabase));
        Self {
            supabase,
            occupancy_service,
            interval_minutes,
        }
    }

    /// Re-derive `requested_datetime`/`assigned_time`/`ordinal_position` for
    /// every pending request attached to the slot. Must run under the slot
    /// lock of the triggering event so no writer interleaves mid-batch.
    pub async fn recalculate(
        &self,
        slot: &TimeSlot,
        auth_token: &str,
    ) -> Result<RecalculationSummary, SchedulingError> {
        debug!("Recalculating pending queue for slot {}", slot.id);

        let appointments = self
            .occupancy_service
            .active_appointments(slot.id, auth_token)
            .await?;
        let occupied = appointments
            .iter()
            .map(|appointment| appointment.appointment_datetime)
            .collect();

        let pending = self.pending_for_slot(slot.id, auth_token).await?;

        let candidates = candidate_times(
            slot,
            &occupied,
            self.interval_minutes,
            slot.max_capacity.max(0) as usize,
        );

        let plan = plan_assignments(&pending, &candidates);

        let mut summary = RecalculationSummary::new(slot.id);
        for planned in plan {
            match self.apply(&planned, auth_token).await {
                Ok(()) => match planned.assignment {
                    Some(_) => summary.assigned += 1,
                    None => summary.unassignable += 1,
                },
                Err(e) => {
                    // One failed write must not abort the rest of the batch.
                    warn!(
                        "Recalculation write failed for request {} in slot {}: {}",
                        planned.request_id, slot.id, e
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary.unassignable > 0 {
            warn!(
                "Slot {} has {} pending requests without an assignable time",
                slot.id, summary.unassignable
            );
        }
        info!(
            "Recalculated slot {}: {} assigned, {} unassignable, {} failed",
            slot.id, summary.assigned, summary.unassignable, summary.failed
        );

        Ok(summary)
    }

    /// Pending requests for the slot in fairness order.
    async fn pending_for_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<AppointmentRequest>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointment_requests?target_slot_id=eq.{}&status=eq.pending&order=created_at.asc",
            slot_id
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::Database(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AppointmentRequest>, _>>()
            .map_err(|e| SchedulingError::Database(format!("Failed to parse requests: {}", e)))
    }

    async fn apply(
        &self,
        planned: &PlannedAssignment,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let body = match planned.assignment {
            Some((datetime, ordinal)) => json!({
                "requested_datetime": datetime.to_rfc3339(),
                "assigned_time": datetime.to_rfc3339(),
                "ordinal_position": ordinal,
                "updated_at": Utc::now().to_rfc3339(),
            }),
            None => json!({
                "assigned_time": Value::Null,
                "ordinal_position": Value::Null,
                "updated_at": Utc::now().to_rfc3339(),
            }),
        };

        // The status filter keeps the write from touching a request that a
        // concurrent caller already finalized.
        let path = format!(
            "/rest/v1/appointment_requests?id=eq.{}&status=eq.pending",
            planned.request_id
        );

        self.supabase.request::<Value>(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
        ).await.map_err(|e| SchedulingError::Database(e.to_string()))?;

        Ok(())
    }
}

/// First-come-first-served assignment of free offsets to pending requests.
///
/// `pending` must already be ordered by submission time; `candidates` by
/// window order. Requests beyond the candidate count come back unassigned.
/// Priority is deliberately not consulted here.
pub fn plan_assignments(
    pending: &[AppointmentRequest],
    candidates: &[DateTime<Utc>],
) -> Vec<PlannedAssignment> {
    pending
        .iter()
        .enumerate()
        .map(|(index, request)| PlannedAssignment {
            request_id: request.id,
            assignment: candidates
                .get(index)
                .map(|datetime| (*datetime, index as i32)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestPriority, RequestStatus};
    use chrono::Duration;

    fn at(time: &str) -> DateTime<Utc> {
        format!("2025-03-10T{}Z", time).parse().unwrap()
    }

    fn pending_at(created_offset_minutes: i64, priority: RequestPriority) -> AppointmentRequest {
        let base: DateTime<Utc> = "2025-03-01T08:00:00Z".parse().unwrap();
        AppointmentRequest {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            target_slot_id: Some(Uuid::new_v4()),
            patient_name: "Test Patient".to_string(),
            patient_phone: "+15550100".to_string(),
            patient_email: "patient@example.com".to_string(),
            requested_datetime: Some(at("09:40:00")),
            assigned_time: Some(at("09:40:00")),
            ordinal_position: Some(1),
            priority,
            status: RequestStatus::Pending,
            rejection_reason: None,
            appointment_id: None,
            created_at: base + Duration::minutes(created_offset_minutes),
            updated_at: base,
        }
    }

    #[test]
    fn assignments_follow_submission_order_not_priority() {
        let first = pending_at(0, RequestPriority::Normal);
        let second = pending_at(5, RequestPriority::Urgent);
        let candidates = vec![at("09:00:00"), at("09:40:00")];

        let plan = plan_assignments(&[first.clone(), second.clone()], &candidates);

        assert_eq!(plan[0].request_id, first.id);
        assert_eq!(plan[0].assignment, Some((at("09:00:00"), 0)));
        assert_eq!(plan[1].request_id, second.id);
        assert_eq!(plan[1].assignment, Some((at("09:40:00"), 1)));
    }

    #[test]
    fn overflow_requests_are_left_unassigned() {
        let requests = vec![
            pending_at(0, RequestPriority::Normal),
            pending_at(1, RequestPriority::Normal),
            pending_at(2, RequestPriority::Normal),
        ];
        let candidates = vec![at("09:00:00")];

        let plan = plan_assignments(&requests, &candidates);

        assert_eq!(plan[0].assignment, Some((at("09:00:00"), 0)));
        assert_eq!(plan[1].assignment, None);
        assert_eq!(plan[2].assignment, None);
    }

    #[test]
    fn planning_is_idempotent_on_unchanged_input() {
        let requests = vec![
            pending_at(0, RequestPriority::Normal),
            pending_at(1, RequestPriority::High),
        ];
        let candidates = vec![at("09:00:00"), at("09:40:00")];

        let first = plan_assignments(&requests, &candidates);
        let second = plan_assignments(&requests, &candidates);
        assert_eq!(first, second);
    }

    #[test]
    fn removing_an_earlier_request_never_pushes_a_later_one_back() {
        let first = pending_at(0, RequestPriority::Normal);
        let second = pending_at(5, RequestPriority::Normal);
        let candidates = vec![at("09:00:00"), at("09:40:00")];

        let before = plan_assignments(&[first, second.clone()], &candidates);
        let ordinal_before = before[1].assignment.unwrap().1;

        // First request rejected: the survivor moves to the freed offset.
        let after = plan_assignments(&[second], &candidates);
        let ordinal_after = after[0].assignment.unwrap().1;

        assert!(ordinal_after <= ordinal_before);
        assert_eq!(after[0].assignment, Some((at("09:00:00"), 0)));
    }
}
