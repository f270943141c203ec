// libs/scheduling-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::collections::HashSet;
use std::fmt;

// ==============================================================================
// SLOT MODELS
// ==============================================================================

/// A bookable window for one clinician on one calendar date. Owned by clinic
/// configuration; read-only to the engine except the `current_bookings` hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_capacity: i32,
    /// Denormalized hint, resynchronized after every mutating operation.
    /// Never an input to a capacity decision.
    pub current_bookings: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeSlot {
    pub fn window_start(&self) -> DateTime<Utc> {
        self.slot_date.and_time(self.start_time).and_utc()
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.slot_date.and_time(self.end_time).and_utc()
    }

    /// Interval containment used by slot resolution, inclusive of both bounds.
    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.start_time && time <= self.end_time
    }

    pub fn contains_datetime(&self, datetime: DateTime<Utc>) -> bool {
        datetime >= self.window_start() && datetime <= self.window_end()
    }

    /// Human-readable label carried on capacity/conflict errors so staff can
    /// choose a corrective action without another screen.
    pub fn label(&self) -> String {
        format!(
            "{} {}-{}",
            self.slot_date,
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }
}

// ==============================================================================
// APPOINTMENT REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Approved | RequestStatus::Rejected)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Approved => write!(f, "approved"),
            RequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Display/sorting hint only. Recalculation is strictly first-come-first-served
/// by submission time; priority never reorders the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    Normal,
    High,
    Urgent,
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestPriority::Normal => write!(f, "normal"),
            RequestPriority::High => write!(f, "high"),
            RequestPriority::Urgent => write!(f, "urgent"),
        }
    }
}

/// A patient-submitted, unconfirmed booking intent.
///
/// While pending, `assigned_time` and `ordinal_position` are either both null
/// or both set and consistent with the assignment algorithm given current
/// occupancy. `requested_datetime` is the operative booking time: submission
/// and recalculation pin it to the engine-computed candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub target_slot_id: Option<Uuid>,
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_email: String,
    pub requested_datetime: Option<DateTime<Utc>>,
    pub assigned_time: Option<DateTime<Utc>>,
    pub ordinal_position: Option<i32>,
    pub priority: RequestPriority,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppointmentRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

// ==============================================================================
// APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Active appointments hold capacity and own their timestamp within the
    /// slot. Cancellation re-enters the capacity computation as a freed slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled
                | AppointmentStatus::CheckedIn
                | AppointmentStatus::InProgress
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::CheckedIn => write!(f, "checked_in"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

/// A confirmed, scheduled booking. Created exactly once, at approval of an
/// AppointmentRequest; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub slot_id: Uuid,
    pub appointment_datetime: DateTime<Utc>,
    pub booking_order: i32,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// DERIVED OCCUPANCY
// ==============================================================================

/// Working set computed fresh for every capacity decision; the persisted
/// `current_bookings` counter is only a cache of `used_capacity()`.
#[derive(Debug, Clone, Default)]
pub struct SlotOccupancy {
    pub active_count: i32,
    pub pending_count: i32,
    pub occupied_timestamps: HashSet<DateTime<Utc>>,
}

impl SlotOccupancy {
    pub fn used_capacity(&self) -> i32 {
        self.active_count + self.pending_count
    }

    pub fn is_full(&self, max_capacity: i32) -> bool {
        self.used_capacity() >= max_capacity
    }

    pub fn is_taken(&self, datetime: DateTime<Utc>) -> bool {
        self.occupied_timestamps.contains(&datetime)
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequestRequest {
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_email: String,
    /// The time the patient asked for; resolves the target slot, then the
    /// engine pins the exact offset inside it.
    pub preferred_datetime: DateTime<Utc>,
    pub priority: Option<RequestPriority>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequestRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequestsQuery {
    pub doctor_id: Option<Uuid>,
    pub clinic_id: Option<Uuid>,
    pub priority: Option<RequestPriority>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

/// Outcome of one gap-filling pass over a slot's pending queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculationSummary {
    pub slot_id: Uuid,
    pub assigned: u32,
    pub unassignable: u32,
    pub failed: u32,
}

impl RecalculationSummary {
    pub fn new(slot_id: Uuid) -> Self {
        Self {
            slot_id,
            assigned: 0,
            unassignable: 0,
            failed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: &str, end: &str) -> TimeSlot {
        TimeSlot {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            slot_date: "2025-03-10".parse().unwrap(),
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            max_capacity: 2,
            current_bookings: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn slot_containment_is_inclusive_of_both_bounds() {
        let slot = slot("09:00:00", "10:00:00");
        assert!(slot.contains("09:00:00".parse().unwrap()));
        assert!(slot.contains("10:00:00".parse().unwrap()));
        assert!(slot.contains("09:30:00".parse().unwrap()));
        assert!(!slot.contains("10:00:01".parse().unwrap()));
        assert!(!slot.contains("08:59:59".parse().unwrap()));
    }

    #[test]
    fn occupancy_capacity_check_counts_active_plus_pending() {
        let occupancy = SlotOccupancy {
            active_count: 1,
            pending_count: 1,
            occupied_timestamps: HashSet::new(),
        };
        assert_eq!(occupancy.used_capacity(), 2);
        assert!(occupancy.is_full(2));
        assert!(!occupancy.is_full(3));
    }

    #[test]
    fn status_round_trips_through_snake_case() {
        let parsed: AppointmentStatus = serde_json::from_str("\"checked_in\"").unwrap();
        assert_eq!(parsed, AppointmentStatus::CheckedIn);
        assert!(parsed.is_active());

        let parsed: RequestStatus = serde_json::from_str("\"rejected\"").unwrap();
        assert!(parsed.is_terminal());
    }
}
