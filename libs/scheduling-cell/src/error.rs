use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Engine error taxonomy. Guard failures abort the whole operation with no
/// partial writes; transport faults are retryable by the caller.
#[derive(Error, Debug)]
pub enum SchedulingError {
    /// Zero or multiple active slots match - a clinic configuration fault,
    /// surfaced to staff rather than retried.
    #[error("Slot resolution failed for doctor {doctor_id}: {detail}")]
    SlotResolution { doctor_id: Uuid, detail: String },

    /// Legitimate business rejection: the slot has no capacity left.
    #[error("Slot {slot_label} is at capacity ({used}/{max}), please choose another time")]
    SlotAtCapacity {
        slot_id: Uuid,
        slot_label: String,
        used: i32,
        max: i32,
    },

    /// Race detected: the requested time is already held by an active
    /// appointment. Safe to retry once.
    #[error("Time {datetime} in slot {slot_label} was just taken, please retry")]
    TimeConflict {
        slot_id: Uuid,
        slot_label: String,
        datetime: DateTime<Utc>,
    },

    /// Idempotency guard: the request already left the pending state.
    #[error("Request {0} has already been processed")]
    RequestAlreadyProcessed(Uuid),

    #[error("Request {0} has no requested time to book")]
    MissingAssignedTime(Uuid),

    #[error("A non-empty rejection reason is required")]
    MissingReason,

    /// Transient datastore fault while reading slot data; retry with backoff.
    #[error("Slot data unavailable: {0}")]
    SlotUnavailable(String),

    #[error("Request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("Appointment not found: {0}")]
    AppointmentNotFound(Uuid),

    #[error("Appointment {appointment_id} cannot be cancelled from status {status}")]
    InvalidCancellation {
        appointment_id: Uuid,
        status: String,
    },

    #[error("Patient directory error: {0}")]
    PatientDirectory(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}
