// libs/scheduling-cell/src/services/directory.rs
use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::SchedulingError;
use crate::models::TimeSlot;

/// Read-only lookup of a doctor's active time windows. Zero or multiple
/// matches for a candidate time is a clinic configuration fault and surfaces
/// as `SlotResolution`, never a silent pick.
pub struct SlotDirectoryService {
    supabase: Arc<SupabaseClient>,
}

impl SlotDirectoryService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// The unique active slot whose [start_time, end_time] window contains
    /// `time` (inclusive of both bounds) on `date`.
    pub async fn find_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        debug!("Resolving slot for doctor {} at {} {}", doctor_id, date, time);

        let slots = self.slots_for_day(doctor_id, date, auth_token).await?;

        let mut matches: Vec<TimeSlot> = slots
            .into_iter()
            .filter(|slot| slot.contains(time))
            .collect();

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(SchedulingError::SlotResolution {
                doctor_id,
                detail: format!("no active slot covers {} on {}", time, date),
            }),
            n => Err(SchedulingError::SlotResolution {
                doctor_id,
                detail: format!("{} overlapping active slots cover {} on {}", n, time, date),
            }),
        }
    }

    /// All active slots for a doctor-day, in window order.
    pub async fn slots_for_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<TimeSlot>, SchedulingError> {
        let path = format!(
            "/rest/v1/time_slots?doctor_id=eq.{}&slot_date=eq.{}&is_active=eq.true&order=start_time.asc",
            doctor_id, date
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::SlotUnavailable(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<TimeSlot>, _>>()
            .map_err(|e| SchedulingError::SlotUnavailable(format!("Failed to parse slot: {}", e)))
    }

    /// Direct slot fetch for callers that already hold a slot id.
    pub async fn get_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<TimeSlot, SchedulingError> {
        let path = format!("/rest/v1/time_slots?id=eq.{}", slot_id);

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SchedulingError::SlotUnavailable(e.to_string()))?;

        if result.is_empty() {
            return Err(SchedulingError::SlotUnavailable(format!(
                "slot {} could not be read",
                slot_id
            )));
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| SchedulingError::SlotUnavailable(format!("Failed to parse slot: {}", e)))
    }
}
