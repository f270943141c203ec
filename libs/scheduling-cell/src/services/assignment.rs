// libs/scheduling-cell/src/services/assignment.rs
//
// Time assignment: derives bookable offsets inside a slot window at a fixed
// interval. Pure over (slot, occupied) so recalculation can re-run it from
// scratch instead of patching assignments incrementally.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::models::TimeSlot;

/// First free offset inside the slot window, or `None` when the slot is full.
///
/// Candidates start at the window start and step forward `interval_minutes` at
/// a time. A candidate is bookable when it is strictly before the window end
/// and not already occupied; a tie at exactly the end time is not bookable.
/// The interval does not need to divide the window evenly - a shorter
/// trailing gap is acceptable.
pub fn next_free_time(
    slot: &TimeSlot,
    occupied: &HashSet<DateTime<Utc>>,
    interval_minutes: i64,
) -> Option<DateTime<Utc>> {
    candidate_times(slot, occupied, interval_minutes, 1).into_iter().next()
}

/// Up to `limit` free offsets, in window order. Deterministic and
/// order-independent given a fixed occupied set.
pub fn candidate_times(
    slot: &TimeSlot,
    occupied: &HashSet<DateTime<Utc>>,
    interval_minutes: i64,
    limit: usize,
) -> Vec<DateTime<Utc>> {
    let window_end = slot.window_end();
    let step = Duration::minutes(interval_minutes);

    let mut candidates = Vec::new();
    let mut cursor = slot.window_start();

    while cursor < window_end && candidates.len() < limit {
        if !occupied.contains(&cursor) {
            candidates.push(cursor);
        }
        cursor += step;
    }

    candidates
}
