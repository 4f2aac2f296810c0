use chrono::{DateTime, Duration, Utc};

use crate::models::calendar::CalendarEvent;
use crate::services::schedule_utils::{self, LocalZone};

/// Half-open busy span [start, end) after buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        schedule_utils::overlaps(self.start, self.end, start, end)
    }
}

/// Expand events into buffered busy intervals, sorted by start. Events that
/// are already in progress at `now` get zero buffer on both sides so the
/// remainder of the slot right after them stays usable. All-day events
/// block their whole local day only when the config says so.
pub fn compute_busy_intervals(
    events: &[CalendarEvent],
    buffer_minutes: i64,
    now: DateTime<Utc>,
    zone: &LocalZone,
    all_day_events_block: bool,
) -> Vec<BusyInterval> {
    let buffer = Duration::minutes(buffer_minutes.max(0));
    let mut intervals = Vec::with_capacity(events.len());

    for event in events {
        if let Some((start, end)) = event.timed_range() {
            let in_progress = start <= now && now < end;
            if in_progress {
                intervals.push(BusyInterval::new(start, end));
            } else {
                intervals.push(BusyInterval::new(start - buffer, end + buffer));
            }
        } else if all_day_events_block {
            if let Some(date) = event.start.as_date() {
                let day_start = zone.at(date, 0, 0);
                intervals.push(BusyInterval::new(day_start, day_start + Duration::days(1)));
            }
        }
    }

    intervals.sort_by_key(|interval| (interval.start, interval.end));
    intervals
}

pub fn is_slot_free(start: DateTime<Utc>, end: DateTime<Utc>, intervals: &[BusyInterval]) -> bool {
    if end <= start {
        return false;
    }
    intervals.iter().all(|interval| !interval.overlaps(start, end))
}

/// Record a freshly committed slot (with its buffer) so later searches in
/// the same request see it as busy.
pub fn register_interval(
    intervals: &mut Vec<BusyInterval>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    buffer_minutes: i64,
) {
    let buffer = Duration::minutes(buffer_minutes.max(0));
    intervals.push(BusyInterval::new(start - buffer, end + buffer));
    intervals.sort_by_key(|interval| (interval.start, interval.end));
}
