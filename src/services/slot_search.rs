use chrono::{DateTime, Duration, Utc};

use crate::config::SchedulerConfig;
use crate::models::capture::TimeOfDayBand;
use crate::services::busy::{self, BusyInterval};
use crate::services::schedule_utils::{self, LocalZone};

pub type Slot = (DateTime<Utc>, DateTime<Utc>);

/// Earliest feasible placement for `duration` minutes at or after
/// `start_from`. A preferred time-of-day band is tried across the whole
/// horizon before any unconstrained sweep; otherwise the search walks each
/// working day, or the raw clock when working hours are not enforced.
pub fn find_next_available_slot(
    busy: &[BusyInterval],
    duration_minutes: i64,
    zone: &LocalZone,
    config: &SchedulerConfig,
    start_from: DateTime<Utc>,
    enforce_working_window: bool,
    preferred_band: Option<TimeOfDayBand>,
) -> Option<Slot> {
    if let Some(band) = preferred_band {
        for day in 0..config.search_days {
            let (band_start, band_end) = band_bounds(zone, start_from, day, band, config);
            if let Some(slot) = sweep_range(
                busy,
                duration_minutes,
                band_start.max(start_from),
                band_end,
                config,
            ) {
                return Some(slot);
            }
        }
        // fall through: a band preference is a preference, not a constraint
    }

    if enforce_working_window {
        for day in 0..config.search_days {
            let (day_start, day_end) = schedule_utils::working_day_bounds(
                zone,
                start_from,
                day,
                config.working_start_hour,
                config.day_end_hour,
            );
            if let Some(slot) = sweep_range(
                busy,
                duration_minutes,
                day_start.max(start_from),
                day_end,
                config,
            ) {
                return Some(slot);
            }
        }
        return None;
    }

    let horizon_end = start_from + Duration::days(config.search_days);
    sweep_range(busy, duration_minutes, start_from, horizon_end, config)
}

/// Same sweep, confined to end at or before the deadline.
pub fn find_slot_before_deadline(
    busy: &[BusyInterval],
    duration_minutes: i64,
    zone: &LocalZone,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
) -> Option<Slot> {
    if schedule_utils::add_minutes(now, duration_minutes) > deadline {
        return None;
    }
    for day in 0..config.search_days {
        let (day_start, day_end) = schedule_utils::working_day_bounds(
            zone,
            now,
            day,
            config.working_start_hour,
            config.day_end_hour,
        );
        if day_start > deadline {
            break;
        }
        if let Some(slot) = sweep_range(
            busy,
            duration_minutes,
            day_start.max(now),
            day_end.min(deadline),
            config,
        ) {
            return Some(slot);
        }
    }
    None
}

/// Sweep confined to a window. The window itself is the constraint here, so
/// working hours do not apply (sleep windows live outside them).
pub fn find_slot_within_window(
    busy: &[BusyInterval],
    duration_minutes: i64,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Option<Slot> {
    sweep_range(
        busy,
        duration_minutes,
        window_start.max(now),
        window_end,
        config,
    )
}

/// Earliest placement at or after the missed deadline.
pub fn find_late_placement_slot(
    busy: &[BusyInterval],
    duration_minutes: i64,
    zone: &LocalZone,
    config: &SchedulerConfig,
    start_from: DateTime<Utc>,
) -> Option<Slot> {
    find_next_available_slot(
        busy,
        duration_minutes,
        zone,
        config,
        start_from,
        true,
        None,
    )
}

/// Walk `[range_start, range_end]` in grid steps and return the first free
/// slot. Ascending order makes "earliest start" the only tie-break.
fn sweep_range(
    busy: &[BusyInterval],
    duration_minutes: i64,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Option<Slot> {
    let increment = config.slot_increment_minutes.max(1);
    let mut cursor = schedule_utils::align_to_increment(range_start, increment);

    while schedule_utils::add_minutes(cursor, duration_minutes) <= range_end {
        let end = schedule_utils::add_minutes(cursor, duration_minutes);
        if busy::is_slot_free(cursor, end, busy) {
            return Some((cursor, end));
        }
        cursor = schedule_utils::add_minutes(cursor, increment);
    }
    None
}

/// Local bounds of a time-of-day band on the day `day_offset` days after
/// `reference`. The night band spills into the next morning.
fn band_bounds(
    zone: &LocalZone,
    reference: DateTime<Utc>,
    day_offset: i64,
    band: TimeOfDayBand,
    config: &SchedulerConfig,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = zone.local_date(reference) + Duration::days(day_offset);
    match band {
        TimeOfDayBand::Morning => (
            zone.at(date, config.working_start_hour, 0),
            zone.at(date, 12, 0),
        ),
        TimeOfDayBand::Afternoon => (zone.at(date, 12, 0), zone.at(date, 18, 0)),
        TimeOfDayBand::Evening => (
            zone.at(date, 18, 0),
            zone.at(date, config.day_end_hour, 0),
        ),
        TimeOfDayBand::Night => {
            let (ns_h, ns_m) = config.routine.night_start;
            let (ne_h, ne_m) = config.routine.night_end;
            (
                zone.at(date, ns_h, ns_m),
                zone.at(date + Duration::days(1), ne_h, ne_m),
            )
        }
    }
}
