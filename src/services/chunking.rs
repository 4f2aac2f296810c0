use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::services::busy::{self, BusyInterval};
use crate::services::schedule_utils::{self, LocalZone};

/// Split `total_minutes` into chunk durations. The total is rounded up to a
/// grid multiple first; the chunk count honors the minimum chunk size, the
/// split cap and the target chunk length, and the remainder lands on the
/// leading chunks. Falls back to fewer chunks when an even division would
/// push one below the minimum.
pub fn generate_chunk_durations(
    total_minutes: i64,
    min_chunk_minutes: i64,
    max_splits: i64,
    allow_split: bool,
    config: &SchedulerConfig,
) -> Vec<i64> {
    let increment = config.slot_increment_minutes.max(1);
    let rounded = schedule_utils::round_up_to_increment(total_minutes.max(1), increment);
    if !allow_split {
        return vec![rounded];
    }

    let min_chunk = min_chunk_minutes.max(increment);
    let target = config.target_chunk_minutes.max(min_chunk);
    let by_min = (rounded / min_chunk).max(1);
    let by_target = (rounded + target - 1) / target;
    let mut count = by_min.min(max_splits.max(1)).min(by_target).max(1);

    while count > 1 {
        let chunks = divide_units(rounded / increment, count, increment);
        if chunks.iter().all(|chunk| *chunk >= min_chunk) {
            return chunks;
        }
        count -= 1;
    }
    vec![rounded]
}

fn divide_units(units: i64, count: i64, increment: i64) -> Vec<i64> {
    let per = units / count;
    let remainder = units % count;
    (0..count)
        .map(|index| {
            let extra = if index < remainder { 1 } else { 0 };
            (per + extra) * increment
        })
        .collect()
}

/// Greedily place each chunk at the earliest free sub-slot after the
/// previous one, all inside `[range_start, range_end]`. Returns the ordered
/// placements and mutates `busy` so the caller's later searches see them;
/// `None` (with `busy` untouched) when any chunk cannot fit.
pub fn place_chunks_within_range(
    durations: &[i64],
    busy: &mut Vec<BusyInterval>,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    enforce_working_window: bool,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> Option<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    let increment = config.slot_increment_minutes.max(1);
    let mut placements = Vec::with_capacity(durations.len());
    let mut probe = busy.clone();
    let mut cursor = schedule_utils::align_to_increment(range_start, increment);

    for &duration in durations {
        let mut placed = None;
        while schedule_utils::add_minutes(cursor, duration) <= range_end {
            if enforce_working_window {
                if let Some(bumped) = bump_into_working_window(cursor, duration, zone, config) {
                    if bumped != cursor {
                        cursor = bumped;
                        continue;
                    }
                } else {
                    return None;
                }
            }
            let end = schedule_utils::add_minutes(cursor, duration);
            if end > range_end {
                break;
            }
            if busy::is_slot_free(cursor, end, &probe) {
                placed = Some((cursor, end));
                break;
            }
            cursor = schedule_utils::add_minutes(cursor, increment);
        }

        let (start, end) = placed?;
        busy::register_interval(&mut probe, start, end, 0);
        placements.push((start, end));
        cursor = end;
    }

    *busy = probe;
    Some(placements)
}

/// Next aligned instant at which a `duration`-minute slot fits the working
/// window containing (or following) `cursor`. Returns `cursor` unchanged
/// when it already fits.
fn bump_into_working_window(
    cursor: DateTime<Utc>,
    duration: i64,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> Option<DateTime<Utc>> {
    let day_start = schedule_utils::start_of_working_day(zone, cursor, config.working_start_hour);
    let day_end = schedule_utils::start_of_working_day(zone, cursor, config.day_end_hour);

    if cursor < day_start {
        return Some(day_start);
    }
    if schedule_utils::add_minutes(cursor, duration) > day_end {
        let next_date = zone.local_date(cursor) + chrono::Duration::days(1);
        return Some(zone.at(next_date, config.working_start_hour, 0));
    }
    Some(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, mi, 0).unwrap()
    }

    #[test]
    fn no_split_returns_single_rounded_chunk() {
        let config = SchedulerConfig::default();
        assert_eq!(generate_chunk_durations(50, 15, 4, false, &config), vec![60]);
    }

    #[test]
    fn split_sums_to_rounded_total_and_honors_min_chunk() {
        let config = SchedulerConfig::default();
        let chunks = generate_chunk_durations(100, 15, 4, true, &config);
        assert_eq!(chunks.iter().sum::<i64>(), 105);
        assert!(chunks.iter().all(|c| *c >= 15));
        assert!(chunks.len() <= 4);
        // remainder lands on the leading chunks
        assert!(chunks.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn split_count_shrinks_when_even_division_breaks_minimum() {
        let config = SchedulerConfig::default();
        // 165 over 3 chunks would yield a 45-minute chunk; 55 requires 2.
        let chunks = generate_chunk_durations(165, 55, 4, true, &config);
        assert_eq!(chunks.iter().sum::<i64>(), 165);
        assert!(chunks.iter().all(|c| *c >= 55));
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn max_splits_caps_chunk_count() {
        let config = SchedulerConfig::default();
        let chunks = generate_chunk_durations(240, 15, 2, true, &config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.iter().sum::<i64>(), 240);
    }

    #[test]
    fn chunks_flow_around_busy_intervals() {
        let config = SchedulerConfig::default();
        let zone = LocalZone::utc();
        let mut busy = vec![BusyInterval::new(utc(10, 0), utc(11, 0))];

        let placements = place_chunks_within_range(
            &[60, 60],
            &mut busy,
            utc(9, 0),
            utc(14, 0),
            false,
            &zone,
            &config,
        )
        .unwrap();

        assert_eq!(placements[0], (utc(9, 0), utc(10, 0)));
        assert_eq!(placements[1], (utc(11, 0), utc(12, 0)));
        // placements are now part of the busy set
        assert!(!busy::is_slot_free(utc(11, 0), utc(11, 30), &busy));
    }

    #[test]
    fn placement_fails_when_range_cannot_hold_all_chunks() {
        let config = SchedulerConfig::default();
        let zone = LocalZone::utc();
        let mut busy = vec![BusyInterval::new(utc(9, 0), utc(12, 0))];
        let before = busy.clone();

        let placements = place_chunks_within_range(
            &[120],
            &mut busy,
            utc(9, 0),
            utc(13, 0),
            false,
            &zone,
            &config,
        );
        assert!(placements.is_none());
        assert_eq!(busy, before);
    }

    #[test]
    fn working_window_pushes_chunks_into_next_day() {
        let config = SchedulerConfig::default();
        let zone = LocalZone::utc();
        let mut busy = Vec::new();

        let placements = place_chunks_within_range(
            &[120],
            &mut busy,
            utc(21, 30),
            Utc.with_ymd_and_hms(2025, 5, 2, 22, 0, 0).unwrap(),
            true,
            &zone,
            &config,
        )
        .unwrap();
        assert_eq!(
            placements[0].0,
            Utc.with_ymd_and_hms(2025, 5, 2, 8, 0, 0).unwrap()
        );
    }
}
