use chrono::{DateTime, Duration, Utc};

use crate::config::SchedulerConfig;
use crate::error::ScheduleResult;
use crate::models::capture::{
    CaptureRecord, ConstraintKind, DurationFlexibility, RoutineKind, StartFlexibility,
    TimeOfDayBand,
};
use crate::services::schedule_utils::{self, LocalZone};

/// Rewrite a sleep/meal capture into an explicit local window. Returns
/// whether the capture is a routine (callers persist the rewritten fields
/// when it is). Running this twice with the same inputs yields the same
/// fields.
pub fn normalize_routine_capture(
    capture: &mut CaptureRecord,
    now: DateTime<Utc>,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> ScheduleResult<bool> {
    let Some(kind) = capture.routine_kind() else {
        return Ok(false);
    };

    match kind {
        RoutineKind::Sleep => normalize_sleep(capture, now, zone, config)?,
        RoutineKind::Meal => normalize_meal(capture, now, zone, config)?,
    }

    capture.constraint_type = ConstraintKind::Window;
    capture.duration_flexibility = DurationFlexibility::Fixed;
    capture.start_flexibility = StartFlexibility::Soft;
    if capture.deadline_at.is_none() {
        capture.deadline_at = capture.window_end.clone();
    }
    if !capture.manually_locked() {
        capture.freeze_until = None;
    }

    Ok(true)
}

/// The night window runs from `night_start` on the evening before the wake
/// day to `night_end` on the wake day. An explicit start target anchors the
/// night on its own local date; otherwise `time_pref_day` picks the wake
/// day (today keeps it on the reference date, anything else wakes
/// tomorrow).
fn normalize_sleep(
    capture: &mut CaptureRecord,
    now: DateTime<Utc>,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> ScheduleResult<()> {
    let (ns_h, ns_m) = config.routine.night_start;
    let (ne_h, ne_m) = config.routine.night_end;

    let explicit_base = schedule_utils::parse_optional_datetime(capture.start_target_at.as_ref())?
        .or(schedule_utils::parse_optional_datetime(
            capture.original_target_time.as_ref(),
        )?);

    let night_start_date = match explicit_base {
        Some(base) => zone.local_date(base),
        None => {
            let wake_offset = match capture.time_pref_day.as_deref() {
                Some("today") => 0,
                _ => 1,
            };
            zone.local_date(now) + Duration::days(wake_offset - 1)
        }
    };

    let night_start = zone.at(night_start_date, ns_h, ns_m);
    let night_end = zone.at(night_start_date + Duration::days(1), ne_h, ne_m);

    capture.window_start = Some(schedule_utils::format_datetime(night_start));
    capture.window_end = Some(schedule_utils::format_datetime(night_end));
    capture.constraint_time = capture.window_start.clone();
    capture.constraint_end = capture.window_end.clone();
    capture.cannot_overlap = true;
    if capture.time_pref_time_of_day.is_none() {
        capture.time_pref_time_of_day = Some(TimeOfDayBand::Night);
    }
    Ok(())
}

fn normalize_meal(
    capture: &mut CaptureRecord,
    now: DateTime<Utc>,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> ScheduleResult<()> {
    let existing_start =
        schedule_utils::parse_optional_datetime(capture.window_start.as_ref())?;
    let existing_end = schedule_utils::parse_optional_datetime(capture.window_end.as_ref())?;

    let has_window = matches!((existing_start, existing_end), (Some(s), Some(e)) if e > s);
    if !has_window {
        let (ms_h, ms_m) = config.routine.meal_start;
        let (me_h, me_m) = config.routine.meal_end;

        let base = schedule_utils::parse_optional_datetime(capture.start_target_at.as_ref())?
            .or(schedule_utils::parse_optional_datetime(
                capture.original_target_time.as_ref(),
            )?)
            .unwrap_or(now);
        let day_offset = match capture.time_pref_day.as_deref() {
            Some("tomorrow") => 1,
            _ => 0,
        };
        let date = zone.local_date(base) + Duration::days(day_offset);

        capture.window_start = Some(schedule_utils::format_datetime(zone.at(date, ms_h, ms_m)));
        capture.window_end = Some(schedule_utils::format_datetime(zone.at(date, me_h, me_m)));
    }

    capture.constraint_time = capture.window_start.clone();
    capture.constraint_end = capture.window_end.clone();
    capture.cannot_overlap = false;
    if capture.time_pref_time_of_day.is_none() {
        capture.time_pref_time_of_day = Some(TimeOfDayBand::Afternoon);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capture::CaptureStatus;
    use chrono::TimeZone;

    fn routine(hint: &str) -> CaptureRecord {
        CaptureRecord {
            id: "r1".into(),
            user_id: "u1".into(),
            content: "睡觉".into(),
            estimated_minutes: 480,
            importance: 1,
            urgency: None,
            impact: None,
            reschedule_penalty: None,
            status: CaptureStatus::Pending,
            constraint_type: ConstraintKind::Flexible,
            constraint_time: None,
            constraint_end: None,
            constraint_date: None,
            original_target_time: None,
            deadline_at: None,
            window_start: None,
            window_end: None,
            start_target_at: None,
            is_soft_start: false,
            cannot_overlap: false,
            start_flexibility: StartFlexibility::Hard,
            duration_flexibility: DurationFlexibility::SplitAllowed,
            min_chunk_minutes: None,
            max_splits: None,
            extraction_kind: None,
            task_type_hint: Some(hint.into()),
            time_pref_time_of_day: None,
            time_pref_day: None,
            externality_score: 0.0,
            reschedule_count: 0,
            planned_start: None,
            planned_end: None,
            scheduled_for: None,
            calendar_event_id: None,
            calendar_event_etag: None,
            freeze_until: None,
            plan_id: None,
            manual_touch_at: None,
            scheduling_notes: None,
            created_at: "2025-11-20T00:00:00Z".into(),
            updated_at: "2025-11-20T00:00:00Z".into(),
        }
    }

    #[test]
    fn sleep_tomorrow_in_chicago_installs_tonight_window() {
        let zone = LocalZone::resolve(Some("America/Chicago"), None).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 11, 21, 16, 46, 0).unwrap();
        let mut capture = routine("routine.sleep");
        capture.time_pref_day = Some("tomorrow".into());

        let is_routine =
            normalize_routine_capture(&mut capture, now, &zone, &SchedulerConfig::default())
                .unwrap();
        assert!(is_routine);
        assert_eq!(capture.constraint_type, ConstraintKind::Window);
        assert_eq!(
            capture.window_start.as_deref(),
            Some("2025-11-22T04:00:00+00:00")
        );
        assert_eq!(
            capture.window_end.as_deref(),
            Some("2025-11-22T13:30:00+00:00")
        );
        assert!(capture.cannot_overlap);
        assert_eq!(capture.start_flexibility, StartFlexibility::Soft);
        assert_eq!(capture.duration_flexibility, DurationFlexibility::Fixed);
        assert_eq!(capture.time_pref_time_of_day, Some(TimeOfDayBand::Night));
        assert_eq!(capture.deadline_at, capture.window_end);
    }

    #[test]
    fn sleep_normalization_is_idempotent() {
        let zone = LocalZone::resolve(Some("America/Chicago"), None).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 11, 21, 16, 46, 0).unwrap();
        let mut capture = routine("routine.sleep");
        capture.time_pref_day = Some("tomorrow".into());

        normalize_routine_capture(&mut capture, now, &zone, &SchedulerConfig::default()).unwrap();
        let first = capture.clone();
        normalize_routine_capture(&mut capture, now, &zone, &SchedulerConfig::default()).unwrap();
        assert_eq!(capture, first);
    }

    #[test]
    fn meal_without_window_gets_local_lunch_window() {
        let zone = LocalZone::resolve(None, Some(-360)).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 14, 0, 0).unwrap(); // 08:00 local
        let mut capture = routine("routine.meal");

        normalize_routine_capture(&mut capture, now, &zone, &SchedulerConfig::default()).unwrap();
        // 12:00-14:00 local at UTC-6
        assert_eq!(
            capture.window_start.as_deref(),
            Some("2025-05-01T18:00:00+00:00")
        );
        assert_eq!(
            capture.window_end.as_deref(),
            Some("2025-05-01T20:00:00+00:00")
        );
        assert!(!capture.cannot_overlap);
    }

    #[test]
    fn meal_with_existing_window_keeps_it() {
        let zone = LocalZone::utc();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let mut capture = routine("routine.meal");
        capture.window_start = Some("2025-05-01T11:00:00+00:00".into());
        capture.window_end = Some("2025-05-01T12:30:00+00:00".into());

        normalize_routine_capture(&mut capture, now, &zone, &SchedulerConfig::default()).unwrap();
        assert_eq!(
            capture.window_start.as_deref(),
            Some("2025-05-01T11:00:00+00:00")
        );
    }

    #[test]
    fn locked_capture_keeps_freeze_until() {
        let zone = LocalZone::utc();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let mut capture = routine("routine.sleep");
        capture.freeze_until = Some("2025-05-02T00:00:00Z".into());

        normalize_routine_capture(&mut capture, now, &zone, &SchedulerConfig::default()).unwrap();
        assert_eq!(capture.freeze_until.as_deref(), Some("2025-05-02T00:00:00Z"));
    }

    #[test]
    fn non_routine_capture_is_untouched() {
        let zone = LocalZone::utc();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let mut capture = routine("errand");
        capture.task_type_hint = Some("errand".into());
        let before = capture.clone();

        let is_routine =
            normalize_routine_capture(&mut capture, now, &zone, &SchedulerConfig::default())
                .unwrap();
        assert!(!is_routine);
        assert_eq!(capture, before);
    }
}
