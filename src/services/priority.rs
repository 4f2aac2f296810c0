use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::error::ScheduleResult;
use crate::models::capture::{CaptureRecord, RoutineKind};
use crate::services::schedule_utils;

/// Score a capture at `now`. Importance carries the base weight; urgency,
/// impact and the reschedule penalty are normalized scalars in [0, 1];
/// deadline proximity grows as the deadline nears; age and churn nudge the
/// score upward so old or repeatedly displaced captures stop losing races.
pub fn capture_priority(
    capture: &CaptureRecord,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> ScheduleResult<f64> {
    let importance = (capture.importance.clamp(0, 5)) as f64 * 12.0;
    let urgency = capture.urgency.unwrap_or(0.0).clamp(0.0, 1.0) * 25.0;
    let impact = capture.impact.unwrap_or(0.0).clamp(0.0, 1.0) * 20.0;
    let penalty = capture
        .reschedule_penalty
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
        * 10.0;

    let deadline_term = match schedule_utils::parse_optional_datetime(capture.deadline_at.as_ref())?
    {
        Some(deadline) => {
            let hours_left =
                (schedule_utils::duration_minutes(now, deadline).max(0) as f64) / 60.0;
            30.0 / (1.0 + hours_left / 12.0)
        }
        None => 0.0,
    };

    let age_term = {
        let created = schedule_utils::parse_datetime(&capture.created_at)?;
        let days = (schedule_utils::duration_minutes(created, now).max(0) as f64) / (60.0 * 24.0);
        (days * 1.5).min(12.0)
    };

    let externality_factor = 1.0 + capture.externality_score.clamp(0.0, 1.0) * 0.25;
    let churn_factor = 1.0 + (capture.reschedule_count.clamp(0, 5) as f64) * 0.08;

    let raw = (importance + urgency + impact + penalty + deadline_term + age_term)
        * externality_factor
        * churn_factor;

    Ok(dampen_for_routine(raw, capture.routine_kind(), config))
}

/// Routine captures compete below real work: sleep and meals are scaled and
/// capped so they never preempt a genuinely urgent task.
fn dampen_for_routine(score: f64, routine: Option<RoutineKind>, config: &SchedulerConfig) -> f64 {
    match routine {
        Some(RoutineKind::Sleep) => {
            (score * config.routine.sleep_priority_scale).min(config.routine.sleep_priority_cap)
        }
        Some(RoutineKind::Meal) => {
            (score * config.routine.meal_priority_scale).min(config.routine.meal_priority_cap)
        }
        None => score,
    }
    .max(0.0)
}

pub fn per_minute_priority(score: f64, duration_minutes: i64) -> f64 {
    score / (duration_minutes.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capture::{
        CaptureStatus, ConstraintKind, DurationFlexibility, StartFlexibility,
    };
    use chrono::TimeZone;

    fn capture(importance: i64) -> CaptureRecord {
        CaptureRecord {
            id: "c1".into(),
            user_id: "u1".into(),
            content: "写周报".into(),
            estimated_minutes: 60,
            importance,
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
            start_flexibility: StartFlexibility::Soft,
            duration_flexibility: DurationFlexibility::SplitAllowed,
            min_chunk_minutes: None,
            max_splits: None,
            extraction_kind: None,
            task_type_hint: None,
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
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn score_grows_as_deadline_approaches() {
        let config = SchedulerConfig::default();
        let mut far = capture(3);
        far.deadline_at = Some("2025-01-05T09:00:00Z".into());
        let mut near = capture(3);
        near.deadline_at = Some("2025-01-02T11:00:00Z".into());

        let far_score = capture_priority(&far, now(), &config).unwrap();
        let near_score = capture_priority(&near, now(), &config).unwrap();
        assert!(near_score > far_score);
    }

    #[test]
    fn sleep_routine_is_scaled_and_capped() {
        let config = SchedulerConfig::default();
        let mut sleep = capture(5);
        sleep.task_type_hint = Some("routine.sleep".into());
        sleep.urgency = Some(1.0);
        sleep.impact = Some(1.0);
        sleep.deadline_at = Some("2025-01-02T09:30:00Z".into());

        let score = capture_priority(&sleep, now(), &config).unwrap();
        assert!(score <= config.routine.sleep_priority_cap);

        let mut plain = capture(5);
        plain.urgency = Some(1.0);
        plain.impact = Some(1.0);
        plain.deadline_at = Some("2025-01-02T09:30:00Z".into());
        let plain_score = capture_priority(&plain, now(), &config).unwrap();
        assert!(plain_score > score);
    }

    #[test]
    fn meal_cap_sits_below_sleep_cap() {
        let config = SchedulerConfig::default();
        let mut meal = capture(5);
        meal.task_type_hint = Some("routine.meal".into());
        meal.urgency = Some(1.0);
        meal.impact = Some(1.0);
        let score = capture_priority(&meal, now(), &config).unwrap();
        assert!(score <= config.routine.meal_priority_cap);
    }

    #[test]
    fn per_minute_priority_guards_zero_duration() {
        assert_eq!(per_minute_priority(60.0, 0), 60.0);
        assert_eq!(per_minute_priority(60.0, 30), 2.0);
    }
}
