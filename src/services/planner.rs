use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::error::ScheduleResult;
use crate::models::capture::{CaptureRecord, ConstraintKind};
use crate::services::schedule_utils::{self, LocalZone};

/// How a capture wants to be placed. The variant drives search precedence;
/// a mode-plus-optional-fields struct would leave illegal states around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPlan {
    Flexible,
    Start {
        preferred_start: DateTime<Utc>,
        preferred_end: DateTime<Utc>,
    },
    Window {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Deadline {
        deadline: DateTime<Utc>,
    },
}

impl SchedulingPlan {
    pub fn mode(&self) -> &'static str {
        match self {
            SchedulingPlan::Flexible => "flexible",
            SchedulingPlan::Start { .. } => "start",
            SchedulingPlan::Window { .. } => "window",
            SchedulingPlan::Deadline { .. } => "deadline",
        }
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, SchedulingPlan::Deadline { .. })
    }

    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            SchedulingPlan::Window { start, end } => Some((*start, *end)),
            _ => None,
        }
    }

    pub fn preferred_slot(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            SchedulingPlan::Start {
                preferred_start,
                preferred_end,
            } => Some((*preferred_start, *preferred_end)),
            _ => None,
        }
    }
}

/// Effective deadline of a capture: an explicit `deadline_at` wins, then the
/// constraint-specific rule, then the window end.
pub fn resolve_deadline(
    capture: &CaptureRecord,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> ScheduleResult<Option<DateTime<Utc>>> {
    if let Some(deadline) = schedule_utils::parse_optional_datetime(capture.deadline_at.as_ref())? {
        return Ok(Some(deadline));
    }

    let constraint_deadline = match capture.constraint_type {
        ConstraintKind::DeadlineTime => {
            schedule_utils::parse_optional_datetime(capture.constraint_time.as_ref())?
        }
        ConstraintKind::DeadlineDate => match capture.constraint_date.as_deref() {
            Some(raw) => {
                let date = schedule_utils::parse_date(raw)?;
                Some(zone.at(date, config.day_end_hour, 0))
            }
            None => None,
        },
        _ => None,
    };
    if let Some(deadline) = constraint_deadline {
        return Ok(Some(deadline));
    }

    schedule_utils::parse_optional_datetime(capture.window_end.as_ref())
}

pub fn compute_scheduling_plan(
    capture: &CaptureRecord,
    now: DateTime<Utc>,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> ScheduleResult<SchedulingPlan> {
    match capture.constraint_type {
        ConstraintKind::DeadlineTime | ConstraintKind::DeadlineDate => {
            match resolve_deadline(capture, zone, config)? {
                Some(deadline) => Ok(SchedulingPlan::Deadline { deadline }),
                None => Ok(SchedulingPlan::Flexible),
            }
        }
        ConstraintKind::StartTime => {
            let target = schedule_utils::parse_optional_datetime(capture.constraint_time.as_ref())?
                .or(schedule_utils::parse_optional_datetime(
                    capture.original_target_time.as_ref(),
                )?);
            match target {
                Some(target) => {
                    let preferred_start = target.max(now);
                    Ok(SchedulingPlan::Start {
                        preferred_start,
                        preferred_end: schedule_utils::add_minutes(
                            preferred_start,
                            capture.estimated_minutes,
                        ),
                    })
                }
                None => Ok(SchedulingPlan::Flexible),
            }
        }
        ConstraintKind::Window => {
            let start = schedule_utils::parse_optional_datetime(capture.window_start.as_ref())?
                .or(schedule_utils::parse_optional_datetime(
                    capture.constraint_time.as_ref(),
                )?);
            let end = schedule_utils::parse_optional_datetime(capture.window_end.as_ref())?
                .or(schedule_utils::parse_optional_datetime(
                    capture.constraint_end.as_ref(),
                )?);
            match (start, end) {
                (Some(start), Some(end)) if end > start => {
                    Ok(SchedulingPlan::Window { start, end })
                }
                _ => Ok(SchedulingPlan::Flexible),
            }
        }
        ConstraintKind::Flexible => Ok(SchedulingPlan::Flexible),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capture::{
        CaptureStatus, DurationFlexibility, StartFlexibility,
    };
    use chrono::TimeZone;

    fn capture(kind: ConstraintKind) -> CaptureRecord {
        CaptureRecord {
            id: "c1".into(),
            user_id: "u1".into(),
            content: "准备评审材料".into(),
            estimated_minutes: 60,
            importance: 1,
            urgency: None,
            impact: None,
            reschedule_penalty: None,
            status: CaptureStatus::Pending,
            constraint_type: kind,
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
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn window_constraint_selects_window_mode_without_preferred_slot() {
        let mut c = capture(ConstraintKind::Window);
        c.constraint_time = Some("2025-01-01T10:00:00Z".into());
        c.constraint_end = Some("2025-01-01T12:00:00Z".into());

        let plan =
            compute_scheduling_plan(&c, now(), &LocalZone::utc(), &SchedulerConfig::default())
                .unwrap();
        assert_eq!(
            plan.window(),
            Some((
                Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
            ))
        );
        assert!(plan.preferred_slot().is_none());
    }

    #[test]
    fn degenerate_window_falls_back_to_flexible() {
        let mut c = capture(ConstraintKind::Window);
        c.window_start = Some("2025-01-01T12:00:00Z".into());
        c.window_end = Some("2025-01-01T12:00:00Z".into());

        let plan =
            compute_scheduling_plan(&c, now(), &LocalZone::utc(), &SchedulerConfig::default())
                .unwrap();
        assert_eq!(plan, SchedulingPlan::Flexible);
    }

    #[test]
    fn date_deadline_resolves_to_end_of_local_day() {
        let zone = LocalZone::resolve(None, Some(-360)).unwrap();
        let mut c = capture(ConstraintKind::DeadlineDate);
        c.constraint_date = Some("2025-01-03".into());

        let deadline = resolve_deadline(&c, &zone, &SchedulerConfig::default())
            .unwrap()
            .unwrap();
        // 22:00 local at UTC-6
        assert_eq!(deadline, Utc.with_ymd_and_hms(2025, 1, 4, 4, 0, 0).unwrap());
    }

    #[test]
    fn explicit_deadline_wins_over_constraint_rule() {
        let mut c = capture(ConstraintKind::DeadlineTime);
        c.constraint_time = Some("2025-01-05T10:00:00Z".into());
        c.deadline_at = Some("2025-01-04T10:00:00Z".into());

        let deadline = resolve_deadline(&c, &LocalZone::utc(), &SchedulerConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(deadline, Utc.with_ymd_and_hms(2025, 1, 4, 10, 0, 0).unwrap());
    }

    #[test]
    fn start_constraint_clamps_preferred_to_now() {
        let mut c = capture(ConstraintKind::StartTime);
        c.constraint_time = Some("2025-01-01T08:00:00Z".into());

        let plan =
            compute_scheduling_plan(&c, now(), &LocalZone::utc(), &SchedulerConfig::default())
                .unwrap();
        let (start, end) = plan.preferred_slot().unwrap();
        assert_eq!(start, now());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap());
    }
}
