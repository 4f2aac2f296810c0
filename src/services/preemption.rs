use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::error::ScheduleResult;
use crate::models::calendar::CalendarEvent;
use crate::models::capture::CaptureRecord;
use crate::services::busy;
use crate::services::schedule_utils::{self, LocalZone};

/// Result of the minimal-displacement search: which owned events to remove
/// and the buffer width under which the slot then fits.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedPreemption {
    pub event_ids: Vec<String>,
    pub buffer_minutes: i64,
}

/// Find the smallest set of candidate owned events whose removal frees
/// `[slot_start, slot_end)`. Sets are enumerated smallest-first (size
/// 1..=max), the total number of tried combinations is capped, and the full
/// buffer is preferred over the compressed one.
pub fn select_minimal_preemption_set(
    slot_start: DateTime<Utc>,
    slot_end: DateTime<Utc>,
    events: &[CalendarEvent],
    candidate_ids: &[String],
    allow_compressed_buffer: bool,
    now: DateTime<Utc>,
    zone: &LocalZone,
    config: &SchedulerConfig,
) -> Option<SelectedPreemption> {
    let max_size = config
        .preemption
        .max_combination_size
        .min(candidate_ids.len())
        .max(1);
    let mut tried = 0usize;

    let mut buffers = vec![config.buffer_minutes];
    if allow_compressed_buffer {
        buffers.push(config.compressed_buffer_minutes);
    }

    for size in 1..=max_size {
        let mut combination = Combinations::new(candidate_ids.len(), size);
        while let Some(indices) = combination.next() {
            if tried >= config.preemption.max_combinations {
                return None;
            }
            tried += 1;

            let removed: Vec<&str> = indices
                .iter()
                .map(|&index| candidate_ids[index].as_str())
                .collect();
            let remaining: Vec<CalendarEvent> = events
                .iter()
                .filter(|event| !removed.contains(&event.id.as_str()))
                .cloned()
                .collect();

            for &buffer in &buffers {
                let intervals = busy::compute_busy_intervals(
                    &remaining,
                    buffer,
                    now,
                    zone,
                    config.all_day_events_block,
                );
                if busy::is_slot_free(slot_start, slot_end, &intervals) {
                    return Some(SelectedPreemption {
                        event_ids: removed.iter().map(|id| id.to_string()).collect(),
                        buffer_minutes: buffer,
                    });
                }
            }
        }
    }
    None
}

/// One capture about to lose its slot.
#[derive(Debug, Clone)]
pub struct Displacement {
    pub capture_id: String,
    pub event_id: String,
    pub priority: f64,
    pub duration_minutes: i64,
    /// Minutes of the claimed window this capture actually held.
    pub displaced_minutes: i64,
    /// Extra cost when the displaced capture was part of an overlap pair.
    pub overlap_cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetGainEvaluation {
    pub allowed: bool,
    pub net_gain: f64,
    pub per_minute_gain: f64,
    pub reject_reason: Option<&'static str>,
}

/// Cost model: claiming minutes is worth the target's per-minute priority;
/// every displaced capture charges its own. Both the absolute and the
/// per-minute gain must clear their floors, and the displacement volume
/// must stay within the configured limits.
pub fn evaluate_preemption_net_gain(
    target_priority: f64,
    target_duration_minutes: i64,
    minutes_claimed: i64,
    displacements: &[Displacement],
    config: &SchedulerConfig,
) -> NetGainEvaluation {
    let minutes_claimed = minutes_claimed.max(1);
    let benefit =
        target_priority / (target_duration_minutes.max(1) as f64) * minutes_claimed as f64;
    let cost: f64 = displacements
        .iter()
        .map(|d| {
            d.priority / (d.duration_minutes.max(1) as f64) * d.displaced_minutes as f64
                + d.overlap_cost
        })
        .sum();
    let net_gain = benefit - cost;
    let per_minute_gain = net_gain / minutes_claimed as f64;

    let mut evaluation = NetGainEvaluation {
        allowed: false,
        net_gain,
        per_minute_gain,
        reject_reason: None,
    };

    if displacements.len() > config.preemption.max_displaced_tasks {
        evaluation.reject_reason = Some("too_many_displaced_tasks");
        return evaluation;
    }
    let displaced_minutes: i64 = displacements.iter().map(|d| d.displaced_minutes).sum();
    if displaced_minutes > config.preemption.max_displaced_minutes {
        evaluation.reject_reason = Some("too_many_displaced_minutes");
        return evaluation;
    }
    if net_gain < config.preemption.net_gain_floor {
        evaluation.reject_reason = Some("net_gain_below_floor");
        return evaluation;
    }
    if per_minute_gain < config.preemption.per_minute_gain_floor {
        evaluation.reject_reason = Some("per_minute_gain_below_floor");
        return evaluation;
    }

    evaluation.allowed = true;
    evaluation
}

/// Whether a scheduled capture may be displaced at all. Frozen captures
/// never move. Captures about to start sit inside the stability window and
/// stay put too, except when the target runs under a deadline plan, which
/// trades that stability for throughput.
pub fn is_movable(
    capture: &CaptureRecord,
    now: DateTime<Utc>,
    deadline_mode: bool,
    config: &SchedulerConfig,
) -> ScheduleResult<bool> {
    if let Some(freeze_until) =
        schedule_utils::parse_optional_datetime(capture.freeze_until.as_ref())?
    {
        if freeze_until > now {
            return Ok(false);
        }
    }

    if deadline_mode {
        return Ok(true);
    }

    if let Some(planned_start) =
        schedule_utils::parse_optional_datetime(capture.planned_start.as_ref())?
    {
        let lead_minutes = schedule_utils::duration_minutes(now, planned_start);
        if lead_minutes < config.stability_window_minutes {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Plain lexicographic k-combination walker over `0..n`.
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    started: bool,
    exhausted: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            started: false,
            exhausted: k > n || k == 0,
        }
    }

    fn next(&mut self) -> Option<&[usize]> {
        if self.exhausted {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(&self.indices);
        }

        let k = self.indices.len();
        let mut cursor = k;
        loop {
            if cursor == 0 {
                self.exhausted = true;
                return None;
            }
            cursor -= 1;
            if self.indices[cursor] < self.n - (k - cursor) {
                self.indices[cursor] += 1;
                for follow in cursor + 1..k {
                    self.indices[follow] = self.indices[follow - 1] + 1;
                }
                return Some(&self.indices);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::calendar::{EventTime, CAPTURE_ID_PROPERTY, DIAGURU_PROPERTY};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn utc(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, mi, 0).unwrap()
    }

    fn owned(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> CalendarEvent {
        let mut properties = HashMap::new();
        properties.insert(DIAGURU_PROPERTY.to_string(), "true".to_string());
        properties.insert(CAPTURE_ID_PROPERTY.to_string(), format!("cap-{id}"));
        CalendarEvent {
            id: id.into(),
            summary: None,
            etag: Some("v1".into()),
            start: EventTime::DateTime(start),
            end: EventTime::DateTime(end),
            private_properties: properties,
        }
    }

    #[test]
    fn smallest_sufficient_set_wins() {
        let config = SchedulerConfig::default();
        let zone = LocalZone::utc();
        let events = vec![
            owned("a", utc(10, 0), utc(11, 0)),
            owned("b", utc(14, 0), utc(15, 0)),
        ];
        let candidates = vec!["a".to_string(), "b".to_string()];

        let selected = select_minimal_preemption_set(
            utc(10, 0),
            utc(11, 0),
            &events,
            &candidates,
            false,
            utc(8, 0),
            &zone,
            &config,
        )
        .unwrap();
        assert_eq!(selected.event_ids, vec!["a".to_string()]);
        assert_eq!(selected.buffer_minutes, config.buffer_minutes);
    }

    #[test]
    fn compressed_buffer_unlocks_tight_slots() {
        let config = SchedulerConfig::default();
        let zone = LocalZone::utc();
        // external meeting right before the slot: with a 10-minute buffer
        // the slot stays blocked even after removing the owned event
        let mut external = owned("x", utc(9, 0), utc(9, 55));
        external.private_properties.clear();
        let events = vec![external, owned("a", utc(10, 0), utc(11, 0))];
        let candidates = vec!["a".to_string()];

        let full_only = select_minimal_preemption_set(
            utc(10, 0),
            utc(11, 0),
            &events,
            &candidates,
            false,
            utc(8, 0),
            &zone,
            &config,
        );
        assert!(full_only.is_none());

        let with_compressed = select_minimal_preemption_set(
            utc(10, 0),
            utc(11, 0),
            &events,
            &candidates,
            true,
            utc(8, 0),
            &zone,
            &config,
        )
        .unwrap();
        assert_eq!(with_compressed.buffer_minutes, config.compressed_buffer_minutes);
    }

    #[test]
    fn net_gain_admits_strong_target() {
        let config = SchedulerConfig::default();
        let displacement = Displacement {
            capture_id: "blocker".into(),
            event_id: "e".into(),
            priority: 20.0,
            duration_minutes: 60,
            displaced_minutes: 60,
            overlap_cost: 0.0,
        };
        let evaluation =
            evaluate_preemption_net_gain(80.0, 30, 30, &[displacement], &config);
        // benefit 80, cost 20: both floors clear
        assert!(evaluation.allowed, "rejected: {:?}", evaluation.reject_reason);
        assert!((evaluation.net_gain - 60.0).abs() < f64::EPSILON);
        assert!((evaluation.per_minute_gain - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weak_target_fails_the_floor() {
        let config = SchedulerConfig::default();
        let displacement = Displacement {
            capture_id: "blocker".into(),
            event_id: "e".into(),
            priority: 80.0,
            duration_minutes: 60,
            displaced_minutes: 60,
            overlap_cost: 0.0,
        };
        let evaluation =
            evaluate_preemption_net_gain(20.0, 60, 60, &[displacement], &config);
        assert!(!evaluation.allowed);
        assert_eq!(evaluation.reject_reason, Some("net_gain_below_floor"));
    }

    #[test]
    fn displaced_minutes_limit_applies() {
        let mut config = SchedulerConfig::default();
        config.preemption.max_displaced_minutes = 30;
        let displacement = Displacement {
            capture_id: "blocker".into(),
            event_id: "e".into(),
            priority: 1.0,
            duration_minutes: 60,
            displaced_minutes: 60,
            overlap_cost: 0.0,
        };
        let evaluation =
            evaluate_preemption_net_gain(90.0, 30, 30, &[displacement], &config);
        assert_eq!(evaluation.reject_reason, Some("too_many_displaced_minutes"));
    }

    fn scheduled_capture(planned_start: Option<&str>, freeze: Option<&str>) -> CaptureRecord {
        use crate::models::capture::{
            CaptureStatus, ConstraintKind, DurationFlexibility, StartFlexibility,
        };
        CaptureRecord {
            id: "c".into(),
            user_id: "u1".into(),
            content: "被占位的任务".into(),
            estimated_minutes: 60,
            importance: 1,
            urgency: None,
            impact: None,
            reschedule_penalty: None,
            status: CaptureStatus::Scheduled,
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
            planned_start: planned_start.map(str::to_string),
            planned_end: None,
            scheduled_for: None,
            calendar_event_id: Some("e".into()),
            calendar_event_etag: Some("v1".into()),
            freeze_until: freeze.map(str::to_string),
            plan_id: None,
            manual_touch_at: None,
            scheduling_notes: None,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn stability_window_protects_imminent_starts() {
        let config = SchedulerConfig::default();
        let now = utc(9, 0);
        let imminent = scheduled_capture(Some("2025-05-01T09:10:00Z"), None);
        assert!(!is_movable(&imminent, now, false, &config).unwrap());
        // deadline plans bypass the stability guard
        assert!(is_movable(&imminent, now, true, &config).unwrap());

        let distant = scheduled_capture(Some("2025-05-01T11:00:00Z"), None);
        assert!(is_movable(&distant, now, false, &config).unwrap());
    }

    #[test]
    fn frozen_captures_never_move() {
        let config = SchedulerConfig::default();
        let now = utc(9, 0);
        let frozen = scheduled_capture(Some("2025-05-01T15:00:00Z"), Some("2025-05-02T00:00:00Z"));
        assert!(!is_movable(&frozen, now, false, &config).unwrap());
        assert!(!is_movable(&frozen, now, true, &config).unwrap());
    }
}
