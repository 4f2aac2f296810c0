use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::SchedulerConfig;
use crate::error::ScheduleResult;
use crate::models::capture::{CaptureChunkRecord, CaptureRecord};
use crate::services::priority;
use crate::services::schedule_utils;

/// Minutes of co-scheduled time already spent per UTC day. Rebuilt from the
/// persisted chunks on every request; nothing survives across requests.
#[derive(Debug, Clone, Default)]
pub struct OverlapMeter {
    used_by_day: HashMap<String, i64>,
}

pub fn day_key(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

impl OverlapMeter {
    pub fn from_chunks(chunks: &[CaptureChunkRecord]) -> ScheduleResult<Self> {
        let mut meter = Self::default();
        for chunk in chunks {
            if !chunk.overlapped {
                continue;
            }
            let start = schedule_utils::parse_datetime(&chunk.start)?;
            let end = schedule_utils::parse_datetime(&chunk.end)?;
            meter.add(start, schedule_utils::duration_minutes(start, end).max(0));
        }
        Ok(meter)
    }

    pub fn used(&self, day: &str) -> i64 {
        self.used_by_day.get(day).copied().unwrap_or(0)
    }

    pub fn add(&mut self, slot_start: DateTime<Utc>, minutes: i64) {
        *self.used_by_day.entry(day_key(slot_start)).or_insert(0) += minutes;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlapEvaluation {
    pub allowed: bool,
    /// Machine-readable rejection cause, None when allowed.
    pub reject_reason: Option<&'static str>,
    pub slot_minutes: i64,
    pub daily_used_minutes: i64,
}

/// Admission control for co-scheduling the target on top of already placed
/// captures. Every guard must pass; the first failing one names the
/// rejection.
pub fn evaluate_overlap(
    target: &CaptureRecord,
    target_priority: f64,
    co_scheduled: &[&CaptureRecord],
    slot_start: DateTime<Utc>,
    slot_end: DateTime<Utc>,
    meter: &OverlapMeter,
    config: &SchedulerConfig,
) -> OverlapEvaluation {
    let slot_minutes = schedule_utils::duration_minutes(slot_start, slot_end).max(0);
    let daily_used = meter.used(&day_key(slot_start));
    let mut evaluation = OverlapEvaluation {
        allowed: false,
        reject_reason: None,
        slot_minutes,
        daily_used_minutes: daily_used,
    };

    if !config.overlap.enabled {
        evaluation.reject_reason = Some("overlap_disabled");
        return evaluation;
    }
    if !target.overlap_eligible() {
        evaluation.reject_reason = Some("target_blocks_overlap");
        return evaluation;
    }
    if let Some(_blocking) = co_scheduled.iter().find(|c| !c.overlap_eligible()) {
        evaluation.reject_reason = Some("participant_blocks_overlap");
        return evaluation;
    }
    if co_scheduled.len() + 1 > config.overlap.max_concurrency {
        evaluation.reject_reason = Some("concurrency_exceeded");
        return evaluation;
    }

    let per_task_cap = (config.overlap.per_task_overlap_fraction
        * target.estimated_minutes.max(1) as f64)
        .floor() as i64;
    if slot_minutes > per_task_cap {
        evaluation.reject_reason = Some("per_task_fraction_exceeded");
        return evaluation;
    }
    if daily_used + slot_minutes > config.overlap.daily_budget_minutes {
        evaluation.reject_reason = Some("daily_budget_exhausted");
        return evaluation;
    }

    let benefit = priority::per_minute_priority(target_priority, target.estimated_minutes)
        * slot_minutes as f64;
    let soft_cost = config.overlap.soft_cost_per_minute * slot_minutes as f64;
    if benefit <= soft_cost {
        evaluation.reject_reason = Some("benefit_below_soft_cost");
        return evaluation;
    }

    evaluation.allowed = true;
    evaluation
}
