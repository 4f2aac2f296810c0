use serde::{Deserialize, Serialize};

use crate::models::capture::{CaptureRecord, CaptureStatus};

/// Audit scope of one scheduling request. Created lazily on the first
/// mutation; the summary is written at finalize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanRunRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanActionKind {
    Scheduled,
    Rescheduled,
    Unscheduled,
}

impl PlanActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanActionKind::Scheduled => "scheduled",
            PlanActionKind::Rescheduled => "rescheduled",
            PlanActionKind::Unscheduled => "unscheduled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(PlanActionKind::Scheduled),
            "rescheduled" => Some(PlanActionKind::Rescheduled),
            "unscheduled" => Some(PlanActionKind::Unscheduled),
            _ => None,
        }
    }
}

/// The placement-relevant fields of a capture, frozen at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSnapshot {
    pub status: CaptureStatus,
    #[serde(default)]
    pub planned_start: Option<String>,
    #[serde(default)]
    pub planned_end: Option<String>,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    #[serde(default)]
    pub calendar_event_etag: Option<String>,
    #[serde(default)]
    pub freeze_until: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

impl PlacementSnapshot {
    pub fn of(capture: &CaptureRecord) -> Self {
        Self {
            status: capture.status,
            planned_start: capture.planned_start.clone(),
            planned_end: capture.planned_end.clone(),
            calendar_event_id: capture.calendar_event_id.clone(),
            calendar_event_etag: capture.calendar_event_etag.clone(),
            freeze_until: capture.freeze_until.clone(),
            plan_id: capture.plan_id.clone(),
        }
    }
}

/// One capture mutation inside a plan run: kind plus before/after snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanActionRecord {
    pub plan_id: String,
    pub action_id: String,
    pub capture_id: String,
    pub capture_content: String,
    pub action_type: PlanActionKind,
    pub prev: PlacementSnapshot,
    pub next: PlacementSnapshot,
}
