use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::capture::CaptureRecord;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleAction {
    Schedule,
    Reschedule,
    Complete,
}

/// Body of a scheduling request. Field aliases accept the historical
/// spellings still used by older clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleCaptureRequest {
    pub capture_id: String,
    pub action: ScheduleAction,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub timezone_offset_minutes: Option<i32>,
    #[serde(default)]
    pub preferred_start: Option<String>,
    #[serde(default)]
    pub preferred_end: Option<String>,
    #[serde(default)]
    pub allow_overlap: bool,
    #[serde(default, alias = "allowPreemption")]
    pub allow_rebalance: bool,
    #[serde(default, alias = "allowLate", alias = "scheduleLate")]
    pub allow_late_placement: bool,
}

impl ScheduleCaptureRequest {
    pub fn new(capture_id: impl Into<String>, action: ScheduleAction) -> Self {
        Self {
            capture_id: capture_id.into(),
            action,
            timezone: None,
            timezone_offset_minutes: None,
            preferred_start: None,
            preferred_end: None,
            allow_overlap: false,
            allow_rebalance: false,
            allow_late_placement: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotDto {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDto {
    pub start: String,
    pub end: String,
    pub prime: bool,
    pub late: bool,
    pub overlapped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlapReport {
    /// Capture ids sharing the slot, target included.
    pub participants: Vec<String>,
    pub minutes: i64,
    pub daily_used_minutes: i64,
}

/// Reference to a conflicting event in a decision payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEventRef {
    pub event_id: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub capture_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictLists {
    pub external: Vec<ConflictEventRef>,
    pub owned: Vec<ConflictEventRef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorAction {
    SuggestSlot,
    AskOverlap,
    Defer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorReply {
    pub action: AdvisorAction,
    pub message: String,
    #[serde(default)]
    pub slot: Option<SlotDto>,
}

/// Returned when no automatic commit was possible: the preferred slot, what
/// blocks it, a machine suggestion and (optionally) the advisor's take.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDecision {
    #[serde(rename = "type")]
    pub decision_type: String,
    pub message: String,
    pub preferred: SlotDto,
    pub conflicts: ConflictLists,
    #[serde(default)]
    pub suggestion: Option<SlotDto>,
    #[serde(default)]
    pub advisor: Option<AdvisorReply>,
    pub metadata: JsonValue,
}

impl ConflictDecision {
    pub const PREFERRED_CONFLICT: &'static str = "preferred_conflict";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub message: String,
    pub capture: CaptureRecord,
    pub plan_summary: String,
    pub chunks: Vec<ChunkDto>,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap: Option<OverlapReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub message: String,
    pub capture: CaptureRecord,
    pub decision: ConflictDecision,
}

/// Result of a scheduling request that did not error: either a committed
/// placement or a decision handed back to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScheduleOutcome {
    Committed(CommitOutcome),
    Decision(DecisionOutcome),
}

impl ScheduleOutcome {
    pub fn as_committed(&self) -> Option<&CommitOutcome> {
        match self {
            ScheduleOutcome::Committed(commit) => Some(commit),
            ScheduleOutcome::Decision(_) => None,
        }
    }

    pub fn as_decision(&self) -> Option<&DecisionOutcome> {
        match self {
            ScheduleOutcome::Committed(_) => None,
            ScheduleOutcome::Decision(decision) => Some(decision),
        }
    }
}
