use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const MIN_CAPTURE_MINUTES: i64 = 5;
pub const MAX_CAPTURE_MINUTES: i64 = 480;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Pending,
    Scheduled,
    Completed,
}

impl CaptureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureStatus::Pending => "pending",
            CaptureStatus::Scheduled => "scheduled",
            CaptureStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CaptureStatus::Pending),
            "scheduled" => Some(CaptureStatus::Scheduled),
            "completed" => Some(CaptureStatus::Completed),
            _ => None,
        }
    }
}

/// Declared temporal constraint. `deadline` and `end_time` are accepted as
/// historical spellings of `deadline_time`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Flexible,
    #[serde(alias = "deadline", alias = "end_time")]
    DeadlineTime,
    DeadlineDate,
    StartTime,
    Window,
}

impl ConstraintKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintKind::Flexible => "flexible",
            ConstraintKind::DeadlineTime => "deadline_time",
            ConstraintKind::DeadlineDate => "deadline_date",
            ConstraintKind::StartTime => "start_time",
            ConstraintKind::Window => "window",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "flexible" => Some(ConstraintKind::Flexible),
            "deadline_time" | "deadline" | "end_time" => Some(ConstraintKind::DeadlineTime),
            "deadline_date" => Some(ConstraintKind::DeadlineDate),
            "start_time" => Some(ConstraintKind::StartTime),
            "window" => Some(ConstraintKind::Window),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartFlexibility {
    Soft,
    Hard,
}

impl StartFlexibility {
    pub fn as_str(self) -> &'static str {
        match self {
            StartFlexibility::Soft => "soft",
            StartFlexibility::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "soft" => Some(StartFlexibility::Soft),
            "hard" => Some(StartFlexibility::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DurationFlexibility {
    Fixed,
    SplitAllowed,
}

impl DurationFlexibility {
    pub fn as_str(self) -> &'static str {
        match self {
            DurationFlexibility::Fixed => "fixed",
            DurationFlexibility::SplitAllowed => "split_allowed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fixed" => Some(DurationFlexibility::Fixed),
            "split_allowed" => Some(DurationFlexibility::SplitAllowed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDayBand {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDayBand {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeOfDayBand::Morning => "morning",
            TimeOfDayBand::Afternoon => "afternoon",
            TimeOfDayBand::Evening => "evening",
            TimeOfDayBand::Night => "night",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "morning" => Some(TimeOfDayBand::Morning),
            "afternoon" => Some(TimeOfDayBand::Afternoon),
            "evening" => Some(TimeOfDayBand::Evening),
            "night" => Some(TimeOfDayBand::Night),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Sleep,
    Meal,
}

impl RoutineKind {
    fn from_hint(hint: &str) -> Option<Self> {
        match hint.strip_prefix("routine.")? {
            "sleep" => Some(RoutineKind::Sleep),
            "meal" => Some(RoutineKind::Meal),
            _ => None,
        }
    }
}

/// One captured task, as persisted in `capture_entries`. Timestamps are
/// RFC3339 strings at this layer; the engine parses them on use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub estimated_minutes: i64,
    pub importance: i64,
    #[serde(default)]
    pub urgency: Option<f64>,
    #[serde(default)]
    pub impact: Option<f64>,
    #[serde(default)]
    pub reschedule_penalty: Option<f64>,
    pub status: CaptureStatus,
    pub constraint_type: ConstraintKind,
    #[serde(default)]
    pub constraint_time: Option<String>,
    #[serde(default)]
    pub constraint_end: Option<String>,
    #[serde(default)]
    pub constraint_date: Option<String>,
    #[serde(default)]
    pub original_target_time: Option<String>,
    #[serde(default)]
    pub deadline_at: Option<String>,
    #[serde(default)]
    pub window_start: Option<String>,
    #[serde(default)]
    pub window_end: Option<String>,
    #[serde(default)]
    pub start_target_at: Option<String>,
    #[serde(default)]
    pub is_soft_start: bool,
    #[serde(default)]
    pub cannot_overlap: bool,
    pub start_flexibility: StartFlexibility,
    pub duration_flexibility: DurationFlexibility,
    #[serde(default)]
    pub min_chunk_minutes: Option<i64>,
    #[serde(default)]
    pub max_splits: Option<i64>,
    #[serde(default)]
    pub extraction_kind: Option<String>,
    #[serde(default)]
    pub task_type_hint: Option<String>,
    #[serde(default)]
    pub time_pref_time_of_day: Option<TimeOfDayBand>,
    #[serde(default)]
    pub time_pref_day: Option<String>,
    #[serde(default)]
    pub externality_score: f64,
    #[serde(default)]
    pub reschedule_count: i64,
    #[serde(default)]
    pub planned_start: Option<String>,
    #[serde(default)]
    pub planned_end: Option<String>,
    #[serde(default)]
    pub scheduled_for: Option<String>,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    #[serde(default)]
    pub calendar_event_etag: Option<String>,
    #[serde(default)]
    pub freeze_until: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub manual_touch_at: Option<String>,
    #[serde(default)]
    pub scheduling_notes: Option<JsonValue>,
    pub created_at: String,
    pub updated_at: String,
}

impl CaptureRecord {
    pub fn routine_kind(&self) -> Option<RoutineKind> {
        self.task_type_hint
            .as_deref()
            .and_then(RoutineKind::from_hint)
            .or_else(|| {
                self.extraction_kind
                    .as_deref()
                    .and_then(RoutineKind::from_hint)
            })
    }

    /// A capture may share wall time only if it neither blocks overlap nor
    /// pins its start.
    pub fn overlap_eligible(&self) -> bool {
        !self.cannot_overlap && self.start_flexibility != StartFlexibility::Hard
    }

    /// The user has taken manual control of this capture's placement.
    pub fn manually_locked(&self) -> bool {
        self.manual_touch_at.is_some() || self.freeze_until.is_some()
    }
}

/// Committed segment of a capture. Rows in `capture_chunks` are replaced
/// wholesale on every commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureChunkRecord {
    pub capture_id: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub prime: bool,
    #[serde(default)]
    pub late: bool,
    #[serde(default)]
    pub overlapped: bool,
}

/// Typed projection over the otherwise opaque `scheduling_notes` blob.
/// Unknown keys are preserved verbatim under `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlap: Option<OverlapNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ExplanationNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_note: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverlapNote {
    pub overlapped_with: Vec<String>,
    pub minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationNote {
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl SchedulingNotes {
    pub fn from_value(value: Option<&JsonValue>) -> Self {
        value
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    pub fn into_value(self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
