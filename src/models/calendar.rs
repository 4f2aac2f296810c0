use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DIAGURU_PROPERTY: &str = "diaGuru";
pub const CAPTURE_ID_PROPERTY: &str = "capture_id";
pub const ACTION_ID_PROPERTY: &str = "action_id";
pub const PRIORITY_SNAPSHOT_PROPERTY: &str = "priority_snapshot";
pub const PLAN_ID_PROPERTY: &str = "plan_id";

/// An event boundary as providers report it: a concrete instant, or a bare
/// date for all-day entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", untagged)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl EventTime {
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::DateTime(instant) => Some(*instant),
            EventTime::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            EventTime::DateTime(_) => None,
            EventTime::Date(date) => Some(*date),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Opaque version tag observed on update/delete.
    #[serde(default)]
    pub etag: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default)]
    pub private_properties: HashMap<String, String>,
}

impl CalendarEvent {
    /// Whether this event was created by the scheduler.
    pub fn is_owned(&self) -> bool {
        self.private_properties
            .get(DIAGURU_PROPERTY)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn capture_id(&self) -> Option<&str> {
        if !self.is_owned() {
            return None;
        }
        self.private_properties
            .get(CAPTURE_ID_PROPERTY)
            .map(String::as_str)
    }

    pub fn action_id(&self) -> Option<&str> {
        self.private_properties
            .get(ACTION_ID_PROPERTY)
            .map(String::as_str)
    }

    /// Concrete [start, end) when both bounds are instants.
    pub fn timed_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.start.as_instant(), self.end.as_instant()) {
            (Some(start), Some(end)) if end > start => Some((start, end)),
            _ => None,
        }
    }

    pub fn is_all_day(&self) -> bool {
        self.start.as_date().is_some() || self.end.as_date().is_some()
    }
}
