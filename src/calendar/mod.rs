use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::calendar::{
    CalendarEvent, ACTION_ID_PROPERTY, CAPTURE_ID_PROPERTY, DIAGURU_PROPERTY, PLAN_ID_PROPERTY,
    PRIORITY_SNAPSHOT_PROPERTY,
};

pub mod memory;

pub const OWNED_SUMMARY_PREFIX: &str = "[DG] ";
const MAX_SUMMARY_CHARS: usize = 200;

/// Provider-side failure with its wire status. 412 and 401 get dedicated
/// recovery in the orchestrator; everything else propagates.
#[derive(Debug, Clone, Error)]
#[error("日历服务返回 {status}: {message}")]
pub struct CalendarError {
    pub status: u16,
    pub message: String,
}

impl CalendarError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_precondition_failed(&self) -> bool {
        self.status == 412
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == 401
    }
}

pub type CalendarResult<T> = Result<T, CalendarError>;

/// New event payload sent to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub private_properties: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEvent {
    pub id: String,
    pub etag: Option<String>,
}

/// The external calendar, reduced to what the engine needs. Token lifetimes
/// and transport live behind implementations; `refresh_auth` is the single
/// hook the orchestrator pulls on a 401.
#[async_trait]
pub trait CalendarGateway: Send + Sync {
    async fn list_events(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CalendarResult<Vec<CalendarEvent>>;

    async fn create_event(&self, user_id: &str, draft: EventDraft) -> CalendarResult<CreatedEvent>;

    /// `version_tag` is sent as a precondition; a stale tag must come back
    /// as status 412 so user-edited events are never deleted blind.
    async fn delete_event(
        &self,
        user_id: &str,
        event_id: &str,
        version_tag: Option<&str>,
    ) -> CalendarResult<()>;

    async fn get_event(&self, user_id: &str, event_id: &str) -> CalendarResult<CalendarEvent>;

    async fn refresh_auth(&self, _user_id: &str) -> CalendarResult<()> {
        Err(CalendarError::new(401, "该网关不支持刷新凭证"))
    }
}

/// Draft for an event the scheduler owns. `action_id` rides along so a
/// retried create can be reconciled instead of double-booked.
pub fn build_owned_event(
    content: &str,
    capture_id: &str,
    action_id: &str,
    priority_snapshot: f64,
    plan_id: Option<&str>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> EventDraft {
    let mut summary = format!("{OWNED_SUMMARY_PREFIX}{content}");
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        summary = summary.chars().take(MAX_SUMMARY_CHARS).collect();
    }

    let mut private_properties = HashMap::new();
    private_properties.insert(DIAGURU_PROPERTY.to_string(), "true".to_string());
    private_properties.insert(CAPTURE_ID_PROPERTY.to_string(), capture_id.to_string());
    private_properties.insert(ACTION_ID_PROPERTY.to_string(), action_id.to_string());
    private_properties.insert(
        PRIORITY_SNAPSHOT_PROPERTY.to_string(),
        format!("{priority_snapshot:.2}"),
    );
    if let Some(plan_id) = plan_id {
        private_properties.insert(PLAN_ID_PROPERTY.to_string(), plan_id.to_string());
    }

    EventDraft {
        summary,
        start,
        end,
        private_properties,
    }
}
