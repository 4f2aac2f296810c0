use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::calendar::{
    CalendarError, CalendarGateway, CalendarResult, CreatedEvent, EventDraft,
};
use crate::models::calendar::{CalendarEvent, EventTime};

/// Calendar held entirely in process memory. Backs deterministic tests and
/// offline runs; version tags follow the same stale-tag rules as a real
/// provider so 412 recovery paths stay honest.
#[derive(Default)]
pub struct InMemoryCalendar {
    events: Mutex<HashMap<String, CalendarEvent>>,
    etag_counter: AtomicU64,
    delete_count: AtomicU64,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        format!("v{}", self.etag_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Seed an event directly, bypassing the gateway surface.
    pub fn seed(&self, mut event: CalendarEvent) -> CalendarEvent {
        if event.etag.is_none() {
            event.etag = Some(self.next_etag());
        }
        self.events
            .lock()
            .expect("calendar lock poisoned")
            .insert(event.id.clone(), event.clone());
        event
    }

    /// Bump an event's version tag, simulating a user edit in the provider.
    pub fn touch(&self, event_id: &str) {
        let fresh = self.next_etag();
        if let Some(event) = self
            .events
            .lock()
            .expect("calendar lock poisoned")
            .get_mut(event_id)
        {
            event.etag = Some(fresh);
        }
    }

    pub fn snapshot(&self) -> Vec<CalendarEvent> {
        let mut events: Vec<CalendarEvent> = self
            .events
            .lock()
            .expect("calendar lock poisoned")
            .values()
            .cloned()
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events
    }

    pub fn deletes_performed(&self) -> u64 {
        self.delete_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarGateway for InMemoryCalendar {
    async fn list_events(
        &self,
        _user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CalendarResult<Vec<CalendarEvent>> {
        let events = self.events.lock().expect("calendar lock poisoned");
        let mut listed: Vec<CalendarEvent> = events
            .values()
            .filter(|event| match event.timed_range() {
                Some((start, end)) => start < to && from < end,
                None => event
                    .start
                    .as_date()
                    .map(|date| date >= from.date_naive() && date <= to.date_naive())
                    .unwrap_or(false),
            })
            .cloned()
            .collect();
        listed.sort_by_key(|event| match event.start {
            EventTime::DateTime(instant) => instant,
            EventTime::Date(date) => date.and_hms_opt(0, 0, 0).map(|n| n.and_utc()).unwrap_or(from),
        });
        Ok(listed)
    }

    async fn create_event(
        &self,
        _user_id: &str,
        draft: EventDraft,
    ) -> CalendarResult<CreatedEvent> {
        let id = Uuid::new_v4().to_string();
        let etag = self.next_etag();
        let event = CalendarEvent {
            id: id.clone(),
            summary: Some(draft.summary),
            etag: Some(etag.clone()),
            start: EventTime::DateTime(draft.start),
            end: EventTime::DateTime(draft.end),
            private_properties: draft.private_properties,
        };
        self.events
            .lock()
            .expect("calendar lock poisoned")
            .insert(id.clone(), event);
        Ok(CreatedEvent {
            id,
            etag: Some(etag),
        })
    }

    async fn delete_event(
        &self,
        _user_id: &str,
        event_id: &str,
        version_tag: Option<&str>,
    ) -> CalendarResult<()> {
        let mut events = self.events.lock().expect("calendar lock poisoned");
        let Some(event) = events.get(event_id) else {
            return Err(CalendarError::new(404, "事件不存在"));
        };
        if let (Some(sent), Some(current)) = (version_tag, event.etag.as_deref()) {
            if sent != current {
                return Err(CalendarError::new(412, "事件版本已变化"));
            }
        }
        events.remove(event_id);
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_event(&self, _user_id: &str, event_id: &str) -> CalendarResult<CalendarEvent> {
        self.events
            .lock()
            .expect("calendar lock poisoned")
            .get(event_id)
            .cloned()
            .ok_or_else(|| CalendarError::new(404, "事件不存在"))
    }
}
