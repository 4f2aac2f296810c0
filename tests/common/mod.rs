#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use diaguru::calendar::memory::InMemoryCalendar;
use diaguru::config::SchedulerConfig;
use diaguru::db::repositories::capture_repository::{CaptureRepository, CaptureRow};
use diaguru::db::repositories::chunk_repository::{ChunkRepository, ChunkRow};
use diaguru::db::DbPool;
use diaguru::models::calendar::{
    CalendarEvent, EventTime, CAPTURE_ID_PROPERTY, DIAGURU_PROPERTY,
};
use diaguru::models::capture::{
    CaptureChunkRecord, CaptureRecord, CaptureStatus, ConstraintKind, DurationFlexibility,
    StartFlexibility,
};
use diaguru::services::scheduler_service::SchedulerService;

pub const USER: &str = "user-1";

pub struct TestHarness {
    pub db: DbPool,
    pub calendar: Arc<InMemoryCalendar>,
    pub service: SchedulerService,
    _dir: TempDir,
}

pub fn harness() -> TestHarness {
    harness_with_config(SchedulerConfig::default())
}

pub fn harness_with_config(config: SchedulerConfig) -> TestHarness {
    let dir = TempDir::new().expect("temp dir");
    let db = DbPool::new(dir.path().join("diaguru.sqlite")).expect("db pool");
    let calendar = Arc::new(InMemoryCalendar::new());
    let service = SchedulerService::new(db.clone(), calendar.clone(), config);
    TestHarness {
        db,
        calendar,
        service,
        _dir: dir,
    }
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

pub fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn base_capture(id: &str, minutes: i64) -> CaptureRecord {
    CaptureRecord {
        id: id.into(),
        user_id: USER.into(),
        content: format!("任务 {id}"),
        estimated_minutes: minutes,
        importance: 1,
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

pub fn insert_capture(harness: &TestHarness, capture: &CaptureRecord) {
    let row = CaptureRow::from_record(capture).expect("capture row");
    harness
        .db
        .with_connection(|conn| CaptureRepository::insert(conn, &row))
        .expect("insert capture");
}

pub fn fetch_capture(harness: &TestHarness, id: &str) -> CaptureRecord {
    harness
        .db
        .with_connection(|conn| CaptureRepository::find_by_id(conn, id))
        .expect("query capture")
        .expect("capture exists")
        .into_record()
        .expect("capture record")
}

pub fn fetch_chunks(harness: &TestHarness, id: &str) -> Vec<CaptureChunkRecord> {
    harness
        .db
        .with_connection(|conn| ChunkRepository::list_for_capture(conn, id))
        .expect("query chunks")
        .into_iter()
        .map(ChunkRow::into_record)
        .collect()
}

pub fn external_event(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> CalendarEvent {
    CalendarEvent {
        id: id.into(),
        summary: Some("外部会议".into()),
        etag: None,
        start: EventTime::DateTime(start),
        end: EventTime::DateTime(end),
        private_properties: HashMap::new(),
    }
}

pub fn owned_event(
    id: &str,
    capture_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CalendarEvent {
    let mut event = external_event(id, start, end);
    event.summary = Some(format!("[DG] 任务 {capture_id}"));
    event
        .private_properties
        .insert(DIAGURU_PROPERTY.into(), "true".into());
    event
        .private_properties
        .insert(CAPTURE_ID_PROPERTY.into(), capture_id.into());
    event
}

/// Seed a capture as already scheduled: store row, chunk row and the owned
/// calendar event, wired together the way a real commit leaves them.
pub fn seed_scheduled(
    harness: &TestHarness,
    capture_id: &str,
    event_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    minutes: i64,
) -> CaptureRecord {
    let seeded = harness
        .calendar
        .seed(owned_event(event_id, capture_id, start, end));

    let mut capture = base_capture(capture_id, minutes);
    capture.status = CaptureStatus::Scheduled;
    capture.planned_start = Some(iso(start));
    capture.planned_end = Some(iso(end));
    capture.scheduled_for = Some(iso(start));
    capture.calendar_event_id = Some(event_id.into());
    capture.calendar_event_etag = seeded.etag.clone();
    insert_capture(harness, &capture);

    let chunk = CaptureChunkRecord {
        capture_id: capture_id.into(),
        start: iso(start),
        end: iso(end),
        prime: false,
        late: false,
        overlapped: false,
    };
    harness
        .db
        .with_connection(|conn| {
            ChunkRepository::replace_for_capture(
                conn,
                capture_id,
                &[ChunkRow::from_record(&chunk)],
            )
        })
        .expect("seed chunks");
    capture
}
