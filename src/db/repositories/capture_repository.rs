use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};
use serde_json::Value as JsonValue;

use crate::error::{ScheduleError, ScheduleResult};
use crate::models::capture::{
    CaptureRecord, CaptureStatus, ConstraintKind, DurationFlexibility, StartFlexibility,
    TimeOfDayBand,
};

const BASE_SELECT: &str = r#"
    SELECT
        id,
        user_id,
        content,
        estimated_minutes,
        importance,
        urgency,
        impact,
        reschedule_penalty,
        status,
        constraint_type,
        constraint_time,
        constraint_end,
        constraint_date,
        original_target_time,
        deadline_at,
        window_start,
        window_end,
        start_target_at,
        is_soft_start,
        cannot_overlap,
        start_flexibility,
        duration_flexibility,
        min_chunk_minutes,
        max_splits,
        extraction_kind,
        task_type_hint,
        time_pref_time_of_day,
        time_pref_day,
        externality_score,
        reschedule_count,
        planned_start,
        planned_end,
        scheduled_for,
        calendar_event_id,
        calendar_event_etag,
        freeze_until,
        plan_id,
        manual_touch_at,
        scheduling_notes,
        created_at,
        updated_at
    FROM capture_entries
"#;

#[derive(Debug, Clone)]
pub struct CaptureRow {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub estimated_minutes: i64,
    pub importance: i64,
    pub urgency: Option<f64>,
    pub impact: Option<f64>,
    pub reschedule_penalty: Option<f64>,
    pub status: String,
    pub constraint_type: String,
    pub constraint_time: Option<String>,
    pub constraint_end: Option<String>,
    pub constraint_date: Option<String>,
    pub original_target_time: Option<String>,
    pub deadline_at: Option<String>,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub start_target_at: Option<String>,
    pub is_soft_start: bool,
    pub cannot_overlap: bool,
    pub start_flexibility: String,
    pub duration_flexibility: String,
    pub min_chunk_minutes: Option<i64>,
    pub max_splits: Option<i64>,
    pub extraction_kind: Option<String>,
    pub task_type_hint: Option<String>,
    pub time_pref_time_of_day: Option<String>,
    pub time_pref_day: Option<String>,
    pub externality_score: f64,
    pub reschedule_count: i64,
    pub planned_start: Option<String>,
    pub planned_end: Option<String>,
    pub scheduled_for: Option<String>,
    pub calendar_event_id: Option<String>,
    pub calendar_event_etag: Option<String>,
    pub freeze_until: Option<String>,
    pub plan_id: Option<String>,
    pub manual_touch_at: Option<String>,
    pub scheduling_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CaptureRow {
    pub fn from_record(record: &CaptureRecord) -> ScheduleResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            content: record.content.clone(),
            estimated_minutes: record.estimated_minutes,
            importance: record.importance,
            urgency: record.urgency,
            impact: record.impact,
            reschedule_penalty: record.reschedule_penalty,
            status: record.status.as_str().to_string(),
            constraint_type: record.constraint_type.as_str().to_string(),
            constraint_time: record.constraint_time.clone(),
            constraint_end: record.constraint_end.clone(),
            constraint_date: record.constraint_date.clone(),
            original_target_time: record.original_target_time.clone(),
            deadline_at: record.deadline_at.clone(),
            window_start: record.window_start.clone(),
            window_end: record.window_end.clone(),
            start_target_at: record.start_target_at.clone(),
            is_soft_start: record.is_soft_start,
            cannot_overlap: record.cannot_overlap,
            start_flexibility: record.start_flexibility.as_str().to_string(),
            duration_flexibility: record.duration_flexibility.as_str().to_string(),
            min_chunk_minutes: record.min_chunk_minutes,
            max_splits: record.max_splits,
            extraction_kind: record.extraction_kind.clone(),
            task_type_hint: record.task_type_hint.clone(),
            time_pref_time_of_day: record
                .time_pref_time_of_day
                .map(|band| band.as_str().to_string()),
            time_pref_day: record.time_pref_day.clone(),
            externality_score: record.externality_score,
            reschedule_count: record.reschedule_count,
            planned_start: record.planned_start.clone(),
            planned_end: record.planned_end.clone(),
            scheduled_for: record.scheduled_for.clone(),
            calendar_event_id: record.calendar_event_id.clone(),
            calendar_event_etag: record.calendar_event_etag.clone(),
            freeze_until: record.freeze_until.clone(),
            plan_id: record.plan_id.clone(),
            manual_touch_at: record.manual_touch_at.clone(),
            scheduling_notes: serialize_json(record.scheduling_notes.as_ref())?,
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
        })
    }

    pub fn into_record(self) -> ScheduleResult<CaptureRecord> {
        Ok(CaptureRecord {
            status: parse_enum(&self.status, CaptureStatus::parse, "status")?,
            constraint_type: parse_enum(&self.constraint_type, ConstraintKind::parse, "constraint_type")?,
            start_flexibility: parse_enum(
                &self.start_flexibility,
                StartFlexibility::parse,
                "start_flexibility",
            )?,
            duration_flexibility: parse_enum(
                &self.duration_flexibility,
                DurationFlexibility::parse,
                "duration_flexibility",
            )?,
            time_pref_time_of_day: match self.time_pref_time_of_day.as_deref() {
                Some(raw) => Some(parse_enum(raw, TimeOfDayBand::parse, "time_pref_time_of_day")?),
                None => None,
            },
            scheduling_notes: deserialize_json(self.scheduling_notes)?,
            id: self.id,
            user_id: self.user_id,
            content: self.content,
            estimated_minutes: self.estimated_minutes,
            importance: self.importance,
            urgency: self.urgency,
            impact: self.impact,
            reschedule_penalty: self.reschedule_penalty,
            constraint_time: self.constraint_time,
            constraint_end: self.constraint_end,
            constraint_date: self.constraint_date,
            original_target_time: self.original_target_time,
            deadline_at: self.deadline_at,
            window_start: self.window_start,
            window_end: self.window_end,
            start_target_at: self.start_target_at,
            is_soft_start: self.is_soft_start,
            cannot_overlap: self.cannot_overlap,
            min_chunk_minutes: self.min_chunk_minutes,
            max_splits: self.max_splits,
            extraction_kind: self.extraction_kind,
            task_type_hint: self.task_type_hint,
            time_pref_day: self.time_pref_day,
            externality_score: self.externality_score,
            reschedule_count: self.reschedule_count,
            planned_start: self.planned_start,
            planned_end: self.planned_end,
            scheduled_for: self.scheduled_for,
            calendar_event_id: self.calendar_event_id,
            calendar_event_etag: self.calendar_event_etag,
            freeze_until: self.freeze_until,
            plan_id: self.plan_id,
            manual_touch_at: self.manual_touch_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<&Row<'_>> for CaptureRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            content: row.get("content")?,
            estimated_minutes: row.get("estimated_minutes")?,
            importance: row.get("importance")?,
            urgency: row.get("urgency")?,
            impact: row.get("impact")?,
            reschedule_penalty: row.get("reschedule_penalty")?,
            status: row.get("status")?,
            constraint_type: row.get("constraint_type")?,
            constraint_time: row.get("constraint_time")?,
            constraint_end: row.get("constraint_end")?,
            constraint_date: row.get("constraint_date")?,
            original_target_time: row.get("original_target_time")?,
            deadline_at: row.get("deadline_at")?,
            window_start: row.get("window_start")?,
            window_end: row.get("window_end")?,
            start_target_at: row.get("start_target_at")?,
            is_soft_start: row.get::<_, i64>("is_soft_start")? != 0,
            cannot_overlap: row.get::<_, i64>("cannot_overlap")? != 0,
            start_flexibility: row.get("start_flexibility")?,
            duration_flexibility: row.get("duration_flexibility")?,
            min_chunk_minutes: row.get("min_chunk_minutes")?,
            max_splits: row.get("max_splits")?,
            extraction_kind: row.get("extraction_kind")?,
            task_type_hint: row.get("task_type_hint")?,
            time_pref_time_of_day: row.get("time_pref_time_of_day")?,
            time_pref_day: row.get("time_pref_day")?,
            externality_score: row.get("externality_score")?,
            reschedule_count: row.get("reschedule_count")?,
            planned_start: row.get("planned_start")?,
            planned_end: row.get("planned_end")?,
            scheduled_for: row.get("scheduled_for")?,
            calendar_event_id: row.get("calendar_event_id")?,
            calendar_event_etag: row.get("calendar_event_etag")?,
            freeze_until: row.get("freeze_until")?,
            plan_id: row.get("plan_id")?,
            manual_touch_at: row.get("manual_touch_at")?,
            scheduling_notes: row.get("scheduling_notes")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct CaptureRepository;

impl CaptureRepository {
    pub fn insert(conn: &Connection, row: &CaptureRow) -> ScheduleResult<()> {
        conn.execute(
            r#"
                INSERT INTO capture_entries (
                    id, user_id, content, estimated_minutes, importance,
                    urgency, impact, reschedule_penalty, status, constraint_type,
                    constraint_time, constraint_end, constraint_date,
                    original_target_time, deadline_at, window_start, window_end,
                    start_target_at, is_soft_start, cannot_overlap,
                    start_flexibility, duration_flexibility, min_chunk_minutes,
                    max_splits, extraction_kind, task_type_hint,
                    time_pref_time_of_day, time_pref_day, externality_score,
                    reschedule_count, planned_start, planned_end, scheduled_for,
                    calendar_event_id, calendar_event_etag, freeze_until,
                    plan_id, manual_touch_at, scheduling_notes, created_at,
                    updated_at
                ) VALUES (
                    :id, :user_id, :content, :estimated_minutes, :importance,
                    :urgency, :impact, :reschedule_penalty, :status, :constraint_type,
                    :constraint_time, :constraint_end, :constraint_date,
                    :original_target_time, :deadline_at, :window_start, :window_end,
                    :start_target_at, :is_soft_start, :cannot_overlap,
                    :start_flexibility, :duration_flexibility, :min_chunk_minutes,
                    :max_splits, :extraction_kind, :task_type_hint,
                    :time_pref_time_of_day, :time_pref_day, :externality_score,
                    :reschedule_count, :planned_start, :planned_end, :scheduled_for,
                    :calendar_event_id, :calendar_event_etag, :freeze_until,
                    :plan_id, :manual_touch_at, :scheduling_notes, :created_at,
                    :updated_at
                )
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":content": &row.content,
                ":estimated_minutes": &row.estimated_minutes,
                ":importance": &row.importance,
                ":urgency": &row.urgency,
                ":impact": &row.impact,
                ":reschedule_penalty": &row.reschedule_penalty,
                ":status": &row.status,
                ":constraint_type": &row.constraint_type,
                ":constraint_time": &row.constraint_time,
                ":constraint_end": &row.constraint_end,
                ":constraint_date": &row.constraint_date,
                ":original_target_time": &row.original_target_time,
                ":deadline_at": &row.deadline_at,
                ":window_start": &row.window_start,
                ":window_end": &row.window_end,
                ":start_target_at": &row.start_target_at,
                ":is_soft_start": &(row.is_soft_start as i64),
                ":cannot_overlap": &(row.cannot_overlap as i64),
                ":start_flexibility": &row.start_flexibility,
                ":duration_flexibility": &row.duration_flexibility,
                ":min_chunk_minutes": &row.min_chunk_minutes,
                ":max_splits": &row.max_splits,
                ":extraction_kind": &row.extraction_kind,
                ":task_type_hint": &row.task_type_hint,
                ":time_pref_time_of_day": &row.time_pref_time_of_day,
                ":time_pref_day": &row.time_pref_day,
                ":externality_score": &row.externality_score,
                ":reschedule_count": &row.reschedule_count,
                ":planned_start": &row.planned_start,
                ":planned_end": &row.planned_end,
                ":scheduled_for": &row.scheduled_for,
                ":calendar_event_id": &row.calendar_event_id,
                ":calendar_event_etag": &row.calendar_event_etag,
                ":freeze_until": &row.freeze_until,
                ":plan_id": &row.plan_id,
                ":manual_touch_at": &row.manual_touch_at,
                ":scheduling_notes": &row.scheduling_notes,
                ":created_at": &row.created_at,
                ":updated_at": &row.updated_at,
            },
        )?;
        Ok(())
    }

    pub fn update(conn: &Connection, row: &CaptureRow) -> ScheduleResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE capture_entries SET
                    user_id = :user_id,
                    content = :content,
                    estimated_minutes = :estimated_minutes,
                    importance = :importance,
                    urgency = :urgency,
                    impact = :impact,
                    reschedule_penalty = :reschedule_penalty,
                    status = :status,
                    constraint_type = :constraint_type,
                    constraint_time = :constraint_time,
                    constraint_end = :constraint_end,
                    constraint_date = :constraint_date,
                    original_target_time = :original_target_time,
                    deadline_at = :deadline_at,
                    window_start = :window_start,
                    window_end = :window_end,
                    start_target_at = :start_target_at,
                    is_soft_start = :is_soft_start,
                    cannot_overlap = :cannot_overlap,
                    start_flexibility = :start_flexibility,
                    duration_flexibility = :duration_flexibility,
                    min_chunk_minutes = :min_chunk_minutes,
                    max_splits = :max_splits,
                    extraction_kind = :extraction_kind,
                    task_type_hint = :task_type_hint,
                    time_pref_time_of_day = :time_pref_time_of_day,
                    time_pref_day = :time_pref_day,
                    externality_score = :externality_score,
                    reschedule_count = :reschedule_count,
                    planned_start = :planned_start,
                    planned_end = :planned_end,
                    scheduled_for = :scheduled_for,
                    calendar_event_id = :calendar_event_id,
                    calendar_event_etag = :calendar_event_etag,
                    freeze_until = :freeze_until,
                    plan_id = :plan_id,
                    manual_touch_at = :manual_touch_at,
                    scheduling_notes = :scheduling_notes,
                    updated_at = :updated_at
                WHERE id = :id
            "#,
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":content": &row.content,
                ":estimated_minutes": &row.estimated_minutes,
                ":importance": &row.importance,
                ":urgency": &row.urgency,
                ":impact": &row.impact,
                ":reschedule_penalty": &row.reschedule_penalty,
                ":status": &row.status,
                ":constraint_type": &row.constraint_type,
                ":constraint_time": &row.constraint_time,
                ":constraint_end": &row.constraint_end,
                ":constraint_date": &row.constraint_date,
                ":original_target_time": &row.original_target_time,
                ":deadline_at": &row.deadline_at,
                ":window_start": &row.window_start,
                ":window_end": &row.window_end,
                ":start_target_at": &row.start_target_at,
                ":is_soft_start": &(row.is_soft_start as i64),
                ":cannot_overlap": &(row.cannot_overlap as i64),
                ":start_flexibility": &row.start_flexibility,
                ":duration_flexibility": &row.duration_flexibility,
                ":min_chunk_minutes": &row.min_chunk_minutes,
                ":max_splits": &row.max_splits,
                ":extraction_kind": &row.extraction_kind,
                ":task_type_hint": &row.task_type_hint,
                ":time_pref_time_of_day": &row.time_pref_time_of_day,
                ":time_pref_day": &row.time_pref_day,
                ":externality_score": &row.externality_score,
                ":reschedule_count": &row.reschedule_count,
                ":planned_start": &row.planned_start,
                ":planned_end": &row.planned_end,
                ":scheduled_for": &row.scheduled_for,
                ":calendar_event_id": &row.calendar_event_id,
                ":calendar_event_etag": &row.calendar_event_etag,
                ":freeze_until": &row.freeze_until,
                ":plan_id": &row.plan_id,
                ":manual_touch_at": &row.manual_touch_at,
                ":scheduling_notes": &row.scheduling_notes,
                ":updated_at": &row.updated_at,
            },
        )?;

        if affected == 0 {
            return Err(ScheduleError::not_found());
        }
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> ScheduleResult<Option<CaptureRow>> {
        let sql = format!("{BASE_SELECT} WHERE id = :id");
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt
            .query_row(named_params! { ":id": id }, |row| CaptureRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    pub fn find_by_ids(conn: &Connection, ids: &[String]) -> ScheduleResult<Vec<CaptureRow>> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = Self::find_by_id(conn, id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn list_scheduled_for_user(
        conn: &Connection,
        user_id: &str,
    ) -> ScheduleResult<Vec<CaptureRow>> {
        let sql = format!("{BASE_SELECT} WHERE user_id = :user_id AND status = 'scheduled' ORDER BY planned_start");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(named_params! { ":user_id": user_id }, |row| {
                CaptureRow::try_from(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

}

fn serialize_json(value: Option<&JsonValue>) -> ScheduleResult<Option<String>> {
    match value {
        Some(value) => Ok(Some(serde_json::to_string(value)?)),
        None => Ok(None),
    }
}

fn deserialize_json(value: Option<String>) -> ScheduleResult<Option<JsonValue>> {
    match value {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn parse_enum<T>(
    raw: &str,
    parse: fn(&str) -> Option<T>,
    column: &str,
) -> ScheduleResult<T> {
    parse(raw).ok_or_else(|| {
        ScheduleError::database(format!("capture_entries.{column} 中存在非法取值: {raw}"))
    })
}
