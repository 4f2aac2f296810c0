use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{ScheduleError, ScheduleResult};
use crate::models::capture::CaptureStatus;
use crate::models::plan::{PlacementSnapshot, PlanActionKind, PlanActionRecord, PlanRunRecord};

#[derive(Debug, Clone)]
pub struct PlanRunRow {
    pub id: String,
    pub user_id: String,
    pub summary: Option<String>,
}

impl PlanRunRow {
    pub fn from_record(record: &PlanRunRecord) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            summary: record.summary.clone(),
        }
    }

    pub fn into_record(self) -> PlanRunRecord {
        PlanRunRecord {
            id: self.id,
            user_id: self.user_id,
            summary: self.summary,
        }
    }
}

impl TryFrom<&Row<'_>> for PlanRunRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            summary: row.get("summary")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlanActionRow {
    pub plan_id: String,
    pub action_id: String,
    pub capture_id: String,
    pub capture_content: String,
    pub action_type: String,
    pub prev_status: String,
    pub prev_planned_start: Option<String>,
    pub prev_planned_end: Option<String>,
    pub prev_calendar_event_id: Option<String>,
    pub prev_calendar_event_etag: Option<String>,
    pub prev_freeze_until: Option<String>,
    pub prev_plan_id: Option<String>,
    pub next_status: String,
    pub next_planned_start: Option<String>,
    pub next_planned_end: Option<String>,
    pub next_calendar_event_id: Option<String>,
    pub next_calendar_event_etag: Option<String>,
    pub next_freeze_until: Option<String>,
    pub next_plan_id: Option<String>,
}

impl PlanActionRow {
    pub fn from_record(record: &PlanActionRecord) -> Self {
        Self {
            plan_id: record.plan_id.clone(),
            action_id: record.action_id.clone(),
            capture_id: record.capture_id.clone(),
            capture_content: record.capture_content.clone(),
            action_type: record.action_type.as_str().to_string(),
            prev_status: record.prev.status.as_str().to_string(),
            prev_planned_start: record.prev.planned_start.clone(),
            prev_planned_end: record.prev.planned_end.clone(),
            prev_calendar_event_id: record.prev.calendar_event_id.clone(),
            prev_calendar_event_etag: record.prev.calendar_event_etag.clone(),
            prev_freeze_until: record.prev.freeze_until.clone(),
            prev_plan_id: record.prev.plan_id.clone(),
            next_status: record.next.status.as_str().to_string(),
            next_planned_start: record.next.planned_start.clone(),
            next_planned_end: record.next.planned_end.clone(),
            next_calendar_event_id: record.next.calendar_event_id.clone(),
            next_calendar_event_etag: record.next.calendar_event_etag.clone(),
            next_freeze_until: record.next.freeze_until.clone(),
            next_plan_id: record.next.plan_id.clone(),
        }
    }

    pub fn into_record(self) -> ScheduleResult<PlanActionRecord> {
        Ok(PlanActionRecord {
            action_type: PlanActionKind::parse(&self.action_type).ok_or_else(|| {
                ScheduleError::database(format!(
                    "plan_actions.action_type 中存在非法取值: {}",
                    self.action_type
                ))
            })?,
            prev: PlacementSnapshot {
                status: parse_status(&self.prev_status)?,
                planned_start: self.prev_planned_start,
                planned_end: self.prev_planned_end,
                calendar_event_id: self.prev_calendar_event_id,
                calendar_event_etag: self.prev_calendar_event_etag,
                freeze_until: self.prev_freeze_until,
                plan_id: self.prev_plan_id,
            },
            next: PlacementSnapshot {
                status: parse_status(&self.next_status)?,
                planned_start: self.next_planned_start,
                planned_end: self.next_planned_end,
                calendar_event_id: self.next_calendar_event_id,
                calendar_event_etag: self.next_calendar_event_etag,
                freeze_until: self.next_freeze_until,
                plan_id: self.next_plan_id,
            },
            plan_id: self.plan_id,
            action_id: self.action_id,
            capture_id: self.capture_id,
            capture_content: self.capture_content,
        })
    }
}

impl TryFrom<&Row<'_>> for PlanActionRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            plan_id: row.get("plan_id")?,
            action_id: row.get("action_id")?,
            capture_id: row.get("capture_id")?,
            capture_content: row.get("capture_content")?,
            action_type: row.get("action_type")?,
            prev_status: row.get("prev_status")?,
            prev_planned_start: row.get("prev_planned_start")?,
            prev_planned_end: row.get("prev_planned_end")?,
            prev_calendar_event_id: row.get("prev_calendar_event_id")?,
            prev_calendar_event_etag: row.get("prev_calendar_event_etag")?,
            prev_freeze_until: row.get("prev_freeze_until")?,
            prev_plan_id: row.get("prev_plan_id")?,
            next_status: row.get("next_status")?,
            next_planned_start: row.get("next_planned_start")?,
            next_planned_end: row.get("next_planned_end")?,
            next_calendar_event_id: row.get("next_calendar_event_id")?,
            next_calendar_event_etag: row.get("next_calendar_event_etag")?,
            next_freeze_until: row.get("next_freeze_until")?,
            next_plan_id: row.get("next_plan_id")?,
        })
    }
}

pub struct PlanRepository;

impl PlanRepository {
    pub fn insert_run(conn: &Connection, row: &PlanRunRow) -> ScheduleResult<()> {
        conn.execute(
            "INSERT INTO plan_runs (id, user_id, summary) VALUES (:id, :user_id, :summary)",
            named_params! {
                ":id": &row.id,
                ":user_id": &row.user_id,
                ":summary": &row.summary,
            },
        )?;
        Ok(())
    }

    pub fn update_summary(conn: &Connection, id: &str, summary: &str) -> ScheduleResult<()> {
        let affected = conn.execute(
            "UPDATE plan_runs SET summary = :summary WHERE id = :id",
            named_params! { ":id": id, ":summary": summary },
        )?;
        if affected == 0 {
            return Err(ScheduleError::not_found());
        }
        Ok(())
    }

    pub fn find_run(conn: &Connection, id: &str) -> ScheduleResult<Option<PlanRunRow>> {
        let mut stmt = conn.prepare("SELECT id, user_id, summary FROM plan_runs WHERE id = :id")?;
        let row = stmt
            .query_row(named_params! { ":id": id }, |row| PlanRunRow::try_from(row))
            .optional()?;
        Ok(row)
    }

    /// All actions of one run are written in a single transaction so the
    /// ledger is never half-persisted.
    pub fn insert_actions(conn: &Connection, rows: &[PlanActionRow]) -> ScheduleResult<()> {
        conn.execute_batch("BEGIN")?;
        let result = (|| -> ScheduleResult<()> {
            for row in rows {
                conn.execute(
                    r#"
                        INSERT INTO plan_actions (
                            plan_id, action_id, capture_id, capture_content,
                            action_type, prev_status, prev_planned_start,
                            prev_planned_end, prev_calendar_event_id,
                            prev_calendar_event_etag, prev_freeze_until,
                            prev_plan_id, next_status, next_planned_start,
                            next_planned_end, next_calendar_event_id,
                            next_calendar_event_etag, next_freeze_until,
                            next_plan_id
                        ) VALUES (
                            :plan_id, :action_id, :capture_id, :capture_content,
                            :action_type, :prev_status, :prev_planned_start,
                            :prev_planned_end, :prev_calendar_event_id,
                            :prev_calendar_event_etag, :prev_freeze_until,
                            :prev_plan_id, :next_status, :next_planned_start,
                            :next_planned_end, :next_calendar_event_id,
                            :next_calendar_event_etag, :next_freeze_until,
                            :next_plan_id
                        )
                    "#,
                    named_params! {
                        ":plan_id": &row.plan_id,
                        ":action_id": &row.action_id,
                        ":capture_id": &row.capture_id,
                        ":capture_content": &row.capture_content,
                        ":action_type": &row.action_type,
                        ":prev_status": &row.prev_status,
                        ":prev_planned_start": &row.prev_planned_start,
                        ":prev_planned_end": &row.prev_planned_end,
                        ":prev_calendar_event_id": &row.prev_calendar_event_id,
                        ":prev_calendar_event_etag": &row.prev_calendar_event_etag,
                        ":prev_freeze_until": &row.prev_freeze_until,
                        ":prev_plan_id": &row.prev_plan_id,
                        ":next_status": &row.next_status,
                        ":next_planned_start": &row.next_planned_start,
                        ":next_planned_end": &row.next_planned_end,
                        ":next_calendar_event_id": &row.next_calendar_event_id,
                        ":next_calendar_event_etag": &row.next_calendar_event_etag,
                        ":next_freeze_until": &row.next_freeze_until,
                        ":next_plan_id": &row.next_plan_id,
                    },
                )?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(error) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(error)
            }
        }
    }

    pub fn list_actions(conn: &Connection, plan_id: &str) -> ScheduleResult<Vec<PlanActionRow>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM plan_actions WHERE plan_id = :plan_id ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(named_params! { ":plan_id": plan_id }, |row| {
                PlanActionRow::try_from(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn parse_status(raw: &str) -> ScheduleResult<CaptureStatus> {
    CaptureStatus::parse(raw).ok_or_else(|| {
        ScheduleError::database(format!("plan_actions 状态列存在非法取值: {raw}"))
    })
}
