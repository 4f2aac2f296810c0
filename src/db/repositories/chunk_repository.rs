use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use crate::error::ScheduleResult;
use crate::models::capture::CaptureChunkRecord;

#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub capture_id: String,
    pub start: String,
    pub end: String,
    pub prime: bool,
    pub late: bool,
    pub overlapped: bool,
}

impl ChunkRow {
    pub fn from_record(record: &CaptureChunkRecord) -> Self {
        Self {
            capture_id: record.capture_id.clone(),
            start: record.start.clone(),
            end: record.end.clone(),
            prime: record.prime,
            late: record.late,
            overlapped: record.overlapped,
        }
    }

    pub fn into_record(self) -> CaptureChunkRecord {
        CaptureChunkRecord {
            capture_id: self.capture_id,
            start: self.start,
            end: self.end,
            prime: self.prime,
            late: self.late,
            overlapped: self.overlapped,
        }
    }
}

impl TryFrom<&Row<'_>> for ChunkRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            capture_id: row.get("capture_id")?,
            start: row.get("start")?,
            end: row.get("end")?,
            prime: row.get::<_, i64>("prime")? != 0,
            late: row.get::<_, i64>("late")? != 0,
            overlapped: row.get::<_, i64>("overlapped")? != 0,
        })
    }
}

pub struct ChunkRepository;

impl ChunkRepository {
    /// A capture's chunk rows are replaced wholesale on every commit.
    pub fn replace_for_capture(
        conn: &Connection,
        capture_id: &str,
        rows: &[ChunkRow],
    ) -> ScheduleResult<()> {
        conn.execute(
            "DELETE FROM capture_chunks WHERE capture_id = :capture_id",
            named_params! { ":capture_id": capture_id },
        )?;
        for row in rows {
            conn.execute(
                r#"
                    INSERT INTO capture_chunks (
                        capture_id, start, "end", prime, late, overlapped
                    ) VALUES (
                        :capture_id, :start, :end, :prime, :late, :overlapped
                    )
                "#,
                named_params! {
                    ":capture_id": &row.capture_id,
                    ":start": &row.start,
                    ":end": &row.end,
                    ":prime": &(row.prime as i64),
                    ":late": &(row.late as i64),
                    ":overlapped": &(row.overlapped as i64),
                },
            )?;
        }
        Ok(())
    }

    pub fn list_for_capture(conn: &Connection, capture_id: &str) -> ScheduleResult<Vec<ChunkRow>> {
        let mut stmt = conn.prepare(
            "SELECT capture_id, start, \"end\", prime, late, overlapped
             FROM capture_chunks WHERE capture_id = :capture_id ORDER BY start",
        )?;
        let rows = stmt
            .query_map(named_params! { ":capture_id": capture_id }, |row| {
                ChunkRow::try_from(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Chunks of every scheduled capture of one user, for rebuilding the
    /// daily overlap meter.
    pub fn list_for_user(conn: &Connection, user_id: &str) -> ScheduleResult<Vec<ChunkRow>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT cc.capture_id, cc.start, cc."end", cc.prime, cc.late, cc.overlapped
                FROM capture_chunks cc
                JOIN capture_entries ce ON ce.id = cc.capture_id
                WHERE ce.user_id = :user_id AND ce.status = 'scheduled'
                ORDER BY cc.start
            "#,
        )?;
        let rows = stmt
            .query_map(named_params! { ":user_id": user_id }, |row| {
                ChunkRow::try_from(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
