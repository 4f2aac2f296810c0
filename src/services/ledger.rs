use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use crate::db::repositories::plan_repository::{PlanActionRow, PlanRepository, PlanRunRow};
use crate::error::ScheduleResult;
use crate::models::capture::CaptureRecord;
use crate::models::plan::{PlacementSnapshot, PlanActionKind, PlanActionRecord};

/// Request-scoped audit trail. The run id exists from the first recorded
/// mutation on; nothing touches the store until `finalize`, which writes
/// the run and every action in one batch.
#[derive(Debug)]
pub struct PlanLedger {
    user_id: String,
    run_id: Option<String>,
    actions: Vec<PlanActionRecord>,
}

impl PlanLedger {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            run_id: None,
            actions: Vec::new(),
        }
    }

    /// The run id, allocated on first use.
    pub fn run_id(&mut self) -> &str {
        if self.run_id.is_none() {
            self.run_id = Some(Uuid::new_v4().to_string());
        }
        self.run_id.as_deref().expect("run id was just set")
    }

    pub fn current_run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[PlanActionRecord] {
        &self.actions
    }

    /// Record one capture mutation. `prev` must be snapshotted before the
    /// mutation was applied; `capture` carries the state after it.
    pub fn record(
        &mut self,
        kind: PlanActionKind,
        capture: &CaptureRecord,
        prev: PlacementSnapshot,
    ) -> String {
        let action_id = Uuid::new_v4().to_string();
        let plan_id = self.run_id().to_string();
        self.actions.push(PlanActionRecord {
            plan_id,
            action_id: action_id.clone(),
            capture_id: capture.id.clone(),
            capture_content: capture.content.clone(),
            action_type: kind,
            prev,
            next: PlacementSnapshot::of(capture),
        });
        action_id
    }

    pub fn summary(&self) -> String {
        let scheduled = self
            .actions
            .iter()
            .filter(|a| a.action_type == PlanActionKind::Scheduled)
            .count();
        let moved = self
            .actions
            .iter()
            .filter(|a| a.action_type == PlanActionKind::Rescheduled)
            .count();
        let unscheduled = self
            .actions
            .iter()
            .filter(|a| a.action_type == PlanActionKind::Unscheduled)
            .count();
        format!("scheduled:{scheduled} moved:{moved} unscheduled:{unscheduled}")
    }

    /// Persist the run and all of its actions. A ledger with no mutations
    /// leaves no trace.
    pub fn finalize(&self, conn: &Connection) -> ScheduleResult<Option<String>> {
        if self.actions.is_empty() {
            return Ok(None);
        }
        let run_id = self
            .current_run_id()
            .expect("non-empty ledger always has a run id")
            .to_string();
        let summary = self.summary();

        PlanRepository::insert_run(
            conn,
            &PlanRunRow {
                id: run_id.clone(),
                user_id: self.user_id.clone(),
                summary: Some(summary.clone()),
            },
        )?;
        let rows: Vec<PlanActionRow> = self.actions.iter().map(PlanActionRow::from_record).collect();
        PlanRepository::insert_actions(conn, &rows)?;

        info!(
            target: "scheduler::plan",
            plan_id = %run_id,
            %summary,
            actions = rows.len(),
            "plan run finalized"
        );
        Ok(Some(summary))
    }
}
