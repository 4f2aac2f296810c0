use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calendar::{self, CalendarError, CalendarGateway};
use crate::config::SchedulerConfig;
use crate::db::repositories::capture_repository::{CaptureRepository, CaptureRow};
use crate::db::repositories::chunk_repository::{ChunkRepository, ChunkRow};
use crate::db::DbPool;
use crate::error::{ConflictReason, ScheduleError, ScheduleResult};
use crate::models::calendar::CalendarEvent;
use crate::models::capture::{
    CaptureChunkRecord, CaptureRecord, CaptureStatus, DurationFlexibility, ExplanationNote,
    OverlapNote, SchedulingNotes, StartFlexibility, MAX_CAPTURE_MINUTES, MIN_CAPTURE_MINUTES,
};
use crate::models::plan::{PlacementSnapshot, PlanActionKind};
use crate::models::schedule::{
    AdvisorReply, ChunkDto, CommitOutcome, ConflictDecision, ConflictEventRef, ConflictLists,
    DecisionOutcome, OverlapReport, ScheduleAction, ScheduleCaptureRequest, ScheduleOutcome,
    SlotDto,
};
use crate::services::advisor::{self, AdvisorContext, ConflictAdvisor};
use crate::services::busy::{self, BusyInterval};
use crate::services::chunking;
use crate::services::ledger::PlanLedger;
use crate::services::occupancy::{CellTag, OccupancyGrid};
use crate::services::overlap::{self, OverlapMeter};
use crate::services::planner::{self, SchedulingPlan};
use crate::services::preemption::{self, Displacement};
use crate::services::priority;
use crate::services::routine;
use crate::services::schedule_utils::{self, LocalZone};
use crate::services::slot_search::{self, Slot};

const GRID_CANDIDATE_LIMIT: usize = 64;
const SUGGESTION_COUNT: usize = 3;

/// Request-scoped engine state. Everything here is rebuilt per invocation
/// and dropped on return.
struct EngineState {
    now: DateTime<Utc>,
    zone: LocalZone,
    events: Vec<CalendarEvent>,
    busy: Vec<BusyInterval>,
    grid: OccupancyGrid,
    meter: OverlapMeter,
}

impl EngineState {
    fn rebuild_views(&mut self, config: &SchedulerConfig) {
        self.busy = busy::compute_busy_intervals(
            &self.events,
            config.buffer_minutes,
            self.now,
            &self.zone,
            config.all_day_events_block,
        );
        self.grid = OccupancyGrid::build(&self.events, self.now, &self.zone, config);
    }

    fn remove_event(&mut self, event_id: &str, config: &SchedulerConfig) {
        self.events.retain(|event| event.id != event_id);
        self.rebuild_views(config);
    }
}

/// Bounds the current capture may be placed inside.
#[derive(Debug, Clone, Copy)]
struct SchedulingWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChunkFlags {
    late: bool,
    overlapped: bool,
    prime: bool,
}

enum LadderOutcome {
    Committed(CommitOutcome),
    Decision(ConflictDecision),
}

enum PreferredVerdict {
    Committed(CommitOutcome),
    Decision(ConflictDecision),
    FallThrough,
}

/// The request-level state machine: normalizes the capture, materializes
/// calendar state, then walks a fixed placement precedence, mutating the
/// calendar first and the store second on every commit.
pub struct SchedulerService {
    db: DbPool,
    gateway: Arc<dyn CalendarGateway>,
    advisor: Option<Arc<dyn ConflictAdvisor>>,
    config: SchedulerConfig,
}

impl SchedulerService {
    pub fn new(db: DbPool, gateway: Arc<dyn CalendarGateway>, config: SchedulerConfig) -> Self {
        Self {
            db,
            gateway,
            advisor: None,
            config,
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn ConflictAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn schedule_capture(
        &self,
        caller_id: &str,
        request: ScheduleCaptureRequest,
    ) -> ScheduleResult<ScheduleOutcome> {
        self.schedule_capture_at(caller_id, request, Utc::now())
            .await
    }

    /// Entry point with an explicit clock, which keeps every decision in
    /// this engine reproducible.
    pub async fn schedule_capture_at(
        &self,
        caller_id: &str,
        request: ScheduleCaptureRequest,
        now: DateTime<Utc>,
    ) -> ScheduleResult<ScheduleOutcome> {
        if request.capture_id.trim().is_empty() {
            return Err(ScheduleError::validation("缺少 captureId"));
        }
        let zone = LocalZone::resolve(
            request.timezone.as_deref(),
            request.timezone_offset_minutes,
        )?;

        let mut capture = self.load_capture(&request.capture_id)?;
        if capture.user_id != caller_id {
            return Err(ScheduleError::forbidden("该任务不属于当前用户"));
        }
        capture.estimated_minutes = capture
            .estimated_minutes
            .clamp(MIN_CAPTURE_MINUTES, MAX_CAPTURE_MINUTES);

        if request.action == ScheduleAction::Complete {
            return self.complete_capture(capture, now).await;
        }

        if let Some(freeze_until) =
            schedule_utils::parse_optional_datetime(capture.freeze_until.as_ref())?
        {
            if freeze_until > now {
                return Err(ScheduleError::conflict_with_payload(
                    ConflictReason::Frozen,
                    "任务已被用户锁定，暂不能调整",
                    json!({
                        "captureId": capture.id,
                        "freezeUntil": capture.freeze_until,
                    }),
                ));
            }
        }

        // routines become explicit windows before anything else
        if routine::normalize_routine_capture(&mut capture, now, &zone, &self.config)? {
            capture.updated_at = schedule_utils::format_datetime(now);
            self.persist_capture(&capture)?;
        }

        // materialize live calendar state for the whole horizon
        let horizon_end = schedule_utils::add_days(now, self.config.search_days);
        let events = self.list_events(&capture.user_id, now, horizon_end).await?;
        let mut engine = EngineState {
            now,
            zone,
            events,
            busy: Vec::new(),
            grid: OccupancyGrid::build(&[], now, &zone, &self.config),
            meter: self.load_overlap_meter(&capture.user_id)?,
        };

        // a reschedule (or a re-run on an already scheduled capture) first
        // releases the old placement so it cannot block itself
        let prev_snapshot = PlacementSnapshot::of(&capture);
        let previously_scheduled = capture.status == CaptureStatus::Scheduled;
        if previously_scheduled {
            self.release_placement(&mut engine, &mut capture).await?;
        }
        engine.rebuild_views(&self.config);

        let mut ledger = PlanLedger::new(capture.user_id.clone());
        let commit_kind = if previously_scheduled {
            PlanActionKind::Rescheduled
        } else {
            PlanActionKind::Scheduled
        };

        let result = self
            .run_ladder(
                &mut engine,
                &mut ledger,
                &mut capture,
                &request,
                prev_snapshot,
                commit_kind,
            )
            .await;

        // one finalize per request, also on failure: reclaimed blockers
        // must stay auditable even when the target commit blew up later
        let summary = if ledger.is_empty() {
            None
        } else {
            match self.db.with_connection(|conn| ledger.finalize(conn)) {
                Ok(summary) => summary,
                Err(finalize_error) => {
                    warn!(
                        target: "scheduler::plan",
                        error = %finalize_error,
                        "failed to persist plan ledger"
                    );
                    None
                }
            }
        };

        match result {
            Ok(LadderOutcome::Committed(mut outcome)) => {
                outcome.plan_summary = summary.unwrap_or_else(|| ledger.summary());
                Ok(ScheduleOutcome::Committed(outcome))
            }
            Ok(LadderOutcome::Decision(decision)) => Ok(ScheduleOutcome::Decision(DecisionOutcome {
                message: decision.message.clone(),
                capture,
                decision,
            })),
            Err(error) => Err(error),
        }
    }

    /// The placement ladder. Every commit path returns; falling off the end
    /// means a structured conflict.
    #[allow(clippy::too_many_arguments)]
    async fn run_ladder(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        request: &ScheduleCaptureRequest,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<LadderOutcome> {
        let target_priority = priority::capture_priority(capture, engine.now, &self.config)?;
        let plan =
            planner::compute_scheduling_plan(capture, engine.now, &engine.zone, &self.config)?;
        let deadline = planner::resolve_deadline(capture, &engine.zone, &self.config)?;
        let window = self.scheduling_window(&plan, deadline, engine.now, engine);

        debug!(
            target: "scheduler::plan",
            capture_id = %capture.id,
            mode = plan.mode(),
            deadline = ?deadline,
            "scheduling plan computed"
        );

        // an already elapsed deadline short-circuits the ladder
        if let Some(deadline_at) = deadline {
            if deadline_at <= engine.now {
                return self
                    .handle_elapsed_deadline(
                        engine,
                        ledger,
                        capture,
                        request,
                        target_priority,
                        deadline_at,
                        prev_snapshot,
                        commit_kind,
                    )
                    .await;
            }
        }

        // an explicit preferred slot gets the first shot
        if let Some(preferred) = self
            .requested_slot(request, capture)?
            .or(plan.preferred_slot())
        {
            match self
                .attempt_preferred_slot(
                    engine,
                    ledger,
                    capture,
                    request,
                    &plan,
                    window,
                    preferred,
                    target_priority,
                    prev_snapshot.clone(),
                    commit_kind,
                )
                .await?
            {
                PreferredVerdict::Committed(outcome) => {
                    return Ok(LadderOutcome::Committed(outcome))
                }
                PreferredVerdict::Decision(decision) => {
                    return Ok(LadderOutcome::Decision(decision))
                }
                PreferredVerdict::FallThrough => {}
            }
        }

        // next, the plan's own search order
        if let Some(slot) = self.schedule_with_plan(engine, capture, &plan, deadline, window) {
            if slot.0 >= window.start && slot.1 <= window.end {
                let outcome = self
                    .commit_placement(
                        engine,
                        ledger,
                        capture,
                        vec![slot],
                        ChunkFlags::default(),
                        commit_kind,
                        prev_snapshot,
                        target_priority,
                        "plan",
                        "按计划选择了最早可用时间段",
                    )
                    .await?;
                return Ok(LadderOutcome::Committed(outcome));
            }
        }

        // a deadline still unserved gets a chunked direct fit
        if deadline.is_some() {
            if let Some(outcome) = self
                .attempt_deadline_chunks(
                    engine,
                    ledger,
                    capture,
                    window,
                    target_priority,
                    prev_snapshot.clone(),
                    commit_kind,
                )
                .await?
            {
                return Ok(LadderOutcome::Committed(outcome));
            }
        }

        // rebalance: displace lower-priority owned work
        if request.allow_rebalance {
            if let Some(outcome) = self
                .attempt_grid_preemption(
                    engine,
                    ledger,
                    capture,
                    &plan,
                    window,
                    target_priority,
                    prev_snapshot.clone(),
                    commit_kind,
                )
                .await?
            {
                return Ok(LadderOutcome::Committed(outcome));
            }
        }

        // soft deadlines under capacity pressure may slip late
        if let Some(deadline_at) = deadline {
            if capture.start_flexibility != StartFlexibility::Hard {
                let (free, _, _) = engine.grid.capacity_within(window.start, window.end);
                let pressure_floor = self
                    .min_chunk_minutes(capture)
                    .max(capture.estimated_minutes / 4);
                if free < pressure_floor {
                    if let Some(slot) = slot_search::find_late_placement_slot(
                        &engine.busy,
                        capture.estimated_minutes,
                        &engine.zone,
                        &self.config,
                        deadline_at.max(engine.now),
                    ) {
                        let outcome = self
                            .commit_late(
                                engine,
                                ledger,
                                capture,
                                slot,
                                target_priority,
                                prev_snapshot,
                                commit_kind,
                            )
                            .await?;
                        return Ok(LadderOutcome::Committed(outcome));
                    }
                }
            }
        }

        // last resort: late when authorized, otherwise a structured conflict
        if let Some(deadline_at) = deadline {
            let late_candidate = slot_search::find_late_placement_slot(
                &engine.busy,
                capture.estimated_minutes,
                &engine.zone,
                &self.config,
                deadline_at.max(engine.now),
            );
            if request.allow_late_placement {
                if let Some(slot) = late_candidate {
                    let outcome = self
                        .commit_late(
                            engine,
                            ledger,
                            capture,
                            slot,
                            target_priority,
                            prev_snapshot,
                            commit_kind,
                        )
                        .await?;
                    return Ok(LadderOutcome::Committed(outcome));
                }
            }
            return Err(self.conflict_error(
                engine,
                capture,
                ConflictReason::SlotExceedsDeadline,
                Some(deadline_at),
                window,
                late_candidate,
            ));
        }

        Err(self.conflict_error(engine, capture, ConflictReason::NoSlot, None, window, None))
    }

    // ---- loading --------------------------------------------------------

    fn load_capture(&self, capture_id: &str) -> ScheduleResult<CaptureRecord> {
        let row = self
            .db
            .with_connection(|conn| CaptureRepository::find_by_id(conn, capture_id))?
            .ok_or_else(ScheduleError::not_found)?;
        row.into_record()
    }

    fn persist_capture(&self, capture: &CaptureRecord) -> ScheduleResult<()> {
        let row = CaptureRow::from_record(capture)?;
        self.db
            .with_connection(|conn| CaptureRepository::update(conn, &row))
    }

    fn load_overlap_meter(&self, user_id: &str) -> ScheduleResult<OverlapMeter> {
        let chunks: Vec<CaptureChunkRecord> = self
            .db
            .with_connection(|conn| ChunkRepository::list_for_user(conn, user_id))?
            .into_iter()
            .map(ChunkRow::into_record)
            .collect();
        OverlapMeter::from_chunks(&chunks)
    }

    async fn list_events(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ScheduleResult<Vec<CalendarEvent>> {
        match self.gateway.list_events(user_id, from, to).await {
            Ok(events) => Ok(events),
            Err(error) if error.is_auth_failure() => {
                self.refresh_auth_once(user_id).await?;
                self.gateway
                    .list_events(user_id, from, to)
                    .await
                    .map_err(|err| self.map_calendar_error(err))
            }
            Err(error) => Err(self.map_calendar_error(error)),
        }
    }

    // ---- calendar plumbing ----------------------------------------------

    fn map_calendar_error(&self, error: CalendarError) -> ScheduleError {
        match error.status {
            412 => ScheduleError::precondition(error.message),
            401 => ScheduleError::validation_with_details(
                "日历授权已失效，请重新连接",
                json!({"needsReconnect": true}),
            ),
            _ => ScheduleError::upstream(error.message),
        }
    }

    async fn refresh_auth_once(&self, user_id: &str) -> ScheduleResult<()> {
        self.gateway.refresh_auth(user_id).await.map_err(|_| {
            ScheduleError::validation_with_details(
                "日历授权已失效，请重新连接",
                json!({"needsReconnect": true}),
            )
        })
    }

    /// Delete an owned event, observing the version tag. A stale tag gets
    /// one refetch-and-retry; an event already gone counts as deleted.
    async fn delete_owned_event(
        &self,
        user_id: &str,
        event_id: &str,
        version_tag: Option<&str>,
    ) -> ScheduleResult<()> {
        match self
            .gateway
            .delete_event(user_id, event_id, version_tag)
            .await
        {
            Ok(()) => Ok(()),
            Err(error) if error.status == 404 => Ok(()),
            Err(error) if error.is_precondition_failed() => {
                warn!(
                    target: "scheduler::calendar",
                    event_id,
                    "stale version tag on delete, refetching"
                );
                let fresh = self
                    .gateway
                    .get_event(user_id, event_id)
                    .await
                    .map_err(|err| self.map_calendar_error(err))?;
                self.gateway
                    .delete_event(user_id, event_id, fresh.etag.as_deref())
                    .await
                    .map_err(|err| self.map_calendar_error(err))
            }
            Err(error) if error.is_auth_failure() => {
                self.refresh_auth_once(user_id).await?;
                self.gateway
                    .delete_event(user_id, event_id, version_tag)
                    .await
                    .map_err(|err| self.map_calendar_error(err))
            }
            Err(error) => Err(self.map_calendar_error(error)),
        }
    }

    /// Remove the capture's current placement from both sides so the new
    /// search starts clean. Persisted immediately: once the event is gone
    /// the store must not keep pointing at it.
    async fn release_placement(
        &self,
        engine: &mut EngineState,
        capture: &mut CaptureRecord,
    ) -> ScheduleResult<()> {
        if let Some(event_id) = capture.calendar_event_id.clone() {
            self.delete_owned_event(
                &capture.user_id,
                &event_id,
                capture.calendar_event_etag.as_deref(),
            )
            .await?;
            engine.events.retain(|event| event.id != event_id);
        }
        capture.status = CaptureStatus::Pending;
        capture.calendar_event_id = None;
        capture.calendar_event_etag = None;
        capture.planned_start = None;
        capture.planned_end = None;
        capture.scheduled_for = None;
        capture.updated_at = schedule_utils::format_datetime(engine.now);
        self.persist_capture(capture)?;
        self.db
            .with_connection(|conn| ChunkRepository::replace_for_capture(conn, &capture.id, &[]))?;
        Ok(())
    }

    // ---- planning helpers -----------------------------------------------

    fn scheduling_window(
        &self,
        plan: &SchedulingPlan,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        engine: &EngineState,
    ) -> SchedulingWindow {
        let (plan_start, plan_end) = match plan.window() {
            Some((start, end)) => (Some(start), Some(end)),
            None => (None, None),
        };
        let start = plan_start.map(|s| s.max(now)).unwrap_or(now);
        let end = plan_end.or(deadline).unwrap_or_else(|| engine.grid.end());
        SchedulingWindow { start, end }
    }

    fn min_chunk_minutes(&self, capture: &CaptureRecord) -> i64 {
        capture
            .min_chunk_minutes
            .unwrap_or(self.config.default_min_chunk_minutes)
            .max(self.config.slot_increment_minutes)
    }

    fn requested_slot(
        &self,
        request: &ScheduleCaptureRequest,
        capture: &CaptureRecord,
    ) -> ScheduleResult<Option<Slot>> {
        let Some(start_raw) = request.preferred_start.as_ref() else {
            return Ok(None);
        };
        let start = schedule_utils::parse_datetime(start_raw)?;
        let end = match request.preferred_end.as_ref() {
            Some(raw) => schedule_utils::parse_datetime(raw)?,
            None => schedule_utils::add_minutes(start, capture.estimated_minutes),
        };
        if end <= start {
            return Err(ScheduleError::validation("首选时间段的结束必须晚于开始"));
        }
        Ok(Some((start, end)))
    }

    /// Search order for a plan: its own mode first, then the deadline bound,
    /// then the flexible fallback.
    fn schedule_with_plan(
        &self,
        engine: &EngineState,
        capture: &CaptureRecord,
        plan: &SchedulingPlan,
        deadline: Option<DateTime<Utc>>,
        window: SchedulingWindow,
    ) -> Option<Slot> {
        let duration = capture.estimated_minutes;
        let enforce_working = capture.routine_kind().is_none();

        let mode_candidate = match plan {
            SchedulingPlan::Deadline { deadline } => slot_search::find_slot_before_deadline(
                &engine.busy,
                duration,
                &engine.zone,
                &self.config,
                engine.now,
                *deadline,
            ),
            SchedulingPlan::Window { start, end } => slot_search::find_slot_within_window(
                &engine.busy,
                duration,
                &self.config,
                engine.now,
                *start,
                *end,
            ),
            SchedulingPlan::Start { preferred_start, .. } => {
                slot_search::find_next_available_slot(
                    &engine.busy,
                    duration,
                    &engine.zone,
                    &self.config,
                    *preferred_start,
                    enforce_working,
                    capture.time_pref_time_of_day,
                )
            }
            SchedulingPlan::Flexible => None,
        };
        if mode_candidate.is_some() {
            return mode_candidate;
        }

        if let Some(deadline_at) = deadline {
            if !plan.is_deadline() {
                if let Some(slot) = slot_search::find_slot_before_deadline(
                    &engine.busy,
                    duration,
                    &engine.zone,
                    &self.config,
                    engine.now,
                    deadline_at,
                ) {
                    return Some(slot);
                }
            }
        }

        slot_search::find_next_available_slot(
            &engine.busy,
            duration,
            &engine.zone,
            &self.config,
            window.start.max(engine.now),
            enforce_working,
            capture.time_pref_time_of_day,
        )
    }

    // ---- preferred-slot path --------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn attempt_preferred_slot(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        request: &ScheduleCaptureRequest,
        plan: &SchedulingPlan,
        window: SchedulingWindow,
        preferred: Slot,
        target_priority: f64,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<PreferredVerdict> {
        let (start, end) = preferred;
        let enforce_working = capture.routine_kind().is_none();
        let within_working_hours = !enforce_working
            || !(schedule_utils::is_before_working_start(
                &engine.zone,
                start,
                self.config.working_start_hour,
            ) || schedule_utils::is_after_working_end(
                &engine.zone,
                end,
                self.config.day_end_hour,
            ));
        let within_plan_window = start >= window.start && end <= window.end;
        let in_future = start >= engine.now;

        let mut external_conflicts = Vec::new();
        let mut owned_conflicts = Vec::new();
        for event in &engine.events {
            let Some((event_start, event_end)) = event.timed_range() else {
                continue;
            };
            if !schedule_utils::overlaps(start, end, event_start, event_end) {
                continue;
            }
            if event.is_owned() {
                owned_conflicts.push(event.clone());
            } else {
                external_conflicts.push(event.clone());
            }
        }

        if within_working_hours
            && within_plan_window
            && in_future
            && external_conflicts.is_empty()
            && owned_conflicts.is_empty()
            && busy::is_slot_free(start, end, &engine.busy)
        {
            let outcome = self
                .commit_placement(
                    engine,
                    ledger,
                    capture,
                    vec![(start, end)],
                    ChunkFlags::default(),
                    commit_kind,
                    prev_snapshot,
                    target_priority,
                    "preferred",
                    "按用户首选时间段完成排程",
                )
                .await?;
            return Ok(PreferredVerdict::Committed(outcome));
        }

        // overlap escalation: share the slot instead of refusing it
        if request.allow_overlap
            && within_working_hours
            && within_plan_window
            && in_future
            && external_conflicts.is_empty()
            && !owned_conflicts.is_empty()
        {
            if let Some(outcome) = self
                .attempt_overlap_commit(
                    engine,
                    ledger,
                    capture,
                    (start, end),
                    &owned_conflicts,
                    target_priority,
                    prev_snapshot.clone(),
                    commit_kind,
                )
                .await?
            {
                return Ok(PreferredVerdict::Committed(outcome));
            }
        }

        // preemption escalation: clear the slot of lower-priority work
        if request.allow_rebalance
            && within_working_hours
            && within_plan_window
            && in_future
            && external_conflicts.is_empty()
            && !owned_conflicts.is_empty()
        {
            if let Some(outcome) = self
                .attempt_slot_preemption(
                    engine,
                    ledger,
                    capture,
                    plan,
                    (start, end),
                    &owned_conflicts,
                    target_priority,
                    prev_snapshot.clone(),
                    commit_kind,
                )
                .await?
            {
                return Ok(PreferredVerdict::Committed(outcome));
            }
        }

        // the preferred slot stays contested: hand the user a decision
        let suggestion = slot_search::find_next_available_slot(
            &engine.busy,
            capture.estimated_minutes,
            &engine.zone,
            &self.config,
            engine.now,
            enforce_working,
            capture.time_pref_time_of_day,
        );
        let decision = self
            .build_conflict_decision(
                engine,
                capture,
                (start, end),
                external_conflicts,
                owned_conflicts,
                suggestion,
                within_working_hours,
                within_plan_window,
                in_future,
                target_priority,
            )
            .await?;
        Ok(PreferredVerdict::Decision(decision))
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_overlap_commit(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        slot: Slot,
        owned_conflicts: &[CalendarEvent],
        target_priority: f64,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<Option<CommitOutcome>> {
        let co_ids: Vec<String> = owned_conflicts
            .iter()
            .filter_map(|event| event.capture_id().map(str::to_owned))
            .collect();
        if co_ids.len() != owned_conflicts.len() {
            return Ok(None);
        }
        let co_captures: Vec<CaptureRecord> = self
            .db
            .with_connection(|conn| CaptureRepository::find_by_ids(conn, &co_ids))?
            .into_iter()
            .map(CaptureRow::into_record)
            .collect::<ScheduleResult<Vec<_>>>()?;
        if co_captures.len() != co_ids.len() {
            return Ok(None);
        }

        let co_refs: Vec<&CaptureRecord> = co_captures.iter().collect();
        let evaluation = overlap::evaluate_overlap(
            capture,
            target_priority,
            &co_refs,
            slot.0,
            slot.1,
            &engine.meter,
            &self.config,
        );
        if !evaluation.allowed {
            debug!(
                target: "scheduler::overlap",
                capture_id = %capture.id,
                reason = ?evaluation.reject_reason,
                "overlap rejected"
            );
            return Ok(None);
        }

        let mut co_priorities = Vec::with_capacity(co_captures.len());
        for co in &co_captures {
            co_priorities.push(priority::capture_priority(co, engine.now, &self.config)?);
        }
        let target_is_prime = co_priorities
            .iter()
            .all(|&co_priority| target_priority >= co_priority);

        let flags = ChunkFlags {
            late: false,
            overlapped: true,
            prime: target_is_prime,
        };
        let mut outcome = self
            .commit_placement(
                engine,
                ledger,
                capture,
                vec![slot],
                flags,
                commit_kind,
                prev_snapshot,
                target_priority,
                "overlap",
                "在并行预算内与现有任务共享该时间段",
            )
            .await?;

        // co-scheduled captures get their chunks marked as overlapped too;
        // the highest-priority participant keeps prime
        for (co, &co_priority) in co_captures.iter().zip(co_priorities.iter()) {
            self.mark_overlapped_chunks(
                co,
                slot,
                co_priority > target_priority,
                capture.id.clone(),
            )?;
        }
        engine.meter.add(slot.0, evaluation.slot_minutes);

        outcome.overlap = Some(OverlapReport {
            participants: std::iter::once(capture.id.clone())
                .chain(co_captures.iter().map(|c| c.id.clone()))
                .collect(),
            minutes: evaluation.slot_minutes,
            daily_used_minutes: evaluation.daily_used_minutes + evaluation.slot_minutes,
        });
        Ok(Some(outcome))
    }

    fn mark_overlapped_chunks(
        &self,
        co_capture: &CaptureRecord,
        slot: Slot,
        co_is_prime: bool,
        overlapped_with: String,
    ) -> ScheduleResult<()> {
        let chunks: Vec<CaptureChunkRecord> = self
            .db
            .with_connection(|conn| ChunkRepository::list_for_capture(conn, &co_capture.id))?
            .into_iter()
            .map(ChunkRow::into_record)
            .collect();

        let mut updated = Vec::with_capacity(chunks.len());
        let mut touched = 0i64;
        for mut chunk in chunks {
            let chunk_start = schedule_utils::parse_datetime(&chunk.start)?;
            let chunk_end = schedule_utils::parse_datetime(&chunk.end)?;
            if schedule_utils::overlaps(chunk_start, chunk_end, slot.0, slot.1) {
                chunk.overlapped = true;
                chunk.prime = co_is_prime;
                touched += schedule_utils::duration_minutes(
                    chunk_start.max(slot.0),
                    chunk_end.min(slot.1),
                );
            }
            updated.push(chunk);
        }

        let rows: Vec<ChunkRow> = updated.iter().map(ChunkRow::from_record).collect();
        self.db.with_connection(|conn| {
            ChunkRepository::replace_for_capture(conn, &co_capture.id, &rows)
        })?;

        let mut record = co_capture.clone();
        let mut notes = SchedulingNotes::from_value(record.scheduling_notes.as_ref());
        notes.overlap = Some(OverlapNote {
            overlapped_with: vec![overlapped_with],
            minutes: touched,
        });
        record.scheduling_notes = Some(notes.into_value());
        self.persist_capture(&record)
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_slot_preemption(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        plan: &SchedulingPlan,
        slot: Slot,
        owned_conflicts: &[CalendarEvent],
        target_priority: f64,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<Option<CommitOutcome>> {
        let candidate_ids: Vec<String> = owned_conflicts
            .iter()
            .map(|event| event.id.clone())
            .collect();
        let Some(selected) = preemption::select_minimal_preemption_set(
            slot.0,
            slot.1,
            &engine.events,
            &candidate_ids,
            plan.is_deadline(),
            engine.now,
            &engine.zone,
            &self.config,
        ) else {
            return Ok(None);
        };

        let mut displacements = Vec::new();
        let mut blockers = Vec::new();
        for event_id in &selected.event_ids {
            let event = engine
                .events
                .iter()
                .find(|event| &event.id == event_id)
                .cloned()
                .ok_or_else(|| ScheduleError::internal("被选中的事件不在上下文中"))?;
            let Some(capture_id) = event.capture_id().map(str::to_owned) else {
                return Ok(None);
            };
            let blocker = self.load_capture(&capture_id)?;

            if !preemption::is_movable(&blocker, engine.now, plan.is_deadline(), &self.config)? {
                debug!(
                    target: "scheduler::preempt",
                    blocker_id = %blocker.id,
                    "blocker is frozen or inside the stability window"
                );
                return Ok(None);
            }
            let blocker_priority =
                priority::capture_priority(&blocker, engine.now, &self.config)?;
            if blocker_priority >= target_priority {
                debug!(
                    target: "scheduler::preempt",
                    blocker_id = %blocker.id,
                    "blocker outranks the target"
                );
                return Ok(None);
            }

            let (event_start, event_end) = event
                .timed_range()
                .ok_or_else(|| ScheduleError::internal("被占用事件缺少具体时间"))?;
            displacements.push(Displacement {
                capture_id: blocker.id.clone(),
                event_id: event.id.clone(),
                priority: blocker_priority,
                duration_minutes: blocker.estimated_minutes,
                displaced_minutes: schedule_utils::duration_minutes(
                    event_start.max(slot.0),
                    event_end.min(slot.1),
                )
                .max(0),
                overlap_cost: 0.0,
            });
            blockers.push((blocker, event));
        }

        let minutes_claimed = schedule_utils::duration_minutes(slot.0, slot.1);
        let evaluation = preemption::evaluate_preemption_net_gain(
            target_priority,
            capture.estimated_minutes,
            minutes_claimed,
            &displacements,
            &self.config,
        );
        if !evaluation.allowed {
            debug!(
                target: "scheduler::preempt",
                capture_id = %capture.id,
                reason = ?evaluation.reject_reason,
                net_gain = evaluation.net_gain,
                "preemption rejected by cost model"
            );
            return Ok(None);
        }

        info!(
            target: "scheduler::preempt",
            capture_id = %capture.id,
            displaced = blockers.len(),
            net_gain = evaluation.net_gain,
            "displacing owned events"
        );

        let displaced = self.reclaim_conflicts(engine, ledger, blockers).await?;
        let outcome = self
            .commit_placement(
                engine,
                ledger,
                capture,
                vec![slot],
                ChunkFlags::default(),
                commit_kind,
                prev_snapshot,
                target_priority,
                "preemption",
                "挤占了优先级更低的已排任务",
            )
            .await?;
        self.reschedule_displaced(engine, ledger, displaced).await?;
        Ok(Some(outcome))
    }

    /// Tear down the selected owned events: calendar first, then the store
    /// rows, one unscheduled ledger action each.
    async fn reclaim_conflicts(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        blockers: Vec<(CaptureRecord, CalendarEvent)>,
    ) -> ScheduleResult<Vec<CaptureRecord>> {
        let mut displaced = Vec::with_capacity(blockers.len());
        for (mut blocker, event) in blockers {
            let prev = PlacementSnapshot::of(&blocker);
            self.delete_owned_event(&blocker.user_id, &event.id, event.etag.as_deref())
                .await?;

            blocker.status = CaptureStatus::Pending;
            blocker.calendar_event_id = None;
            blocker.calendar_event_etag = None;
            blocker.planned_start = None;
            blocker.planned_end = None;
            blocker.scheduled_for = None;
            blocker.reschedule_count += 1;
            blocker.plan_id = Some(ledger.run_id().to_string());
            blocker.updated_at = schedule_utils::format_datetime(engine.now);
            self.persist_capture(&blocker)?;
            self.db.with_connection(|conn| {
                ChunkRepository::replace_for_capture(conn, &blocker.id, &[])
            })?;

            ledger.record(PlanActionKind::Unscheduled, &blocker, prev);
            engine.remove_event(&event.id, &self.config);
            displaced.push(blocker);
        }
        Ok(displaced)
    }

    /// Re-place displaced captures after the target holds its slot. No
    /// cascading preemption: a displaced capture that finds no room simply
    /// stays pending.
    async fn reschedule_displaced(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        displaced: Vec<CaptureRecord>,
    ) -> ScheduleResult<()> {
        for mut blocker in displaced {
            let plan = planner::compute_scheduling_plan(
                &blocker,
                engine.now,
                &engine.zone,
                &self.config,
            )?;
            let deadline = planner::resolve_deadline(&blocker, &engine.zone, &self.config)?;
            let window = self.scheduling_window(&plan, deadline, engine.now, engine);
            let blocker_priority =
                priority::capture_priority(&blocker, engine.now, &self.config)?;

            match self.schedule_with_plan(engine, &blocker, &plan, deadline, window) {
                Some(slot) if slot.0 >= window.start && slot.1 <= window.end => {
                    let prev = PlacementSnapshot::of(&blocker);
                    self.commit_placement(
                        engine,
                        ledger,
                        &mut blocker,
                        vec![slot],
                        ChunkFlags::default(),
                        PlanActionKind::Rescheduled,
                        prev,
                        blocker_priority,
                        "rebalance",
                        "因更高优先级任务让位，已顺延到下一个空闲时段",
                    )
                    .await?;
                }
                _ => {
                    warn!(
                        target: "scheduler::preempt",
                        capture_id = %blocker.id,
                        "displaced capture found no replacement slot, staying pending"
                    );
                }
            }
        }
        Ok(())
    }

    // ---- grid preemption ------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn attempt_grid_preemption(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        plan: &SchedulingPlan,
        window: SchedulingWindow,
        target_priority: f64,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<Option<CommitOutcome>> {
        let candidates = engine.grid.collect_window_candidates(
            capture.estimated_minutes,
            window.start,
            window.end,
            GRID_CANDIDATE_LIMIT,
        );

        let mut best: Option<(f64, Slot, Vec<(CaptureRecord, CalendarEvent)>)> = None;
        for candidate in candidates {
            if candidate.owned_minutes == 0 {
                continue;
            }

            let mut blockers = Vec::new();
            let mut displacements = Vec::new();
            let mut eligible = true;
            for (owner_id, &minutes) in &candidate.owned_breakdown {
                let Some(event) = engine
                    .events
                    .iter()
                    .find(|event| event.capture_id() == Some(owner_id.as_str()))
                    .cloned()
                else {
                    eligible = false;
                    break;
                };
                let blocker = match self.load_capture(owner_id) {
                    Ok(blocker) => blocker,
                    Err(ScheduleError::NotFound) => {
                        eligible = false;
                        break;
                    }
                    Err(error) => return Err(error),
                };
                if !preemption::is_movable(
                    &blocker,
                    engine.now,
                    plan.is_deadline(),
                    &self.config,
                )? {
                    eligible = false;
                    break;
                }
                let blocker_priority =
                    priority::capture_priority(&blocker, engine.now, &self.config)?;
                if blocker_priority >= target_priority {
                    eligible = false;
                    break;
                }
                displacements.push(Displacement {
                    capture_id: blocker.id.clone(),
                    event_id: event.id.clone(),
                    priority: blocker_priority,
                    duration_minutes: blocker.estimated_minutes,
                    displaced_minutes: minutes,
                    overlap_cost: 0.0,
                });
                blockers.push((blocker, event));
            }
            if !eligible {
                continue;
            }

            let minutes_claimed =
                schedule_utils::duration_minutes(candidate.start, candidate.end);
            let evaluation = preemption::evaluate_preemption_net_gain(
                target_priority,
                capture.estimated_minutes,
                minutes_claimed,
                &displacements,
                &self.config,
            );
            if !evaluation.allowed {
                continue;
            }
            let replace = match &best {
                Some((best_gain, _, _)) => evaluation.net_gain > *best_gain,
                None => true,
            };
            if replace {
                best = Some((
                    evaluation.net_gain,
                    (candidate.start, candidate.end),
                    blockers,
                ));
            }
        }

        let Some((net_gain, slot, blockers)) = best else {
            return Ok(None);
        };
        info!(
            target: "scheduler::preempt",
            capture_id = %capture.id,
            net_gain,
            displaced = blockers.len(),
            "grid preemption selected"
        );

        let displaced = self.reclaim_conflicts(engine, ledger, blockers).await?;
        let outcome = self
            .commit_placement(
                engine,
                ledger,
                capture,
                vec![slot],
                ChunkFlags::default(),
                commit_kind,
                prev_snapshot,
                target_priority,
                "preemption",
                "挤占了优先级更低的已排任务",
            )
            .await?;
        self.reschedule_displaced(engine, ledger, displaced).await?;
        Ok(Some(outcome))
    }

    // ---- deadline chunked placement -------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn attempt_deadline_chunks(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        window: SchedulingWindow,
        target_priority: f64,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<Option<CommitOutcome>> {
        let allow_split = capture.duration_flexibility == DurationFlexibility::SplitAllowed;
        let durations = chunking::generate_chunk_durations(
            capture.estimated_minutes,
            self.min_chunk_minutes(capture),
            capture.max_splits.unwrap_or(i64::MAX),
            allow_split,
            &self.config,
        );

        let mut probe = engine.busy.clone();
        let enforce_working = capture.routine_kind().is_none();
        let Some(placements) = chunking::place_chunks_within_range(
            &durations,
            &mut probe,
            window.start.max(engine.now),
            window.end,
            enforce_working,
            &engine.zone,
            &self.config,
        ) else {
            return Ok(None);
        };

        let outcome = self
            .commit_placement(
                engine,
                ledger,
                capture,
                placements,
                ChunkFlags::default(),
                commit_kind,
                prev_snapshot,
                target_priority,
                "deadline_chunks",
                "将任务拆分后塞入截止时间前的空隙",
            )
            .await?;
        Ok(Some(outcome))
    }

    // ---- late placement -------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn commit_late(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        slot: Slot,
        target_priority: f64,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<CommitOutcome> {
        capture.freeze_until = None;
        let flags = ChunkFlags {
            late: true,
            overlapped: false,
            prime: false,
        };
        self.commit_placement(
            engine,
            ledger,
            capture,
            vec![slot],
            flags,
            commit_kind,
            prev_snapshot,
            target_priority,
            "late",
            "已超过截止时间，按用户授权安排到最近的空闲时段",
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_elapsed_deadline(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        request: &ScheduleCaptureRequest,
        target_priority: f64,
        deadline_at: DateTime<Utc>,
        prev_snapshot: PlacementSnapshot,
        commit_kind: PlanActionKind,
    ) -> ScheduleResult<LadderOutcome> {
        let late_candidate = slot_search::find_late_placement_slot(
            &engine.busy,
            capture.estimated_minutes,
            &engine.zone,
            &self.config,
            deadline_at.max(engine.now),
        );

        if request.allow_late_placement {
            if let Some(slot) = late_candidate {
                let outcome = self
                    .commit_late(
                        engine,
                        ledger,
                        capture,
                        slot,
                        target_priority,
                        prev_snapshot,
                        commit_kind,
                    )
                    .await?;
                return Ok(LadderOutcome::Committed(outcome));
            }
        }

        let window = SchedulingWindow {
            start: engine.now,
            end: deadline_at,
        };
        Err(self.conflict_error(
            engine,
            capture,
            ConflictReason::SlotExceedsDeadline,
            Some(deadline_at),
            window,
            late_candidate,
        ))
    }

    // ---- commit ---------------------------------------------------------

    /// The single mutation funnel: calendar create first, then the store
    /// row and chunk rows. A store failure triggers a best-effort
    /// compensating delete; the `action_id` on the event makes a retried
    /// create reconcilable either way.
    #[allow(clippy::too_many_arguments)]
    async fn commit_placement(
        &self,
        engine: &mut EngineState,
        ledger: &mut PlanLedger,
        capture: &mut CaptureRecord,
        placements: Vec<Slot>,
        flags: ChunkFlags,
        kind: PlanActionKind,
        prev: PlacementSnapshot,
        target_priority: f64,
        path: &str,
        explanation: &str,
    ) -> ScheduleResult<CommitOutcome> {
        let span_start = placements
            .first()
            .map(|(start, _)| *start)
            .ok_or_else(|| ScheduleError::internal("提交时缺少时间段"))?;
        let span_end = placements
            .last()
            .map(|(_, end)| *end)
            .ok_or_else(|| ScheduleError::internal("提交时缺少时间段"))?;

        let plan_id = ledger.run_id().to_string();
        let action_id = Uuid::new_v4().to_string();

        let draft = calendar::build_owned_event(
            &capture.content,
            &capture.id,
            &action_id,
            target_priority,
            Some(&plan_id),
            span_start,
            span_end,
        );
        let created = match self
            .gateway
            .create_event(&capture.user_id, draft.clone())
            .await
        {
            Ok(created) => created,
            Err(error) if error.is_auth_failure() => {
                self.refresh_auth_once(&capture.user_id).await?;
                self.gateway
                    .create_event(&capture.user_id, draft)
                    .await
                    .map_err(|err| self.map_calendar_error(err))?
            }
            Err(error) => return Err(self.map_calendar_error(error)),
        };

        capture.status = CaptureStatus::Scheduled;
        capture.planned_start = Some(schedule_utils::format_datetime(span_start));
        capture.planned_end = Some(schedule_utils::format_datetime(span_end));
        capture.scheduled_for = capture.planned_start.clone();
        capture.calendar_event_id = Some(created.id.clone());
        capture.calendar_event_etag = created.etag.clone();
        capture.plan_id = Some(plan_id.clone());
        capture.updated_at = schedule_utils::format_datetime(engine.now);

        let mut notes = SchedulingNotes::from_value(capture.scheduling_notes.as_ref());
        if let Some(previous) = capture.scheduling_notes.clone() {
            notes.previous_note = Some(previous);
        }
        notes.explanation = Some(ExplanationNote {
            path: path.to_string(),
            message: explanation.to_string(),
            plan_id: Some(plan_id.clone()),
        });
        capture.scheduling_notes = Some(notes.into_value());

        let chunk_records: Vec<CaptureChunkRecord> = placements
            .iter()
            .map(|(start, end)| CaptureChunkRecord {
                capture_id: capture.id.clone(),
                start: schedule_utils::format_datetime(*start),
                end: schedule_utils::format_datetime(*end),
                prime: flags.prime,
                late: flags.late,
                overlapped: flags.overlapped,
            })
            .collect();

        let store_result = (|| -> ScheduleResult<()> {
            self.persist_capture(capture)?;
            let rows: Vec<ChunkRow> = chunk_records.iter().map(ChunkRow::from_record).collect();
            self.db.with_connection(|conn| {
                ChunkRepository::replace_for_capture(conn, &capture.id, &rows)
            })
        })();
        if let Err(store_error) = store_result {
            warn!(
                target: "scheduler::plan",
                capture_id = %capture.id,
                event_id = %created.id,
                "store update failed after calendar create, compensating"
            );
            if let Err(delete_error) = self
                .delete_owned_event(&capture.user_id, &created.id, created.etag.as_deref())
                .await
            {
                warn!(
                    target: "scheduler::plan",
                    event_id = %created.id,
                    error = %delete_error,
                    "compensating delete failed, event reconciles via action_id"
                );
            }
            return Err(ScheduleError::internal(format!(
                "日历已写入但本地存储失败: {store_error}"
            )));
        }

        ledger.record(kind, capture, prev);
        busy::register_interval(
            &mut engine.busy,
            span_start,
            span_end,
            self.config.buffer_minutes,
        );

        info!(
            target: "scheduler::plan",
            capture_id = %capture.id,
            path,
            start = %capture.planned_start.as_deref().unwrap_or_default(),
            end = %capture.planned_end.as_deref().unwrap_or_default(),
            "capture committed"
        );

        Ok(CommitOutcome {
            message: "排程完成".to_string(),
            capture: capture.clone(),
            plan_summary: ledger.summary(),
            chunks: chunk_records
                .iter()
                .map(|chunk| ChunkDto {
                    start: chunk.start.clone(),
                    end: chunk.end.clone(),
                    prime: chunk.prime,
                    late: chunk.late,
                    overlapped: chunk.overlapped,
                })
                .collect(),
            explanation: explanation.to_string(),
            overlap: None,
        })
    }

    // ---- completion -----------------------------------------------------

    async fn complete_capture(
        &self,
        mut capture: CaptureRecord,
        now: DateTime<Utc>,
    ) -> ScheduleResult<ScheduleOutcome> {
        let prev = PlacementSnapshot::of(&capture);
        if let Some(event_id) = capture.calendar_event_id.clone() {
            self.delete_owned_event(
                &capture.user_id,
                &event_id,
                capture.calendar_event_etag.as_deref(),
            )
            .await?;
        }

        capture.status = CaptureStatus::Completed;
        capture.calendar_event_id = None;
        capture.calendar_event_etag = None;
        capture.freeze_until = None;
        capture.updated_at = schedule_utils::format_datetime(now);

        let mut ledger = PlanLedger::new(capture.user_id.clone());
        capture.plan_id = Some(ledger.run_id().to_string());
        self.persist_capture(&capture)?;
        self.db
            .with_connection(|conn| ChunkRepository::replace_for_capture(conn, &capture.id, &[]))?;
        ledger.record(PlanActionKind::Unscheduled, &capture, prev);
        let plan_summary = self
            .db
            .with_connection(|conn| ledger.finalize(conn))?
            .unwrap_or_else(|| ledger.summary());

        info!(target: "scheduler::plan", capture_id = %capture.id, "capture completed");
        Ok(ScheduleOutcome::Committed(CommitOutcome {
            message: "任务已完成".to_string(),
            capture: capture.clone(),
            plan_summary,
            chunks: Vec::new(),
            explanation: "任务标记完成，并移除了对应的日历事件".to_string(),
            overlap: None,
        }))
    }

    // ---- decisions and conflicts ----------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn build_conflict_decision(
        &self,
        engine: &EngineState,
        capture: &CaptureRecord,
        preferred: Slot,
        external_conflicts: Vec<CalendarEvent>,
        owned_conflicts: Vec<CalendarEvent>,
        suggestion: Option<Slot>,
        within_working_hours: bool,
        within_plan_window: bool,
        in_future: bool,
        target_priority: f64,
    ) -> ScheduleResult<ConflictDecision> {
        let conflicts = ConflictLists {
            external: external_conflicts.iter().map(event_ref).collect(),
            owned: owned_conflicts.iter().map(event_ref).collect(),
        };
        let preferred_dto = SlotDto {
            start: schedule_utils::format_datetime(preferred.0),
            end: schedule_utils::format_datetime(preferred.1),
        };
        let suggestion_dto = suggestion.map(|(start, end)| SlotDto {
            start: schedule_utils::format_datetime(start),
            end: schedule_utils::format_datetime(end),
        });

        let baseline = if !in_future {
            "首选时间段已经过去"
        } else if !within_plan_window {
            "首选时间段超出了任务允许的范围"
        } else if !within_working_hours {
            "首选时间段在工作时间之外"
        } else if !conflicts.external.is_empty() {
            "首选时间段与外部日程冲突，外部日程不会被移动"
        } else {
            "首选时间段已被其他任务占用"
        };

        let advisor_reply = self
            .consult_advisor(
                engine,
                capture,
                &preferred_dto,
                &conflicts,
                suggestion_dto.clone(),
                target_priority,
            )
            .await;

        Ok(ConflictDecision {
            decision_type: ConflictDecision::PREFERRED_CONFLICT.to_string(),
            message: baseline.to_string(),
            preferred: preferred_dto,
            conflicts,
            suggestion: suggestion_dto,
            advisor: advisor_reply,
            metadata: json!({
                "withinWorkingHours": within_working_hours,
                "withinPlanWindow": within_plan_window,
                "inFuture": in_future,
                "targetPriority": target_priority,
            }),
        })
    }

    /// Advisor failures are logged and swallowed: the decision goes out
    /// with the baseline message either way.
    async fn consult_advisor(
        &self,
        engine: &EngineState,
        capture: &CaptureRecord,
        preferred: &SlotDto,
        conflicts: &ConflictLists,
        suggestion: Option<SlotDto>,
        target_priority: f64,
    ) -> Option<AdvisorReply> {
        let advisor = self.advisor.as_ref()?;
        let busy_summary = engine
            .grid
            .segments()
            .into_iter()
            .filter(|segment| segment.tag != CellTag::Free)
            .take(24)
            .map(|segment| {
                format!(
                    "{} - {} {}",
                    segment.start.to_rfc3339(),
                    segment.end.to_rfc3339(),
                    match segment.tag {
                        CellTag::External => "外部日程",
                        CellTag::Owned(_) => "已排任务",
                        CellTag::Free => "空闲",
                    }
                )
            })
            .collect();

        let context = AdvisorContext {
            capture_id: capture.id.clone(),
            capture_content: capture.content.clone(),
            estimated_minutes: capture.estimated_minutes,
            priority: target_priority,
            preferred: preferred.clone(),
            conflicts: conflicts.clone(),
            suggestion,
            timezone: format!("{:?}", engine.zone),
            busy_summary,
        };

        match advisor.advise(&context).await {
            Ok(reply) => Some(advisor::sanitize_reply(
                reply,
                &engine.busy,
                &engine.zone,
                engine.now,
                &self.config,
            )),
            Err(error) => {
                warn!(
                    target: "scheduler::advisor",
                    capture_id = %capture.id,
                    error = %error,
                    "advisor failed, returning baseline decision"
                );
                None
            }
        }
    }

    fn conflict_error(
        &self,
        engine: &EngineState,
        capture: &CaptureRecord,
        reason: ConflictReason,
        deadline: Option<DateTime<Utc>>,
        window: SchedulingWindow,
        late_candidate: Option<Slot>,
    ) -> ScheduleError {
        let (free, owned, external) = engine.grid.capacity_within(window.start, window.end);
        let needed = schedule_utils::round_up_to_increment(
            capture.estimated_minutes,
            self.config.slot_increment_minutes,
        );

        let mut suggestions = Vec::new();
        let mut cursor = engine.now;
        for _ in 0..SUGGESTION_COUNT {
            let Some((start, end)) = slot_search::find_next_available_slot(
                &engine.busy,
                capture.estimated_minutes,
                &engine.zone,
                &self.config,
                cursor,
                capture.routine_kind().is_none(),
                capture.time_pref_time_of_day,
            ) else {
                break;
            };
            suggestions.push(json!({
                "start": schedule_utils::format_datetime(start),
                "end": schedule_utils::format_datetime(end),
            }));
            cursor = schedule_utils::add_minutes(start, self.config.slot_increment_minutes);
        }

        let mut payload = json!({
            "error": "无法在当前策略下完成排程",
            "reason": reason.as_str(),
            "capture_id": capture.id,
            "needed_minutes": needed,
            "available_free_minutes": free,
            "diaguru_minutes": owned,
            "external_minutes": external,
            "window_start": schedule_utils::format_datetime(window.start),
            "window_end": schedule_utils::format_datetime(window.end),
            "suggestions": suggestions,
        });
        if let Some(deadline_at) = deadline {
            payload["deadline"] = json!(schedule_utils::format_datetime(deadline_at));
        }
        if let Some((start, end)) = late_candidate {
            payload["late_candidate"] = json!({
                "start": schedule_utils::format_datetime(start),
                "end": schedule_utils::format_datetime(end),
            });
        }

        let message = match reason {
            ConflictReason::SlotExceedsDeadline => "截止时间之前已没有足够的空闲时间",
            ConflictReason::NoSlot => "搜索范围内没有可用的时间段",
            ConflictReason::Frozen => "任务已被用户锁定",
        };
        ScheduleError::conflict_with_payload(reason, message, payload)
    }
}

fn event_ref(event: &CalendarEvent) -> ConflictEventRef {
    let (start, end) = event
        .timed_range()
        .map(|(start, end)| {
            (
                schedule_utils::format_datetime(start),
                schedule_utils::format_datetime(end),
            )
        })
        .unwrap_or_default();
    ConflictEventRef {
        event_id: event.id.clone(),
        summary: event.summary.clone(),
        start,
        end,
        capture_id: event.capture_id().map(str::to_owned),
    }
}
