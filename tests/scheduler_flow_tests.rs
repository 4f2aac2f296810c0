mod common;

use common::*;

use diaguru::error::{ConflictReason, ScheduleError};
use diaguru::models::capture::{CaptureStatus, ConstraintKind, StartFlexibility, TimeOfDayBand};
use diaguru::models::plan::PlanActionKind;
use diaguru::models::schedule::{ScheduleAction, ScheduleCaptureRequest};
use diaguru::db::repositories::plan_repository::PlanRepository;

fn request(capture_id: &str, action: ScheduleAction) -> ScheduleCaptureRequest {
    ScheduleCaptureRequest::new(capture_id, action)
}

#[tokio::test]
async fn sleep_routine_normalizes_and_lands_in_the_night_window() {
    let harness = harness();
    let mut capture = base_capture("sleep-1", 480);
    capture.task_type_hint = Some("routine.sleep".into());
    capture.time_pref_day = Some("tomorrow".into());
    insert_capture(&harness, &capture);

    let mut req = request("sleep-1", ScheduleAction::Schedule);
    req.timezone = Some("America/Chicago".into());
    let now = utc(2025, 11, 21, 16, 46);

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, now)
        .await
        .expect("sleep schedules");
    let commit = outcome.as_committed().expect("committed");

    let stored = fetch_capture(&harness, "sleep-1");
    assert_eq!(stored.constraint_type, ConstraintKind::Window);
    assert_eq!(
        stored.window_start.as_deref(),
        Some("2025-11-22T04:00:00+00:00")
    );
    assert_eq!(
        stored.window_end.as_deref(),
        Some("2025-11-22T13:30:00+00:00")
    );
    assert!(stored.cannot_overlap);
    assert_eq!(stored.time_pref_time_of_day, Some(TimeOfDayBand::Night));
    assert_eq!(stored.status, CaptureStatus::Scheduled);
    // earliest feasible start inside the night window
    assert_eq!(commit.chunks[0].start, "2025-11-22T04:00:00+00:00");
    assert_eq!(commit.chunks[0].end, "2025-11-22T12:00:00+00:00");
}

#[tokio::test]
async fn window_constraint_places_at_window_open() {
    let harness = harness();
    let mut capture = base_capture("win-1", 60);
    capture.constraint_type = ConstraintKind::Window;
    capture.constraint_time = Some("2025-01-01T10:00:00Z".into());
    capture.constraint_end = Some("2025-01-01T12:00:00Z".into());
    insert_capture(&harness, &capture);

    let outcome = harness
        .service
        .schedule_capture_at(
            USER,
            request("win-1", ScheduleAction::Schedule),
            utc(2025, 1, 1, 9, 0),
        )
        .await
        .expect("window schedules");
    let commit = outcome.as_committed().expect("committed");

    assert_eq!(commit.chunks.len(), 1);
    assert_eq!(commit.chunks[0].start, "2025-01-01T10:00:00+00:00");
    assert_eq!(commit.chunks[0].end, "2025-01-01T11:00:00+00:00");
    assert!(!commit.chunks[0].late);

    let events = harness.calendar.snapshot();
    assert_eq!(events.len(), 1);
    assert!(events[0].summary.as_deref().unwrap_or_default().starts_with("[DG] "));
}

#[tokio::test]
async fn preferred_end_flush_with_window_end_is_accepted() {
    let harness = harness();
    let mut capture = base_capture("win-2", 60);
    capture.constraint_type = ConstraintKind::Window;
    capture.window_start = Some("2025-01-01T10:00:00Z".into());
    capture.window_end = Some("2025-01-01T12:00:00Z".into());
    insert_capture(&harness, &capture);

    let mut req = request("win-2", ScheduleAction::Schedule);
    req.preferred_start = Some("2025-01-01T11:00:00Z".into());
    req.preferred_end = Some("2025-01-01T12:00:00Z".into());

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, utc(2025, 1, 1, 9, 0))
        .await
        .expect("flush preferred accepted");
    let commit = outcome.as_committed().expect("committed");
    assert_eq!(commit.chunks[0].start, "2025-01-01T11:00:00+00:00");
    assert_eq!(commit.explanation, "按用户首选时间段完成排程");
}

#[tokio::test]
async fn tight_deadline_returns_conflict_then_late_placement_with_authorization() {
    let harness = harness();
    let mut capture = base_capture("dl-1", 60);
    capture.constraint_type = ConstraintKind::DeadlineTime;
    capture.constraint_time = Some("2025-01-01T09:30:00Z".into());
    insert_capture(&harness, &capture);

    let error = harness
        .service
        .schedule_capture_at(
            USER,
            request("dl-1", ScheduleAction::Schedule),
            utc(2025, 1, 1, 9, 0),
        )
        .await
        .expect_err("too tight for the deadline");
    assert_eq!(error.status(), 409);
    assert_eq!(
        error.conflict_reason(),
        Some(ConflictReason::SlotExceedsDeadline)
    );
    let payload = error.conflict_payload().expect("payload");
    assert_eq!(payload["reason"], "slot_exceeds_deadline");
    assert_eq!(payload["needed_minutes"], 60);
    assert!(payload["late_candidate"].is_object());

    // nothing was committed
    assert!(harness.calendar.snapshot().is_empty());
    assert_eq!(fetch_capture(&harness, "dl-1").status, CaptureStatus::Pending);

    let mut late_req = request("dl-1", ScheduleAction::Schedule);
    late_req.allow_late_placement = true;
    let outcome = harness
        .service
        .schedule_capture_at(USER, late_req, utc(2025, 1, 1, 9, 0))
        .await
        .expect("late placement authorized");
    let commit = outcome.as_committed().expect("committed");
    assert!(commit.chunks.iter().all(|chunk| chunk.late));
    assert_eq!(commit.chunks[0].start, "2025-01-01T09:30:00+00:00");
}

#[tokio::test]
async fn deadline_equal_to_now_is_elapsed() {
    let harness = harness();
    let now = utc(2025, 1, 1, 9, 0);
    let mut capture = base_capture("dl-2", 30);
    capture.constraint_type = ConstraintKind::DeadlineTime;
    capture.deadline_at = Some(iso(now));
    insert_capture(&harness, &capture);

    let error = harness
        .service
        .schedule_capture_at(USER, request("dl-2", ScheduleAction::Schedule), now)
        .await
        .expect_err("deadline at now is elapsed");
    assert_eq!(
        error.conflict_reason(),
        Some(ConflictReason::SlotExceedsDeadline)
    );
}

#[tokio::test]
async fn long_capture_cannot_fit_a_shrunken_day_window() {
    let harness = harness();
    let mut capture = base_capture("big-1", 480);
    capture.constraint_type = ConstraintKind::Window;
    capture.window_start = Some("2025-01-01T15:00:00Z".into());
    capture.window_end = Some("2025-01-01T22:00:00Z".into());
    insert_capture(&harness, &capture);

    let error = harness
        .service
        .schedule_capture_at(
            USER,
            request("big-1", ScheduleAction::Schedule),
            utc(2025, 1, 1, 9, 0),
        )
        .await
        .expect_err("480 minutes cannot fit 7 hours");
    assert_eq!(error.status(), 409);
    assert_eq!(
        error.conflict_reason(),
        Some(ConflictReason::SlotExceedsDeadline)
    );
}

#[tokio::test]
async fn overlap_admission_marks_prime_on_the_stronger_capture() {
    let harness = harness();
    let now = utc(2025, 5, 1, 8, 0);

    // B holds 10:00-10:30 already
    seed_scheduled(
        &harness,
        "cap-b",
        "evt-b",
        utc(2025, 5, 1, 10, 0),
        utc(2025, 5, 1, 10, 30),
        60,
    );

    let mut target = base_capture("cap-a", 60);
    target.importance = 5;
    target.urgency = Some(1.0);
    insert_capture(&harness, &target);

    let mut req = request("cap-a", ScheduleAction::Schedule);
    req.preferred_start = Some("2025-05-01T10:00:00Z".into());
    req.preferred_end = Some("2025-05-01T10:30:00Z".into());
    req.allow_overlap = true;

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, now)
        .await
        .expect("overlap admitted");
    let commit = outcome.as_committed().expect("committed");

    let overlap = commit.overlap.as_ref().expect("overlap report");
    assert_eq!(overlap.minutes, 30);
    assert!(overlap.participants.contains(&"cap-a".to_string()));
    assert!(overlap.participants.contains(&"cap-b".to_string()));

    // the stronger target keeps prime
    assert!(commit.chunks[0].overlapped);
    assert!(commit.chunks[0].prime);

    let weaker_chunks = fetch_chunks(&harness, "cap-b");
    assert!(weaker_chunks[0].overlapped);
    assert!(!weaker_chunks[0].prime);
}

#[tokio::test]
async fn preemption_displaces_and_reschedules_the_weaker_blocker() {
    let harness = harness();
    let now = utc(2025, 5, 1, 8, 0);

    seed_scheduled(
        &harness,
        "blocker",
        "evt-blocker",
        utc(2025, 5, 1, 10, 0),
        utc(2025, 5, 1, 11, 0),
        60,
    );

    let mut target = base_capture("target", 30);
    target.importance = 5;
    target.urgency = Some(1.0);
    target.impact = Some(1.0);
    insert_capture(&harness, &target);

    let mut req = request("target", ScheduleAction::Schedule);
    req.preferred_start = Some("2025-05-01T10:00:00Z".into());
    req.preferred_end = Some("2025-05-01T10:30:00Z".into());
    req.allow_rebalance = true;

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, now)
        .await
        .expect("preemption succeeds");
    let commit = outcome.as_committed().expect("committed");

    assert_eq!(commit.chunks[0].start, "2025-05-01T10:00:00+00:00");
    assert_eq!(commit.plan_summary, "scheduled:1 moved:1 unscheduled:1");

    let target_after = fetch_capture(&harness, "target");
    assert_eq!(target_after.status, CaptureStatus::Scheduled);

    // the blocker moved to the next available slot and its churn counter grew
    let blocker_after = fetch_capture(&harness, "blocker");
    assert_eq!(blocker_after.status, CaptureStatus::Scheduled);
    assert_eq!(blocker_after.reschedule_count, 1);
    assert_ne!(
        blocker_after.planned_start.as_deref(),
        Some("2025-05-01T10:00:00+00:00")
    );

    // audit order: unscheduled before the target commit
    let plan_id = target_after.plan_id.expect("plan id");
    let actions = harness
        .db
        .with_connection(|conn| PlanRepository::list_actions(conn, &plan_id))
        .expect("actions");
    let kinds: Vec<String> = actions.iter().map(|a| a.action_type.clone()).collect();
    assert_eq!(kinds, vec!["unscheduled", "scheduled", "rescheduled"]);
    assert_eq!(actions[0].capture_id, "blocker");
    assert_eq!(actions[1].capture_id, "target");

    let run = harness
        .db
        .with_connection(|conn| PlanRepository::find_run(conn, &plan_id))
        .expect("run query")
        .expect("run exists");
    assert_eq!(run.summary.as_deref(), Some("scheduled:1 moved:1 unscheduled:1"));
}

#[tokio::test]
async fn stability_window_turns_preemption_into_a_decision() {
    let harness = harness();
    let now = utc(2025, 5, 1, 9, 50);

    // blocker starts in ten minutes: inside the stability window
    seed_scheduled(
        &harness,
        "blocker",
        "evt-blocker",
        utc(2025, 5, 1, 10, 0),
        utc(2025, 5, 1, 11, 0),
        60,
    );

    let mut target = base_capture("target", 30);
    target.importance = 5;
    target.urgency = Some(1.0);
    insert_capture(&harness, &target);

    let mut req = request("target", ScheduleAction::Schedule);
    req.preferred_start = Some("2025-05-01T10:00:00Z".into());
    req.preferred_end = Some("2025-05-01T10:30:00Z".into());
    req.allow_rebalance = true;

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, now)
        .await
        .expect("decision returned");
    let decision = outcome.as_decision().expect("decision outcome");
    assert_eq!(decision.decision.decision_type, "preferred_conflict");
    assert!(!decision.decision.message.is_empty());
    assert_eq!(decision.decision.conflicts.owned.len(), 1);
    assert!(decision.decision.suggestion.is_some());

    // nothing persisted: blocker untouched, target still pending
    assert_eq!(harness.calendar.snapshot().len(), 1);
    assert_eq!(
        fetch_capture(&harness, "blocker").status,
        CaptureStatus::Scheduled
    );
    assert_eq!(
        fetch_capture(&harness, "target").status,
        CaptureStatus::Pending
    );
    assert_eq!(harness.calendar.deletes_performed(), 0);
}

#[tokio::test]
async fn external_conflict_is_never_preempted() {
    let harness = harness();
    let now = utc(2025, 5, 1, 8, 0);
    harness.calendar.seed(external_event(
        "meeting",
        utc(2025, 5, 1, 10, 0),
        utc(2025, 5, 1, 11, 0),
    ));

    let target = base_capture("target", 60);
    insert_capture(&harness, &target);

    let mut req = request("target", ScheduleAction::Schedule);
    req.preferred_start = Some("2025-05-01T10:00:00Z".into());
    req.allow_rebalance = true;
    req.allow_overlap = true;

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, now)
        .await
        .expect("decision returned");
    let decision = outcome.as_decision().expect("decision outcome");
    assert_eq!(decision.decision.conflicts.external.len(), 1);
    assert_eq!(harness.calendar.snapshot().len(), 1);
}

#[tokio::test]
async fn reschedule_releases_the_old_event_before_searching() {
    let harness = harness();
    let now = utc(2025, 5, 1, 8, 0);
    seed_scheduled(
        &harness,
        "move-me",
        "evt-old",
        utc(2025, 5, 1, 10, 0),
        utc(2025, 5, 1, 11, 0),
        60,
    );

    let mut req = request("move-me", ScheduleAction::Reschedule);
    req.preferred_start = Some("2025-05-01T14:00:00Z".into());

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, now)
        .await
        .expect("reschedule succeeds");
    let commit = outcome.as_committed().expect("committed");
    assert_eq!(commit.chunks[0].start, "2025-05-01T14:00:00+00:00");
    assert_eq!(commit.plan_summary, "scheduled:0 moved:1 unscheduled:0");

    let events = harness.calendar.snapshot();
    assert_eq!(events.len(), 1);
    assert_ne!(events[0].id, "evt-old");

    let stored = fetch_capture(&harness, "move-me");
    assert_eq!(stored.planned_start.as_deref(), Some("2025-05-01T14:00:00+00:00"));
}

#[tokio::test]
async fn frozen_capture_refuses_any_reschedule() {
    let harness = harness();
    let now = utc(2025, 5, 1, 8, 0);
    let mut capture = base_capture("frozen", 30);
    capture.freeze_until = Some(iso(utc(2025, 5, 2, 0, 0)));
    insert_capture(&harness, &capture);

    let error = harness
        .service
        .schedule_capture_at(USER, request("frozen", ScheduleAction::Schedule), now)
        .await
        .expect_err("frozen capture");
    assert_eq!(error.status(), 409);
    assert_eq!(error.conflict_reason(), Some(ConflictReason::Frozen));
}

#[tokio::test]
async fn complete_action_clears_the_calendar_event() {
    let harness = harness();
    let now = utc(2025, 5, 1, 12, 0);
    seed_scheduled(
        &harness,
        "done-1",
        "evt-done",
        utc(2025, 5, 1, 10, 0),
        utc(2025, 5, 1, 11, 0),
        60,
    );

    let outcome = harness
        .service
        .schedule_capture_at(USER, request("done-1", ScheduleAction::Complete), now)
        .await
        .expect("complete succeeds");
    let commit = outcome.as_committed().expect("committed");
    assert!(commit.chunks.is_empty());

    let stored = fetch_capture(&harness, "done-1");
    assert_eq!(stored.status, CaptureStatus::Completed);
    assert!(stored.calendar_event_id.is_none());
    assert!(harness.calendar.snapshot().is_empty());
    assert!(fetch_chunks(&harness, "done-1").is_empty());
}

#[tokio::test]
async fn foreign_capture_is_forbidden_and_missing_capture_is_not_found() {
    let harness = harness();
    let capture = base_capture("mine", 30);
    insert_capture(&harness, &capture);

    let error = harness
        .service
        .schedule_capture_at(
            "somebody-else",
            request("mine", ScheduleAction::Schedule),
            utc(2025, 5, 1, 8, 0),
        )
        .await
        .expect_err("foreign capture");
    assert_eq!(error.status(), 403);

    let error = harness
        .service
        .schedule_capture_at(
            USER,
            request("ghost", ScheduleAction::Schedule),
            utc(2025, 5, 1, 8, 0),
        )
        .await
        .expect_err("missing capture");
    assert!(matches!(error, ScheduleError::NotFound));
}

#[tokio::test]
async fn committed_slot_becomes_busy_for_the_next_capture() {
    let harness = harness();
    let now = utc(2025, 5, 1, 7, 0);

    let first = base_capture("first", 60);
    insert_capture(&harness, &first);
    let second = base_capture("second", 60);
    insert_capture(&harness, &second);

    let first_outcome = harness
        .service
        .schedule_capture_at(USER, request("first", ScheduleAction::Schedule), now)
        .await
        .expect("first schedules");
    let first_commit = first_outcome.as_committed().expect("committed");
    assert_eq!(first_commit.chunks[0].start, "2025-05-01T08:00:00+00:00");

    let second_outcome = harness
        .service
        .schedule_capture_at(USER, request("second", ScheduleAction::Schedule), now)
        .await
        .expect("second schedules");
    let second_commit = second_outcome.as_committed().expect("committed");
    // first slot plus its buffer is busy now
    assert_eq!(second_commit.chunks[0].start, "2025-05-01T09:15:00+00:00");
}

#[tokio::test]
async fn hard_deadline_splits_into_chunks_around_existing_events() {
    let harness = harness();
    let now = utc(2025, 5, 1, 8, 0);
    harness.calendar.seed(external_event(
        "standup",
        utc(2025, 5, 1, 9, 0),
        utc(2025, 5, 1, 10, 0),
    ));

    let mut capture = base_capture("split-1", 90);
    capture.constraint_type = ConstraintKind::DeadlineTime;
    capture.constraint_time = Some("2025-05-01T12:00:00Z".into());
    capture.min_chunk_minutes = Some(30);
    capture.max_splits = Some(2);
    insert_capture(&harness, &capture);

    let outcome = harness
        .service
        .schedule_capture_at(USER, request("split-1", ScheduleAction::Schedule), now)
        .await
        .expect("chunked placement");
    let commit = outcome.as_committed().expect("committed");

    // either a single pre-deadline slot or chunks, but always inside it
    assert!(!commit.chunks.is_empty());
    for chunk in &commit.chunks {
        assert!(chunk.end <= "2025-05-01T12:00:00+00:00".to_string());
    }

    let stored = fetch_capture(&harness, "split-1");
    assert_eq!(stored.status, CaptureStatus::Scheduled);
}

#[tokio::test]
async fn band_preference_steers_flexible_captures() {
    let harness = harness();
    let now = utc(2025, 5, 1, 7, 0);
    let mut capture = base_capture("evening-1", 60);
    capture.time_pref_time_of_day = Some(TimeOfDayBand::Evening);
    insert_capture(&harness, &capture);

    let outcome = harness
        .service
        .schedule_capture_at(USER, request("evening-1", ScheduleAction::Schedule), now)
        .await
        .expect("band schedule");
    let commit = outcome.as_committed().expect("committed");
    assert_eq!(commit.chunks[0].start, "2025-05-01T18:00:00+00:00");
}

#[tokio::test]
async fn hard_start_capture_never_joins_an_overlap() {
    let harness = harness();
    let now = utc(2025, 5, 1, 8, 0);
    seed_scheduled(
        &harness,
        "cap-b",
        "evt-b",
        utc(2025, 5, 1, 10, 0),
        utc(2025, 5, 1, 10, 30),
        60,
    );

    let mut target = base_capture("cap-a", 60);
    target.importance = 5;
    target.start_flexibility = StartFlexibility::Hard;
    insert_capture(&harness, &target);

    let mut req = request("cap-a", ScheduleAction::Schedule);
    req.preferred_start = Some("2025-05-01T10:00:00Z".into());
    req.preferred_end = Some("2025-05-01T10:30:00Z".into());
    req.allow_overlap = true;

    let outcome = harness
        .service
        .schedule_capture_at(USER, req, now)
        .await
        .expect("decision for hard-start");
    assert!(outcome.as_decision().is_some());
    assert!(fetch_chunks(&harness, "cap-b")[0].overlapped == false);
}

#[tokio::test]
async fn plan_action_snapshots_capture_before_and_after() {
    let harness = harness();
    let now = utc(2025, 5, 1, 7, 0);
    let capture = base_capture("audit-1", 30);
    insert_capture(&harness, &capture);

    harness
        .service
        .schedule_capture_at(USER, request("audit-1", ScheduleAction::Schedule), now)
        .await
        .expect("schedules");

    let stored = fetch_capture(&harness, "audit-1");
    let plan_id = stored.plan_id.clone().expect("plan id");
    let actions = harness
        .db
        .with_connection(|conn| PlanRepository::list_actions(conn, &plan_id))
        .expect("actions");
    assert_eq!(actions.len(), 1);
    let action = actions[0].clone().into_record().expect("record");
    assert_eq!(action.action_type, PlanActionKind::Scheduled);
    assert_eq!(action.prev.status, CaptureStatus::Pending);
    assert!(action.prev.calendar_event_id.is_none());
    assert_eq!(action.next.status, CaptureStatus::Scheduled);
    assert_eq!(action.next.calendar_event_id, stored.calendar_event_id);
}
