//! Integration tests for the task matrix engine.
//!
//! Drives a `SyncCoordinator` over the in-memory and local-file backends
//! with a hand-driven clock: classification scenarios, moves, reorder,
//! bulk debounce, echo suppression, delete history, and recovery from
//! failed writes.
//!
//! Verification command: `cargo test --test matrix_sync`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use eisen::backend::local::LocalBackend;
use eisen::backend::memory::MemoryBackend;
use eisen::backend::{Backend, PersistenceBackend};
use eisen::clock::ManualClock;
use eisen::history::diff;
use eisen::matrix::{Quadrant, classify};
use eisen::sync::{
    PersistOutcome, SnapshotOutcome, SyncConfig, SyncCoordinator, SyncStatus, TaskDraft, TaskError,
    TaskPatch,
};
use eisen_proto::doc::DocPath;
use eisen_proto::history::{ChangeValue, HistoryAction};
use eisen_proto::task::{Schedule, Task, TaskId, TaskStatus};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

const ACTOR: &str = "local-user";
const START_MS: u64 = 1_700_000_000_000;

type MemorySync = SyncCoordinator<MemoryBackend, ManualClock>;

/// Creates a coordinator over a fresh memory backend.
fn make_sync() -> (Arc<MemorySync>, MemoryBackend, ManualClock) {
    let backend = MemoryBackend::new();
    let clock = ManualClock::new(START_MS);
    let sync = Arc::new(SyncCoordinator::new(
        backend.clone(),
        clock.clone(),
        ACTOR,
        SyncConfig::default(),
    ));
    (sync, backend, clock)
}

/// Creates a task through the coordinator and waits for it to persist.
async fn add(sync: &Arc<MemorySync>, title: &str, priority: u8, tags: &[&str]) -> Task {
    let draft = TaskDraft {
        priority: Some(priority),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
        ..TaskDraft::titled(title)
    };
    let (task, outcome) = sync.create_task(draft).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Acked);
    task
}

fn titles(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.title.as_str()).collect()
}

/// A task as another device would have stored it.
fn stored_task(id: &str, title: &str) -> Task {
    Task {
        id: TaskId::from(id),
        title: title.to_string(),
        description: String::new(),
        priority: 4,
        tags: vec![],
        status: TaskStatus::Todo,
        scheduled_for: Schedule::Today,
        due_date: None,
        created_at: 1,
        updated_at: 1,
        completed_at: None,
    }
}

fn id_set(tasks: &[Task]) -> Vec<TaskId> {
    let mut ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
    ids.sort();
    ids
}

// ===========================================================================
// Classification scenarios
// ===========================================================================

#[tokio::test]
async fn urgent_important_task_lands_in_do() {
    let (sync, _, _) = make_sync();
    let task = add(&sync, "Fix outage", 1, &["important"]).await;
    assert_eq!(classify(&task), Quadrant::UrgentImportant);
    assert_eq!(classify(&task).as_id(), "urgent-important");

    let groups = sync.list_by_quadrant();
    assert_eq!(titles(&groups[&Quadrant::UrgentImportant]), vec!["Fix outage"]);
}

#[tokio::test]
async fn plain_priority_three_lands_in_eliminate() {
    let (sync, _, _) = make_sync();
    let task = add(&sync, "Sort inbox", 3, &[]).await;
    assert_eq!(classify(&task).as_id(), "not-urgent-not-important");
}

#[tokio::test]
async fn moving_to_schedule_adds_important_and_keeps_priority() {
    let (sync, _, _) = make_sync();
    let task = add(&sync, "Plan quarter", 3, &[]).await;
    let (moved, outcome) = sync
        .move_task(&task.id, Quadrant::NotUrgentImportant)
        .unwrap()
        .settled()
        .await;
    assert_eq!(outcome, PersistOutcome::Acked);
    assert_eq!(moved.priority, 3);
    assert_eq!(moved.tags, vec!["important".to_string()]);
    assert_eq!(classify(&moved), Quadrant::NotUrgentImportant);

    let history = sync.get_history(Some(&task.id)).await.unwrap();
    let changes = history[0].changes.clone().unwrap();
    let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
    assert_eq!(fields, vec!["tags", "Quadrant"]);
    assert_eq!(changes[1].old_value, ChangeValue::Text("Eliminate".to_string()));
    assert_eq!(changes[1].new_value, ChangeValue::Text("Schedule".to_string()));
}

#[tokio::test]
async fn title_only_diff_has_single_change() {
    let (sync, _, _) = make_sync();
    let task = add(&sync, "A", 4, &[]).await;
    let mut renamed = task.clone();
    renamed.title = "B".to_string();
    let changes = diff(&task, &renamed);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].field, "title");
    assert_eq!(changes[0].old_value, ChangeValue::Text("A".to_string()));
    assert_eq!(changes[0].new_value, ChangeValue::Text("B".to_string()));
    assert!(changes.iter().all(|c| c.field != "status"));
}

#[tokio::test]
async fn delete_emits_one_entry_and_hides_task() {
    let (sync, backend, _) = make_sync();
    let keep = add(&sync, "keep", 4, &[]).await;
    let gone = add(&sync, "gone", 1, &["important"]).await;

    let (_, outcome) = sync.delete_task(&gone.id).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Acked);

    let entries: Vec<_> = sync
        .get_history(Some(&gone.id))
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == HistoryAction::Delete)
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].changes, None);
    assert_eq!(entries[0].ticket_data, gone);

    let listed: Vec<Task> = sync.list_by_quadrant().into_values().flatten().collect();
    assert_eq!(listed, vec![keep.clone()]);
    assert_eq!(backend.tasks(ACTOR), vec![keep]);
}

// ===========================================================================
// Move mapping
// ===========================================================================

#[tokio::test]
async fn move_touches_only_mapped_fields_of_one_task() {
    let (sync, _, clock) = make_sync();
    let other = add(&sync, "other", 4, &["home"]).await;
    let draft = TaskDraft {
        description: "details".to_string(),
        priority: Some(4),
        tags: vec!["work".to_string()],
        due_date: Some(START_MS + 86_400_000),
        ..TaskDraft::titled("target")
    };
    let (task, _) = sync.create_task(draft).unwrap().settled().await;
    clock.advance_ms(10);

    let (moved, _) = sync
        .move_task(&task.id, Quadrant::UrgentImportant)
        .unwrap()
        .settled()
        .await;
    assert_eq!(moved.priority, 1);
    assert_eq!(moved.tags, vec!["work".to_string(), "important".to_string()]);

    let mut expected = task.clone();
    expected.priority = 1;
    expected.tags.push("important".to_string());
    expected.updated_at = START_MS + 10;
    assert_eq!(moved, expected);
    assert_eq!(sync.task(&other.id), Some(other));
}

#[tokio::test]
async fn move_to_delegate_drops_important() {
    let (sync, _, _) = make_sync();
    let task = add(&sync, "x", 1, &["important", "work"]).await;
    let (moved, _) = sync
        .move_task(&task.id, Quadrant::UrgentNotImportant)
        .unwrap()
        .settled()
        .await;
    assert_eq!(moved.priority, 2);
    assert_eq!(moved.tags, vec!["work".to_string()]);
}

#[tokio::test]
async fn move_to_backlog_and_out_again() {
    let (sync, _, _) = make_sync();
    let task = add(&sync, "later", 2, &[]).await;
    let (parked, _) = sync.move_task(&task.id, Quadrant::Backlog).unwrap().settled().await;
    assert_eq!(parked.priority, 5);
    assert_eq!(parked.scheduled_for, Schedule::Tomorrow);
    assert_eq!(classify(&parked), Quadrant::Backlog);

    let (back, _) = sync
        .move_task(&task.id, Quadrant::NotUrgentNotImportant)
        .unwrap()
        .settled()
        .await;
    assert_eq!(back.scheduled_for, Schedule::Today);
    assert_eq!(classify(&back), Quadrant::NotUrgentNotImportant);
}

#[tokio::test]
async fn move_is_visible_before_write_completes() {
    let (sync, backend, _) = make_sync();
    let task = add(&sync, "slow", 4, &[]).await;
    backend.set_latency(Duration::from_millis(100));

    let mutation = sync.move_task(&task.id, Quadrant::UrgentImportant).unwrap();
    assert_eq!(classify(&sync.task(&task.id).unwrap()), Quadrant::UrgentImportant);
    assert_eq!(sync.sync_status(&task.id), SyncStatus::Pending);
    assert_eq!(backend.tasks(ACTOR)[0].priority, 4);

    assert_eq!(mutation.persist.wait().await, PersistOutcome::Acked);
    assert_eq!(backend.tasks(ACTOR)[0].priority, 1);
    assert_eq!(sync.sync_status(&task.id), SyncStatus::Synced);
}

#[tokio::test]
async fn latest_local_value_wins_over_slow_earlier_write() {
    let (sync, backend, _) = make_sync();
    let task = add(&sync, "race", 4, &[]).await;
    backend.set_latency(Duration::from_millis(50));

    let first = sync.move_task(&task.id, Quadrant::UrgentImportant).unwrap();
    let second = sync.move_task(&task.id, Quadrant::Backlog).unwrap();
    assert_eq!(classify(&sync.task(&task.id).unwrap()), Quadrant::Backlog);

    first.persist.wait().await;
    assert_eq!(classify(&sync.task(&task.id).unwrap()), Quadrant::Backlog);
    second.persist.wait().await;
    assert_eq!(classify(&sync.task(&task.id).unwrap()), Quadrant::Backlog);
}

// ===========================================================================
// Reorder and bulk update
// ===========================================================================

#[tokio::test]
async fn reorder_permutes_listed_tasks_only() {
    let (sync, backend, _) = make_sync();
    add(&sync, "a", 4, &[]).await;
    let b = add(&sync, "b", 4, &[]).await;
    add(&sync, "c", 4, &[]).await;
    let d = add(&sync, "d", 4, &[]).await;
    let before = sync.tasks();

    let mutation = sync.reorder(&[d.id.clone(), b.id.clone()]).unwrap();
    assert_eq!(titles(&sync.tasks()), vec!["a", "d", "c", "b"]);
    assert_eq!(mutation.persist.wait().await, PersistOutcome::Acked);

    let after = sync.tasks();
    assert_eq!(titles(&after), vec!["a", "d", "c", "b"]);
    assert_eq!(id_set(&before), id_set(&after));
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["a", "d", "c", "b"]);

    // Only order changed, so no new history.
    assert_eq!(backend.history(ACTOR).len(), 4);
}

#[tokio::test]
async fn reorder_rejects_unknown_ids_without_change() {
    let (sync, backend, _) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;
    let writes = backend.write_count();
    assert!(sync.reorder(&[a.id.clone(), TaskId::from("ghost")]).is_err());
    assert!(sync.reorder(&[a.id.clone(), a.id.clone()]).is_err());
    assert_eq!(backend.write_count(), writes);
    assert_eq!(titles(&sync.tasks()), vec!["a"]);
}

#[tokio::test]
async fn bulk_updates_200ms_apart_write_once() {
    let (sync, backend, clock) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;
    let b = add(&sync, "b", 4, &[]).await;
    let writes_before = backend.write_count();
    let history_before = backend.history(ACTOR).len();

    let mut first_input = vec![b.clone(), a.clone()];
    first_input[0].title = "b2".to_string();
    let first = sync.bulk_update(first_input).unwrap();
    assert!(!first.persist.is_skipped());

    clock.advance_ms(200);
    let mut second_input = vec![a.clone(), b.clone()];
    second_input[1].title = "b3".to_string();
    let second = sync.bulk_update(second_input.clone()).unwrap();
    assert!(second.persist.is_skipped());
    assert_eq!(second.value, second_input);

    assert_eq!(first.persist.wait().await, PersistOutcome::Acked);
    assert_eq!(second.persist.wait().await, PersistOutcome::Skipped);
    assert_eq!(backend.write_count(), writes_before + 1);
    assert_eq!(backend.history(ACTOR).len(), history_before + 1);
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["b2", "a"]);
}

#[tokio::test]
async fn bulk_update_after_window_writes_again() {
    let (sync, backend, clock) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;
    sync.bulk_update(vec![a.clone()]).unwrap().persist.wait().await;
    let writes = backend.write_count();

    clock.advance_ms(1000);
    let outcome = sync.bulk_update(vec![a]).unwrap().persist.wait().await;
    assert_eq!(outcome, PersistOutcome::Acked);
    assert_eq!(backend.write_count(), writes + 1);
}

#[tokio::test]
async fn bulk_update_drops_missing_and_adds_new() {
    let (sync, backend, clock) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;
    let b = add(&sync, "b", 4, &[]).await;
    clock.advance_ms(5);

    let mut fresh = a.clone();
    fresh.id = TaskId::from("fresh");
    fresh.title = "fresh".to_string();
    let (value, outcome) = sync.bulk_update(vec![fresh, b.clone()]).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Acked);
    assert_eq!(value[0].created_at, START_MS + 5);
    assert_eq!(titles(&sync.tasks()), vec!["fresh", "b"]);
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["fresh", "b"]);
    assert!(sync.task(&a.id).is_none());
}

#[tokio::test]
async fn coordinators_do_not_share_debounce() {
    let (one, _, _) = make_sync();
    let (two, _, _) = make_sync();
    assert!(!one.bulk_update(vec![]).unwrap().persist.is_skipped());
    assert!(!two.bulk_update(vec![]).unwrap().persist.is_skipped());
}

#[tokio::test]
async fn reorder_with_invalid_stored_task_changes_nothing() {
    let (sync, backend, _) = make_sync();
    let outcome = sync.handle_remote_snapshot(vec![stored_task("x", ""), stored_task("y", "y")]);
    assert_eq!(outcome, SnapshotOutcome::Applied);
    let before = sync.tasks();
    let writes = backend.write_count();

    let err = sync
        .reorder(&[TaskId::from("y"), TaskId::from("x")])
        .unwrap_err();
    assert_eq!(err, TaskError::TitleEmpty);
    assert_eq!(sync.tasks(), before);
    assert_eq!(backend.write_count(), writes);
}

#[tokio::test]
async fn bulk_status_flip_records_complete_and_reopen() {
    let (sync, backend, clock) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;

    let mut done = a.clone();
    done.status = TaskStatus::Completed;
    done.completed_at = Some(START_MS);
    sync.bulk_update(vec![done.clone()]).unwrap().settled().await;

    clock.advance_ms(1000);
    let mut reopened = done;
    reopened.status = TaskStatus::Todo;
    reopened.completed_at = None;
    sync.bulk_update(vec![reopened]).unwrap().settled().await;

    let actions: Vec<HistoryAction> = backend.history(ACTOR).iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![HistoryAction::Create, HistoryAction::Complete, HistoryAction::Reopen]
    );
}

// ===========================================================================
// Echo suppression
// ===========================================================================

#[tokio::test]
async fn snapshot_500ms_after_write_is_discarded() {
    let (sync, _, clock) = make_sync();
    let task = add(&sync, "mine", 1, &["important"]).await;
    let view = sync.tasks();

    clock.advance_ms(500);
    let mut stale = task.clone();
    stale.priority = 4;
    assert_eq!(sync.handle_remote_snapshot(vec![stale]), SnapshotOutcome::Suppressed);
    assert_eq!(sync.tasks(), view);
}

#[tokio::test]
async fn snapshot_1500ms_after_write_is_merged() {
    let (sync, _, clock) = make_sync();
    let task = add(&sync, "mine", 1, &["important"]).await;

    clock.advance_ms(1500);
    let mut remote = task.clone();
    remote.title = "edited elsewhere".to_string();
    assert_eq!(sync.handle_remote_snapshot(vec![remote.clone()]), SnapshotOutcome::Applied);
    assert_eq!(sync.tasks(), vec![remote]);
}

#[tokio::test]
async fn subscription_feed_goes_through_echo_window() {
    let (sync, backend, clock) = make_sync();
    let feed = sync.spawn_subscription().await.unwrap();
    let task = add(&sync, "mine", 4, &[]).await;

    clock.advance_ms(1500);
    let mut remote = task.clone();
    remote.title = "from another device".to_string();
    backend.inject_remote_tasks(ACTOR, vec![remote.clone()]);

    for _ in 0..50 {
        if sync.tasks() == vec![remote.clone()] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sync.tasks(), vec![remote]);
    feed.abort();
}

#[tokio::test]
async fn pending_value_survives_remote_snapshot() {
    let (sync, backend, clock) = make_sync();
    let task = add(&sync, "t", 4, &[]).await;
    clock.advance_ms(5000);
    backend.set_latency(Duration::from_millis(100));

    let mutation = sync.move_task(&task.id, Quadrant::UrgentImportant).unwrap();
    assert_eq!(sync.handle_remote_snapshot(vec![task.clone()]), SnapshotOutcome::Applied);
    assert_eq!(sync.task(&task.id).unwrap().priority, 1);
    mutation.persist.wait().await;
}

// ===========================================================================
// Failures and retries
// ===========================================================================

#[tokio::test]
async fn failed_write_keeps_change_and_retries_later() {
    let (sync, backend, clock) = make_sync();
    let task = add(&sync, "t", 4, &[]).await;
    backend.set_failing(true);

    let patch = TaskPatch {
        title: Some("offline edit".to_string()),
        ..TaskPatch::default()
    };
    let (edited, outcome) = sync.update_task(&task.id, patch).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Failed);
    assert_eq!(sync.task(&task.id), Some(edited.clone()));
    assert_eq!(sync.sync_status(&task.id), SyncStatus::Failed);
    assert_eq!(backend.history(ACTOR).len(), 1);

    backend.set_failing(false);
    clock.advance_ms(2000);
    let report = sync.flush_retries().await;
    assert_eq!(report.flushed, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(backend.tasks(ACTOR), vec![edited]);
    assert_eq!(backend.history(ACTOR).len(), 2);
    assert_eq!(sync.sync_status(&task.id), SyncStatus::Synced);
}

#[tokio::test]
async fn failed_delete_keeps_task_hidden_until_retry() {
    let (sync, backend, clock) = make_sync();
    let task = add(&sync, "t", 4, &[]).await;
    backend.set_failing(true);
    let (_, outcome) = sync.delete_task(&task.id).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Failed);
    assert!(sync.tasks().is_empty());
    assert_eq!(backend.tasks(ACTOR).len(), 1);

    backend.set_failing(false);
    clock.advance_ms(2000);
    sync.flush_retries().await;
    assert!(backend.tasks(ACTOR).is_empty());
}

#[tokio::test]
async fn failed_reorder_retries_whole_list() {
    let (sync, backend, clock) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;
    add(&sync, "b", 4, &[]).await;
    let c = add(&sync, "c", 4, &[]).await;
    backend.set_failing(true);

    let (_, outcome) = sync.reorder(&[c.id.clone(), a.id.clone()]).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Failed);
    assert_eq!(titles(&sync.tasks()), vec!["c", "b", "a"]);
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["a", "b", "c"]);

    backend.set_failing(false);
    clock.advance_ms(2000);
    let report = sync.flush_retries().await;
    assert_eq!(report.remaining, 0);
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["c", "b", "a"]);
    assert_eq!(titles(&sync.tasks()), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn retried_list_keeps_task_created_meanwhile() {
    let (sync, backend, clock) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;
    let b = add(&sync, "b", 4, &[]).await;
    backend.set_failing(true);
    let (_, outcome) = sync.reorder(&[b.id.clone(), a.id.clone()]).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Failed);

    backend.set_failing(false);
    add(&sync, "c", 4, &[]).await;
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["a", "b", "c"]);

    clock.advance_ms(2000);
    sync.flush_retries().await;
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["b", "a", "c"]);
}

#[tokio::test]
async fn failed_bulk_edit_survives_later_debounced_reorder() {
    let (sync, backend, clock) = make_sync();
    let a = add(&sync, "a", 4, &[]).await;
    let b = add(&sync, "b", 4, &[]).await;
    backend.set_failing(true);

    let mut renamed = a.clone();
    renamed.title = "a-renamed".to_string();
    let (_, outcome) = sync
        .bulk_update(vec![renamed, b.clone()])
        .unwrap()
        .settled()
        .await;
    assert_eq!(outcome, PersistOutcome::Failed);

    // Inside the debounce window: the new order is only local.
    clock.advance_ms(200);
    let reorder = sync.reorder(&[b.id.clone(), a.id.clone()]).unwrap();
    assert!(reorder.persist.is_skipped());

    backend.set_failing(false);
    clock.advance_ms(2000);
    let report = sync.flush_retries().await;
    assert_eq!(report.remaining, 0);

    let stored = backend.tasks(ACTOR);
    let stored_a = stored.iter().find(|t| t.id == a.id).unwrap();
    assert_eq!(stored_a.title, "a-renamed");
    assert_eq!(stored.len(), 2);
    assert_eq!(sync.sync_status(&a.id), SyncStatus::Synced);
    assert_eq!(titles(&sync.tasks()), vec!["b", "a-renamed"]);

    let actions: Vec<HistoryAction> = backend.history(ACTOR).iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![HistoryAction::Create, HistoryAction::Create, HistoryAction::Update]
    );

    // A later snapshot of the store does not undo the edit.
    clock.advance_ms(5000);
    sync.handle_remote_snapshot(backend.tasks(ACTOR));
    assert_eq!(sync.task(&a.id).unwrap().title, "a-renamed");
}

#[tokio::test]
async fn retry_task_flushes_in_background() {
    let backend = MemoryBackend::new();
    let clock = ManualClock::new(START_MS);
    let config = SyncConfig {
        retry_interval_ms: 20,
        ..SyncConfig::default()
    };
    let sync = Arc::new(SyncCoordinator::new(backend.clone(), clock.clone(), ACTOR, config));
    backend.set_failing(true);
    sync.create_task(TaskDraft::titled("queued")).unwrap().persist.wait().await;
    assert_eq!(sync.retry_queue_len(), 1);

    backend.set_failing(false);
    clock.advance_ms(20);
    let retry = sync.spawn_retry_task();
    for _ in 0..50 {
        if sync.retry_queue_len() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    retry.abort();
    assert_eq!(sync.retry_queue_len(), 0);
    assert_eq!(titles(&backend.tasks(ACTOR)), vec!["queued"]);
}

// ===========================================================================
// Local file backend through the coordinator
// ===========================================================================

#[tokio::test]
async fn local_file_round_trip_through_coordinator() {
    let dir = std::env::temp_dir().join(format!("eisen-matrix-sync-{}", uuid::Uuid::now_v7()));
    let clock = ManualClock::new(START_MS);
    let task_id = {
        let backend = Backend::Local(LocalBackend::open(&dir, "tasks").await.unwrap());
        let sync = Arc::new(SyncCoordinator::new(backend, clock.clone(), ACTOR, SyncConfig::default()));
        let draft = TaskDraft {
            priority: Some(1),
            tags: vec!["important".to_string()],
            ..TaskDraft::titled("persisted")
        };
        let (task, outcome) = sync.create_task(draft).unwrap().settled().await;
        assert_eq!(outcome, PersistOutcome::Acked);
        task.id
    };

    let backend = Backend::Local(LocalBackend::open(&dir, "tasks").await.unwrap());
    assert!(backend.get(&DocPath::task(ACTOR, &task_id)).await.unwrap().is_some());
    let sync = Arc::new(SyncCoordinator::new(backend, clock, ACTOR, SyncConfig::default()));
    assert_eq!(sync.load().await.unwrap(), 1);
    assert_eq!(sync.list_by_quadrant()[&Quadrant::UrgentImportant].len(), 1);
    assert_eq!(sync.get_history(Some(&task_id)).await.unwrap().len(), 1);
}
