//! Integration tests for the remote backend against a real store server.
//!
//! Each test starts an in-process `eisen-store` server on an ephemeral
//! port and talks to it over WebSocket: document round trips, atomic
//! batches, actor namespacing, pushed snapshots, and two coordinators
//! sharing one actor's tasks.
//!
//! Verification command: `cargo test --test remote_backend`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use eisen::backend::remote::RemoteBackend;
use eisen::backend::{Backend, BackendError, BackendKind, PersistenceBackend};
use eisen::clock::SystemClock;
use eisen::identity::{BootstrapConfig, Identity, StaticIdentity, bootstrap};
use eisen::matrix::Quadrant;
use eisen::sync::{PersistOutcome, SyncConfig, SyncCoordinator, TaskDraft};
use eisen_proto::doc::{DocPath, Document, WriteBatch};
use eisen_proto::history::{HistoryAction, HistoryEntry};
use eisen_proto::task::{Schedule, Task, TaskId, TaskStatus};
use eisen_store::server::{StoreState, start_server_with_state};

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

const TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a store server and returns its WebSocket URL and state.
async fn start_store() -> (String, Arc<StoreState>) {
    let state = Arc::new(StoreState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("start store server");
    (format!("ws://{addr}/ws"), state)
}

async fn connect(url: &str, actor_id: &str) -> RemoteBackend {
    RemoteBackend::connect(url, actor_id, TIMEOUT)
        .await
        .expect("connect to store")
}

fn make_task(id: &str, title: &str) -> Task {
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

fn make_entry(id: &str, actor_id: &str, task: &Task) -> HistoryEntry {
    HistoryEntry {
        id: id.to_string(),
        timestamp: 1,
        action: HistoryAction::Create,
        actor_id: actor_id.to_string(),
        ticket_data: task.clone(),
        changes: None,
    }
}

/// Polls `check` every 10ms for up to two seconds.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ===========================================================================
// Document operations
// ===========================================================================

#[tokio::test]
async fn set_get_delete_round_trip() {
    let (url, _state) = start_store().await;
    let remote = connect(&url, "alice").await;
    assert_eq!(remote.kind(), BackendKind::Remote);

    let task = make_task("t-1", "remote task");
    let path = DocPath::task("alice", &task.id);
    remote.set(&path, Document::Task(task.clone())).await.unwrap();
    assert_eq!(remote.get(&path).await.unwrap(), Some(Document::Task(task.clone())));
    assert_eq!(
        remote.get(&DocPath::tasks("alice")).await.unwrap(),
        Some(Document::TaskList(vec![task]))
    );

    remote.delete(&path).await.unwrap();
    assert_eq!(remote.get(&path).await.unwrap(), None);
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let (url, state) = start_store().await;
    let remote = connect(&url, "alice").await;

    let task = make_task("t-1", "a");
    let good = WriteBatch::new()
        .set(DocPath::task("alice", &task.id), Document::Task(task.clone()))
        .set(
            DocPath::history_entry("alice", "h-1"),
            Document::History(make_entry("h-1", "alice", &task)),
        );
    remote.commit(good).await.unwrap();

    let bad = WriteBatch::new()
        .set(
            DocPath::task("alice", &TaskId::from("t-2")),
            Document::Task(make_task("t-2", "b")),
        )
        .delete(DocPath::history_entry("alice", "h-1"));
    let err = remote.commit(bad).await.unwrap_err();
    assert!(matches!(err, BackendError::WriteFailed(_)));

    assert_eq!(state.documents.tasks("alice").await, vec![task]);
    assert!(remote.is_connected());
}

#[tokio::test]
async fn other_actors_paths_are_refused() {
    let (url, state) = start_store().await;
    let remote = connect(&url, "alice").await;

    let task = make_task("t-1", "not mine");
    let err = remote
        .set(&DocPath::task("bob", &task.id), Document::Task(task))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::WriteFailed(_)));
    assert!(matches!(
        remote.get(&DocPath::tasks("bob")).await,
        Err(BackendError::ReadFailed(_))
    ));
    assert!(state.documents.tasks("bob").await.is_empty());
}

// ===========================================================================
// Subscriptions
// ===========================================================================

#[tokio::test]
async fn subscription_receives_initial_and_pushed_snapshots() {
    let (url, _state) = start_store().await;
    let writer = connect(&url, "alice").await;
    let task = make_task("t-1", "first");
    writer
        .set(&DocPath::task("alice", &task.id), Document::Task(task.clone()))
        .await
        .unwrap();

    let reader = connect(&url, "alice").await;
    let mut sub = reader.subscribe(&DocPath::tasks("alice")).await.unwrap();
    let initial = tokio::time::timeout(TIMEOUT, sub.recv()).await.unwrap();
    assert_eq!(initial, Some(vec![task.clone()]));

    let second = make_task("t-2", "second");
    writer
        .set(&DocPath::task("alice", &second.id), Document::Task(second.clone()))
        .await
        .unwrap();
    let pushed = tokio::time::timeout(TIMEOUT, sub.recv()).await.unwrap();
    assert_eq!(pushed, Some(vec![task, second]));
}

#[tokio::test]
async fn history_writes_do_not_push_snapshots() {
    let (url, _state) = start_store().await;
    let remote = connect(&url, "alice").await;
    let mut sub = remote.subscribe(&DocPath::tasks("alice")).await.unwrap();
    tokio::time::timeout(TIMEOUT, sub.recv()).await.unwrap();

    let task = make_task("t-1", "x");
    remote
        .set(
            &DocPath::history_entry("alice", "h-1"),
            Document::History(make_entry("h-1", "alice", &task)),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sub.try_recv(), None);
}

#[tokio::test]
async fn dropping_subscription_unsubscribes() {
    let (url, state) = start_store().await;
    let remote = connect(&url, "alice").await;
    let sub = remote.subscribe(&DocPath::tasks("alice")).await.unwrap();
    assert_eq!(state.subscriber_count("alice").await, 1);

    drop(sub);
    let mut gone = false;
    for _ in 0..200 {
        if state.subscriber_count("alice").await == 0 {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gone);
}

#[tokio::test]
async fn history_collection_cannot_be_subscribed() {
    let (url, _state) = start_store().await;
    let remote = connect(&url, "alice").await;
    assert!(remote.subscribe(&DocPath::history("alice")).await.is_err());
}

// ===========================================================================
// Coordinators over the remote store
// ===========================================================================

#[tokio::test]
async fn change_on_one_device_reaches_the_other() {
    let (url, state) = start_store().await;
    let config = SyncConfig::default();

    let laptop = Arc::new(SyncCoordinator::new(
        connect(&url, "alice").await,
        SystemClock,
        "alice",
        config.clone(),
    ));
    let phone = Arc::new(SyncCoordinator::new(
        connect(&url, "alice").await,
        SystemClock,
        "alice",
        config,
    ));
    let feed = phone.spawn_subscription().await.unwrap();

    let draft = TaskDraft {
        priority: Some(1),
        tags: vec!["important".to_string()],
        ..TaskDraft::titled("ship release")
    };
    let (task, outcome) = laptop.create_task(draft).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Acked);

    assert!(eventually(|| phone.tasks() == vec![task.clone()]).await);
    assert_eq!(phone.list_by_quadrant()[&Quadrant::UrgentImportant].len(), 1);

    let history = phone.get_history(Some(&task.id)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, HistoryAction::Create);
    assert_eq!(history[0].actor_id, "alice");
    assert_eq!(state.documents.tasks("alice").await, vec![task]);
    feed.abort();
}

#[tokio::test]
async fn reorder_persists_whole_list_remotely() {
    let (url, state) = start_store().await;
    let sync = Arc::new(SyncCoordinator::new(
        connect(&url, "alice").await,
        SystemClock,
        "alice",
        SyncConfig::default(),
    ));
    let a = sync.create_task(TaskDraft::titled("a")).unwrap().settled().await.0;
    let b = sync.create_task(TaskDraft::titled("b")).unwrap().settled().await.0;
    let c = sync.create_task(TaskDraft::titled("c")).unwrap().settled().await.0;

    let (_, outcome) = sync.reorder(&[c.id.clone(), a.id.clone()]).unwrap().settled().await;
    assert_eq!(outcome, PersistOutcome::Acked);
    let stored: Vec<TaskId> = state
        .documents
        .tasks("alice")
        .await
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(stored, vec![c.id, b.id, a.id]);
}

// ===========================================================================
// Bootstrap
// ===========================================================================

#[tokio::test]
async fn durable_identity_bootstraps_remote_backend() {
    let (url, _state) = start_store().await;
    let config = BootstrapConfig {
        timeout: Duration::from_secs(3),
        poll_interval: Duration::from_millis(100),
        store_url: Some(url),
        request_timeout: TIMEOUT,
        data_dir: std::env::temp_dir().join(format!("eisen-remote-boot-{}", uuid::Uuid::now_v7())),
        blob_name: "tasks".to_string(),
    };
    let provider = StaticIdentity::new(Identity::durable("alice"));
    let (identity, backend) = bootstrap(&provider, &config).await.unwrap();
    assert_eq!(identity.actor_id, "alice");
    assert!(matches!(backend, Backend::Remote(_)));
}
