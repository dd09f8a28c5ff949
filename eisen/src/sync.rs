//! Sync coordinator: the layer between user intents and persistence.
//!
//! Every mutation follows the same path:
//! 1. Compute the new task(s) and validate them.
//! 2. Apply them to the [`OverlayStore`] synchronously, so readers see the
//!    change immediately.
//! 3. Build one atomic [`WriteBatch`] holding the task write and its
//!    history entry, and commit it on a background task.
//!
//! A successful commit records the time of the write (for echo
//! suppression) and folds the values into the confirmed list. A failed
//! commit is logged, marks the affected tasks [`SyncStatus::Failed`] and
//! queues the batch for retry; the optimistic value stays visible.
//!
//! Remote snapshots that arrive within the echo window of the last
//! successful local write are discarded. Bulk writes are debounced.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use eisen_proto::doc::{DocPath, Document, WriteBatch, WriteOp};
use eisen_proto::history::{HistoryAction, HistoryEntry};
use eisen_proto::task::{
    DEFAULT_PRIORITY, IMPORTANT_TAG, MAX_PRIORITY, MAX_TASK_TITLE_LENGTH, MIN_PRIORITY, Schedule,
    Task, TaskId, TaskStatus,
};
use parking_lot::Mutex;

use crate::backend::{BackendError, PersistenceBackend};
use crate::clock::Clock;
use crate::history::{HistoryRecorder, diff};
use crate::matrix::{Quadrant, classify};
use crate::overlay::{OverlayStore, PendingKey, PendingMark};

/// Validation errors, returned before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Title is empty or whitespace.
    #[error("task title must not be empty")]
    TitleEmpty,

    /// Title exceeds the configured maximum.
    #[error("task title is {len} characters, maximum is {max}")]
    TitleTooLong {
        /// Actual length in characters.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Priority outside 1..=5.
    #[error("priority {0} is outside 1..=5")]
    InvalidPriority(u8),

    /// No task with this id is visible.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// The same id appears twice.
    #[error("task {0} appears more than once")]
    DuplicateTask(TaskId),

    /// A reorder request names unknown or repeated ids.
    #[error("invalid reorder: {0}")]
    InvalidReorder(String),
}

/// Tunables of the coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote snapshots within this many ms of a local write are dropped.
    pub echo_window_ms: u64,
    /// Bulk writes within this many ms of the previous one are skipped.
    pub bulk_debounce_ms: u64,
    /// First retry delay after a failed write.
    pub retry_interval_ms: u64,
    /// Upper bound for the doubling retry delay.
    pub max_retry_backoff_ms: u64,
    /// Maximum title length in characters.
    pub max_title_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_window_ms: 1000,
            bulk_debounce_ms: 1000,
            retry_interval_ms: 2000,
            max_retry_backoff_ms: 30_000,
            max_title_len: MAX_TASK_TITLE_LENGTH,
        }
    }
}

/// Fields of a new task. Missing values take the classifier defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    /// Title (required).
    pub title: String,
    /// Description.
    pub description: String,
    /// Priority, default 4.
    pub priority: Option<u8>,
    /// Tags in entry order.
    pub tags: Vec<String>,
    /// Schedule, default today.
    pub scheduled_for: Option<Schedule>,
    /// Due date.
    pub due_date: Option<u64>,
}

impl TaskDraft {
    /// Draft with just a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial edit of a task. `None` leaves a field unchanged.
///
/// Status is not editable here; use
/// [`SyncCoordinator::toggle_complete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<u8>,
    /// New tag list.
    pub tags: Option<Vec<String>>,
    /// New schedule.
    pub scheduled_for: Option<Schedule>,
    /// New due date; `Some(None)` clears it.
    pub due_date: Option<Option<u64>>,
}

impl TaskPatch {
    fn apply_to(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(tags) = self.tags {
            task.tags = tags;
        }
        if let Some(scheduled_for) = self.scheduled_for {
            task.scheduled_for = scheduled_for;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }
}

/// Persistence state of one task as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Last write acknowledged (or never written locally).
    Synced,
    /// A write is in flight.
    Pending,
    /// The last write failed and waits in the retry queue.
    Failed,
}

/// How a background write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The backend acknowledged the write.
    Acked,
    /// The write failed and was queued for retry.
    Failed,
    /// No write was issued (debounced or nothing to write).
    Skipped,
}

/// Handle to a background write.
///
/// Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PersistHandle(Option<tokio::task::JoinHandle<PersistOutcome>>);

impl PersistHandle {
    const fn skipped() -> Self {
        Self(None)
    }

    /// Whether no write was issued.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        self.0.is_none()
    }

    /// Waits for the write to settle.
    pub async fn wait(self) -> PersistOutcome {
        match self.0 {
            None => PersistOutcome::Skipped,
            Some(handle) => handle.await.unwrap_or(PersistOutcome::Failed),
        }
    }
}

/// Result of a mutation: the locally applied value plus its write.
#[derive(Debug)]
pub struct Mutation<T> {
    /// Value as applied to the overlay.
    pub value: T,
    /// Background write.
    pub persist: PersistHandle,
}

impl<T> Mutation<T> {
    /// Waits for the write and returns the value with its outcome.
    pub async fn settled(self) -> (T, PersistOutcome) {
        let outcome = self.persist.wait().await;
        (self.value, outcome)
    }
}

/// What happened to an incoming remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Merged into the confirmed list.
    Applied,
    /// Dropped as a probable echo of a local write.
    Suppressed,
}

/// Counts reported by [`SyncCoordinator::flush_retries`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Batches written (or found obsolete) in this flush.
    pub flushed: usize,
    /// Batches still queued.
    pub remaining: usize,
}

/// A failed batch waiting to be retried.
#[derive(Debug, Clone)]
struct RetryItem {
    batch: WriteBatch,
    marks: Vec<PendingMark>,
}

#[derive(Debug, Default)]
struct SyncState {
    last_local_write_at: Option<u64>,
    last_bulk_at: Option<u64>,
    status: HashMap<TaskId, SyncStatus>,
    retry_queue: VecDeque<RetryItem>,
    retry_backoff_ms: u64,
    next_retry_at: Option<u64>,
}

/// Orchestrates optimistic mutations, persistence, and remote snapshots.
///
/// All timing state is owned by the instance; two coordinators never
/// share debounce or echo windows.
pub struct SyncCoordinator<B, C> {
    backend: B,
    clock: Arc<C>,
    recorder: HistoryRecorder<Arc<C>>,
    actor_id: String,
    config: SyncConfig,
    overlay: Mutex<OverlayStore>,
    state: Mutex<SyncState>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl<B, C> std::fmt::Debug for SyncCoordinator<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("actor_id", &self.actor_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B, C> SyncCoordinator<B, C>
where
    B: PersistenceBackend + 'static,
    C: Clock + 'static,
{
    /// Creates a coordinator writing under `actors/{actor_id}/`.
    pub fn new(backend: B, clock: C, actor_id: impl Into<String>, config: SyncConfig) -> Self {
        let clock = Arc::new(clock);
        let actor_id = actor_id.into();
        Self {
            backend,
            recorder: HistoryRecorder::new(Arc::clone(&clock), actor_id.clone()),
            clock,
            actor_id,
            state: Mutex::new(SyncState {
                retry_backoff_ms: config.retry_interval_ms,
                ..SyncState::default()
            }),
            config,
            overlay: Mutex::new(OverlayStore::new()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Actor whose documents this coordinator writes.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// The backend in use.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    // --- reads ---

    /// Current resolved task list.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.overlay.lock().view()
    }

    /// One task from the resolved list.
    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.overlay.lock().get(id)
    }

    /// Tasks grouped by quadrant, list order kept within each group.
    ///
    /// Every quadrant is present, possibly empty.
    #[must_use]
    pub fn list_by_quadrant(&self) -> BTreeMap<Quadrant, Vec<Task>> {
        let mut groups: BTreeMap<Quadrant, Vec<Task>> =
            Quadrant::ALL.into_iter().map(|q| (q, Vec::new())).collect();
        for task in self.tasks() {
            groups.entry(classify(&task)).or_default().push(task);
        }
        groups
    }

    /// History entries, newest first, optionally for one task.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the history cannot be read.
    pub async fn get_history(&self, task_id: Option<&TaskId>) -> Result<Vec<HistoryEntry>, BackendError> {
        let mut entries = match self.backend.get(&DocPath::history(&self.actor_id)).await? {
            Some(Document::HistoryList(entries)) => entries,
            _ => Vec::new(),
        };
        if let Some(id) = task_id {
            entries.retain(|e| &e.ticket_data.id == id);
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Persistence state of a task.
    #[must_use]
    pub fn sync_status(&self, id: &TaskId) -> SyncStatus {
        self.state
            .lock()
            .status
            .get(id)
            .copied()
            .unwrap_or(SyncStatus::Synced)
    }

    /// Number of batches waiting for retry.
    #[must_use]
    pub fn retry_queue_len(&self) -> usize {
        self.state.lock().retry_queue.len()
    }

    /// Time of the last acknowledged local write.
    #[must_use]
    pub fn last_local_write_at(&self) -> Option<u64> {
        self.state.lock().last_local_write_at
    }

    /// Loads the confirmed list from the backend once.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the collection cannot be read.
    pub async fn load(&self) -> Result<usize, BackendError> {
        let tasks = match self.backend.get(&DocPath::tasks(&self.actor_id)).await? {
            Some(Document::TaskList(tasks)) => tasks,
            _ => Vec::new(),
        };
        let count = tasks.len();
        self.overlay.lock().reconcile_remote(tasks);
        tracing::debug!(actor_id = %self.actor_id, tasks = count, "loaded task list");
        Ok(count)
    }

    // --- mutations ---

    /// Creates a task from a draft.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the draft is invalid.
    pub fn create_task(self: &Arc<Self>, draft: TaskDraft) -> Result<Mutation<Task>, TaskError> {
        let now = self.clock.now_ms();
        let task = Task {
            id: TaskId::new(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            priority: draft.priority.unwrap_or(DEFAULT_PRIORITY),
            tags: draft.tags,
            status: TaskStatus::Todo,
            scheduled_for: draft.scheduled_for.unwrap_or_default(),
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.validate(&task)?;

        let entry = self.recorder.record(&task, HistoryAction::Create, None);
        let marks = self.overlay.lock().apply_local(std::slice::from_ref(&task));
        let batch = self.task_batch(&task, entry);
        tracing::debug!(task_id = %task.id, "created task");
        let persist = self.persist(batch, marks);
        Ok(Mutation { value: task, persist })
    }

    /// Applies a partial edit.
    ///
    /// The task's `updatedAt` is refreshed. An update entry is recorded only
    /// if a watched field changed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if the task is unknown or the result invalid.
    pub fn update_task(self: &Arc<Self>, id: &TaskId, patch: TaskPatch) -> Result<Mutation<Task>, TaskError> {
        let old = self.require(id)?;
        let mut task = old.clone();
        patch.apply_to(&mut task);
        task.title = task.title.trim().to_string();
        self.validate(&task)?;
        task.updated_at = self.clock.now_ms();

        let entry = self
            .recorder
            .record(&task, HistoryAction::Update, Some(diff(&old, &task)));
        Ok(self.commit_task(task, entry))
    }

    /// Deletes a task. A delete entry carrying the final snapshot is
    /// recorded in the same batch.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskNotFound`] if the task is unknown.
    pub fn delete_task(self: &Arc<Self>, id: &TaskId) -> Result<Mutation<Task>, TaskError> {
        let task = self.require(id)?;
        let entry = self.recorder.record(&task, HistoryAction::Delete, None);
        let mark = self.overlay.lock().apply_removal(id);

        let mut batch = WriteBatch::new().delete(DocPath::task(&self.actor_id, id));
        if let Some(entry) = entry {
            batch = batch.set(
                DocPath::history_entry(&self.actor_id, &entry.id),
                Document::History(entry),
            );
        }
        tracing::debug!(task_id = %id, "deleted task");
        let persist = self.persist(batch, vec![mark]);
        Ok(Mutation { value: task, persist })
    }

    /// Flips a task between todo and completed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskNotFound`] if the task is unknown.
    pub fn toggle_complete(self: &Arc<Self>, id: &TaskId) -> Result<Mutation<Task>, TaskError> {
        let old = self.require(id)?;
        let now = self.clock.now_ms();
        let mut task = old.clone();
        let action = if old.is_completed() {
            task.status = TaskStatus::Todo;
            task.completed_at = None;
            HistoryAction::Reopen
        } else {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            HistoryAction::Complete
        };
        task.updated_at = now;

        let entry = self.recorder.record(&task, action, Some(diff(&old, &task)));
        Ok(self.commit_task(task, entry))
    }

    /// Moves a task into a quadrant.
    ///
    /// Priority and schedule follow [`Quadrant::placement`]; the
    /// `important` tag is added or removed as the target requires. No other
    /// field, and no other task, changes.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskNotFound`] if the task is unknown.
    pub fn move_task(self: &Arc<Self>, id: &TaskId, target: Quadrant) -> Result<Mutation<Task>, TaskError> {
        let old = self.require(id)?;
        let placement = target.placement();
        let mut task = old.clone();
        task.priority = placement.priority;
        task.scheduled_for = placement.scheduled_for;
        match placement.important {
            Some(true) if !task.is_important() => task.tags.push(IMPORTANT_TAG.to_string()),
            Some(false) => task.tags.retain(|t| t != IMPORTANT_TAG),
            _ => {}
        }
        task.updated_at = self.clock.now_ms();

        let entry = self
            .recorder
            .record(&task, HistoryAction::Update, Some(diff(&old, &task)));
        tracing::debug!(task_id = %id, target = %target, "moved task");
        Ok(self.commit_task(task, entry))
    }

    /// Reorders tasks.
    ///
    /// The listed tasks are permuted among the positions they currently
    /// occupy; every other task keeps its position. The new order is
    /// visible at once and persisted through [`bulk_update`](Self::bulk_update),
    /// so it is subject to the same debounce.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidReorder`] if an id is unknown or repeated,
    /// or the [`TaskError`] of any invalid task in the list. Nothing changes
    /// on error.
    pub fn reorder(self: &Arc<Self>, ids: &[TaskId]) -> Result<Mutation<Vec<Task>>, TaskError> {
        let current = self.tasks();
        let reordered = permute(&current, ids)?;
        self.check_list(&reordered)?;
        self.overlay
            .lock()
            .apply_order(reordered.iter().map(|t| t.id.clone()).collect());
        self.bulk_update(reordered)
    }

    /// Replaces the whole ordered task list in one write.
    ///
    /// Debounced: a call within `bulk_debounce_ms` of the previous call's
    /// start does nothing and returns its input unchanged. Otherwise tasks
    /// whose watched fields changed get a fresh `updatedAt` and an entry
    /// (complete or reopen when the status flipped, update otherwise), tasks absent from `tasks` are removed, and everything is
    /// written as one batch.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] if an id repeats or a task is invalid.
    pub fn bulk_update(self: &Arc<Self>, tasks: Vec<Task>) -> Result<Mutation<Vec<Task>>, TaskError> {
        let now = self.clock.now_ms();
        {
            let mut state = self.state.lock();
            let debounced = state
                .last_bulk_at
                .is_some_and(|last| now.saturating_sub(last) < self.config.bulk_debounce_ms);
            if debounced {
                tracing::debug!("bulk update debounced");
                return Ok(Mutation {
                    value: tasks,
                    persist: PersistHandle::skipped(),
                });
            }
            self.check_list(&tasks)?;
            state.last_bulk_at = Some(now);
        }

        let mut overlay = self.overlay.lock();
        let mut entries = Vec::new();
        let stamped: Vec<Task> = tasks
            .into_iter()
            .map(|mut task| {
                match overlay.get(&task.id) {
                    Some(old) => {
                        let changes = diff(&old, &task);
                        if !changes.is_empty() {
                            task.updated_at = now;
                            let action = match (old.is_completed(), task.is_completed()) {
                                (false, true) => HistoryAction::Complete,
                                (true, false) => HistoryAction::Reopen,
                                _ => HistoryAction::Update,
                            };
                            entries.extend(self.recorder.record(&task, action, Some(changes)));
                        }
                    }
                    None => {
                        task.created_at = now;
                        task.updated_at = now;
                        entries.extend(self.recorder.record(&task, HistoryAction::Create, None));
                    }
                }
                task
            })
            .collect();

        let kept: HashSet<&TaskId> = stamped.iter().map(|t| &t.id).collect();
        let removed: Vec<TaskId> = overlay
            .view()
            .into_iter()
            .map(|t| t.id)
            .filter(|id| !kept.contains(id))
            .collect();
        let mut marks = overlay.apply_local(&stamped);
        marks.extend(removed.iter().map(|id| overlay.apply_removal(id)));
        marks.push(overlay.apply_order(stamped.iter().map(|t| t.id.clone()).collect()));
        drop(overlay);

        let mut batch = WriteBatch::new().set(
            DocPath::tasks(&self.actor_id),
            Document::TaskList(stamped.clone()),
        );
        for entry in entries {
            batch = batch.set(
                DocPath::history_entry(&self.actor_id, &entry.id),
                Document::History(entry),
            );
        }
        tracing::debug!(tasks = stamped.len(), removed = removed.len(), "bulk update");
        let persist = self.persist(batch, marks);
        Ok(Mutation {
            value: stamped,
            persist,
        })
    }

    // --- remote feed ---

    /// Applies or discards a snapshot from the backend's subscription.
    ///
    /// A snapshot within `echo_window_ms` of the last acknowledged local
    /// write is discarded; anything else replaces the confirmed list.
    pub fn handle_remote_snapshot(&self, tasks: Vec<Task>) -> SnapshotOutcome {
        let now = self.clock.now_ms();
        let last = self.state.lock().last_local_write_at;
        if last.is_some_and(|at| now.saturating_sub(at) < self.config.echo_window_ms) {
            tracing::debug!(tasks = tasks.len(), "remote snapshot suppressed as echo");
            return SnapshotOutcome::Suppressed;
        }
        tracing::debug!(tasks = tasks.len(), "remote snapshot applied");
        self.overlay.lock().reconcile_remote(tasks);
        SnapshotOutcome::Applied
    }

    /// Subscribes to this actor's task collection and feeds every snapshot
    /// through [`handle_remote_snapshot`](Self::handle_remote_snapshot).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the subscription cannot be established.
    pub async fn spawn_subscription(self: &Arc<Self>) -> Result<tokio::task::JoinHandle<()>, BackendError> {
        let mut subscription = self.backend.subscribe(&DocPath::tasks(&self.actor_id)).await?;
        tracing::info!(actor_id = %self.actor_id, backend = %self.backend.kind(), "subscribed to tasks");
        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(tasks) = subscription.recv().await {
                coordinator.handle_remote_snapshot(tasks);
            }
            tracing::info!("task subscription ended");
        }))
    }

    // --- retries ---

    /// Re-commits queued batches in order.
    ///
    /// Does nothing while the backoff delay has not elapsed. Stops at the
    /// first failure, doubling the delay up to `max_retry_backoff_ms`. Task
    /// ops superseded by a newer local change are dropped before sending;
    /// history ops are always sent. A whole-list write is resent as the
    /// current view when its order is still pending, and as per-task writes
    /// otherwise.
    pub async fn flush_retries(&self) -> RetryReport {
        let _guard = self.flush_lock.lock().await;
        let now = self.clock.now_ms();
        {
            let state = self.state.lock();
            let due = state.next_retry_at.is_none_or(|at| now >= at);
            if state.retry_queue.is_empty() || !due {
                return RetryReport {
                    flushed: 0,
                    remaining: state.retry_queue.len(),
                };
            }
        }

        let mut flushed = 0;
        loop {
            let Some(item) = self.state.lock().retry_queue.pop_front() else {
                break;
            };
            let (batch, live) = self.still_current(&item);
            if batch.is_empty() {
                flushed += 1;
                continue;
            }
            match self.backend.commit(batch).await {
                Ok(()) => {
                    self.acknowledge(&live);
                    flushed += 1;
                }
                Err(err) => {
                    let mut state = self.state.lock();
                    state.retry_backoff_ms = state
                        .retry_backoff_ms
                        .saturating_mul(2)
                        .min(self.config.max_retry_backoff_ms);
                    state.next_retry_at = Some(now.saturating_add(state.retry_backoff_ms));
                    tracing::warn!(
                        error = %err,
                        backoff_ms = state.retry_backoff_ms,
                        queued = state.retry_queue.len() + 1,
                        "retry of failed write failed"
                    );
                    state.retry_queue.push_front(item);
                    break;
                }
            }
        }

        let mut state = self.state.lock();
        if state.retry_queue.is_empty() {
            state.retry_backoff_ms = self.config.retry_interval_ms;
            state.next_retry_at = None;
        }
        let report = RetryReport {
            flushed,
            remaining: state.retry_queue.len(),
        };
        drop(state);
        if flushed > 0 {
            tracing::info!(flushed, remaining = report.remaining, "flushed queued writes");
        }
        report
    }

    /// Spawns a task that calls [`flush_retries`](Self::flush_retries)
    /// every `retry_interval_ms`. Abort the handle to stop it.
    pub fn spawn_retry_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval = Duration::from_millis(self.config.retry_interval_ms.max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                if coordinator.retry_queue_len() > 0 {
                    coordinator.flush_retries().await;
                }
            }
        })
    }

    // --- internals ---

    fn require(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.overlay
            .lock()
            .get(id)
            .ok_or_else(|| TaskError::TaskNotFound(id.clone()))
    }

    fn validate(&self, task: &Task) -> Result<(), TaskError> {
        if task.title.trim().is_empty() {
            return Err(TaskError::TitleEmpty);
        }
        let len = task.title.chars().count();
        if len > self.config.max_title_len {
            return Err(TaskError::TitleTooLong {
                len,
                max: self.config.max_title_len,
            });
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&task.priority) {
            return Err(TaskError::InvalidPriority(task.priority));
        }
        Ok(())
    }

    /// Rejects a list with a repeated id or an invalid task.
    fn check_list(&self, tasks: &[Task]) -> Result<(), TaskError> {
        let mut seen = HashSet::new();
        for task in tasks {
            if !seen.insert(&task.id) {
                return Err(TaskError::DuplicateTask(task.id.clone()));
            }
            self.validate(task)?;
        }
        Ok(())
    }

    fn task_batch(&self, task: &Task, entry: Option<HistoryEntry>) -> WriteBatch {
        let batch = WriteBatch::new().set(
            DocPath::task(&self.actor_id, &task.id),
            Document::Task(task.clone()),
        );
        match entry {
            Some(entry) => batch.set(
                DocPath::history_entry(&self.actor_id, &entry.id),
                Document::History(entry),
            ),
            None => batch,
        }
    }

    fn commit_task(self: &Arc<Self>, task: Task, entry: Option<HistoryEntry>) -> Mutation<Task> {
        let marks = self.overlay.lock().apply_local(std::slice::from_ref(&task));
        let batch = self.task_batch(&task, entry);
        let persist = self.persist(batch, marks);
        Mutation { value: task, persist }
    }

    /// Starts the background write of `batch`.
    fn persist(self: &Arc<Self>, batch: WriteBatch, marks: Vec<PendingMark>) -> PersistHandle {
        {
            let mut state = self.state.lock();
            for id in task_ids(&marks) {
                state.status.insert(id.clone(), SyncStatus::Pending);
            }
        }
        let coordinator = Arc::clone(self);
        PersistHandle(Some(tokio::spawn(async move {
            coordinator.write(batch, marks).await
        })))
    }

    async fn write(&self, batch: WriteBatch, marks: Vec<PendingMark>) -> PersistOutcome {
        match self.backend.commit(batch.clone()).await {
            Ok(()) => {
                self.acknowledge(&marks);
                PersistOutcome::Acked
            }
            Err(err) => {
                let history_ids: Vec<&str> = batch
                    .ops
                    .iter()
                    .filter_map(|op| match op {
                        WriteOp::Set {
                            document: Document::History(entry),
                            ..
                        } => Some(entry.id.as_str()),
                        _ => None,
                    })
                    .collect();
                tracing::warn!(
                    error = %err,
                    ops = batch.len(),
                    history_ids = ?history_ids,
                    "write failed, keeping optimistic state and queueing retry"
                );
                let now = self.clock.now_ms();
                let mut state = self.state.lock();
                for id in task_ids(&marks) {
                    state.status.insert(id.clone(), SyncStatus::Failed);
                }
                if state.next_retry_at.is_none() {
                    state.next_retry_at = Some(now.saturating_add(state.retry_backoff_ms));
                }
                state.retry_queue.push_back(RetryItem { batch, marks });
                PersistOutcome::Failed
            }
        }
    }

    /// Records an acknowledged write.
    fn acknowledge(&self, marks: &[PendingMark]) {
        let now = self.clock.now_ms();
        let mut overlay = self.overlay.lock();
        overlay.confirm(marks);
        let settled: Vec<TaskId> = task_ids(marks)
            .filter(|id| !overlay.is_pending(id))
            .cloned()
            .collect();
        drop(overlay);

        let mut state = self.state.lock();
        state.last_local_write_at = Some(now);
        for id in settled {
            state.status.insert(id, SyncStatus::Synced);
        }
    }

    /// Rebuilds a queued batch against the current overlay.
    ///
    /// History ops are always kept. Task ops whose mark a newer local change
    /// superseded are dropped. A task list whose order is still current is
    /// rewritten from the current view; a superseded one becomes single-task
    /// writes and deletes for the marks of the batch that are still current.
    /// Returns the batch with the marks it settles.
    fn still_current(&self, item: &RetryItem) -> (WriteBatch, Vec<PendingMark>) {
        let overlay = self.overlay.lock();
        let live: Vec<PendingMark> = item
            .marks
            .iter()
            .filter(|m| overlay.is_current(m))
            .cloned()
            .collect();
        let is_live = |key: &PendingKey| live.iter().any(|m| &m.key == key);

        let mut ops = Vec::with_capacity(item.batch.len());
        for op in &item.batch.ops {
            match op {
                WriteOp::Set {
                    document: Document::History(_),
                    ..
                } => ops.push(op.clone()),
                WriteOp::Set {
                    path,
                    document: Document::TaskList(tasks),
                } => {
                    if is_live(&PendingKey::Order) {
                        ops.push(WriteOp::Set {
                            path: path.clone(),
                            document: Document::TaskList(overlay.view()),
                        });
                        continue;
                    }
                    for task in tasks {
                        if is_live(&PendingKey::Task(task.id.clone())) {
                            ops.push(WriteOp::Set {
                                path: DocPath::task(&self.actor_id, &task.id),
                                document: Document::Task(task.clone()),
                            });
                        }
                    }
                    for id in task_ids(&live) {
                        if !tasks.iter().any(|t| &t.id == id) {
                            ops.push(WriteOp::Delete {
                                path: DocPath::task(&self.actor_id, id),
                            });
                        }
                    }
                }
                other => {
                    let current = other
                        .path()
                        .doc_id()
                        .is_some_and(|id| is_live(&PendingKey::Task(TaskId::from(id))));
                    if current {
                        ops.push(other.clone());
                    }
                }
            }
        }
        drop(overlay);
        (WriteBatch { ops }, live)
    }
}

fn task_ids(marks: &[PendingMark]) -> impl Iterator<Item = &TaskId> {
    marks.iter().filter_map(|m| match &m.key {
        PendingKey::Task(id) => Some(id),
        PendingKey::Order => None,
    })
}

/// Permutes the tasks named in `ids` among the slots they occupy.
fn permute(current: &[Task], ids: &[TaskId]) -> Result<Vec<Task>, TaskError> {
    let mut seen = HashSet::new();
    let mut slots = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id) {
            return Err(TaskError::InvalidReorder(format!("{id} listed twice")));
        }
        let slot = current
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| TaskError::InvalidReorder(format!("{id} is not a known task")))?;
        slots.push(slot);
    }
    slots.sort_unstable();

    let mut reordered = current.to_vec();
    for (slot, id) in slots.into_iter().zip(ids) {
        if let Some(task) = current.iter().find(|t| &t.id == id) {
            reordered[slot] = task.clone();
        }
    }
    Ok(reordered)
}
