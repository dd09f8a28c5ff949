//! Task record format shared by every backend and the store server.
//!
//! A [`Task`] is the central entity of the matrix. Field names serialize in
//! camelCase so that documents written by the local blob store and the
//! remote document store have the same shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Priority assumed when a stored task carries none.
pub const DEFAULT_PRIORITY: u8 = 4;

/// Lowest (most urgent) valid priority.
pub const MIN_PRIORITY: u8 = 1;

/// Highest (least urgent) valid priority.
pub const MAX_PRIORITY: u8 = 5;

/// Tag that marks a task as important.
pub const IMPORTANT_TAG: &str = "important";

/// Opaque unique task identifier.
///
/// New identifiers are UUID v7 strings, so they sort by creation time, but
/// nothing relies on that: identifiers loaded from storage may be any string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Completion state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Still to be done.
    #[default]
    Todo,
    /// Done; `completed_at` is set.
    Completed,
}

impl TaskStatus {
    /// Returns the stored label of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day a task is scheduled for. `Tomorrow` sends a task to the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    /// Placed in the matrix according to priority and tags.
    #[default]
    Today,
    /// Parked in the backlog regardless of priority and tags.
    Tomorrow,
}

impl Schedule {
    /// Returns the stored label of this schedule.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Tomorrow => "tomorrow",
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// A task in the urgency/importance matrix.
///
/// All timestamps are milliseconds since the Unix epoch. `created_at` and
/// `updated_at` are stamped by the sync coordinator, never by callers;
/// `completed_at` changes only through the complete/reopen transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Immutable identifier, unique across the list.
    pub id: TaskId,
    /// Short title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// 1 (most urgent) to 5.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Tags in the order the user entered them.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Completion state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Today or tomorrow (backlog).
    #[serde(default)]
    pub scheduled_for: Schedule,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<u64>,
    /// When the task was created.
    #[serde(default)]
    pub created_at: u64,
    /// When the task was last mutated.
    #[serde(default)]
    pub updated_at: u64,
    /// When the task was completed, if it is.
    #[serde(default)]
    pub completed_at: Option<u64>,
}

impl Task {
    /// Returns `true` if the task carries the `important` tag.
    #[must_use]
    pub fn is_important(&self) -> bool {
        self.tags.iter().any(|t| t == IMPORTANT_TAG)
    }

    /// Returns `true` if the task is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
