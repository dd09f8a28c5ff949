//! Audit-trail record format.
//!
//! A [`HistoryEntry`] is written once per task mutation and never changed
//! afterwards. It carries a full snapshot of the task at the time of the
//! action plus the list of fields that changed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::Task;

/// Kind of mutation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    /// Task was created.
    Create,
    /// One or more watched fields changed.
    Update,
    /// Task was deleted. Terminal.
    Delete,
    /// Task moved from todo to completed.
    Complete,
    /// Task moved from completed back to todo.
    Reopen,
}

impl HistoryAction {
    /// Returns the stored label of this action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Complete => "COMPLETE",
            Self::Reopen => "REOPEN",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a field before or after a change.
///
/// Two values are the same exactly when their serialized forms are equal,
/// so comparing `ChangeValue`s is how the diff decides a field changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeValue {
    /// Field was absent.
    Null,
    /// Text-valued field (title, description, status, schedule, quadrant).
    Text(String),
    /// Numeric field (priority, due date).
    Number(u64),
    /// Ordered tag list.
    Tags(Vec<String>),
}

impl std::fmt::Display for ChangeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("-"),
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Tags(tags) => write!(f, "[{}]", tags.join(", ")),
        }
    }
}

/// One changed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    /// Field name (`title`, `priority`, ..., or the synthetic `Quadrant`).
    pub field: String,
    /// Value before the mutation.
    pub old_value: ChangeValue,
    /// Value after the mutation.
    pub new_value: ChangeValue,
}

impl FieldChange {
    /// Creates a change record for `field`.
    pub fn new(field: impl Into<String>, old_value: ChangeValue, new_value: ChangeValue) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
        }
    }
}

/// Immutable audit record of a single task mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique entry identifier (UUID v7).
    pub id: String,
    /// When the action happened (milliseconds since epoch).
    pub timestamp: u64,
    /// What happened.
    pub action: HistoryAction,
    /// Who did it.
    pub actor_id: String,
    /// Full task snapshot at the time of the action.
    pub ticket_data: Task,
    /// Changed fields, or `None` for create/delete.
    pub changes: Option<Vec<FieldChange>>,
}

impl HistoryEntry {
    /// Generates a fresh entry identifier.
    #[must_use]
    pub fn new_id() -> String {
        Uuid::now_v7().to_string()
    }
}
