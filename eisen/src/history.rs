//! Change detection and audit entry construction.

use std::sync::atomic::{AtomicU64, Ordering};

use eisen_proto::history::{ChangeValue, FieldChange, HistoryAction, HistoryEntry};
use eisen_proto::task::Task;

use crate::clock::Clock;
use crate::matrix::classify;

/// Name of the synthetic change appended when the quadrant moves.
pub const QUADRANT_FIELD: &str = "Quadrant";

/// Watched fields in reporting order.
fn watched_fields(task: &Task) -> [(&'static str, ChangeValue); 7] {
    [
        ("title", ChangeValue::Text(task.title.clone())),
        ("description", ChangeValue::Text(task.description.clone())),
        ("priority", ChangeValue::Number(u64::from(task.priority))),
        ("status", ChangeValue::Text(task.status.as_str().to_string())),
        ("tags", ChangeValue::Tags(task.tags.clone())),
        (
            "scheduledFor",
            ChangeValue::Text(task.scheduled_for.as_str().to_string()),
        ),
        (
            "dueDate",
            task.due_date.map_or(ChangeValue::Null, ChangeValue::Number),
        ),
    ]
}

/// Lists the watched fields that differ between two snapshots.
///
/// Tags compare as an ordered list. If the classification differs a final
/// `Quadrant` entry is appended, carrying quadrant titles.
#[must_use]
pub fn diff(old: &Task, new: &Task) -> Vec<FieldChange> {
    let mut changes: Vec<FieldChange> = watched_fields(old)
        .into_iter()
        .zip(watched_fields(new))
        .filter(|((_, before), (_, after))| before != after)
        .map(|((field, before), (_, after))| FieldChange::new(field, before, after))
        .collect();

    let (before, after) = (classify(old), classify(new));
    if before != after {
        changes.push(FieldChange::new(
            QUADRANT_FIELD,
            ChangeValue::Text(before.title().to_string()),
            ChangeValue::Text(after.title().to_string()),
        ));
    }
    changes
}

/// Builds history entries for one actor.
///
/// Timestamps are strictly increasing per recorder even when the clock
/// stalls or steps backwards.
#[derive(Debug)]
pub struct HistoryRecorder<C> {
    clock: C,
    actor_id: String,
    last_timestamp: AtomicU64,
}

impl<C: Clock> HistoryRecorder<C> {
    /// Creates a recorder attributing entries to `actor_id`.
    pub fn new(clock: C, actor_id: impl Into<String>) -> Self {
        Self {
            clock,
            actor_id: actor_id.into(),
            last_timestamp: AtomicU64::new(0),
        }
    }

    /// Actor entries are attributed to.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Packages an entry for `action` on `task`.
    ///
    /// Returns `None` only for an update with no changes. Create and delete
    /// entries never carry a change list; complete and reopen always emit.
    pub fn record(
        &self,
        task: &Task,
        action: HistoryAction,
        changes: Option<Vec<FieldChange>>,
    ) -> Option<HistoryEntry> {
        let changes = match action {
            HistoryAction::Create | HistoryAction::Delete => None,
            HistoryAction::Update => match changes {
                Some(list) if !list.is_empty() => Some(list),
                _ => return None,
            },
            HistoryAction::Complete | HistoryAction::Reopen => Some(changes.unwrap_or_default()),
        };

        Some(HistoryEntry {
            id: HistoryEntry::new_id(),
            timestamp: self.next_timestamp(),
            action,
            actor_id: self.actor_id.clone(),
            ticket_data: task.clone(),
            changes,
        })
    }

    fn next_timestamp(&self) -> u64 {
        let now = self.clock.now_ms();
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}
