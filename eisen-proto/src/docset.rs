//! Plain document container shared by every storage backend.
//!
//! A [`DocumentSet`] holds, per actor, an ordered task collection and an
//! append-only history collection, and knows how to apply a
//! [`WriteBatch`] atomically. It does no I/O; callers wrap it in whatever
//! lock and persistence they need.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::doc::{Collection, DocPath, Document, PathError, WriteBatch, WriteOp};
use crate::history::HistoryEntry;
use crate::task::Task;

/// Errors produced while applying writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// The path or document kind is invalid.
    #[error(transparent)]
    Path(#[from] PathError),
    /// History entries cannot be overwritten.
    #[error("history entry {0} already exists")]
    HistoryImmutable(String),
    /// A batch touched more than one actor namespace.
    #[error("batch spans several actors: {first} and {other}")]
    MixedActors {
        /// Actor of the first op.
        first: String,
        /// Actor of the offending op.
        other: String,
    },
}

/// Documents of a single actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDocs {
    /// Tasks in collection order.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// History entries in append order.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ActorDocs {
    fn get(&self, path: &DocPath) -> Option<Document> {
        match (path.collection(), path.doc_id()) {
            (Collection::Tasks, None) => Some(Document::TaskList(self.tasks.clone())),
            (Collection::Tasks, Some(id)) => self
                .tasks
                .iter()
                .find(|t| t.id.as_str() == id)
                .cloned()
                .map(Document::Task),
            (Collection::History, None) => Some(Document::HistoryList(self.history.clone())),
            (Collection::History, Some(id)) => self
                .history
                .iter()
                .find(|h| h.id == id)
                .cloned()
                .map(Document::History),
        }
    }

    fn apply(&mut self, op: WriteOp) -> Result<(), ApplyError> {
        op.validate()?;
        match op {
            WriteOp::Set { document, .. } => match document {
                Document::Task(task) => {
                    if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
                        *existing = task;
                    } else {
                        self.tasks.push(task);
                    }
                }
                Document::TaskList(tasks) => self.tasks = tasks,
                Document::History(entry) => {
                    if self.history.iter().any(|h| h.id == entry.id) {
                        return Err(ApplyError::HistoryImmutable(entry.id));
                    }
                    self.history.push(entry);
                }
                // Rejected by validate().
                Document::HistoryList(_) => {}
            },
            WriteOp::Delete { path } => {
                if let Some(id) = path.doc_id() {
                    self.tasks.retain(|t| t.id.as_str() != id);
                }
            }
        }
        Ok(())
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Actor namespace written to.
    pub actor_id: String,
    /// Whether the task collection changed (subscribers need a snapshot).
    pub tasks_changed: bool,
}

/// All actors' documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSet {
    /// Actor id -> documents.
    #[serde(default)]
    pub actors: BTreeMap<String, ActorDocs>,
}

impl DocumentSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a document or collection. Unknown actors read as empty.
    #[must_use]
    pub fn get(&self, path: &DocPath) -> Option<Document> {
        match self.actors.get(path.actor_id()) {
            Some(docs) => docs.get(path),
            None => ActorDocs::default().get(path),
        }
    }

    /// Ordered task collection of an actor.
    #[must_use]
    pub fn tasks(&self, actor_id: &str) -> Vec<Task> {
        self.actors
            .get(actor_id)
            .map(|docs| docs.tasks.clone())
            .unwrap_or_default()
    }

    /// History of an actor in append order.
    #[must_use]
    pub fn history(&self, actor_id: &str) -> Vec<HistoryEntry> {
        self.actors
            .get(actor_id)
            .map(|docs| docs.history.clone())
            .unwrap_or_default()
    }

    /// Applies a batch atomically.
    ///
    /// Every op must target the same actor. The ops run against a scratch
    /// copy that replaces the actor's documents only if all of them succeed.
    /// An empty batch is a no-op and returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] describing the first failing op.
    pub fn commit(&mut self, batch: WriteBatch) -> Result<Option<WriteOutcome>, ApplyError> {
        let Some(first) = batch.ops.first() else {
            return Ok(None);
        };
        let actor_id = first.path().actor_id().to_string();
        if let Some(other) = batch.ops.iter().find(|op| op.path().actor_id() != actor_id) {
            return Err(ApplyError::MixedActors {
                first: actor_id,
                other: other.path().actor_id().to_string(),
            });
        }
        let tasks_changed = batch
            .ops
            .iter()
            .any(|op| op.path().collection() == Collection::Tasks);

        let mut scratch = self.actors.get(&actor_id).cloned().unwrap_or_default();
        for op in batch.ops {
            scratch.apply(op)?;
        }
        self.actors.insert(actor_id.clone(), scratch);

        Ok(Some(WriteOutcome {
            actor_id,
            tasks_changed,
        }))
    }
}
