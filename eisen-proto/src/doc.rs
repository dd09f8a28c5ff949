//! Document paths, documents, and atomic write batches.
//!
//! Every backend stores tasks and history entries as documents addressed by
//! a [`DocPath`] under a per-actor namespace:
//!
//! ```text
//! actors/{actorId}/tasks              ordered task collection
//! actors/{actorId}/tasks/{taskId}     one task
//! actors/{actorId}/history            history collection
//! actors/{actorId}/history/{entryId}  one history entry
//! ```

use serde::{Deserialize, Serialize};

use crate::history::HistoryEntry;
use crate::task::{Task, TaskId};

/// Errors produced when parsing or validating document paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The path does not have the `actors/{id}/{collection}[/{doc}]` shape.
    #[error("malformed document path: {0}")]
    Malformed(String),
    /// The collection segment is not `tasks` or `history`.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    /// The document kind does not fit the path it is written to.
    #[error("document kind {kind} cannot be stored at {path}")]
    KindMismatch {
        /// Kind of the offending document.
        kind: &'static str,
        /// Path it was written to.
        path: String,
    },
    /// A task document's id differs from the id in its path.
    #[error("document id {doc_id} does not match path {path}")]
    IdMismatch {
        /// Id carried by the document.
        doc_id: String,
        /// Path it was written to.
        path: String,
    },
}

/// The two collections kept per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    /// Task documents, in list order.
    Tasks,
    /// History entries, in append order.
    History,
}

impl Collection {
    /// Returns the path segment for this collection.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::History => "history",
        }
    }
}

/// Address of a document or collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath {
    actor_id: String,
    collection: Collection,
    doc_id: Option<String>,
}

impl DocPath {
    /// Path of an actor's task collection.
    pub fn tasks(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            collection: Collection::Tasks,
            doc_id: None,
        }
    }

    /// Path of a single task document.
    pub fn task(actor_id: impl Into<String>, task_id: &TaskId) -> Self {
        Self {
            actor_id: actor_id.into(),
            collection: Collection::Tasks,
            doc_id: Some(task_id.as_str().to_string()),
        }
    }

    /// Path of an actor's history collection.
    pub fn history(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            collection: Collection::History,
            doc_id: None,
        }
    }

    /// Path of a single history entry.
    pub fn history_entry(actor_id: impl Into<String>, entry_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            collection: Collection::History,
            doc_id: Some(entry_id.into()),
        }
    }

    /// Parses a path of the form `actors/{actorId}/{collection}[/{docId}]`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the shape or collection name is invalid.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let segments: Vec<&str> = raw.split('/').collect();
        if !(3..=4).contains(&segments.len())
            || segments[0] != "actors"
            || segments.iter().any(|s| s.is_empty())
        {
            return Err(PathError::Malformed(raw.to_string()));
        }
        let collection = match segments[2] {
            "tasks" => Collection::Tasks,
            "history" => Collection::History,
            other => return Err(PathError::UnknownCollection(other.to_string())),
        };
        Ok(Self {
            actor_id: segments[1].to_string(),
            collection,
            doc_id: segments.get(3).map(|s| (*s).to_string()),
        })
    }

    /// Actor namespace this path belongs to.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Collection this path points into.
    #[must_use]
    pub const fn collection(&self) -> Collection {
        self.collection
    }

    /// Document id, or `None` for a collection path.
    #[must_use]
    pub fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    /// Returns `true` if this path names a whole collection.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        self.doc_id.is_none()
    }

    /// Returns the collection path containing this document.
    #[must_use]
    pub fn collection_path(&self) -> Self {
        Self {
            actor_id: self.actor_id.clone(),
            collection: self.collection,
            doc_id: None,
        }
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actors/{}/{}", self.actor_id, self.collection.as_str())?;
        if let Some(doc_id) = &self.doc_id {
            write!(f, "/{doc_id}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for DocPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(value: DocPath) -> Self {
        value.to_string()
    }
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Document {
    /// One task.
    Task(Task),
    /// An ordered task collection.
    TaskList(Vec<Task>),
    /// One history entry.
    History(HistoryEntry),
    /// A history collection in append order.
    HistoryList(Vec<HistoryEntry>),
}

impl Document {
    /// Short name of the document kind, for errors and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::TaskList(_) => "task-list",
            Self::History(_) => "history",
            Self::HistoryList(_) => "history-list",
        }
    }

    /// Checks that this document may be written at `path`.
    ///
    /// Tasks go to task paths with a matching id, task lists replace the
    /// task collection, history entries go to history entry paths. History
    /// collections are append-only and cannot be overwritten wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::KindMismatch`] or [`PathError::IdMismatch`].
    pub fn validate_for(&self, path: &DocPath) -> Result<(), PathError> {
        let mismatch = || PathError::KindMismatch {
            kind: self.kind(),
            path: path.to_string(),
        };
        match (self, path.collection(), path.doc_id()) {
            (Self::Task(task), Collection::Tasks, Some(doc_id)) => {
                if task.id.as_str() == doc_id {
                    Ok(())
                } else {
                    Err(PathError::IdMismatch {
                        doc_id: task.id.to_string(),
                        path: path.to_string(),
                    })
                }
            }
            (Self::TaskList(_), Collection::Tasks, None) => Ok(()),
            (Self::History(entry), Collection::History, Some(doc_id)) => {
                if entry.id == doc_id {
                    Ok(())
                } else {
                    Err(PathError::IdMismatch {
                        doc_id: entry.id.clone(),
                        path: path.to_string(),
                    })
                }
            }
            _ => Err(mismatch()),
        }
    }
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Create or replace the document at `path`.
    Set {
        /// Target path.
        path: DocPath,
        /// New value.
        document: Document,
    },
    /// Remove the document at `path`.
    Delete {
        /// Target path.
        path: DocPath,
    },
}

impl WriteOp {
    /// Path this op writes to.
    #[must_use]
    pub const fn path(&self) -> &DocPath {
        match self {
            Self::Set { path, .. } | Self::Delete { path } => path,
        }
    }

    /// Checks the op is well-formed.
    ///
    /// Deletes must name a single task; history is never deleted.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), PathError> {
        match self {
            Self::Set { path, document } => document.validate_for(path),
            Self::Delete { path } => {
                if path.collection() == Collection::Tasks && !path.is_collection() {
                    Ok(())
                } else {
                    Err(PathError::KindMismatch {
                        kind: "delete",
                        path: path.to_string(),
                    })
                }
            }
        }
    }
}

/// Writes applied all-or-nothing.
///
/// Task writes and the history entries describing them travel in the same
/// batch so a partial failure can never leave a task updated without its
/// audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    /// Ops in application order.
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Appends a set op.
    #[must_use]
    pub fn set(mut self, path: DocPath, document: Document) -> Self {
        self.ops.push(WriteOp::Set { path, document });
        self
    }

    /// Appends a delete op.
    #[must_use]
    pub fn delete(mut self, path: DocPath) -> Self {
        self.ops.push(WriteOp::Delete { path });
        self
    }

    /// Number of ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if the batch holds no ops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Validates every op; nothing may be applied if this fails.
    ///
    /// # Errors
    ///
    /// Returns the first [`PathError`] found.
    pub fn validate(&self) -> Result<(), PathError> {
        self.ops.iter().try_for_each(WriteOp::validate)
    }
}
