//! Server-side document storage.
//!
//! [`DocumentStore`] guards a [`DocumentSet`] with an async `RwLock` so that
//! readers never wait on each other and each batch commits atomically.

use eisen_proto::doc::{DocPath, Document, WriteBatch};
use eisen_proto::docset::{ApplyError, DocumentSet, WriteOutcome};
use eisen_proto::task::Task;
use tokio::sync::RwLock;

/// Errors produced while applying writes.
pub type StoreError = ApplyError;

/// Thread-safe document store for all actors.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: RwLock<DocumentSet>,
}

impl DocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a document or collection. Unknown actors read as empty.
    pub async fn get(&self, path: &DocPath) -> Option<Document> {
        self.docs.read().await.get(path)
    }

    /// Returns the ordered task collection of an actor.
    pub async fn tasks(&self, actor_id: &str) -> Vec<Task> {
        self.docs.read().await.tasks(actor_id)
    }

    /// Applies a batch atomically. An empty batch returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] describing the first failing op; nothing is
    /// applied in that case.
    pub async fn commit(&self, batch: WriteBatch) -> Result<Option<WriteOutcome>, StoreError> {
        self.docs.write().await.commit(batch)
    }

    /// Writes a single document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write is invalid.
    pub async fn set(&self, path: DocPath, document: Document) -> Result<WriteOutcome, StoreError> {
        let outcome = self.commit(WriteBatch::new().set(path.clone(), document)).await?;
        Ok(outcome.unwrap_or_else(|| WriteOutcome {
            actor_id: path.actor_id().to_string(),
            tasks_changed: false,
        }))
    }

    /// Removes a single task document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the path does not name a task.
    pub async fn delete(&self, path: DocPath) -> Result<WriteOutcome, StoreError> {
        let outcome = self.commit(WriteBatch::new().delete(path.clone())).await?;
        Ok(outcome.unwrap_or_else(|| WriteOutcome {
            actor_id: path.actor_id().to_string(),
            tasks_changed: false,
        }))
    }
}
