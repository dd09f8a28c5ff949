//! In-process backend.
//!
//! Holds documents in memory and publishes snapshots to in-process
//! subscribers. Tests use [`MemoryBackend::set_failing`] to simulate an
//! unavailable store and [`MemoryBackend::write_count`] to count writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use eisen_proto::doc::{DocPath, Document, WriteBatch};
use eisen_proto::docset::DocumentSet;
use eisen_proto::history::HistoryEntry;
use eisen_proto::task::Task;
use parking_lot::Mutex;

use super::{
    BackendError, BackendKind, PersistenceBackend, SnapshotHub, Subscription,
    ensure_task_collection,
};

/// In-memory persistence backend. Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    docs: Mutex<DocumentSet>,
    hub: SnapshotHub,
    failing: AtomicBool,
    latency_ms: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`BackendError::Unavailable`]
    /// until called again with `false`.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every write by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of writes that reached the store (successful or not).
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Stored tasks of an actor, in collection order.
    #[must_use]
    pub fn tasks(&self, actor_id: &str) -> Vec<Task> {
        self.inner.docs.lock().tasks(actor_id)
    }

    /// Stored history of an actor, in append order.
    #[must_use]
    pub fn history(&self, actor_id: &str) -> Vec<HistoryEntry> {
        self.inner.docs.lock().history(actor_id)
    }

    /// Replaces an actor's tasks as if another client wrote them, and
    /// notifies subscribers.
    pub fn inject_remote_tasks(&self, actor_id: &str, tasks: Vec<Task>) {
        let mut docs = self.inner.docs.lock();
        docs.actors.entry(actor_id.to_string()).or_default().tasks = tasks;
        let snapshot = docs.tasks(actor_id);
        drop(docs);
        self.inner.hub.publish(actor_id, &snapshot);
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), BackendError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory backend set to fail".to_string()));
        }

        let mut docs = self.inner.docs.lock();
        let outcome = docs.commit(batch)?;
        let snapshot = outcome
            .filter(|o| o.tasks_changed)
            .map(|o| (docs.tasks(&o.actor_id), o.actor_id));
        drop(docs);

        if let Some((tasks, actor_id)) = snapshot {
            self.inner.hub.publish(&actor_id, &tasks);
        }
        Ok(())
    }
}

impl PersistenceBackend for MemoryBackend {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, BackendError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(BackendError::ReadFailed("memory backend set to fail".to_string()));
        }
        Ok(self.inner.docs.lock().get(path))
    }

    async fn set(&self, path: &DocPath, document: Document) -> Result<(), BackendError> {
        self.apply(WriteBatch::new().set(path.clone(), document)).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), BackendError> {
        self.apply(WriteBatch::new().delete(path.clone())).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        self.apply(batch).await
    }

    async fn subscribe(&self, path: &DocPath) -> Result<Subscription, BackendError> {
        ensure_task_collection(path)?;
        let docs = self.inner.docs.lock();
        let subscription = self.inner.hub.subscribe(path.actor_id(), docs.tasks(path.actor_id()));
        drop(docs);
        Ok(subscription)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
}
