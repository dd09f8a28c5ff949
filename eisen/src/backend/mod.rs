//! Persistence backend abstraction.
//!
//! Defines the [`PersistenceBackend`] trait every store satisfies.
//! Implementations:
//! - [`memory::MemoryBackend`]: in-process, with fault injection for tests
//! - [`local::LocalBackend`]: single JSON blob on disk
//! - [`remote::RemoteBackend`]: WebSocket client of the `eisen-store` server
//!
//! [`Backend`] is the strategy chosen once at startup between local and
//! remote storage.

pub mod local;
pub mod memory;
pub mod remote;

use std::fmt;

use eisen_proto::codec::CodecError;
use eisen_proto::doc::{DocPath, Document, PathError, WriteBatch};
use eisen_proto::docset::ApplyError;
use eisen_proto::task::Task;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use self::local::LocalBackend;
use self::memory::MemoryBackend;
use self::remote::RemoteBackend;

/// Errors that can occur during persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend cannot be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused or failed a write.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The backend failed a read.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The document path or kind is invalid.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// Encoding or decoding a record failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The operation did not complete in time.
    #[error("backend operation timed out")]
    Timeout,

    /// The connection to the backend was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// An underlying I/O error occurred.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for BackendError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<ApplyError> for BackendError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Path(path) => Self::InvalidPath(path),
            other => Self::WriteFailed(other.to_string()),
        }
    }
}

/// Live feed of task collection snapshots.
///
/// Snapshots arrive as asynchronous events on the subscriber's own task.
/// Dropping the subscription, or calling [`Subscription::unsubscribe`],
/// stops delivery.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Vec<Task>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps a snapshot receiver.
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<Vec<Task>>) -> Self {
        Self {
            receiver,
            on_close: None,
        }
    }

    /// Wraps a snapshot receiver with a hook run when the subscription ends.
    #[must_use]
    pub fn with_close_hook(
        receiver: mpsc::UnboundedReceiver<Vec<Task>>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Waits for the next snapshot. `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<Vec<Task>> {
        self.receiver.recv().await
    }

    /// Returns a snapshot if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<Task>> {
        self.receiver.try_recv().ok()
    }

    /// Stops delivery.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("has_close_hook", &self.on_close.is_some())
            .finish_non_exhaustive()
    }
}

/// Fan-out of snapshots to in-process subscribers.
#[derive(Debug, Default)]
pub(crate) struct SnapshotHub {
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<Vec<Task>>)>>,
}

impl SnapshotHub {
    /// Registers a subscriber for an actor's task collection and queues
    /// `initial` as its first snapshot.
    pub(crate) fn subscribe(&self, actor_id: &str, initial: Vec<Task>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(initial);
        self.subscribers.lock().push((actor_id.to_string(), tx));
        Subscription::new(rx)
    }

    /// Delivers `tasks` to every live subscriber of `actor_id`, pruning
    /// subscribers whose receiver is gone.
    pub(crate) fn publish(&self, actor_id: &str, tasks: &[Task]) {
        self.subscribers.lock().retain(|(actor, tx)| {
            if actor != actor_id {
                return !tx.is_closed();
            }
            tx.send(tasks.to_vec()).is_ok()
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Uniform contract over every persistence backend.
///
/// Paths follow `actors/{actorId}/tasks[/{taskId}]` and
/// `actors/{actorId}/history[/{entryId}]`. Setting a [`Document::TaskList`]
/// on a task collection replaces the whole ordered collection.
pub trait PersistenceBackend: Send + Sync {
    /// Reads a document or a whole collection.
    fn get(
        &self,
        path: &DocPath,
    ) -> impl std::future::Future<Output = Result<Option<Document>, BackendError>> + Send;

    /// Writes a single document.
    fn set(
        &self,
        path: &DocPath,
        document: Document,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Removes a single task document.
    fn delete(
        &self,
        path: &DocPath,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Applies every op of `batch` or none of them.
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Watches a task collection. The current state is delivered first.
    fn subscribe(
        &self,
        path: &DocPath,
    ) -> impl std::future::Future<Output = Result<Subscription, BackendError>> + Send;

    /// Short name for logs.
    fn kind(&self) -> BackendKind;
}

/// Which implementation is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process memory.
    Memory,
    /// JSON blob on disk.
    Local,
    /// Remote document store.
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Backend strategy selected once at startup.
pub enum Backend {
    /// Throwaway in-process store.
    Memory(MemoryBackend),
    /// Local durable store.
    Local(LocalBackend),
    /// Remote document store.
    Remote(RemoteBackend),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Backend").field(&self.kind()).finish()
    }
}

impl PersistenceBackend for Backend {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, BackendError> {
        match self {
            Self::Memory(b) => b.get(path).await,
            Self::Local(b) => b.get(path).await,
            Self::Remote(b) => b.get(path).await,
        }
    }

    async fn set(&self, path: &DocPath, document: Document) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.set(path, document).await,
            Self::Local(b) => b.set(path, document).await,
            Self::Remote(b) => b.set(path, document).await,
        }
    }

    async fn delete(&self, path: &DocPath) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.delete(path).await,
            Self::Local(b) => b.delete(path).await,
            Self::Remote(b) => b.delete(path).await,
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        match self {
            Self::Memory(b) => b.commit(batch).await,
            Self::Local(b) => b.commit(batch).await,
            Self::Remote(b) => b.commit(batch).await,
        }
    }

    async fn subscribe(&self, path: &DocPath) -> Result<Subscription, BackendError> {
        match self {
            Self::Memory(b) => b.subscribe(path).await,
            Self::Local(b) => b.subscribe(path).await,
            Self::Remote(b) => b.subscribe(path).await,
        }
    }

    fn kind(&self) -> BackendKind {
        match self {
            Self::Memory(b) => b.kind(),
            Self::Local(b) => b.kind(),
            Self::Remote(b) => b.kind(),
        }
    }
}

/// Rejects subscriptions to anything but a task collection.
pub(crate) fn ensure_task_collection(path: &DocPath) -> Result<(), BackendError> {
    if path.collection() == eisen_proto::doc::Collection::Tasks && path.is_collection() {
        Ok(())
    } else {
        Err(BackendError::InvalidPath(PathError::KindMismatch {
            kind: "subscription",
            path: path.to_string(),
        }))
    }
}
