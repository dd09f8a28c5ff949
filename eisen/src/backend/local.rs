//! Local durable backend: one JSON blob on disk.
//!
//! All actors' tasks and history live in `{data_dir}/{blob_name}.json`.
//! Every write serialises the whole set to a temporary file, syncs it, and
//! renames it over the blob, so a crash leaves either the old or the new
//! contents. The in-memory copy is only replaced once the rename succeeded.

use std::path::{Path, PathBuf};

use eisen_proto::doc::{DocPath, Document, WriteBatch};
use eisen_proto::docset::DocumentSet;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{
    BackendError, BackendKind, PersistenceBackend, SnapshotHub, Subscription,
    ensure_task_collection,
};

/// File-backed persistence backend.
#[derive(Debug)]
pub struct LocalBackend {
    path: PathBuf,
    docs: Mutex<DocumentSet>,
    hub: SnapshotHub,
}

impl LocalBackend {
    /// Opens (or creates) the blob `{data_dir}/{blob_name}.json`.
    ///
    /// A missing file starts an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Io`] if the directory cannot be created or
    /// the file cannot be read, and [`BackendError::Codec`] if it holds
    /// invalid JSON.
    pub async fn open(data_dir: &Path, blob_name: &str) -> Result<Self, BackendError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(format!("{blob_name}.json"));
        let docs = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => DocumentSet::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DocumentSet::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), actors = docs.actors.len(), "opened local store");
        Ok(Self {
            path,
            docs: Mutex::new(docs),
            hub: SnapshotHub::default(),
        })
    }

    /// Location of the blob.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), BackendError> {
        let mut docs = self.docs.lock().await;
        let mut scratch = docs.clone();
        let Some(outcome) = scratch.commit(batch)? else {
            return Ok(());
        };
        write_blob(&self.path, &scratch).await?;
        *docs = scratch;

        if outcome.tasks_changed {
            let tasks = docs.tasks(&outcome.actor_id);
            drop(docs);
            self.hub.publish(&outcome.actor_id, &tasks);
        }
        Ok(())
    }
}

/// Writes `docs` to `path` through a synced temporary file and a rename.
async fn write_blob(path: &Path, docs: &DocumentSet) -> Result<(), BackendError> {
    let bytes = serde_json::to_vec_pretty(docs)?;
    let tmp_path = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        tracing::warn!(path = %path.display(), error = %e, "failed to replace local store blob");
        BackendError::Io(e)
    })
}

impl PersistenceBackend for LocalBackend {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, BackendError> {
        Ok(self.docs.lock().await.get(path))
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
        let docs = self.docs.lock().await;
        Ok(self.hub.subscribe(path.actor_id(), docs.tasks(path.actor_id())))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}
