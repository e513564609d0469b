//! Local filesystem document store.
//!
//! One pretty-printed JSON file per entity at `{root}/{collection}/{id}.json`.
//! Writes go to a uniquely named temp file first and are renamed into place,
//! so a crash never leaves a half-written document behind. Upserts of the
//! same id are serialized so the insert/update outcome and `createdAt`
//! carry-over see a consistent previous document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::id::is_well_formed;
use crate::storage::{Collection, EntityStore, UpsertOutcome, preserve_created_at};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Path of one document. Ids are checked first so they can never escape
    /// the collection directory.
    fn path(&self, collection: Collection, id: &str) -> Result<PathBuf> {
        if !is_well_formed(id) {
            return Err(AppError::storage(format!(
                "refusing to store {collection} document with malformed id {id:?}"
            )));
        }
        Ok(self
            .root_dir
            .join(collection.name())
            .join(format!("{id}.json")))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(path).await?;

        let tmp = path.with_extension(format!("json.tmp.{}", Uuid::new_v4()));
        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Io(e));
        }
        Ok(())
    }

    /// Per-document lock shared by every upsert of that path.
    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Drop the lock entry once no other upsert holds or waits on it.
    async fn release(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn read_json(&self, path: &Path) -> Result<Option<Value>> {
        match self.read_bytes(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write of one document. Callers hold its lock.
    async fn replace(&self, path: &Path, doc: &mut Value) -> Result<UpsertOutcome> {
        let outcome = match self.read_json(path).await? {
            Some(existing) => {
                preserve_created_at(&existing, doc);
                UpsertOutcome::Updated
            }
            None => UpsertOutcome::Inserted,
        };

        let bytes = serde_json::to_vec_pretty(doc)?;
        self.write_bytes(path, &bytes).await?;
        Ok(outcome)
    }
}

#[async_trait]
impl EntityStore for LocalStore {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        mut doc: Value,
    ) -> Result<UpsertOutcome> {
        let path = self.path(collection, id)?;
        let lock = self.lock_for(&path).await;

        let result = {
            let _guard = lock.lock().await;
            self.replace(&path, &mut doc).await
        };
        self.release(&path, lock).await;

        let outcome = result?;
        log::trace!("{:?} {}/{}", outcome, collection, id);
        Ok(outcome)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let path = self.path(collection, id)?;
        self.read_json(&path).await
    }

    async fn ids(&self, collection: Collection) -> Result<Vec<String>> {
        let dir = self.root_dir.join(collection.name());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if is_well_formed(id) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
