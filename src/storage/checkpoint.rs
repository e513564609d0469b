//! Durable per-unit progress records, keyed by `(run_id, unit_key)`.
//!
//! A unit is skipped on resume only if its record says `Completed`. Every
//! other state, including a stale `InProgress` left by a crash, means the
//! unit runs again.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{CheckpointRecord, CheckpointStatus, UnitKey, UnitState, UnitSummary};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Units already completed in `run_id`.
    async fn load(&self, run_id: &str) -> Result<HashSet<UnitKey>>;

    async fn record(&self, run_id: &str, unit: &UnitKey) -> Result<Option<CheckpointRecord>>;

    async fn is_completed(&self, run_id: &str, unit: &UnitKey) -> Result<bool> {
        Ok(self
            .record(run_id, unit)
            .await?
            .is_some_and(|r| r.state == UnitState::Completed))
    }

    async fn mark_in_progress(&self, run_id: &str, unit: &UnitKey) -> Result<()>;

    /// Durable: once this returns `Ok`, the unit survives a crash as completed.
    async fn mark_completed(&self, run_id: &str, unit: &UnitKey, summary: UnitSummary)
    -> Result<()>;

    /// Advisory; a failed unit is retried on the next run.
    async fn mark_failed(&self, run_id: &str, unit: &UnitKey, error: &str) -> Result<()>;

    async fn status(&self, run_id: &str) -> Result<CheckpointStatus>;
}

/// Checkpoints in an embedded sled database. Each record is one key, so
/// writes are atomic per unit.
pub struct SledCheckpointStore {
    db: sled::Db,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn prefix(run_id: &str) -> Vec<u8> {
        let mut key = run_id.as_bytes().to_vec();
        key.push(0);
        key
    }

    fn key(run_id: &str, unit: &UnitKey) -> Vec<u8> {
        let mut key = Self::prefix(run_id);
        key.extend_from_slice(unit.as_str().as_bytes());
        key
    }

    fn get(&self, run_id: &str, unit: &UnitKey) -> Result<Option<CheckpointRecord>> {
        match self.db.get(Self::key(run_id, unit))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, run_id: &str, record: &CheckpointRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.db.insert(Self::key(run_id, &record.unit), bytes)?;
        Ok(())
    }

    fn records(&self, run_id: &str) -> impl Iterator<Item = Result<CheckpointRecord>> + '_ {
        self.db.scan_prefix(Self::prefix(run_id)).map(|entry| {
            let (_, bytes) = entry?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<HashSet<UnitKey>> {
        let mut completed = HashSet::new();
        for record in self.records(run_id) {
            let record = record?;
            if record.state == UnitState::Completed {
                completed.insert(record.unit);
            }
        }
        Ok(completed)
    }

    async fn record(&self, run_id: &str, unit: &UnitKey) -> Result<Option<CheckpointRecord>> {
        self.get(run_id, unit)
    }

    async fn mark_in_progress(&self, run_id: &str, unit: &UnitKey) -> Result<()> {
        let record = self
            .get(run_id, unit)?
            .unwrap_or_else(|| CheckpointRecord::new(unit.clone()))
            .start();
        self.put(run_id, &record)
    }

    async fn mark_completed(
        &self,
        run_id: &str,
        unit: &UnitKey,
        summary: UnitSummary,
    ) -> Result<()> {
        let record = self
            .get(run_id, unit)?
            .unwrap_or_else(|| CheckpointRecord::new(unit.clone()))
            .complete(summary);
        self.put(run_id, &record)
            .map_err(|e| AppError::checkpoint(unit.as_str(), e))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::checkpoint(unit.as_str(), e))?;
        Ok(())
    }

    async fn mark_failed(&self, run_id: &str, unit: &UnitKey, error: &str) -> Result<()> {
        let record = self
            .get(run_id, unit)?
            .unwrap_or_else(|| CheckpointRecord::new(unit.clone()))
            .fail(error);
        self.put(run_id, &record)
    }

    async fn status(&self, run_id: &str) -> Result<CheckpointStatus> {
        let mut status = CheckpointStatus::default();
        for record in self.records(run_id) {
            status.record(record?.state);
        }
        Ok(status)
    }
}

/// Checkpoints held in memory. Completion writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<(String, UnitKey), CheckpointRecord>>,
    fail_completions: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    async fn update(
        &self,
        run_id: &str,
        unit: &UnitKey,
        apply: impl FnOnce(CheckpointRecord) -> CheckpointRecord + Send,
    ) {
        let mut records = self.records.lock().await;
        let key = (run_id.to_string(), unit.clone());
        let record = records
            .remove(&key)
            .unwrap_or_else(|| CheckpointRecord::new(unit.clone()));
        records.insert(key, apply(record));
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, run_id: &str) -> Result<HashSet<UnitKey>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|((run, _), r)| run == run_id && r.state == UnitState::Completed)
            .map(|((_, unit), _)| unit.clone())
            .collect())
    }

    async fn record(&self, run_id: &str, unit: &UnitKey) -> Result<Option<CheckpointRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&(run_id.to_string(), unit.clone()))
            .cloned())
    }

    async fn mark_in_progress(&self, run_id: &str, unit: &UnitKey) -> Result<()> {
        self.update(run_id, unit, CheckpointRecord::start).await;
        Ok(())
    }

    async fn mark_completed(
        &self,
        run_id: &str,
        unit: &UnitKey,
        summary: UnitSummary,
    ) -> Result<()> {
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(AppError::checkpoint(unit.as_str(), "injected write failure"));
        }
        self.update(run_id, unit, |r| r.complete(summary)).await;
        Ok(())
    }

    async fn mark_failed(&self, run_id: &str, unit: &UnitKey, error: &str) -> Result<()> {
        self.update(run_id, unit, |r| r.fail(error)).await;
        Ok(())
    }

    async fn status(&self, run_id: &str) -> Result<CheckpointStatus> {
        let mut status = CheckpointStatus::default();
        for ((run, _), record) in self.records.lock().await.iter() {
            if run == run_id {
                status.record(record.state);
            }
        }
        Ok(status)
    }
}
