// src/pipeline/report.rs

//! Operator-facing run output: the rejection report and the run summary.
//!
//! ```text
//! {report_dir}/{run_id}/
//! ├── rejections.jsonl   # one Rejection per line, append-only
//! └── summary.json       # RunSummary, rewritten at the end of each run
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::pipeline::enrich::EnrichmentStats;
use crate::pipeline::upload::UploadReport;
use crate::pipeline::validate::Violation;
use crate::services::FetchStats;
use crate::storage::Collection;

pub const REJECTIONS_FILE: &str = "rejections.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

/// An entity the validator refused, with every reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub run_id: String,
    pub unit: String,
    pub collection: Collection,
    pub entity_id: String,
    pub reasons: Vec<Violation>,
    pub rejected_at: DateTime<Utc>,
}

/// Where rejections are reported.
#[async_trait]
pub trait RejectionSink: Send + Sync {
    async fn record(&self, rejection: &Rejection) -> Result<()>;
}

/// Append-only JSON Lines file for one run.
pub struct JsonlRejectionLog {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonlRejectionLog {
    /// Open (or create) `{report_dir}/{run_id}/rejections.jsonl`. The file
    /// exists after this returns, even if nothing is ever rejected.
    pub async fn open(report_dir: &Path, run_id: &str) -> Result<Self> {
        let dir = report_dir.join(run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(REJECTIONS_FILE);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RejectionSink for JsonlRejectionLog {
    async fn record(&self, rejection: &Rejection) -> Result<()> {
        let mut line = serde_json::to_vec(rejection)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Rejections kept in memory.
#[derive(Debug, Default)]
pub struct MemoryRejectionLog {
    entries: Mutex<Vec<Rejection>>,
}

impl MemoryRejectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<Rejection> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl RejectionSink for MemoryRejectionLog {
    async fn record(&self, rejection: &Rejection) -> Result<()> {
        self.entries.lock().await.push(rejection.clone());
        Ok(())
    }
}

/// Outcome counts for one level of units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitCounts {
    /// Units enumerated after filters and caps.
    pub total: usize,
    pub completed: usize,
    /// Already completed by an earlier attempt of this run.
    pub skipped: usize,
    pub failed: usize,
    /// Never started because the run was cancelled.
    pub not_started: usize,
}

/// Counts per stage for one run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    /// Set when the brand listing itself could not be fetched.
    pub root_error: Option<String>,
    pub brands: UnitCounts,
    pub items: UnitCounts,
    pub checkpoint_failures: usize,
    pub normalized: usize,
    pub gaps: usize,
    pub rejected: usize,
    /// Rejections that could not be written to the report.
    pub unreported_rejections: usize,
    pub upload: UploadReport,
    pub enrichment: EnrichmentStats,
    pub fetch: Option<FetchStats>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Whether every enumerated unit completed (now or earlier).
    pub fn is_complete(&self) -> bool {
        self.root_error.is_none()
            && !self.cancelled
            && self.brands.failed == 0
            && self.items.failed == 0
            && self.brands.not_started == 0
            && self.items.not_started == 0
            && self.checkpoint_failures == 0
    }

    /// Write `summary.json` next to the rejection report. The previous
    /// summary is replaced atomically.
    pub async fn write(&self, report_dir: &Path) -> Result<PathBuf> {
        let dir = report_dir.join(&self.run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(SUMMARY_FILE);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(self)?;
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    pub fn log(&self) {
        log::info!("==== Run {} summary ====", self.run_id);
        if let Some(error) = &self.root_error {
            log::error!("Brand listing failed: {}", error);
        }
        if self.cancelled {
            log::warn!("Run was cancelled before all units finished");
        }
        for (label, counts) in [("Brands", self.brands), ("Items", self.items)] {
            log::info!(
                "{}: {} total, {} completed, {} skipped, {} failed, {} not started",
                label,
                counts.total,
                counts.completed,
                counts.skipped,
                counts.failed,
                counts.not_started
            );
        }
        log::info!(
            "Entities: {} normalized ({} gaps), {} rejected",
            self.normalized,
            self.gaps,
            self.rejected
        );
        log::info!(
            "Upload: {} inserted, {} updated, {} failed",
            self.upload.inserted,
            self.upload.updated,
            self.upload.failed
        );
        log::info!(
            "Enrichment: {} applied, {} discarded, {} failed",
            self.enrichment.applied,
            self.enrichment.discarded,
            self.enrichment.failed
        );
        if let Some(fetch) = self.fetch {
            log::info!(
                "Fetch: {} requests, {} retries, {} failures",
                fetch.requests,
                fetch.retries,
                fetch.failures
            );
        }
        if self.checkpoint_failures > 0 {
            log::warn!(
                "{} checkpoint writes failed; those units run again on resume",
                self.checkpoint_failures
            );
        }
        if self.unreported_rejections > 0 {
            log::error!(
                "{} rejections could not be written to the report",
                self.unreported_rejections
            );
        }
    }
}
