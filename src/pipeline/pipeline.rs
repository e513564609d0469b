// src/pipeline/pipeline.rs

//! End-to-end harvest: crawl, normalize, enrich, validate, upload.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{
    Brand, BrandMenu, CheckpointStatus, Config, RawBrand, ScrapedItem, UnitKey, UnitSummary,
};
use crate::pipeline::crawl::{CrawlEngine, UnitProcessor};
use crate::pipeline::enrich::Enricher;
use crate::pipeline::normalize::{
    NormalizationGap, NormalizedItem, normalize_brand, normalize_item,
};
use crate::pipeline::report::{JsonlRejectionLog, Rejection, RejectionSink, RunSummary};
use crate::pipeline::upload::{Batch, UploadReport, UpsertUploader};
use crate::pipeline::validate::{
    ValidationContext, Violation, validate_brand, validate_item, validate_variation,
};
use crate::services::{Fetcher, SiteTraversal, Traversal};
use crate::storage::{
    CheckpointStore, Collection, EntityStore, LocalStore, MemoryCheckpointStore, MemoryStore,
    SledCheckpointStore,
};

/// Default run id: the current UTC month, e.g. `2025-06`.
pub fn default_run_id() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Per-invocation choices that are not part of the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: Option<String>,
    /// Keep entities and checkpoints in memory instead of on disk.
    pub dry_run: bool,
}

#[derive(Debug, Default)]
struct Totals {
    normalized: usize,
    gaps: usize,
    rejected: usize,
    unreported: usize,
    upload: UploadReport,
}

/// Turns traversed units into stored entities.
///
/// Brands are accepted into the validation context only once stored, so
/// items never reference a brand that is missing from the store.
pub struct IngestProcessor {
    run_id: String,
    enricher: Arc<Enricher>,
    uploader: UpsertUploader,
    rejections: Arc<dyn RejectionSink>,
    context: RwLock<ValidationContext>,
    /// Stored brands by listing URL.
    brands: RwLock<HashMap<String, Brand>>,
    totals: Mutex<Totals>,
}

impl IngestProcessor {
    pub fn new(
        run_id: impl Into<String>,
        enricher: Arc<Enricher>,
        uploader: UpsertUploader,
        rejections: Arc<dyn RejectionSink>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            enricher,
            uploader,
            rejections,
            context: RwLock::new(ValidationContext::new()),
            brands: RwLock::new(HashMap::new()),
            totals: Mutex::new(Totals::default()),
        }
    }

    async fn reject(
        &self,
        unit: &UnitKey,
        collection: Collection,
        entity_id: &str,
        reasons: Vec<Violation>,
    ) {
        log::warn!(
            "Rejected {}/{}: {}",
            collection,
            entity_id,
            reasons
                .iter()
                .map(|v| format!("{} {}", v.field, v.reason))
                .collect::<Vec<_>>()
                .join("; ")
        );
        let rejection = Rejection {
            run_id: self.run_id.clone(),
            unit: unit.to_string(),
            collection,
            entity_id: entity_id.to_string(),
            reasons,
            rejected_at: Utc::now(),
        };

        let reported = self.rejections.record(&rejection).await;
        let mut totals = self.totals.lock().await;
        totals.rejected += 1;
        if let Err(e) = reported {
            log::error!("Could not report rejection of {}: {}", entity_id, e);
            totals.unreported += 1;
        }
    }

    fn log_gaps(gaps: &[NormalizationGap]) {
        for gap in gaps {
            log::debug!(
                "Gap on {} {}: {} ({})",
                gap.entity_id,
                gap.field,
                gap.reason,
                gap.raw.as_deref().unwrap_or("-")
            );
        }
    }

    async fn upload(&self, batch: &Batch) -> UploadReport {
        let report = self.uploader.upload(batch).await;
        self.totals.lock().await.upload.merge(report.clone());
        report
    }
}

#[async_trait]
impl UnitProcessor for IngestProcessor {
    async fn brand(
        &self,
        unit: &UnitKey,
        raw: &RawBrand,
        menu: &BrandMenu,
    ) -> Result<UnitSummary> {
        let brand = normalize_brand(raw, menu.logo_url.as_deref(), Utc::now());
        self.totals.lock().await.normalized += 1;
        let brand = self.enricher.enrich_brand(brand).await;

        if let Err(reasons) = validate_brand(&brand) {
            self.reject(unit, Collection::RestaurantBrands, &brand.id, reasons)
                .await;
            self.upload(&Batch {
                rejected: 1,
                ..Batch::default()
            })
            .await;
            return Err(AppError::validation(format!("brand {} rejected", brand.name)));
        }

        let report = self
            .upload(&Batch {
                brands: vec![brand.clone()],
                ..Batch::default()
            })
            .await;
        if report.failed > 0 {
            return Err(AppError::storage(format!("brand {} was not stored", brand.name)));
        }

        self.context.write().await.accept_brand(&brand.id);
        self.brands.write().await.insert(raw.url.clone(), brand);

        Ok(UnitSummary {
            entities: 1,
            ..UnitSummary::default()
        })
    }

    async fn item(&self, unit: &UnitKey, scraped: ScrapedItem) -> Result<UnitSummary> {
        let brand = self
            .brands
            .read()
            .await
            .get(&scraped.brand.url)
            .cloned()
            .ok_or_else(|| {
                AppError::validation(format!("brand {} was not stored", scraped.brand.name))
            })?;

        let NormalizedItem {
            item,
            variations,
            gaps,
        } = normalize_item(&brand.id, &scraped);
        Self::log_gaps(&gaps);
        {
            let mut totals = self.totals.lock().await;
            totals.normalized += 1 + variations.len();
            totals.gaps += gaps.len();
        }

        let item = self.enricher.enrich_item(item, &variations, &brand).await;
        let entities = 1 + variations.len();

        let mut batch = Batch::default();
        let mut rejected = Vec::new();
        {
            let mut context = self.context.write().await;
            match validate_item(&item, &context) {
                Ok(()) => context.accept_item(&item.id, &item.brand_id),
                Err(reasons) => rejected.push((Collection::MenuItems, item.id.clone(), reasons)),
            }
            for variation in variations {
                match validate_variation(&variation, &context) {
                    Ok(()) => batch.variations.push(variation),
                    Err(reasons) => {
                        rejected.push((Collection::MenuItemVariations, variation.id, reasons))
                    }
                }
            }
        }
        let item_accepted = !rejected
            .iter()
            .any(|(c, id, _)| *c == Collection::MenuItems && *id == item.id);
        batch.rejected = rejected.len();
        for (collection, id, reasons) in rejected {
            self.reject(unit, collection, &id, reasons).await;
        }

        let item_id = item.id.clone();
        if item_accepted {
            batch.items.push(item);
        }
        let report = self.upload(&batch).await;
        if report.has_failed(Collection::MenuItems, &item_id) {
            self.context.write().await.forget_item(&item_id);
        }

        let summary = UnitSummary {
            entities,
            rejected: batch.rejected,
            upload_failures: report.failed,
            gaps: gaps.len(),
        };
        if report.failed > 0 {
            return Err(AppError::storage(format!(
                "{} of {} entities of {} were not stored",
                report.failed,
                batch.len(),
                scraped.item.name
            )));
        }
        Ok(summary)
    }
}

/// A fully wired harvest over injectable parts.
pub struct Harvester {
    config: Arc<Config>,
    traversal: Arc<dyn Traversal>,
    checkpoints: Arc<dyn CheckpointStore>,
    store: Arc<dyn EntityStore>,
    rejections: Arc<dyn RejectionSink>,
    enricher: Arc<Enricher>,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(
        config: Arc<Config>,
        traversal: Arc<dyn Traversal>,
        checkpoints: Arc<dyn CheckpointStore>,
        store: Arc<dyn EntityStore>,
        rejections: Arc<dyn RejectionSink>,
    ) -> Self {
        Self {
            config,
            traversal,
            checkpoints,
            store,
            rejections,
            enricher: Arc::new(Enricher::disabled()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_enricher(mut self, enricher: Enricher) -> Self {
        self.enricher = Arc::new(enricher);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, run_id: &str) -> RunSummary {
        let mut summary = RunSummary::new(run_id);

        let processor = IngestProcessor::new(
            run_id,
            Arc::clone(&self.enricher),
            UpsertUploader::new(Arc::clone(&self.store)),
            Arc::clone(&self.rejections),
        );
        let engine = CrawlEngine::from_config(
            &self.config,
            Arc::clone(&self.traversal),
            Arc::clone(&self.checkpoints),
        )
        .with_cancellation(self.cancel.clone());

        let crawl = engine.run(run_id, &processor).await;
        let totals = processor.totals.into_inner();

        summary.brands = crawl.brands;
        summary.items = crawl.items;
        summary.checkpoint_failures = crawl.checkpoint_failures;
        summary.root_error = crawl.root_error;
        summary.cancelled = crawl.cancelled;
        summary.normalized = totals.normalized;
        summary.gaps = totals.gaps;
        summary.rejected = totals.rejected;
        summary.unreported_rejections = totals.unreported;
        summary.upload = totals.upload;
        summary.enrichment = self.enricher.stats();
        summary.fetch = self.traversal.fetch_stats();
        summary.finished_at = Some(Utc::now());
        summary
    }
}

/// Run the harvest against the live site with the configured stores, then
/// write and log the run summary.
pub async fn run_pipeline(
    config: Arc<Config>,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    config.validate()?;
    let run_id = options.run_id.clone().unwrap_or_else(default_run_id);
    log::info!(
        "Starting run {}{}",
        run_id,
        if options.dry_run { " (dry run)" } else { "" }
    );

    let fetcher = Arc::new(Fetcher::from_config(&config)?.with_cancellation(cancel.clone()));
    let traversal: Arc<dyn Traversal> = Arc::new(SiteTraversal::from_config(&config, fetcher)?);

    let (store, checkpoints): (Arc<dyn EntityStore>, Arc<dyn CheckpointStore>) =
        if options.dry_run {
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryCheckpointStore::new()),
            )
        } else {
            (
                Arc::new(LocalStore::new(&config.paths.store_dir)),
                Arc::new(SledCheckpointStore::open(&config.paths.checkpoint_dir)?),
            )
        };
    let rejections = Arc::new(JsonlRejectionLog::open(&config.paths.report_dir, &run_id).await?);
    let enricher = Enricher::from_config(&config)?;

    let harvester = Harvester::new(
        Arc::clone(&config),
        traversal,
        checkpoints,
        store,
        rejections,
    )
    .with_enricher(enricher)
    .with_cancellation(cancel);

    let summary = harvester.run(&run_id).await;
    let path = summary.write(&config.paths.report_dir).await?;
    summary.log();
    log::info!("Summary written to {}", path.display());
    Ok(summary)
}

/// Checkpoint counts for `run_id`.
pub async fn run_status(config: &Config, run_id: &str) -> Result<CheckpointStatus> {
    let store = SledCheckpointStore::open(&config.paths.checkpoint_dir)?;
    let status = store.status(run_id).await?;
    log::info!(
        "Run {}: {} completed, {} failed, {} in progress, {} pending",
        run_id,
        status.completed,
        status.failed,
        status.in_progress,
        status.pending
    );
    Ok(status)
}

/// Load and sanity-check a configuration file, including the category
/// lookup table it points to.
pub fn run_validate(config_path: &Path) -> Result<Config> {
    let config = Config::load(config_path)?;
    config.validate()?;
    Enricher::from_config(&config)?;
    log::info!("Configuration at {} is valid", config_path.display());
    Ok(config)
}
