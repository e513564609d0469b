// src/pipeline/crawl.rs

//! Checkpointed traversal of brands and their menu items.
//!
//! Brands are processed concurrently up to `max_concurrent`, and each brand's
//! items up to `item_concurrency`. A unit is marked completed only after its
//! processor has handed everything to the uploader; completed units of the
//! same run are skipped on resume.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{
    BrandMenu, Config, LimitsConfig, RawBrand, RawMenuItem, ScrapedItem, UnitKey, UnitSummary,
};
use crate::pipeline::report::UnitCounts;
use crate::services::Traversal;
use crate::storage::CheckpointStore;

/// What the engine does with each traversed unit.
#[async_trait]
pub trait UnitProcessor: Send + Sync {
    /// Called once per brand before any of its items. An error fails the
    /// brand and skips its items for this run.
    async fn brand(&self, unit: &UnitKey, brand: &RawBrand, menu: &BrandMenu)
    -> Result<UnitSummary>;

    /// Called once per menu item with every serving that could be fetched.
    async fn item(&self, unit: &UnitKey, scraped: ScrapedItem) -> Result<UnitSummary>;
}

#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub brands: UnitCounts,
    pub items: UnitCounts,
    pub checkpoint_failures: usize,
    pub root_error: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Skipped,
    Failed,
    NotStarted,
}

impl Outcome {
    fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

fn tally(counts: &mut UnitCounts, outcome: Outcome) {
    match outcome {
        Outcome::Completed => counts.completed += 1,
        Outcome::Skipped => counts.skipped += 1,
        Outcome::Failed => counts.failed += 1,
        Outcome::NotStarted => counts.not_started += 1,
    }
}

/// Result of one brand, including its items.
#[derive(Debug)]
struct BrandResult {
    outcome: Outcome,
    items: UnitCounts,
    checkpoint_failures: usize,
}

impl BrandResult {
    fn without_items(outcome: Outcome) -> Self {
        Self {
            outcome,
            items: UnitCounts::default(),
            checkpoint_failures: 0,
        }
    }
}

pub struct CrawlEngine {
    traversal: Arc<dyn Traversal>,
    checkpoints: Arc<dyn CheckpointStore>,
    limits: LimitsConfig,
    brand_concurrency: usize,
    item_concurrency: usize,
    cancel: CancellationToken,
}

impl CrawlEngine {
    pub fn new(traversal: Arc<dyn Traversal>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            traversal,
            checkpoints,
            limits: LimitsConfig::default(),
            brand_concurrency: 1,
            item_concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(
        config: &Config,
        traversal: Arc<dyn Traversal>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::new(traversal, checkpoints)
            .with_limits(config.limits.clone())
            .with_concurrency(config.crawler.max_concurrent, config.crawler.item_concurrency)
    }

    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_concurrency(mut self, brands: usize, items_per_brand: usize) -> Self {
        self.brand_concurrency = brands.max(1);
        self.item_concurrency = items_per_brand.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Traverse everything in scope for `run_id`. Unit failures are recorded
    /// and counted; only the brand listing can end the run early.
    pub async fn run(&self, run_id: &str, processor: &dyn UnitProcessor) -> CrawlReport {
        let mut report = CrawlReport::default();

        let completed = match self.checkpoints.load(run_id).await {
            Ok(completed) => completed,
            Err(e) => {
                log::warn!("Could not load checkpoints for run {}: {}", run_id, e);
                report.checkpoint_failures += 1;
                HashSet::new()
            }
        };

        let brands = match self.traversal.brands().await {
            Ok(brands) => brands,
            Err(e) => {
                log::error!("Failed to enumerate brands: {}", e);
                report.root_error = Some(e.to_string());
                report.cancelled = self.cancel.is_cancelled();
                return report;
            }
        };

        let brands: Vec<_> = brands
            .into_iter()
            .filter(|b| self.limits.includes_brand(&b.name))
            .take(self.limits.max_restaurants.unwrap_or(usize::MAX))
            .collect();
        report.brands.total = brands.len();

        log::info!(
            "Run {}: {} brands in scope, {} units already completed",
            run_id,
            brands.len(),
            completed.len()
        );

        let completed = &completed;
        let mut results = stream::iter(brands)
            .map(|brand| self.process_brand(run_id, brand, completed, processor))
            .buffer_unordered(self.brand_concurrency);

        while let Some(result) = results.next().await {
            tally(&mut report.brands, result.outcome);
            report.items.total += result.items.total;
            report.items.completed += result.items.completed;
            report.items.skipped += result.items.skipped;
            report.items.failed += result.items.failed;
            report.items.not_started += result.items.not_started;
            report.checkpoint_failures += result.checkpoint_failures;
        }

        report.cancelled = self.cancel.is_cancelled();
        report
    }

    async fn process_brand(
        &self,
        run_id: &str,
        brand: RawBrand,
        completed: &HashSet<UnitKey>,
        processor: &dyn UnitProcessor,
    ) -> BrandResult {
        let unit = UnitKey::brand(&brand.url);
        if completed.contains(&unit) {
            log::debug!("Skipping completed brand {}", brand.name);
            return BrandResult::without_items(Outcome::Skipped);
        }
        if self.cancel.is_cancelled() {
            return BrandResult::without_items(Outcome::NotStarted);
        }

        let mut failures = 0;
        self.note(
            self.checkpoints.mark_in_progress(run_id, &unit).await,
            &unit,
            &mut failures,
        );

        let menu = match self.traversal.menu(&brand).await {
            Ok(menu) => menu,
            Err(e) => {
                log::warn!("Menu of {} failed: {}", brand.name, e);
                self.fail(run_id, &unit, &e.to_string(), &mut failures).await;
                return BrandResult {
                    checkpoint_failures: failures,
                    ..BrandResult::without_items(Outcome::Failed)
                };
            }
        };

        let mut summary = match processor.brand(&unit, &brand, &menu).await {
            Ok(summary) => summary,
            Err(e) => {
                log::warn!("Brand {} could not be processed: {}", brand.name, e);
                self.fail(run_id, &unit, &e.to_string(), &mut failures).await;
                return BrandResult {
                    checkpoint_failures: failures,
                    ..BrandResult::without_items(Outcome::Failed)
                };
            }
        };

        let items: Vec<_> = menu
            .items
            .into_iter()
            .take(self.limits.max_items_per_restaurant.unwrap_or(usize::MAX))
            .collect();
        let mut counts = UnitCounts {
            total: items.len(),
            ..UnitCounts::default()
        };
        log::info!("{}: {} menu items", brand.name, items.len());

        let brand_ref = &brand;
        let mut results = stream::iter(items)
            .map(|item| self.process_item(run_id, brand_ref, item, completed, processor))
            .buffer_unordered(self.item_concurrency);

        let mut all_done = true;
        while let Some((outcome, item_summary, item_failures)) = results.next().await {
            tally(&mut counts, outcome);
            all_done &= outcome.is_done();
            failures += item_failures;
            if let Some(s) = item_summary {
                summary.absorb(&s);
            }
        }

        let outcome = if all_done {
            match self.checkpoints.mark_completed(run_id, &unit, summary).await {
                Ok(()) => Outcome::Completed,
                Err(e) => {
                    log::warn!("Completion of {} not recorded: {}", unit, e);
                    failures += 1;
                    Outcome::Failed
                }
            }
        } else {
            let reason = if self.cancel.is_cancelled() {
                "cancelled".to_string()
            } else {
                format!("{} of {} items failed", counts.failed, counts.total)
            };
            self.fail(run_id, &unit, &reason, &mut failures).await;
            Outcome::Failed
        };

        BrandResult {
            outcome,
            items: counts,
            checkpoint_failures: failures,
        }
    }

    async fn process_item(
        &self,
        run_id: &str,
        brand: &RawBrand,
        item: RawMenuItem,
        completed: &HashSet<UnitKey>,
        processor: &dyn UnitProcessor,
    ) -> (Outcome, Option<UnitSummary>, usize) {
        let unit = UnitKey::menu_item(&item.url);
        if completed.contains(&unit) {
            return (Outcome::Skipped, None, 0);
        }
        if self.cancel.is_cancelled() {
            return (Outcome::NotStarted, None, 0);
        }

        let mut failures = 0;
        self.note(
            self.checkpoints.mark_in_progress(run_id, &unit).await,
            &unit,
            &mut failures,
        );

        let harvest = match self.traversal.servings(&item).await {
            Ok(harvest) => harvest,
            Err(e) => {
                log::warn!("Item {} failed: {}", item.name, e);
                self.fail(run_id, &unit, &e.to_string(), &mut failures).await;
                return (Outcome::Failed, None, failures);
            }
        };

        let scraped = ScrapedItem {
            brand: brand.clone(),
            item,
            servings: harvest.servings,
        };
        let summary = match processor.item(&unit, scraped).await {
            Ok(summary) => summary,
            Err(e) => {
                self.fail(run_id, &unit, &e.to_string(), &mut failures).await;
                return (Outcome::Failed, None, failures);
            }
        };

        // Partial servings were uploaded, but the item is retried next run.
        if let Some(first) = harvest.failures.first() {
            let reason = format!(
                "{} serving pages failed, first: {}",
                harvest.failures.len(),
                first
            );
            self.fail(run_id, &unit, &reason, &mut failures).await;
            return (Outcome::Failed, Some(summary), failures);
        }

        match self
            .checkpoints
            .mark_completed(run_id, &unit, summary.clone())
            .await
        {
            Ok(()) => (Outcome::Completed, Some(summary), failures),
            Err(e) => {
                log::warn!("Completion of {} not recorded: {}", unit, e);
                (Outcome::Failed, Some(summary), failures + 1)
            }
        }
    }

    async fn fail(&self, run_id: &str, unit: &UnitKey, reason: &str, failures: &mut usize) {
        let reason = if self.cancel.is_cancelled() {
            "cancelled"
        } else {
            reason
        };
        self.note(
            self.checkpoints.mark_failed(run_id, unit, reason).await,
            unit,
            failures,
        );
    }

    fn note(&self, result: Result<()>, unit: &UnitKey, failures: &mut usize) {
        if let Err(e) = result {
            log::warn!("Checkpoint write for {} failed: {}", unit, e);
            *failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::error::{AppError, FetchError};
    use crate::models::{RawServing, UnitState};
    use crate::services::ServingHarvest;
    use crate::storage::MemoryCheckpointStore;

    #[derive(Default)]
    struct FakeSite {
        brands: Vec<RawBrand>,
        menus: HashMap<String, Vec<RawMenuItem>>,
        broken: HashSet<String>,
        listing_down: bool,
    }

    impl FakeSite {
        fn brand(mut self, name: &str, items: &[&str]) -> Self {
            let url = format!("https://site.test/{name}");
            let items = items
                .iter()
                .map(|i| RawMenuItem {
                    name: i.to_string(),
                    url: format!("{url}/{i}"),
                    category: "Mains".into(),
                })
                .collect();
            self.menus.insert(url.clone(), items);
            self.brands.push(RawBrand {
                name: name.into(),
                url,
                logo_url: None,
            });
            self
        }

        fn broken(mut self, url: &str) -> Self {
            self.broken.insert(url.into());
            self
        }
    }

    #[async_trait]
    impl Traversal for FakeSite {
        async fn brands(&self) -> Result<Vec<RawBrand>> {
            if self.listing_down {
                return Err(FetchError::from_status("https://site.test/", 503).into());
            }
            Ok(self.brands.clone())
        }

        async fn menu(&self, brand: &RawBrand) -> Result<BrandMenu> {
            if self.broken.contains(&brand.url) {
                return Err(FetchError::from_status(&brand.url, 404).into());
            }
            Ok(BrandMenu {
                logo_url: None,
                items: self.menus.get(&brand.url).cloned().unwrap_or_default(),
            })
        }

        async fn servings(&self, item: &RawMenuItem) -> Result<ServingHarvest> {
            if self.broken.contains(&item.url) {
                return Err(FetchError::from_status(&item.url, 404).into());
            }
            Ok(ServingHarvest {
                servings: vec![RawServing {
                    label: "1 serving".into(),
                    ..RawServing::default()
                }],
                failures: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        items: Mutex<Vec<String>>,
        reject_brands: bool,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            let mut seen = self.items.lock().unwrap().clone();
            seen.sort();
            seen
        }
    }

    #[async_trait]
    impl UnitProcessor for Recorder {
        async fn brand(
            &self,
            _unit: &UnitKey,
            brand: &RawBrand,
            _menu: &BrandMenu,
        ) -> Result<UnitSummary> {
            if self.reject_brands {
                return Err(AppError::validation(format!("{} rejected", brand.name)));
            }
            Ok(UnitSummary {
                entities: 1,
                ..UnitSummary::default()
            })
        }

        async fn item(&self, _unit: &UnitKey, scraped: ScrapedItem) -> Result<UnitSummary> {
            self.items.lock().unwrap().push(scraped.item.name);
            Ok(UnitSummary {
                entities: 1 + scraped.servings.len(),
                ..UnitSummary::default()
            })
        }
    }

    fn engine(site: FakeSite, checkpoints: Arc<MemoryCheckpointStore>) -> CrawlEngine {
        CrawlEngine::new(Arc::new(site), checkpoints).with_concurrency(2, 2)
    }

    #[tokio::test]
    async fn completes_every_unit() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let site = FakeSite::default()
            .brand("a", &["taco", "burrito"])
            .brand("b", &["fries"]);
        let recorder = Recorder::default();

        let report = engine(site, checkpoints.clone()).run("r", &recorder).await;

        assert_eq!(report.brands.completed, 2);
        assert_eq!(report.items.completed, 3);
        assert_eq!(recorder.seen(), ["burrito", "fries", "taco"]);
        assert_eq!(checkpoints.status("r").await.unwrap().completed, 5);

        let brand = UnitKey::brand("https://site.test/a");
        let record = checkpoints.record("r", &brand).await.unwrap().unwrap();
        // brand itself plus two items with one serving each
        assert_eq!(record.summary.unwrap().entities, 1 + 2 * 2);
    }

    #[tokio::test]
    async fn completed_units_are_skipped() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let taco = UnitKey::menu_item("https://site.test/a/taco");
        checkpoints
            .mark_completed("r", &taco, UnitSummary::default())
            .await
            .unwrap();

        let site = FakeSite::default().brand("a", &["taco", "burrito"]);
        let recorder = Recorder::default();
        let report = engine(site, checkpoints).run("r", &recorder).await;

        assert_eq!(recorder.seen(), ["burrito"]);
        assert_eq!(report.items.skipped, 1);
        assert_eq!(report.brands.completed, 1);
    }

    #[tokio::test]
    async fn failed_item_fails_its_brand_only() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let site = FakeSite::default()
            .brand("a", &["taco", "burrito"])
            .brand("b", &["fries"])
            .broken("https://site.test/a/taco");
        let recorder = Recorder::default();

        let report = engine(site, checkpoints.clone()).run("r", &recorder).await;

        assert_eq!(report.items.failed, 1);
        assert_eq!(report.items.completed, 2);
        assert_eq!(report.brands.failed, 1);
        assert_eq!(report.brands.completed, 1);

        let record = checkpoints
            .record("r", &UnitKey::brand("https://site.test/a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, UnitState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("1 of 2 items failed"));
    }

    #[tokio::test]
    async fn menu_failure_is_recorded() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let site = FakeSite::default()
            .brand("a", &["taco"])
            .brand("b", &["fries"])
            .broken("https://site.test/a");
        let recorder = Recorder::default();

        let report = engine(site, checkpoints).run("r", &recorder).await;
        assert_eq!(report.brands.failed, 1);
        assert_eq!(recorder.seen(), ["fries"]);
    }

    #[tokio::test]
    async fn rejected_brand_skips_items() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let site = FakeSite::default().brand("a", &["taco"]);
        let recorder = Recorder {
            reject_brands: true,
            ..Recorder::default()
        };

        let report = engine(site, checkpoints).run("r", &recorder).await;
        assert_eq!(report.brands.failed, 1);
        assert!(recorder.seen().is_empty());
    }

    #[tokio::test]
    async fn filters_and_caps() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let site = FakeSite::default()
            .brand("a", &["1", "2", "3"])
            .brand("b", &["4"])
            .brand("c", &["5", "6"]);
        let recorder = Recorder::default();

        let report = engine(site, checkpoints)
            .with_limits(LimitsConfig {
                brands: vec!["A".into(), "c".into()],
                max_restaurants: Some(2),
                max_items_per_restaurant: Some(1),
            })
            .run("r", &recorder)
            .await;

        assert_eq!(report.brands.total, 2);
        assert_eq!(report.items.total, 2);
        assert_eq!(recorder.seen(), ["1", "5"]);
    }

    #[tokio::test]
    async fn listing_failure_ends_run() {
        let site = FakeSite {
            listing_down: true,
            ..FakeSite::default()
        };
        let report = engine(site, Arc::new(MemoryCheckpointStore::new()))
            .run("r", &Recorder::default())
            .await;
        assert!(report.root_error.is_some());
        assert_eq!(report.brands.total, 0);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let site = FakeSite::default().brand("a", &["taco"]);
        let recorder = Recorder::default();
        let report = engine(site, checkpoints.clone())
            .with_cancellation(cancel)
            .run("r", &recorder)
            .await;

        assert!(report.cancelled);
        assert_eq!(report.brands.not_started, 1);
        assert!(recorder.seen().is_empty());
        assert_eq!(checkpoints.status("r").await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn unrecorded_completion_is_not_completed() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        checkpoints.fail_completions(true);
        let site = FakeSite::default().brand("a", &["taco"]);

        let report = engine(site, checkpoints.clone())
            .run("r", &Recorder::default())
            .await;

        assert_eq!(report.checkpoint_failures, 1);
        assert_eq!(report.items.failed, 1);
        assert!(checkpoints.load("r").await.unwrap().is_empty());
    }
}
