//! Pipeline stages of a harvest run.
//!
//! - `crawl`: checkpointed traversal of brands and menu items
//! - `normalize`: raw payloads to canonical entities
//! - `enrich`: optional additive annotations
//! - `validate`: admission rules
//! - `upload`: idempotent upserts
//! - `report`: rejection report and run summary
//! - `pipeline`: wiring for a full run

pub mod crawl;
pub mod enrich;
pub mod normalize;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod report;
pub mod upload;
pub mod validate;

pub use crawl::{CrawlEngine, CrawlReport, UnitProcessor};
pub use enrich::{
    Annotator, CategoryLookup, Enricher, EnrichmentError, EnrichmentStats, GoldenRatio, ItemImage,
    MacroProfile,
};
pub use normalize::{NormalizationGap, NormalizedItem, normalize_brand, normalize_item};
pub use pipeline::{
    Harvester, IngestProcessor, RunOptions, default_run_id, run_pipeline, run_status,
    run_validate,
};
pub use report::{
    JsonlRejectionLog, MemoryRejectionLog, Rejection, RejectionSink, RunSummary, UnitCounts,
};
pub use upload::{Batch, UploadFailure, UploadReport, UpsertUploader};
pub use validate::{EntityRef, ValidationContext, Verdict, Violation, validate};
