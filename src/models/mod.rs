// src/models/mod.rs

//! Domain models for the harvester.
//!
//! Configuration, raw scraped payloads, the canonical entities they are
//! normalized into, and the units of work the crawl is checkpointed by.

mod config;
mod entity;
pub mod id;
mod raw;
mod unit;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, EnrichmentConfig, LimitsConfig, LoggingConfig, PathsConfig,
    RetryConfig,
};
pub use entity::{
    Allergens, Amount, Brand, BrandCategory, CategorySource, Cuisine, GoldenRatioCategory,
    MacroTag, MenuItem, MenuItemVariation, Nutrition,
};
pub use raw::{
    BrandMenu, ItemPage, RawAllergens, RawBrand, RawMenuItem, RawServing, ScrapedItem,
    ServingOption,
};
pub use unit::{CheckpointRecord, CheckpointStatus, UnitKey, UnitState, UnitSummary};
