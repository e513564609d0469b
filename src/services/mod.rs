//! Service layer for the harvester.
//!
//! This module contains:
//! - Request pacing (`RateLimiter`) and backoff (`RetryPolicy`)
//! - Page fetching (`Fetcher`)
//! - Page extractors for the brand listing, menu and item pages
//! - The traversal capability the crawl engine drives (`Traversal`)

mod brands;
pub mod fetcher;
mod menu;
mod nutrition;
pub mod rate_limit;
pub mod retry;
mod traversal;

pub use brands::parse_brand_listing;
pub use fetcher::{FetchStats, Fetcher, HttpTransport, RawPage, Transport};
pub use menu::parse_brand_menu;
pub use nutrition::{parse_item_page, to_snake_case};
pub use rate_limit::RateLimiter;
pub use retry::{RetryFailure, RetryPolicy, Retryable};
pub use traversal::{SINGLE_SERVING_LABEL, ServingHarvest, SiteTraversal, Traversal};
