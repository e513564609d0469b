// src/services/traversal.rs

//! The three traversal levels of the site: brands, menu items, servings.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::{FetchError, Result};
use crate::models::{BrandMenu, Config, RawBrand, RawMenuItem, RawServing};
use crate::services::brands::parse_brand_listing;
use crate::services::fetcher::{FetchStats, Fetcher};
use crate::services::menu::parse_brand_menu;
use crate::services::nutrition::parse_item_page;

/// Label used when an item page offers no serving-size dropdown.
pub const SINGLE_SERVING_LABEL: &str = "1 serving";

/// Servings gathered for one menu item. Individual serving pages may fail
/// without discarding the ones that were fetched.
#[derive(Debug, Default)]
pub struct ServingHarvest {
    pub servings: Vec<RawServing>,
    pub failures: Vec<FetchError>,
}

/// Enumerates child units from a parent unit.
///
/// Each level is independent: implementations hold no per-traversal state,
/// so the engine may call them concurrently and in any order.
#[async_trait]
pub trait Traversal: Send + Sync {
    /// All brands on the site, in enumeration order.
    async fn brands(&self) -> Result<Vec<RawBrand>>;

    /// A brand's logo and menu items, in enumeration order.
    async fn menu(&self, brand: &RawBrand) -> Result<BrandMenu>;

    /// Every serving variation of a menu item.
    async fn servings(&self, item: &RawMenuItem) -> Result<ServingHarvest>;

    /// Network counters, when the traversal talks to the network.
    fn fetch_stats(&self) -> Option<FetchStats> {
        None
    }
}

/// [`Traversal`] over the live site, one [`Fetcher`] shared by all levels.
pub struct SiteTraversal {
    fetcher: Arc<Fetcher>,
    listing_url: Url,
}

impl SiteTraversal {
    pub fn new(fetcher: Arc<Fetcher>, listing_url: Url) -> Self {
        Self {
            fetcher,
            listing_url,
        }
    }

    pub fn from_config(config: &Config, fetcher: Arc<Fetcher>) -> Result<Self> {
        Ok(Self::new(fetcher, config.crawler.listing_url()?))
    }

    async fn fetch(&self, url: &str) -> Result<(Url, String)> {
        let page = self.fetcher.fetch(url).await?;
        Ok((Url::parse(&page.url)?, page.body))
    }
}

#[async_trait]
impl Traversal for SiteTraversal {
    async fn brands(&self) -> Result<Vec<RawBrand>> {
        let (base, body) = self.fetch(self.listing_url.as_str()).await?;
        parse_brand_listing(&body, &base)
    }

    async fn menu(&self, brand: &RawBrand) -> Result<BrandMenu> {
        let (base, body) = self.fetch(&brand.url).await?;
        parse_brand_menu(&body, &base)
    }

    async fn servings(&self, item: &RawMenuItem) -> Result<ServingHarvest> {
        let (base, body) = self.fetch(&item.url).await?;
        let page = parse_item_page(&body, &base, "")?;

        if page.options.is_empty() {
            let mut serving = page.serving;
            serving.label = SINGLE_SERVING_LABEL.to_string();
            return Ok(ServingHarvest {
                servings: vec![serving],
                failures: Vec::new(),
            });
        }

        let mut harvest = ServingHarvest::default();
        for option in &page.options {
            if option.url == base.as_str() {
                let mut serving = page.serving.clone();
                serving.label = option.label.clone();
                harvest.servings.push(serving);
                continue;
            }

            match self.fetcher.fetch(&option.url).await {
                Ok(raw) => {
                    let option_base = Url::parse(&raw.url)?;
                    let parsed = parse_item_page(&raw.body, &option_base, &option.label)?;
                    harvest.servings.push(parsed.serving);
                }
                Err(error) => {
                    log::warn!(
                        "Serving '{}' of {} failed: {}",
                        option.label,
                        item.name,
                        error
                    );
                    harvest.failures.push(error);
                }
            }
        }

        Ok(harvest)
    }

    fn fetch_stats(&self) -> Option<FetchStats> {
        Some(self.fetcher.stats())
    }
}
