// src/pipeline/enrich.rs

//! Optional, purely additive annotation of normalized entities.
//!
//! Annotators may only fill optional fields (category, cuisine, description,
//! macro tags, golden ratio, item image, ...). The [`Enricher`] checks every annotation against the
//! entity it was given and discards any that touches an identifier or a
//! required field, so enrichment can never change what gets upserted where.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::models::{
    Amount, Brand, BrandCategory, CategorySource, Config, Cuisine, GoldenRatioCategory, MacroTag,
    MenuItem, MenuItemVariation, Nutrition,
};

#[derive(Error, Debug)]
#[error("{annotator} could not annotate {entity}: {message}")]
pub struct EnrichmentError {
    pub annotator: String,
    pub entity: String,
    pub message: String,
}

/// A pluggable annotation step. Both hooks default to a no-op.
#[async_trait]
pub trait Annotator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn annotate_brand(&self, brand: Brand) -> std::result::Result<Brand, EnrichmentError> {
        Ok(brand)
    }

    async fn annotate_item(
        &self,
        item: MenuItem,
        _variations: &[MenuItemVariation],
        _brand: &Brand,
    ) -> std::result::Result<MenuItem, EnrichmentError> {
        Ok(item)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub applied: usize,
    pub discarded: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct Enricher {
    annotators: Vec<Box<dyn Annotator>>,
    applied: AtomicUsize,
    discarded: AtomicUsize,
    failed: AtomicUsize,
}

impl Enricher {
    /// An enricher that leaves every entity untouched.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with(mut self, annotator: impl Annotator + 'static) -> Self {
        self.annotators.push(Box::new(annotator));
        self
    }

    /// Built-in annotators, as enabled in `[enrichment]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = &config.enrichment;
        let mut enricher = Self::default();
        if !settings.enabled {
            return Ok(enricher);
        }
        if let Some(path) = &settings.category_lookup {
            enricher = enricher.with(CategoryLookup::load(path)?);
        }
        if settings.macro_profile {
            enricher = enricher.with(MacroProfile);
        }
        if settings.golden_ratio {
            enricher = enricher.with(GoldenRatio);
        }
        if settings.item_images {
            enricher = enricher.with(ItemImage);
        }
        Ok(enricher)
    }

    pub fn is_empty(&self) -> bool {
        self.annotators.is_empty()
    }

    pub fn stats(&self) -> EnrichmentStats {
        EnrichmentStats {
            applied: self.applied.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn enrich_brand(&self, mut brand: Brand) -> Brand {
        for annotator in &self.annotators {
            match annotator.annotate_brand(brand.clone()).await {
                Ok(candidate) if brand_is_additive(&brand, &candidate) => {
                    if candidate != brand {
                        self.applied.fetch_add(1, Ordering::Relaxed);
                    }
                    brand = candidate;
                }
                Ok(_) => self.discard(annotator.name(), &brand.id),
                Err(e) => self.fail(e),
            }
        }
        brand
    }

    pub async fn enrich_item(
        &self,
        mut item: MenuItem,
        variations: &[MenuItemVariation],
        brand: &Brand,
    ) -> MenuItem {
        for annotator in &self.annotators {
            match annotator.annotate_item(item.clone(), variations, brand).await {
                Ok(candidate) if item_is_additive(&item, &candidate) => {
                    if candidate != item {
                        self.applied.fetch_add(1, Ordering::Relaxed);
                    }
                    item = candidate;
                }
                Ok(_) => self.discard(annotator.name(), &item.id),
                Err(e) => self.fail(e),
            }
        }
        item
    }

    fn discard(&self, annotator: &str, id: &str) {
        log::warn!("Discarded non-additive annotation from {} on {}", annotator, id);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn fail(&self, error: EnrichmentError) {
        log::warn!("{}", error);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

fn fill_only<T: PartialEq>(before: &Option<T>, after: &Option<T>) -> bool {
    before.is_none() || before == after
}

fn brand_is_additive(before: &Brand, after: &Brand) -> bool {
    before.id == after.id
        && before.name == after.name
        && before.source_url == after.source_url
        && before.verified == after.verified
        && before.created_at == after.created_at
        && before.updated_at == after.updated_at
        && fill_only(&before.logo_url, &after.logo_url)
        && fill_only(&before.category_source, &after.category_source)
        && (before.category == BrandCategory::Unknown || before.category == after.category)
        && (before.cuisine == Cuisine::Unknown || before.cuisine == after.cuisine)
}

fn item_is_additive(before: &MenuItem, after: &MenuItem) -> bool {
    before.id == after.id
        && before.brand_id == after.brand_id
        && before.name == after.name
        && before.category == after.category
        && before.source_url == after.source_url
        && before.is_active == after.is_active
        && fill_only(&before.description, &after.description)
        && fill_only(&before.estimated_price, &after.estimated_price)
        && before.cuisine_types.is_subset(&after.cuisine_types)
        && before.macro_profile.is_subset(&after.macro_profile)
        && fill_only(&before.golden_ratio, &after.golden_ratio)
        && fill_only(&before.golden_ratio_category, &after.golden_ratio_category)
        && fill_only(&before.menu_item_image_url, &after.menu_item_image_url)
}

/// One row of the brand lookup table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupEntry {
    pub name: String,
    #[serde(default)]
    pub category: BrandCategory,
    #[serde(default)]
    pub cuisine: Cuisine,
}

#[derive(Debug, Deserialize)]
struct LookupFile {
    #[serde(default, rename = "brand")]
    brands: Vec<LookupEntry>,
}

/// Brand category and cuisine from a curated table, keyed by
/// case-insensitive brand name.
///
/// ```toml
/// [[brand]]
/// name = "Taco Bell"
/// category = "FastFood"
/// cuisine = "Mexican"
/// ```
#[derive(Debug, Clone, Default)]
pub struct CategoryLookup {
    by_name: HashMap<String, LookupEntry>,
}

impl CategoryLookup {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let file: LookupFile = toml::from_str(&content)?;
        log::info!(
            "Loaded {} brand categories from {:?}",
            file.brands.len(),
            path.as_ref()
        );
        Ok(Self::from_entries(file.brands))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = LookupEntry>) -> Self {
        let by_name = entries
            .into_iter()
            .map(|e| (e.name.trim().to_lowercase(), e))
            .collect();
        Self { by_name }
    }

    pub fn get(&self, brand_name: &str) -> Option<&LookupEntry> {
        self.by_name.get(&brand_name.trim().to_lowercase())
    }
}

#[async_trait]
impl Annotator for CategoryLookup {
    fn name(&self) -> &'static str {
        "category-lookup"
    }

    async fn annotate_brand(
        &self,
        mut brand: Brand,
    ) -> std::result::Result<Brand, EnrichmentError> {
        let Some(entry) = self.get(&brand.name) else {
            return Ok(brand);
        };
        let mut changed = false;
        if brand.category == BrandCategory::Unknown && entry.category != BrandCategory::Unknown {
            brand.category = entry.category;
            changed = true;
        }
        if brand.cuisine == Cuisine::Unknown && entry.cuisine != Cuisine::Unknown {
            brand.cuisine = entry.cuisine;
            changed = true;
        }
        if changed && brand.category_source.is_none() {
            brand.category_source = Some(CategorySource::Lookup);
        }
        Ok(brand)
    }

    async fn annotate_item(
        &self,
        mut item: MenuItem,
        _variations: &[MenuItemVariation],
        brand: &Brand,
    ) -> std::result::Result<MenuItem, EnrichmentError> {
        if item.cuisine_types.is_empty() && brand.cuisine != Cuisine::Unknown {
            item.cuisine_types.insert(brand.cuisine);
        }
        Ok(item)
    }
}

const KCAL_PER_G_PROTEIN: f64 = 4.0;
const KCAL_PER_G_CARBS: f64 = 4.0;
const KCAL_PER_G_FAT: f64 = 9.0;
const SODIUM_DAILY_VALUE_MG: f64 = 2300.0;

/// Macronutrient profile tags derived from an item's first variation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacroProfile;

impl MacroProfile {
    /// Tags for one nutrition panel. Nutrients that are unknown never produce
    /// a tag of their own.
    pub fn tags(nutrition: &Nutrition) -> Vec<MacroTag> {
        let known = |a: Amount| a.known();
        let (calories, protein, carbs, fat) = (
            known(nutrition.calories),
            known(nutrition.protein_g),
            known(nutrition.carbs_g),
            known(nutrition.fat_g),
        );

        let (p, c, f) = (
            protein.unwrap_or(0.0),
            carbs.unwrap_or(0.0),
            fat.unwrap_or(0.0),
        );
        if calories.unwrap_or(0.0) == 0.0 && p == 0.0 && c == 0.0 && f == 0.0 {
            return Vec::new();
        }

        let (p_kcal, c_kcal, f_kcal) = (
            p * KCAL_PER_G_PROTEIN,
            c * KCAL_PER_G_CARBS,
            f * KCAL_PER_G_FAT,
        );
        let total = calories.unwrap_or(0.0).max(p_kcal + c_kcal + f_kcal).max(1.0);
        let (p_pct, c_pct, f_pct) = (
            p_kcal / total * 100.0,
            c_kcal / total * 100.0,
            f_kcal / total * 100.0,
        );

        let mut tags = Vec::new();
        if protein.is_some() {
            if p >= 25.0 || (p_pct >= 30.0 && p >= 15.0) {
                tags.push(MacroTag::HighProtein);
            } else if p < 10.0 && total > 250.0 {
                tags.push(MacroTag::LowProtein);
            }
        }
        if carbs.is_some() {
            if c < 20.0 || (c_pct <= 20.0 && total > 250.0) {
                tags.push(MacroTag::LowCarb);
            } else if c_pct >= 60.0 {
                tags.push(MacroTag::HighCarb);
            }
        }
        if fat.is_some() {
            if f_pct <= 20.0 && total > 200.0 {
                tags.push(MacroTag::LowFat);
            } else if f_pct >= 50.0 {
                tags.push(MacroTag::HighFat);
            }
        }
        if total <= 350.0 {
            tags.push(MacroTag::LowCalorie);
        } else if total >= 700.0 {
            tags.push(MacroTag::HighCalorie);
        }
        if let Some(sodium) = known(nutrition.sodium_mg) {
            let dv_pct = sodium / SODIUM_DAILY_VALUE_MG * 100.0;
            if dv_pct <= 10.0 {
                tags.push(MacroTag::LowSodium);
            } else if dv_pct >= 20.0 {
                tags.push(MacroTag::HighSodium);
            }
        }
        if let Some(sugar) = known(nutrition.sugar_g) {
            if sugar <= 8.0 {
                tags.push(MacroTag::LowSugar);
            } else if sugar >= 20.0 {
                tags.push(MacroTag::HighSugar);
            }
        }
        if carbs.is_some() && fat.is_some() && c <= 15.0 && f_pct >= 60.0 && c_pct <= 10.0 {
            tags.push(MacroTag::KetoFriendly);
        }
        if protein.is_some()
            && carbs.is_some()
            && fat.is_some()
            && (30.0..=50.0).contains(&c_pct)
            && (20.0..=40.0).contains(&p_pct)
            && (20.0..=40.0).contains(&f_pct)
            && total >= 300.0
        {
            tags.push(MacroTag::Balanced);
        }
        tags
    }
}

#[async_trait]
impl Annotator for MacroProfile {
    fn name(&self) -> &'static str {
        "macro-profile"
    }

    async fn annotate_item(
        &self,
        mut item: MenuItem,
        variations: &[MenuItemVariation],
        _brand: &Brand,
    ) -> std::result::Result<MenuItem, EnrichmentError> {
        if let Some(first) = variations.first() {
            item.macro_profile.extend(Self::tags(&first.nutrition));
        }
        Ok(item)
    }
}

/// Protein per calorie of an item's first variation, scaled by ten.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoldenRatio;

impl GoldenRatio {
    /// Rounded to three decimals; zero calories give a ratio of zero.
    /// `None` when protein or calories are unknown.
    pub fn ratio(nutrition: &Nutrition) -> Option<f64> {
        let protein = nutrition.protein_g.known()?;
        let calories = nutrition.calories.known()?;
        if calories <= 0.0 {
            return Some(0.0);
        }
        Some((protein / calories * 10.0 * 1000.0).round() / 1000.0)
    }
}

#[async_trait]
impl Annotator for GoldenRatio {
    fn name(&self) -> &'static str {
        "golden-ratio"
    }

    async fn annotate_item(
        &self,
        mut item: MenuItem,
        variations: &[MenuItemVariation],
        _brand: &Brand,
    ) -> std::result::Result<MenuItem, EnrichmentError> {
        if item.golden_ratio.is_some() {
            return Ok(item);
        }
        if let Some(ratio) = variations.first().and_then(|v| Self::ratio(&v.nutrition)) {
            item.golden_ratio = Some(ratio);
            item.golden_ratio_category = Some(GoldenRatioCategory::classify(ratio));
        }
        Ok(item)
    }
}

/// Copies the first variation image onto its menu item.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemImage;

#[async_trait]
impl Annotator for ItemImage {
    fn name(&self) -> &'static str {
        "item-image"
    }

    async fn annotate_item(
        &self,
        mut item: MenuItem,
        variations: &[MenuItemVariation],
        _brand: &Brand,
    ) -> std::result::Result<MenuItem, EnrichmentError> {
        if item.menu_item_image_url.is_none() {
            item.menu_item_image_url = variations.iter().find_map(|v| v.image_url.clone());
        }
        Ok(item)
    }
}
