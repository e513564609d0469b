//! Raw payloads as scraped from the source site, before normalization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A brand card from the restaurant listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBrand {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// A menu item link from a brand's menu page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMenuItem {
    pub name: String,
    pub url: String,
    pub category: String,
}

/// Everything extracted from a brand's menu page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrandMenu {
    pub logo_url: Option<String>,
    pub items: Vec<RawMenuItem>,
}

/// A serving-size option linked from an item page's dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingOption {
    pub label: String,
    pub url: String,
}

/// Allergen lists exactly as they appear on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAllergens {
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub does_not_contain: Vec<String>,
    #[serde(default)]
    pub unknown: Vec<String>,
}

impl RawAllergens {
    pub fn is_empty(&self) -> bool {
        self.contains.is_empty() && self.does_not_contain.is_empty() && self.unknown.is_empty()
    }
}

/// Nutrition and allergen data from a single serving page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawServing {
    pub label: String,
    pub title: String,
    /// Snake-cased nutrition table keys to their raw text values.
    #[serde(default)]
    pub nutrition: BTreeMap<String, String>,
    #[serde(default)]
    pub allergens: RawAllergens,
    #[serde(default)]
    pub ingredients: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// An item page: its own serving data plus any other serving options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPage {
    pub serving: RawServing,
    pub options: Vec<ServingOption>,
}

/// One fully traversed menu item, ready for normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub brand: RawBrand,
    pub item: RawMenuItem,
    pub servings: Vec<RawServing>,
}
