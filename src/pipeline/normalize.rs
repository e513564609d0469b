// src/pipeline/normalize.rs

//! Raw scraped payloads to canonical entities.
//!
//! Normalization never fails. Missing or unparsable source fields degrade to
//! [`Amount::Unknown`] (or `None`) and are recorded as [`NormalizationGap`]s;
//! the validator decides whether the result is admissible.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::models::id::{brand_id, menu_item_id, variation_id};
use crate::models::{
    Allergens, Amount, Brand, BrandCategory, Cuisine, MenuItem, MenuItemVariation, Nutrition,
    RawAllergens, RawBrand, RawServing, ScrapedItem,
};
use crate::utils::normalize_whitespace;

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"([0-9]+\.?[0-9]*)").ok());

/// Scraped nutrition keys, in priority order, for each canonical field.
const NUTRIENT_SOURCES: [(&str, &[&str]); 8] = [
    ("calories", &["calories"]),
    ("protein_g", &["protein"]),
    ("carbs_g", &["total_carbohydrates", "carbohydrates"]),
    ("fat_g", &["total_fat", "fat"]),
    ("sodium_mg", &["sodium"]),
    ("fiber_g", &["dietary_fiber", "fiber"]),
    ("sugar_g", &["sugars", "total_sugars"]),
    ("satFat_g", &["saturated_fat"]),
];

const SERVING_SIZE_KEY: &str = "serving_size";

/// A source field that could not be mapped faithfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationGap {
    pub entity_id: String,
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub reason: String,
}

impl NormalizationGap {
    fn new(entity_id: &str, field: impl Into<String>, raw: Option<&str>, reason: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            field: field.into(),
            raw: raw.map(str::to_string),
            reason: reason.to_string(),
        }
    }
}

/// A menu item and its variations, normalized from one [`ScrapedItem`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub item: MenuItem,
    pub variations: Vec<MenuItemVariation>,
    pub gaps: Vec<NormalizationGap>,
}

/// Build the canonical brand. `menu_logo` from the brand's own page wins
/// over the listing thumbnail.
pub fn normalize_brand(raw: &RawBrand, menu_logo: Option<&str>, now: DateTime<Utc>) -> Brand {
    let name = normalize_whitespace(&raw.name);
    Brand {
        id: brand_id(&name),
        logo_url: menu_logo
            .map(str::to_string)
            .or_else(|| raw.logo_url.clone()),
        source_url: Some(raw.url.clone()),
        name,
        category: BrandCategory::Unknown,
        cuisine: Cuisine::Unknown,
        category_source: None,
        verified: false,
        created_at: now,
        updated_at: now,
    }
}

/// Build a menu item and one variation per distinct serving label.
pub fn normalize_item(brand_id: &str, scraped: &ScrapedItem) -> NormalizedItem {
    let name = normalize_whitespace(&scraped.item.name);
    let source_url = scraped.item.url.trim().to_string();
    let id = menu_item_id(brand_id, &name, &source_url);
    let mut gaps = Vec::new();

    let category = normalize_whitespace(&scraped.item.category);
    let item = MenuItem {
        id: id.clone(),
        brand_id: brand_id.to_string(),
        name,
        description: None,
        category,
        estimated_price: None,
        cuisine_types: BTreeSet::new(),
        macro_profile: BTreeSet::new(),
        golden_ratio: None,
        golden_ratio_category: None,
        menu_item_image_url: None,
        source_url,
        is_active: true,
    };

    if scraped.servings.is_empty() {
        gaps.push(NormalizationGap::new(&id, "servings", None, "no serving pages"));
    }

    let allergens = merge_allergens(
        scraped.servings.iter().map(|s| &s.allergens),
        &id,
        &mut gaps,
    );
    let item_ingredients = scraped
        .servings
        .iter()
        .filter_map(|s| s.ingredients.as_deref())
        .map(normalize_whitespace)
        .find(|t| !t.is_empty());

    let mut seen_labels = HashSet::new();
    let mut variations = Vec::new();
    for serving in &scraped.servings {
        let label = normalize_whitespace(&serving.label);
        if !seen_labels.insert(label.clone()) {
            gaps.push(NormalizationGap::new(
                &id,
                "servingLabel",
                Some(label.as_str()),
                "duplicate serving label",
            ));
            continue;
        }
        variations.push(normalize_variation(
            &item,
            &label,
            serving,
            &allergens,
            item_ingredients.as_deref(),
            &mut gaps,
        ));
    }

    NormalizedItem {
        item,
        variations,
        gaps,
    }
}

fn normalize_variation(
    item: &MenuItem,
    label: &str,
    serving: &RawServing,
    allergens: &Allergens,
    item_ingredients: Option<&str>,
    gaps: &mut Vec<NormalizationGap>,
) -> MenuItemVariation {
    let id = variation_id(&item.id, label);
    let nutrition = map_nutrition(&serving.nutrition, &id, gaps);

    MenuItemVariation {
        serving_label: label.to_string(),
        serving_text: serving
            .nutrition
            .get(SERVING_SIZE_KEY)
            .map(|t| normalize_whitespace(t))
            .filter(|t| !t.is_empty()),
        nutrition,
        allergens: allergens.clone(),
        ingredients: serving
            .ingredients
            .as_deref()
            .map(normalize_whitespace)
            .filter(|t| !t.is_empty())
            .or_else(|| item_ingredients.map(str::to_string)),
        image_url: serving.image_url.clone(),
        menu_item_id: item.id.clone(),
        brand_id: item.brand_id.clone(),
        is_active: true,
        id,
    }
}

fn map_nutrition(
    raw: &BTreeMap<String, String>,
    entity_id: &str,
    gaps: &mut Vec<NormalizationGap>,
) -> Nutrition {
    let mut values = [Amount::Unknown; 8];

    for (slot, (field, sources)) in values.iter_mut().zip(NUTRIENT_SOURCES) {
        let Some(text) = sources.iter().find_map(|key| raw.get(*key)) else {
            gaps.push(NormalizationGap::new(entity_id, field, None, "missing"));
            continue;
        };
        match parse_amount(text) {
            Some(v) => *slot = Amount::Known(v),
            None => gaps.push(NormalizationGap::new(
                entity_id,
                field,
                Some(text.as_str()),
                "not a number",
            )),
        }
    }

    let [calories, protein_g, carbs_g, fat_g, sodium_mg, fiber_g, sugar_g, sat_fat_g] = values;
    Nutrition {
        calories,
        protein_g,
        carbs_g,
        fat_g,
        sodium_mg,
        fiber_g,
        sugar_g,
        sat_fat_g,
    }
}

/// First decimal number in `text`, ignoring thousands separators and `<`/`>`
/// qualifiers: `"1,230 mg"` is 1230, `"<1g"` is 1.
pub fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '<' | '>'))
        .collect();
    let re = NUMBER.as_ref()?;
    re.captures(cleaned.trim())?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Normalize an allergen label into a token: `"Tree Nuts"` becomes `"tree_nuts"`.
pub fn allergen_token(text: &str) -> String {
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Merge allergen claims from every serving page of one item.
///
/// A token claimed by more than one class anywhere is demoted to `unknown`.
fn merge_allergens<'a>(
    sources: impl Iterator<Item = &'a RawAllergens>,
    entity_id: &str,
    gaps: &mut Vec<NormalizationGap>,
) -> Allergens {
    let mut merged = Allergens::default();
    for raw in sources {
        let classes = [
            (&raw.contains, &mut merged.contains),
            (&raw.does_not_contain, &mut merged.does_not_contain),
            (&raw.unknown, &mut merged.unknown),
        ];
        for (tokens, target) in classes {
            target.extend(
                tokens
                    .iter()
                    .map(|t| allergen_token(t))
                    .filter(|t| !t.is_empty()),
            );
        }
    }

    for token in merged.overlaps() {
        let contains = merged.contains.remove(&token);
        let absent = merged.does_not_contain.remove(&token);
        if contains && absent {
            gaps.push(NormalizationGap::new(
                entity_id,
                format!("allergens.{token}"),
                None,
                "conflicting claims",
            ));
        }
        merged.unknown.insert(token);
    }

    merged
}
