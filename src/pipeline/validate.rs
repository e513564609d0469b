// src/pipeline/validate.rs

//! Admission rules for normalized entities.
//!
//! Every check runs, so a rejection lists all of an entity's problems at
//! once. Cross-entity references are checked against a [`ValidationContext`]
//! of parents that have already been accepted and stored.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use url::Url;

use crate::models::id::{brand_id, is_well_formed, menu_item_id, variation_id};
use crate::models::{Brand, GoldenRatioCategory, MenuItem, MenuItemVariation};
use crate::storage::Collection;

pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_GOLDEN_RATIO: f64 = 100.0;

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub reason: String,
}

impl Violation {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// `Ok(())` when the entity is admissible, otherwise every violation found.
pub type Verdict = Result<(), Vec<Violation>>;

/// Borrowed view of any entity, for callers that validate heterogeneously.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Brand(&'a Brand),
    MenuItem(&'a MenuItem),
    Variation(&'a MenuItemVariation),
}

impl EntityRef<'_> {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Brand(_) => Collection::RestaurantBrands,
            Self::MenuItem(_) => Collection::MenuItems,
            Self::Variation(_) => Collection::MenuItemVariations,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Brand(b) => &b.id,
            Self::MenuItem(i) => &i.id,
            Self::Variation(v) => &v.id,
        }
    }
}

/// Parents that children may reference.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    brands: HashSet<String>,
    /// menu item id → brand id
    items: HashMap<String, String>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_brand(&mut self, id: impl Into<String>) {
        self.brands.insert(id.into());
    }

    pub fn accept_item(&mut self, id: impl Into<String>, brand_id: impl Into<String>) {
        self.items.insert(id.into(), brand_id.into());
    }

    pub fn forget_item(&mut self, id: &str) {
        self.items.remove(id);
    }

    pub fn has_brand(&self, id: &str) -> bool {
        self.brands.contains(id)
    }

    pub fn item_brand(&self, id: &str) -> Option<&str> {
        self.items.get(id).map(String::as_str)
    }
}

pub fn validate(entity: EntityRef<'_>, context: &ValidationContext) -> Verdict {
    match entity {
        EntityRef::Brand(b) => validate_brand(b),
        EntityRef::MenuItem(i) => validate_item(i, context),
        EntityRef::Variation(v) => validate_variation(v, context),
    }
}

pub fn validate_brand(brand: &Brand) -> Verdict {
    let mut violations = Vec::new();

    check_id(&mut violations, &brand.id, &brand_id(&brand.name));
    check_non_empty(&mut violations, "name", &brand.name);
    check_optional_url(&mut violations, "logoUrl", brand.logo_url.as_deref());
    check_optional_url(&mut violations, "sourceUrl", brand.source_url.as_deref());
    if brand.updated_at < brand.created_at {
        violations.push(Violation::new("updatedAt", "earlier than createdAt"));
    }

    verdict(violations)
}

pub fn validate_item(item: &MenuItem, context: &ValidationContext) -> Verdict {
    let mut violations = Vec::new();

    check_id(
        &mut violations,
        &item.id,
        &menu_item_id(&item.brand_id, &item.name, &item.source_url),
    );
    check_non_empty(&mut violations, "name", &item.name);
    check_non_empty(&mut violations, "category", &item.category);
    check_url(&mut violations, "sourceUrl", &item.source_url);

    if let Some(description) = &item.description {
        let len = description.chars().count();
        if len > MAX_DESCRIPTION_CHARS {
            violations.push(Violation::new(
                "description",
                format!("{len} characters, limit is {MAX_DESCRIPTION_CHARS}"),
            ));
        }
    }
    if let Some(price) = item.estimated_price {
        if !price.is_finite() || price < 0.0 {
            violations.push(Violation::new("estimatedPrice", format!("invalid price {price}")));
        }
    }
    check_golden_ratio(&mut violations, item.golden_ratio, item.golden_ratio_category);
    check_optional_url(
        &mut violations,
        "menuItemImageUrl",
        item.menu_item_image_url.as_deref(),
    );

    if !context.has_brand(&item.brand_id) {
        violations.push(Violation::new(
            "brandId",
            format!("references unknown brand {}", item.brand_id),
        ));
    }

    verdict(violations)
}

pub fn validate_variation(variation: &MenuItemVariation, context: &ValidationContext) -> Verdict {
    let mut violations = Vec::new();

    check_id(
        &mut violations,
        &variation.id,
        &variation_id(&variation.menu_item_id, &variation.serving_label),
    );
    check_non_empty(&mut violations, "servingLabel", &variation.serving_label);
    check_optional_url(&mut violations, "imageUrl", variation.image_url.as_deref());

    for (field, amount) in variation.nutrition.fields() {
        if let Some(v) = amount.known() {
            if !v.is_finite() || v < 0.0 {
                violations.push(Violation::new(field, format!("invalid amount {v}")));
            }
        }
    }

    let overlaps = variation.allergens.overlaps();
    if !overlaps.is_empty() {
        let tokens: Vec<_> = overlaps.into_iter().collect();
        violations.push(Violation::new(
            "allergens",
            format!("in more than one set: {}", tokens.join(", ")),
        ));
    }

    match context.item_brand(&variation.menu_item_id) {
        None => violations.push(Violation::new(
            "menuItemId",
            format!("references unknown menu item {}", variation.menu_item_id),
        )),
        Some(brand) if brand != variation.brand_id => violations.push(Violation::new(
            "brandId",
            format!("differs from its menu item's brand {brand}"),
        )),
        Some(_) => {}
    }

    verdict(violations)
}

fn verdict(violations: Vec<Violation>) -> Verdict {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn check_id(violations: &mut Vec<Violation>, id: &str, expected: &str) {
    if !is_well_formed(id) {
        violations.push(Violation::new("id", "not a content id"));
    } else if id != expected {
        violations.push(Violation::new("id", "does not match natural key"));
    }
}

fn check_non_empty(violations: &mut Vec<Violation>, field: &str, value: &str) {
    if value.trim().is_empty() {
        violations.push(Violation::new(field, "empty"));
    }
}

fn check_url(violations: &mut Vec<Violation>, field: &str, value: &str) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => violations.push(Violation::new(
            field,
            format!("unsupported scheme {}", url.scheme()),
        )),
        Err(e) => violations.push(Violation::new(field, format!("not a URL: {e}"))),
    }
}

fn check_optional_url(violations: &mut Vec<Violation>, field: &str, value: Option<&str>) {
    if let Some(value) = value {
        check_url(violations, field, value);
    }
}

fn check_golden_ratio(
    violations: &mut Vec<Violation>,
    ratio: Option<f64>,
    category: Option<GoldenRatioCategory>,
) {
    match (ratio, category) {
        (None, None) => {}
        (Some(r), _) if !r.is_finite() || !(0.0..=MAX_GOLDEN_RATIO).contains(&r) => {
            violations.push(Violation::new("goldenRatio", format!("out of range: {r}")));
        }
        (Some(r), Some(c)) if GoldenRatioCategory::classify(r) != c => {
            violations.push(Violation::new(
                "goldenRatioCategory",
                format!("{c:?} does not match ratio {r}"),
            ));
        }
        (Some(_), Some(_)) => {}
        (Some(_), None) => violations.push(Violation::new("goldenRatioCategory", "missing")),
        (None, Some(_)) => violations.push(Violation::new("goldenRatio", "missing")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{Amount, RawBrand, RawMenuItem, RawServing, ScrapedItem};
    use crate::pipeline::normalize::{normalize_brand, normalize_item};

    fn fixtures() -> (Brand, MenuItem, MenuItemVariation) {
        let raw_brand = RawBrand {
            name: "Taco Bell".into(),
            url: "https://site.test/taco-bell".into(),
            logo_url: None,
        };
        let brand = normalize_brand(&raw_brand, None, Utc::now());
        let scraped = ScrapedItem {
            brand: raw_brand,
            item: RawMenuItem {
                name: "Crunchy Taco".into(),
                url: "https://site.test/taco-bell/crunchy-taco".into(),
                category: "Tacos".into(),
            },
            servings: vec![RawServing {
                label: "1 taco".into(),
                nutrition: BTreeMap::from([("calories".to_string(), "170".to_string())]),
                ..RawServing::default()
            }],
        };
        let mut normalized = normalize_item(&brand.id, &scraped);
        let variation = normalized.variations.remove(0);
        (brand, normalized.item, variation)
    }

    fn context(brand: &Brand, item: &MenuItem) -> ValidationContext {
        let mut ctx = ValidationContext::new();
        ctx.accept_brand(&brand.id);
        ctx.accept_item(&item.id, &brand.id);
        ctx
    }

    fn fields(verdict: Verdict) -> Vec<String> {
        verdict
            .unwrap_err()
            .into_iter()
            .map(|v| v.field)
            .collect()
    }

    #[test]
    fn normalized_entities_pass() {
        let (brand, item, variation) = fixtures();
        let ctx = context(&brand, &item);
        assert!(validate(EntityRef::Brand(&brand), &ctx).is_ok());
        assert!(validate(EntityRef::MenuItem(&item), &ctx).is_ok());
        assert!(validate(EntityRef::Variation(&variation), &ctx).is_ok());
    }

    #[test]
    fn renamed_brand_no_longer_matches_its_id() {
        let (mut brand, _, _) = fixtures();
        brand.name = "Taco Bell Cantina".into();
        let errors = validate_brand(&brand).unwrap_err();
        assert_eq!(errors[0].reason, "does not match natural key");
    }

    #[test]
    fn collects_every_violation() {
        let (mut brand, _, _) = fixtures();
        brand.id = "nope".into();
        brand.name = "  ".into();
        brand.logo_url = Some("ftp://logo".into());
        brand.updated_at = brand.created_at - Duration::days(1);
        assert_eq!(
            fields(validate_brand(&brand)),
            ["id", "name", "logoUrl", "updatedAt"]
        );
    }

    #[test]
    fn item_limits() {
        let (brand, mut item, _) = fixtures();
        let ctx = context(&brand, &item);
        item.description = Some("x".repeat(MAX_DESCRIPTION_CHARS + 1));
        item.estimated_price = Some(-1.0);
        assert_eq!(
            fields(validate_item(&item, &ctx)),
            ["description", "estimatedPrice"]
        );

        item.description = Some("é".repeat(MAX_DESCRIPTION_CHARS));
        item.estimated_price = Some(0.0);
        assert!(validate_item(&item, &ctx).is_ok());
    }

    #[test]
    fn item_golden_ratio_and_image() {
        let (brand, mut item, _) = fixtures();
        let ctx = context(&brand, &item);
        item.golden_ratio = Some(0.75);
        item.golden_ratio_category = Some(GoldenRatioCategory::Good);
        item.menu_item_image_url = Some("https://site.test/item-photos/taco.jpg".into());
        assert!(validate_item(&item, &ctx).is_ok());

        item.golden_ratio_category = Some(GoldenRatioCategory::Excellent);
        item.menu_item_image_url = Some("data:image/png;base64,AAAA".into());
        assert_eq!(
            fields(validate_item(&item, &ctx)),
            ["goldenRatioCategory", "menuItemImageUrl"]
        );

        item.menu_item_image_url = None;
        item.golden_ratio = Some(-0.1);
        assert_eq!(fields(validate_item(&item, &ctx)), ["goldenRatio"]);

        item.golden_ratio = Some(f64::INFINITY);
        assert_eq!(fields(validate_item(&item, &ctx)), ["goldenRatio"]);

        item.golden_ratio = None;
        assert_eq!(fields(validate_item(&item, &ctx)), ["goldenRatio"]);
    }

    #[test]
    fn item_requires_accepted_brand() {
        let (_, item, _) = fixtures();
        assert_eq!(
            fields(validate_item(&item, &ValidationContext::new())),
            ["brandId"]
        );
    }

    #[test]
    fn variation_references() {
        let (brand, item, mut variation) = fixtures();
        let mut ctx = ValidationContext::new();
        ctx.accept_brand(&brand.id);
        assert_eq!(fields(validate_variation(&variation, &ctx)), ["menuItemId"]);

        ctx.accept_item(&item.id, "someone-else");
        assert_eq!(fields(validate_variation(&variation, &ctx)), ["brandId"]);

        ctx.forget_item(&item.id);
        ctx.accept_item(&item.id, &brand.id);
        variation.is_active = false;
        assert!(validate_variation(&variation, &ctx).is_ok());
    }

    #[test]
    fn variation_amounts_and_allergens() {
        let (brand, item, mut variation) = fixtures();
        let ctx = context(&brand, &item);
        variation.nutrition.fat_g = Amount::Known(-2.0);
        variation.nutrition.sodium_mg = Amount::Known(f64::NAN);
        variation.allergens.contains.insert("milk".into());
        variation.allergens.unknown.insert("milk".into());
        assert_eq!(
            fields(validate_variation(&variation, &ctx)),
            ["fat_g", "sodium_mg", "allergens"]
        );
    }

    #[test]
    fn unknown_amounts_are_admissible() {
        let (brand, item, mut variation) = fixtures();
        let ctx = context(&brand, &item);
        variation.nutrition.calories = Amount::Unknown;
        assert!(validate_variation(&variation, &ctx).is_ok());
    }
}
