//! Canonical entities persisted to the document store.
//!
//! Relationships form a strict tree: `Brand 1-N MenuItem 1-N MenuItemVariation`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Restaurant category of a brand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
pub enum BrandCategory {
    FastFood,
    FastCasual,
    CasualDining,
    FineDining,
    ConvenienceStore,
    CoffeeShop,
    Bakery,
    #[default]
    Unknown,
}

/// Cultural cuisine of a brand or menu item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
pub enum Cuisine {
    American,
    Mexican,
    Italian,
    Chinese,
    Japanese,
    Korean,
    Thai,
    Vietnamese,
    Indian,
    Asian,
    Mediterranean,
    Greek,
    French,
    MiddleEastern,
    Caribbean,
    LatinAmerican,
    Fusion,
    #[default]
    Unknown,
}

/// Where a brand's category/cuisine came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategorySource {
    Lookup,
    Inferred,
}

/// Macronutrient profile tag of a menu item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MacroTag {
    HighProtein,
    LowProtein,
    LowCarb,
    HighCarb,
    LowFat,
    HighFat,
    LowCalorie,
    HighCalorie,
    LowSodium,
    HighSodium,
    LowSugar,
    HighSugar,
    KetoFriendly,
    Balanced,
}

/// Protein-per-calorie band of a menu item's golden ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoldenRatioCategory {
    Excellent,
    Good,
    Poor,
}

impl GoldenRatioCategory {
    /// `>= 1.0` is Excellent, `>= 0.5` Good, anything lower Poor.
    pub fn classify(ratio: f64) -> Self {
        if ratio >= 1.0 {
            Self::Excellent
        } else if ratio >= 0.5 {
            Self::Good
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub category: BrandCategory,
    #[serde(default)]
    pub cuisine: Cuisine,
    #[serde(default)]
    pub category_source: Option<CategorySource>,
    #[serde(default)]
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub brand_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    #[serde(default)]
    pub estimated_price: Option<f64>,
    #[serde(default)]
    pub cuisine_types: BTreeSet<Cuisine>,
    #[serde(default)]
    pub macro_profile: BTreeSet<MacroTag>,
    /// `protein_g / calories * 10` of the first serving
    #[serde(default)]
    pub golden_ratio: Option<f64>,
    #[serde(default)]
    pub golden_ratio_category: Option<GoldenRatioCategory>,
    #[serde(default)]
    pub menu_item_image_url: Option<String>,
    pub source_url: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemVariation {
    pub id: String,
    pub menu_item_id: String,
    pub brand_id: String,
    pub serving_label: String,
    #[serde(default)]
    pub serving_text: Option<String>,
    pub nutrition: Nutrition,
    #[serde(default)]
    pub allergens: Allergens,
    #[serde(default)]
    pub ingredients: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub is_active: bool,
}

/// A nutrient amount that is either known or explicitly unknown.
///
/// Serialized as a bare number, or the string `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Amount {
    Known(f64),
    #[default]
    Unknown,
}

impl Amount {
    pub fn known(self) -> Option<f64> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{v}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(v) => serializer.serialize_f64(*v),
            Self::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(Self::Known(v)),
            Repr::Text(s) if s.eq_ignore_ascii_case("unknown") => Ok(Self::Unknown),
            Repr::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"unknown\", got {s:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Nutrition {
    #[serde(default)]
    pub calories: Amount,
    #[serde(default)]
    pub protein_g: Amount,
    #[serde(default)]
    pub carbs_g: Amount,
    #[serde(default)]
    pub fat_g: Amount,
    #[serde(default)]
    pub sodium_mg: Amount,
    #[serde(default)]
    pub fiber_g: Amount,
    #[serde(default)]
    pub sugar_g: Amount,
    #[serde(default, rename = "satFat_g")]
    pub sat_fat_g: Amount,
}

impl Nutrition {
    /// Field name and value pairs, in serialization order.
    pub fn fields(&self) -> [(&'static str, Amount); 8] {
        [
            ("calories", self.calories),
            ("protein_g", self.protein_g),
            ("carbs_g", self.carbs_g),
            ("fat_g", self.fat_g),
            ("sodium_mg", self.sodium_mg),
            ("fiber_g", self.fiber_g),
            ("sugar_g", self.sugar_g),
            ("satFat_g", self.sat_fat_g),
        ]
    }

    pub fn unknown_count(&self) -> usize {
        self.fields().iter().filter(|(_, v)| v.is_unknown()).count()
    }
}

/// Allergen claims; a token belongs to at most one of the three sets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allergens {
    #[serde(default)]
    pub contains: BTreeSet<String>,
    #[serde(default)]
    pub does_not_contain: BTreeSet<String>,
    #[serde(default)]
    pub unknown: BTreeSet<String>,
}

impl Allergens {
    /// Tokens that appear in more than one set.
    pub fn overlaps(&self) -> BTreeSet<String> {
        let a = self.contains.intersection(&self.does_not_contain);
        let b = self.contains.intersection(&self.unknown);
        let c = self.does_not_contain.intersection(&self.unknown);
        a.chain(b).chain(c).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.contains.is_empty() && self.does_not_contain.is_empty() && self.unknown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_serializes_as_number_or_unknown() {
        let n = Nutrition {
            calories: Amount::Known(250.0),
            ..Nutrition::default()
        };
        let json = serde_json::to_value(n).unwrap();
        assert_eq!(json["calories"], serde_json::json!(250.0));
        assert_eq!(json["protein_g"], serde_json::json!("unknown"));
        assert_eq!(json["satFat_g"], serde_json::json!("unknown"));

        let back: Nutrition = serde_json::from_value(json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn amount_rejects_other_text() {
        let err = serde_json::from_str::<Amount>("\"lots\"");
        assert!(err.is_err());
    }

    #[test]
    fn allergen_overlaps() {
        let mut a = Allergens::default();
        a.contains.insert("milk".into());
        a.does_not_contain.insert("milk".into());
        a.unknown.insert("soy".into());
        assert_eq!(a.overlaps().into_iter().collect::<Vec<_>>(), vec!["milk"]);
    }

    #[test]
    fn golden_ratio_bands() {
        assert_eq!(GoldenRatioCategory::classify(1.0), GoldenRatioCategory::Excellent);
        assert_eq!(GoldenRatioCategory::classify(0.5), GoldenRatioCategory::Good);
        assert_eq!(GoldenRatioCategory::classify(0.25), GoldenRatioCategory::Poor);
        assert_eq!(GoldenRatioCategory::classify(0.0), GoldenRatioCategory::Poor);
    }

    #[test]
    fn brand_uses_camel_case_fields() {
        let now = Utc::now();
        let brand = Brand {
            id: "x".into(),
            name: "Taco Bell".into(),
            logo_url: None,
            source_url: None,
            category: BrandCategory::default(),
            cuisine: Cuisine::default(),
            category_source: None,
            verified: false,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&brand).unwrap();
        assert!(json.get("logoUrl").is_some());
        assert_eq!(json["category"], "Unknown");
        assert_eq!(json["cuisine"], "Unknown");
    }
}
