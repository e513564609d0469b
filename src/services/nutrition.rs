// src/services/nutrition.rs

//! Item and serving page extraction: nutrition table, allergens,
//! ingredients, image and serving-size options.
//!
//! Nothing here fails on malformed markup. A missing section simply yields an
//! empty value, which normalization later records as a gap.

use std::collections::{BTreeMap, HashSet};

use scraper::{ElementRef, Html};
use url::Url;

use crate::error::Result;
use crate::models::{ItemPage, RawAllergens, RawServing, ServingOption};
use crate::utils::{element_text, parse_selector, resolve_url};

const SKIPPED_ROW_PREFIXES: [&str; 3] = ["amount per serving", "% daily value", "percent daily"];
const PLACEHOLDER_VALUES: [&str; 3] = ["", "?", "-"];

/// Parse one item or serving page.
///
/// `label` names the serving this page describes; when empty the page title
/// is used instead.
pub fn parse_item_page(html: &str, base: &Url, label: &str) -> Result<ItemPage> {
    let document = Html::parse_document(html);

    let title = extract_title(&document)?;
    let serving = RawServing {
        label: if label.trim().is_empty() {
            title.clone()
        } else {
            label.trim().to_string()
        },
        title,
        nutrition: extract_nutrition_table(&document)?,
        allergens: extract_allergens(&document)?,
        ingredients: extract_ingredients(&document)?,
        image_url: extract_image(&document, base)?,
    };

    Ok(ItemPage {
        serving,
        options: extract_serving_options(&document, base)?,
    })
}

fn extract_title(document: &Html) -> Result<String> {
    let h1 = parse_selector("h1")?;
    let title = parse_selector("title")?;
    Ok(document
        .select(&h1)
        .next()
        .or_else(|| document.select(&title).next())
        .map(|el| element_text(&el))
        .unwrap_or_default())
}

/// Serving-size links from the dropdown, in page order.
fn extract_serving_options(document: &Html, base: &Url) -> Result<Vec<ServingOption>> {
    let menu_sel = parse_selector("div.dropdown-menu")?;
    let link_sel = parse_selector("a[href]")?;

    let Some(menu) = document.select(&menu_sel).next() else {
        return Ok(Vec::new());
    };

    let mut seen = HashSet::new();
    let mut options = Vec::new();
    for anchor in menu.select(&link_sel) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let url = resolve_url(base, href);
        if seen.insert(url.clone()) {
            options.push(ServingOption {
                label: element_text(&anchor),
                url,
            });
        }
    }
    Ok(options)
}

fn extract_nutrition_table(document: &Html) -> Result<BTreeMap<String, String>> {
    let table_sel = parse_selector("table.item_nutrition, table#item_nutrition, table.nutrition")?;
    let row_sel = parse_selector("tr")?;
    let th_sel = parse_selector("th")?;
    let td_sel = parse_selector("td")?;

    let mut nutrition = BTreeMap::new();
    let Some(table) = document.select(&table_sel).next() else {
        log::debug!("No nutrition table found");
        return Ok(nutrition);
    };

    for row in table.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&td_sel).collect();
        let header = row.select(&th_sel).next();

        let (key, value) = match (header, cells.as_slice()) {
            (Some(th), [first, ..]) => (element_text(&th), element_text(first)),
            (None, [key, value, ..]) => (element_text(key), element_text(value)),
            _ => continue,
        };

        let lowered = key.to_lowercase();
        if key.is_empty() || SKIPPED_ROW_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
            continue;
        }
        let value = value.trim();
        if PLACEHOLDER_VALUES.contains(&value) {
            continue;
        }

        let key = to_snake_case(&key);
        if !key.is_empty() {
            nutrition.insert(key, value.to_string());
        }
    }

    Ok(nutrition)
}

fn extract_allergens(document: &Html) -> Result<RawAllergens> {
    let section_sel = parse_selector("#allergens")?;
    let column_sel = parse_selector(".col-12")?;
    let header_sel = parse_selector("strong")?;
    let dot_sel = parse_selector(".dot")?;

    let mut allergens = RawAllergens::default();
    let Some(section) = document.select(&section_sel).next() else {
        return Ok(allergens);
    };

    for column in section.select(&column_sel) {
        let Some(header) = column.select(&header_sel).next() else {
            continue;
        };
        let header = element_text(&header).to_lowercase().replace('\u{2019}', "'");
        let tokens: Vec<String> = column
            .select(&dot_sel)
            .map(|dot| element_text(&dot))
            .filter(|t| !t.is_empty())
            .collect();

        if header.contains("contains") && !header.contains("not") && !header.contains("may") {
            allergens.contains = tokens;
        } else if header.contains("does not contain") {
            allergens.does_not_contain = tokens;
        } else if header.contains("unknown") || header.contains("aren't sure") {
            allergens.unknown = tokens;
        }
    }

    Ok(allergens)
}

fn extract_ingredients(document: &Html) -> Result<Option<String>> {
    let sel = parse_selector("#ingredients2")?;
    Ok(document
        .select(&sel)
        .next()
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty()))
}

/// Prefer a dedicated item photo, then any content image that is not a logo
/// or icon.
fn extract_image(document: &Html, base: &Url) -> Result<Option<String>> {
    let photo_sel = parse_selector("img[src^='/item-photos/']")?;
    let content_sel = parse_selector("div.col-12 img, div.col-md-6 img")?;

    let photo = document
        .select(&photo_sel)
        .next()
        .and_then(|img| img.value().attr("src"));
    let src = photo.or_else(|| {
        document
            .select(&content_sel)
            .filter_map(|img| img.value().attr("src"))
            .find(|src| !src.is_empty() && !src.contains("/logos/") && !src.contains("/icons/"))
    });

    Ok(src.map(|src| resolve_url(base, src)))
}

/// `"Total Fat (g)"` becomes `"total_fat_g"`.
pub fn to_snake_case(text: &str) -> String {
    let mapped: String = text
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();

    mapped
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
