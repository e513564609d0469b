// src/services/brands.rs

//! Restaurant listing page extraction.

use std::collections::HashSet;

use scraper::{ElementRef, Html};
use url::Url;

use crate::error::Result;
use crate::models::RawBrand;
use crate::utils::{element_text, parse_selector, resolve_url};

/// Extract brand cards from the restaurant listing page, in page order.
///
/// Cards without a link or a name are skipped; repeated URLs keep the first
/// occurrence.
pub fn parse_brand_listing(html: &str, base: &Url) -> Result<Vec<RawBrand>> {
    let document = Html::parse_document(html);
    let container_sel = parse_selector(".rest_item_list.category")?;
    let card_sel = parse_selector(".filter_target")?;
    let link_sel = parse_selector("a[href]")?;
    let label_sel = parse_selector("div.logo_box_text")?;
    let img_sel = parse_selector("img[src]")?;

    let Some(container) = document.select(&container_sel).next() else {
        log::warn!("No restaurant list container found on {}", base);
        return Ok(Vec::new());
    };

    let mut seen = HashSet::new();
    let mut brands = Vec::new();

    for card in container.select(&card_sel) {
        let Some(href) = card
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };

        let name = card.select(&label_sel).next().and_then(|label| brand_name(&label));
        let Some(name) = name else {
            continue;
        };

        let url = resolve_url(base, href);
        if !seen.insert(url.clone()) {
            continue;
        }

        let logo_url = card
            .select(&img_sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(|src| resolve_url(base, src));

        brands.push(RawBrand {
            name,
            url,
            logo_url,
        });
    }

    log::debug!("Found {} brands on listing page", brands.len());
    Ok(brands)
}

/// First direct text node of the label; the full text minus a trailing
/// " Nutrition" otherwise.
fn brand_name(label: &ElementRef<'_>) -> Option<String> {
    first_own_text(label)
        .or_else(|| {
            let text = element_text(label);
            let text = text.strip_suffix(" Nutrition").unwrap_or(&text).trim();
            (!text.is_empty()).then(|| text.to_string())
        })
}

/// First non-blank text node that is a direct child of `el`.
pub(crate) fn first_own_text(el: &ElementRef<'_>) -> Option<String> {
    el.children()
        .filter_map(|node| node.value().as_text())
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .map(|text| text.to_string())
}
