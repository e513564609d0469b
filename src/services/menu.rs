// src/services/menu.rs

//! Brand menu page extraction.

use std::collections::HashSet;

use scraper::Html;
use url::Url;

use crate::error::Result;
use crate::models::{BrandMenu, RawMenuItem};
use crate::services::brands::first_own_text;
use crate::utils::{element_text, parse_selector, resolve_url};

const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Extract the logo and categorized item links from a brand's menu page.
pub fn parse_brand_menu(html: &str, base: &Url) -> Result<BrandMenu> {
    let document = Html::parse_document(html);
    let logo_sel = parse_selector("img.logo_float[src]")?;
    let block_sel = parse_selector("div.category")?;
    let heading_sel = parse_selector("a.toggle_category h2")?;
    let anchor_sel = parse_selector("ul.list.rest_item_list.ab1 a[href]")?;

    let logo_url = document
        .select(&logo_sel)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(|src| resolve_url(base, src));

    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for block in document.select(&block_sel) {
        let category = block
            .select(&heading_sel)
            .next()
            .map(|h| element_text(&h))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        for anchor in block.select(&anchor_sel) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let name = first_own_text(&anchor).unwrap_or_else(|| element_text(&anchor));
            if name.is_empty() {
                continue;
            }

            let url = resolve_url(base, href);
            if seen.insert(url.clone()) {
                items.push(RawMenuItem {
                    name,
                    url,
                    category: category.clone(),
                });
            }
        }
    }

    log::debug!("Found {} menu items on {}", items.len(), base);
    Ok(BrandMenu { logo_url, items })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_items_with_categories() {
        let base = Url::parse("https://fastfoodnutrition.org/taco-bell").unwrap();
        let html = r#"
            <img class="logo_float" src="/logos/taco-bell.png">
            <div class="category">
              <a class="toggle_category"><h2>Tacos</h2></a>
              <ul class="list rest_item_list ab1">
                <li><a href="/taco-bell/crunchy-taco">Crunchy Taco <span>170 cal</span></a></li>
                <li><a href="/taco-bell/soft-taco">Soft Taco</a></li>
              </ul>
            </div>
            <div class="category">
              <ul class="list rest_item_list ab1">
                <li><a href="/taco-bell/crunchy-taco">Crunchy Taco</a></li>
                <li><a href="/taco-bell/baja-blast">Baja Blast</a></li>
              </ul>
            </div>"#;

        let menu = parse_brand_menu(html, &base).unwrap();
        assert_eq!(
            menu.logo_url.as_deref(),
            Some("https://fastfoodnutrition.org/logos/taco-bell.png")
        );
        let names: Vec<_> = menu.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Crunchy Taco", "Soft Taco", "Baja Blast"]);
        assert_eq!(menu.items[0].category, "Tacos");
        assert_eq!(menu.items[2].category, "Uncategorized");
        assert_eq!(
            menu.items[1].url,
            "https://fastfoodnutrition.org/taco-bell/soft-taco"
        );
    }

    #[test]
    fn empty_page_yields_empty_menu() {
        let base = Url::parse("https://fastfoodnutrition.org/x").unwrap();
        assert_eq!(parse_brand_menu("", &base).unwrap(), BrandMenu::default());
    }
}
