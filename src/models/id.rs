//! Content-derived entity identifiers.
//!
//! Ids are a sha256 over the natural-key parts, so re-scraping the same
//! source object always produces the same id.

use sha2::{Digest, Sha256};

/// Length of an entity id in hex characters.
pub const ID_LEN: usize = 32;

/// Hash the non-empty key parts joined by `|`, truncated to [`ID_LEN`] hex chars.
pub fn content_id(parts: &[&str]) -> String {
    let composite = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("|");

    let digest = Sha256::digest(composite.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ID_LEN);
    id
}

/// `id = hash(name)`
pub fn brand_id(name: &str) -> String {
    content_id(&[name])
}

/// `id = hash(brandId, name, sourceUrl)`
pub fn menu_item_id(brand_id: &str, name: &str, source_url: &str) -> String {
    content_id(&[brand_id, name, source_url])
}

/// `id = hash(menuItemId, servingLabel)`
pub fn variation_id(menu_item_id: &str, serving_label: &str) -> String {
    content_id(&[menu_item_id, serving_label])
}

/// Whether a string looks like an id produced by [`content_id`].
pub fn is_well_formed(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
