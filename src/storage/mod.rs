//! Storage abstractions for entity and checkpoint persistence.
//!
//! Entities live in three collections keyed by their deterministic id.
//! Every write is an upsert; nothing in this crate deletes a document.
//!
//! ## Directory Structure (local backend)
//!
//! ```text
//! store/
//! ├── restaurant_brands/
//! │   └── {id}.json
//! ├── menu_items/
//! │   └── {id}.json
//! └── menu_item_variations/
//!     └── {id}.json
//! ```

pub mod checkpoint;
pub mod local;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::{Brand, MenuItem, MenuItemVariation};

// Re-export for convenience
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, SledCheckpointStore};
pub use local::LocalStore;
pub use memory::MemoryStore;

/// The three entity collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    RestaurantBrands,
    MenuItems,
    MenuItemVariations,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::RestaurantBrands,
        Collection::MenuItems,
        Collection::MenuItemVariations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::RestaurantBrands => "restaurant_brands",
            Self::MenuItems => "menu_items",
            Self::MenuItemVariations => "menu_item_variations",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether an upsert created the document or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// An entity that can be stored in a [`Collection`] by id.
pub trait Document: Serialize + Send + Sync {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

impl Document for Brand {
    const COLLECTION: Collection = Collection::RestaurantBrands;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Document for MenuItem {
    const COLLECTION: Collection = Collection::MenuItems;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Document for MenuItemVariation {
    const COLLECTION: Collection = Collection::MenuItemVariations;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Trait for entity storage backends.
///
/// Each call is independently atomic for its one document; there are no
/// multi-document transactions.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert the document if `id` is absent, replace it otherwise.
    async fn upsert(&self, collection: Collection, id: &str, doc: Value) -> Result<UpsertOutcome>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    /// All ids in a collection, sorted.
    async fn ids(&self, collection: Collection) -> Result<Vec<String>>;

    async fn count(&self, collection: Collection) -> Result<usize> {
        Ok(self.ids(collection).await?.len())
    }
}

/// Carry `createdAt` over from the stored document, so a replacement only
/// changes update-class fields.
pub(crate) fn preserve_created_at(existing: &Value, doc: &mut Value) {
    if let (Some(created), Some(obj)) = (existing.get("createdAt"), doc.as_object_mut()) {
        if obj.contains_key("createdAt") {
            obj.insert("createdAt".to_string(), created.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn created_at_survives_replacement() {
        let existing = json!({"id": "a", "createdAt": "2024-01-01T00:00:00Z"});
        let mut doc = json!({"id": "a", "createdAt": "2025-06-01T00:00:00Z", "name": "x"});
        preserve_created_at(&existing, &mut doc);
        assert_eq!(doc["createdAt"], "2024-01-01T00:00:00Z");
        assert_eq!(doc["name"], "x");
    }

    #[test]
    fn documents_without_created_at_are_untouched() {
        let existing = json!({"id": "a", "createdAt": "2024-01-01T00:00:00Z"});
        let mut doc = json!({"id": "a"});
        preserve_created_at(&existing, &mut doc);
        assert!(doc.get("createdAt").is_none());
    }

    #[test]
    fn collection_names() {
        assert_eq!(Collection::RestaurantBrands.to_string(), "restaurant_brands");
        assert_eq!(Collection::MenuItemVariations.name(), "menu_item_variations");
    }
}
