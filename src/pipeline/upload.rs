// src/pipeline/upload.rs

//! Idempotent upserts of validated entities.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::models::{Brand, MenuItem, MenuItemVariation};
use crate::storage::{Collection, Document, EntityStore, UpsertOutcome};

/// Validated entities of one unit, grouped per type.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub brands: Vec<Brand>,
    pub items: Vec<MenuItem>,
    pub variations: Vec<MenuItemVariation>,
    /// Entities dropped by the validator before reaching the uploader.
    pub rejected: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.brands.len() + self.items.len() + self.variations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFailure {
    pub collection: Collection,
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub failed: usize,
    pub failures: Vec<UploadFailure>,
}

impl UploadReport {
    pub fn succeeded(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: UploadReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }

    /// Whether `id` in `collection` failed to store.
    pub fn has_failed(&self, collection: Collection, id: &str) -> bool {
        self.failures
            .iter()
            .any(|f| f.collection == collection && f.id == id)
    }

    fn fail(&mut self, collection: Collection, id: &str, error: impl ToString) {
        log::warn!("Upsert of {}/{} failed", collection, id);
        self.failed += 1;
        self.failures.push(UploadFailure {
            collection,
            id: id.to_string(),
            error: error.to_string(),
        });
    }
}

/// Writes batches through an [`EntityStore`].
///
/// Brands go first, then items, then variations. A child whose parent failed
/// to store in the same batch is counted as failed rather than written, so
/// stored documents never reference a missing parent.
#[derive(Clone)]
pub struct UpsertUploader {
    store: Arc<dyn EntityStore>,
}

impl UpsertUploader {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub async fn upload(&self, batch: &Batch) -> UploadReport {
        let mut report = UploadReport {
            rejected: batch.rejected,
            ..UploadReport::default()
        };

        let mut failed_brands = HashSet::new();
        for brand in &batch.brands {
            if !self.put(brand, &mut report).await {
                failed_brands.insert(brand.id.as_str());
            }
        }

        let mut failed_items = HashSet::new();
        for item in &batch.items {
            if failed_brands.contains(item.brand_id.as_str()) {
                report.fail(Collection::MenuItems, &item.id, "brand was not stored");
                failed_items.insert(item.id.as_str());
            } else if !self.put(item, &mut report).await {
                failed_items.insert(item.id.as_str());
            }
        }

        for variation in &batch.variations {
            if failed_items.contains(variation.menu_item_id.as_str()) {
                report.fail(
                    Collection::MenuItemVariations,
                    &variation.id,
                    "menu item was not stored",
                );
            } else {
                self.put(variation, &mut report).await;
            }
        }

        report
    }

    async fn put<D: Document>(&self, doc: &D, report: &mut UploadReport) -> bool {
        let value = match serde_json::to_value(doc) {
            Ok(v) => v,
            Err(e) => {
                report.fail(D::COLLECTION, doc.id(), e);
                return false;
            }
        };
        match self.store.upsert(D::COLLECTION, doc.id(), value).await {
            Ok(UpsertOutcome::Inserted) => {
                report.inserted += 1;
                true
            }
            Ok(UpsertOutcome::Updated) => {
                report.updated += 1;
                true
            }
            Err(e) => {
                report.fail(D::COLLECTION, doc.id(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::RawBrand;
    use crate::pipeline::normalize::normalize_brand;
    use crate::storage::MemoryStore;

    fn brand(name: &str) -> Brand {
        normalize_brand(
            &RawBrand {
                name: name.into(),
                url: format!("https://site.test/{name}"),
                logo_url: None,
            },
            None,
            Utc::now(),
        )
    }

    fn item(brand: &Brand, name: &str) -> MenuItem {
        MenuItem {
            id: crate::models::id::menu_item_id(&brand.id, name, "https://site.test/i"),
            brand_id: brand.id.clone(),
            name: name.into(),
            description: None,
            category: "Mains".into(),
            estimated_price: None,
            cuisine_types: Default::default(),
            macro_profile: Default::default(),
            golden_ratio: None,
            golden_ratio_category: None,
            menu_item_image_url: None,
            source_url: "https://site.test/i".into(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn partial_batch_keeps_successes() {
        let store = Arc::new(MemoryStore::new());
        let brands: Vec<_> = ["a", "b", "c", "d", "e"].into_iter().map(brand).collect();
        store
            .fail_on(Collection::RestaurantBrands, brands[2].id.clone())
            .await;

        let uploader = UpsertUploader::new(store.clone());
        let report = uploader
            .upload(&Batch {
                brands: brands.clone(),
                ..Batch::default()
            })
            .await;

        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed, 1);
        assert!(report.has_failed(Collection::RestaurantBrands, &brands[2].id));

        let stored = store.ids(Collection::RestaurantBrands).await.unwrap();
        for (i, b) in brands.iter().enumerate() {
            assert_eq!(stored.contains(&b.id), i != 2);
        }
    }

    #[tokio::test]
    async fn second_upload_updates() {
        let store = Arc::new(MemoryStore::new());
        let uploader = UpsertUploader::new(store.clone());
        let batch = Batch {
            brands: vec![brand("a")],
            rejected: 2,
            ..Batch::default()
        };

        let first = uploader.upload(&batch).await;
        assert_eq!((first.inserted, first.updated, first.rejected), (1, 0, 2));

        let second = uploader.upload(&batch).await;
        assert_eq!((second.inserted, second.updated), (0, 1));
        assert_eq!(store.count(Collection::RestaurantBrands).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn children_of_failed_parents_are_not_written() {
        let store = Arc::new(MemoryStore::new());
        let b = brand("a");
        store.fail_on(Collection::RestaurantBrands, b.id.clone()).await;

        let uploader = UpsertUploader::new(store.clone());
        let report = uploader
            .upload(&Batch {
                items: vec![item(&b, "Taco"), item(&b, "Burrito")],
                brands: vec![b],
                ..Batch::default()
            })
            .await;

        assert_eq!(report.failed, 3);
        assert_eq!(store.count(Collection::MenuItems).await.unwrap(), 0);
    }

    #[test]
    fn merge_adds_up() {
        let mut total = UploadReport::default();
        total.merge(UploadReport {
            inserted: 2,
            failed: 1,
            failures: vec![UploadFailure {
                collection: Collection::MenuItems,
                id: "x".into(),
                error: "boom".into(),
            }],
            ..UploadReport::default()
        });
        total.merge(UploadReport {
            updated: 3,
            rejected: 1,
            ..UploadReport::default()
        });
        assert_eq!(total.succeeded(), 5);
        assert_eq!(total.rejected, 1);
        assert_eq!(total.failures.len(), 1);
    }
}
