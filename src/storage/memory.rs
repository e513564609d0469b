//! In-memory document store, used for dry runs and tests.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::storage::{Collection, EntityStore, UpsertOutcome, preserve_created_at};

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<(Collection, String), Value>>,
    failing: Mutex<HashSet<(Collection, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upsert of `id` in `collection` fail until cleared.
    pub async fn fail_on(&self, collection: Collection, id: impl Into<String>) {
        self.failing.lock().await.insert((collection, id.into()));
    }

    pub async fn clear_failures(&self) {
        self.failing.lock().await.clear();
    }

    /// Every stored document of a collection, ordered by id.
    pub async fn documents(&self, collection: Collection) -> Vec<Value> {
        self.docs
            .lock()
            .await
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, doc)| doc.clone())
            .collect()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        mut doc: Value,
    ) -> Result<UpsertOutcome> {
        let key = (collection, id.to_string());
        if self.failing.lock().await.contains(&key) {
            return Err(AppError::storage(format!(
                "injected write failure for {collection}/{id}"
            )));
        }

        let mut docs = self.docs.lock().await;
        let outcome = match docs.get(&key) {
            Some(existing) => {
                preserve_created_at(existing, &mut doc);
                UpsertOutcome::Updated
            }
            None => UpsertOutcome::Inserted,
        };
        docs.insert(key, doc);
        Ok(outcome)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        Ok(self
            .docs
            .lock()
            .await
            .get(&(collection, id.to_string()))
            .cloned())
    }

    async fn ids(&self, collection: Collection) -> Result<Vec<String>> {
        Ok(self
            .docs
            .lock()
            .await
            .keys()
            .filter(|(c, _)| *c == collection)
            .map(|(_, id)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn injected_failure_only_hits_that_id() {
        let store = MemoryStore::new();
        store.fail_on(Collection::MenuItems, "b").await;

        assert!(store
            .upsert(Collection::MenuItems, "a", json!({"id": "a"}))
            .await
            .is_ok());
        assert!(store
            .upsert(Collection::MenuItems, "b", json!({"id": "b"}))
            .await
            .is_err());
        assert_eq!(store.ids(Collection::MenuItems).await.unwrap(), vec!["a"]);

        store.clear_failures().await;
        assert!(store
            .upsert(Collection::MenuItems, "b", json!({"id": "b"}))
            .await
            .is_ok());
        assert_eq!(store.count(Collection::MenuItems).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn collections_are_separate() {
        let store = MemoryStore::new();
        store
            .upsert(Collection::RestaurantBrands, "x", json!({}))
            .await
            .unwrap();
        assert_eq!(store.count(Collection::MenuItems).await.unwrap(), 0);
        assert_eq!(store.documents(Collection::RestaurantBrands).await.len(), 1);
    }
}
