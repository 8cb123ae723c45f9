//! In-memory store implementations.
//!
//! Back the engine in tests and the maintenance binary. `MemoryCatalog`
//! counts vector writes so idempotence is observable from the outside.

use super::{CatalogStore, InteractionStore, VectorCoverage};
use crate::models::{Interaction, ItemRecord, ItemVectors, SwipeAction};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryCatalog {
    items: RwLock<HashMap<Uuid, ItemRecord>>,
    vector_writes: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(items: impl IntoIterator<Item = ItemRecord>) -> Self {
        let catalog = Self::new();
        catalog.upsert_all(items);
        catalog
    }

    pub fn upsert(&self, item: ItemRecord) {
        self.items
            .write()
            .expect("catalog lock poisoned")
            .insert(item.id, item);
    }

    pub fn upsert_all(&self, items: impl IntoIterator<Item = ItemRecord>) {
        let mut map = self.items.write().expect("catalog lock poisoned");
        for item in items {
            map.insert(item.id, item);
        }
    }

    /// Number of `store_vectors` calls so far. Lets tests assert that an
    /// idempotent re-run performed zero additional writes.
    pub fn vector_write_count(&self) -> usize {
        self.vector_writes.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Vec<ItemRecord> {
        let mut items: Vec<ItemRecord> = self
            .items
            .read()
            .expect("catalog lock poisoned")
            .values()
            .cloned()
            .collect();
        items.sort_by_key(|i| i.id);
        items
    }
}

fn matches_facets(item: &ItemRecord, category: Option<&str>, brand_id: Option<Uuid>) -> bool {
    if let Some(category) = category {
        if item.category.as_deref() != Some(category) {
            return false;
        }
    }
    if let Some(brand_id) = brand_id {
        if item.brand_id != Some(brand_id) {
            return false;
        }
    }
    true
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn item(&self, item_id: Uuid) -> Result<Option<ItemRecord>> {
        Ok(self
            .items
            .read()
            .expect("catalog lock poisoned")
            .get(&item_id)
            .cloned())
    }

    async fn items(&self, ids: &[Uuid]) -> Result<Vec<ItemRecord>> {
        let map = self.items.read().expect("catalog lock poisoned");
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    async fn vectorized_items(
        &self,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ItemRecord>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|item| item.combined_vector.is_some())
            .filter(|item| matches_facets(item, category, brand_id))
            .take(limit)
            .collect())
    }

    async fn candidates(
        &self,
        exclude: &HashSet<Uuid>,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<ItemRecord>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|item| !exclude.contains(&item.id))
            .filter(|item| matches_facets(item, category, brand_id))
            .take(limit)
            .collect())
    }

    async fn items_missing_vectors(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|item| !item.has_all_vectors())
            .map(|item| item.id)
            .collect())
    }

    async fn store_vectors(&self, item_id: Uuid, vectors: ItemVectors) -> Result<()> {
        let mut map = self.items.write().expect("catalog lock poisoned");
        let item = map
            .get_mut(&item_id)
            .ok_or_else(|| anyhow!("item {item_id} not found"))?;
        item.image_vector = vectors.image;
        item.text_vector = vectors.text;
        item.combined_vector = vectors.combined;
        self.vector_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn item_count(&self) -> Result<usize> {
        Ok(self.items.read().expect("catalog lock poisoned").len())
    }

    async fn vector_coverage(&self) -> Result<VectorCoverage> {
        let map = self.items.read().expect("catalog lock poisoned");
        let mut coverage = VectorCoverage {
            total: map.len(),
            ..Default::default()
        };
        for item in map.values() {
            if item.image_vector.is_some() {
                coverage.with_image += 1;
            }
            if item.text_vector.is_some() {
                coverage.with_text += 1;
            }
            if item.combined_vector.is_some() {
                coverage.with_combined += 1;
            }
            if item.has_all_vectors() {
                coverage.with_all += 1;
            }
        }
        Ok(coverage)
    }
}

#[derive(Default)]
pub struct MemoryInteractions {
    by_user: RwLock<HashMap<Uuid, Vec<Interaction>>>,
    known_users: RwLock<HashSet<Uuid>>,
}

impl MemoryInteractions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user without any interactions (cold-start user).
    pub fn register_user(&self, user_id: Uuid) {
        self.known_users
            .write()
            .expect("interaction lock poisoned")
            .insert(user_id);
    }

    /// Record a swipe. A repeat swipe on the same item upserts the action
    /// rather than duplicating the (user, item) pair.
    pub fn record(&self, interaction: Interaction) {
        self.register_user(interaction.user_id);
        let mut map = self.by_user.write().expect("interaction lock poisoned");
        let entries = map.entry(interaction.user_id).or_default();
        entries.retain(|existing| existing.item_id != interaction.item_id);
        entries.push(interaction);
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    pub fn record_all(&self, interactions: impl IntoIterator<Item = Interaction>) {
        for interaction in interactions {
            self.record(interaction);
        }
    }

    fn for_user(&self, user_id: Uuid) -> Vec<Interaction> {
        self.by_user
            .read()
            .expect("interaction lock poisoned")
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl InteractionStore for MemoryInteractions {
    async fn user_exists(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .known_users
            .read()
            .expect("interaction lock poisoned")
            .contains(&user_id))
    }

    async fn recent_interactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Interaction>> {
        let mut interactions = self.for_user(user_id);
        interactions.truncate(limit);
        Ok(interactions)
    }

    async fn recent_by_action(
        &self,
        user_id: Uuid,
        action: SwipeAction,
        limit: usize,
    ) -> Result<Vec<Interaction>> {
        Ok(self
            .for_user(user_id)
            .into_iter()
            .filter(|i| i.action == action)
            .take(limit)
            .collect())
    }

    async fn item_ids_by_action(&self, user_id: Uuid, action: SwipeAction) -> Result<HashSet<Uuid>> {
        Ok(self
            .for_user(user_id)
            .into_iter()
            .filter(|i| i.action == action)
            .map(|i| i.item_id)
            .collect())
    }

    async fn swiped_item_ids(&self, user_id: Uuid) -> Result<HashSet<Uuid>> {
        Ok(self.for_user(user_id).into_iter().map(|i| i.item_id).collect())
    }

    async fn users_with_likes(&self) -> Result<Vec<Uuid>> {
        let map = self.by_user.read().expect("interaction lock poisoned");
        let mut users: Vec<Uuid> = map
            .iter()
            .filter(|(_, interactions)| {
                interactions.iter().any(|i| i.action == SwipeAction::Like)
            })
            .map(|(user_id, _)| *user_id)
            .collect();
        users.sort();
        Ok(users)
    }

    async fn interaction_counts(&self, user_id: Uuid) -> Result<(usize, usize)> {
        let interactions = self.for_user(user_id);
        let likes = interactions
            .iter()
            .filter(|i| i.action == SwipeAction::Like)
            .count();
        Ok((interactions.len(), likes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn item(n: u128, combined: Option<Vec<f32>>) -> ItemRecord {
        ItemRecord {
            id: Uuid::from_u128(n),
            name: format!("item-{n}"),
            description: None,
            image_url: None,
            category: None,
            brand_id: None,
            image_vector: None,
            text_vector: None,
            combined_vector: combined,
            like_count: 0,
            created_at: Utc::now(),
        }
    }

    fn swipe(user: u128, item: u128, action: SwipeAction, age_days: i64) -> Interaction {
        Interaction {
            user_id: Uuid::from_u128(user),
            item_id: Uuid::from_u128(item),
            action,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn test_vectorized_items_requires_combined() {
        let catalog = MemoryCatalog::seed(vec![
            item(1, Some(vec![1.0, 0.0])),
            item(2, None),
        ]);
        let items = catalog.vectorized_items(None, None, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn test_store_vectors_counts_writes() {
        let catalog = MemoryCatalog::seed(vec![item(1, None)]);
        assert_eq!(catalog.vector_write_count(), 0);
        catalog
            .store_vectors(
                Uuid::from_u128(1),
                ItemVectors {
                    image: Some(vec![1.0]),
                    text: Some(vec![1.0]),
                    combined: Some(vec![1.0]),
                },
            )
            .await
            .unwrap();
        assert_eq!(catalog.vector_write_count(), 1);
        assert!(catalog.items_missing_vectors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_swipe_upserts() {
        let store = MemoryInteractions::new();
        store.record(swipe(1, 7, SwipeAction::Like, 3));
        store.record(swipe(1, 7, SwipeAction::Dislike, 0));

        let user = Uuid::from_u128(1);
        let all = store.recent_interactions(user, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].action, SwipeAction::Dislike);

        let likes = store.item_ids_by_action(user, SwipeAction::Like).await.unwrap();
        assert!(likes.is_empty());
    }

    #[tokio::test]
    async fn test_recent_ordering_most_recent_first() {
        let store = MemoryInteractions::new();
        store.record(swipe(1, 10, SwipeAction::Like, 5));
        store.record(swipe(1, 11, SwipeAction::Like, 1));
        store.record(swipe(1, 12, SwipeAction::Like, 3));

        let recent = store
            .recent_by_action(Uuid::from_u128(1), SwipeAction::Like, 2)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].item_id, Uuid::from_u128(11));
        assert_eq!(recent[1].item_id, Uuid::from_u128(12));
    }

    #[tokio::test]
    async fn test_users_with_likes_excludes_dislike_only() {
        let store = MemoryInteractions::new();
        store.record(swipe(1, 10, SwipeAction::Like, 1));
        store.record(swipe(2, 10, SwipeAction::Dislike, 1));

        let users = store.users_with_likes().await.unwrap();
        assert_eq!(users, vec![Uuid::from_u128(1)]);
    }
}
