//! Content scoring: categorical and brand overlap with the user's history.

use crate::store::{CatalogStore, InteractionStore};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ItemRecord, SwipeAction};

/// Raw tier scores before normalization to [0, 1].
const CATEGORY_MATCH: f32 = 3.0;
const BRAND_MATCH: f32 = 2.0;
const NO_MATCH: f32 = 1.0;
const MAX_RAW: f32 = 3.0;

pub struct ContentScorer {
    catalog: Arc<dyn CatalogStore>,
    interactions: Arc<dyn InteractionStore>,
}

/// Liked/disliked category and brand sets derived from a user's history.
#[derive(Debug, Default)]
struct FacetPreferences {
    liked_categories: HashSet<String>,
    disliked_categories: HashSet<String>,
    liked_brands: HashSet<Uuid>,
    disliked_brands: HashSet<Uuid>,
}

impl ContentScorer {
    pub fn new(catalog: Arc<dyn CatalogStore>, interactions: Arc<dyn InteractionStore>) -> Self {
        Self {
            catalog,
            interactions,
        }
    }

    /// Score unswiped candidates: 3 for a liked category, else 2 for a liked
    /// brand, else 1 - normalized by 3. Candidates whose category or brand is
    /// in the corresponding disliked set are excluded outright. Ties are
    /// shuffled when an RNG is supplied (to avoid deterministic staleness);
    /// with no RNG the order falls back to item id for reproducible tests.
    pub async fn score_candidates(
        &self,
        user_id: Uuid,
        already_seen: &HashSet<Uuid>,
        category_filter: Option<&str>,
        brand_filter: Option<Uuid>,
        limit: usize,
        rng: Option<&mut StdRng>,
    ) -> Result<Vec<(ItemRecord, f32)>> {
        let prefs = self.facet_preferences(user_id).await?;

        // Over-fetch so disliked-facet exclusion still leaves enough.
        let pool = self
            .catalog
            .candidates(already_seen, category_filter, brand_filter, limit * 4)
            .await?;

        let mut scored: Vec<(ItemRecord, f32)> = pool
            .into_iter()
            .filter(|item| !Self::hits_disliked_facet(item, &prefs))
            .map(|item| {
                let raw = Self::raw_score(&item, &prefs);
                (item, raw / MAX_RAW)
            })
            .collect();

        // Randomize first so equal scores come out in varying order; the
        // stable sort preserves the shuffle within each score tier.
        match rng {
            Some(rng) => scored.shuffle(rng),
            None => scored.sort_by(|a, b| a.0.id.cmp(&b.0.id)),
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        debug!(
            user_id = %user_id,
            candidates = scored.len(),
            liked_categories = prefs.liked_categories.len(),
            disliked_categories = prefs.disliked_categories.len(),
            "content scoring complete"
        );
        Ok(scored)
    }

    fn raw_score(item: &ItemRecord, prefs: &FacetPreferences) -> f32 {
        if let Some(category) = &item.category {
            if prefs.liked_categories.contains(category) {
                return CATEGORY_MATCH;
            }
        }
        if let Some(brand_id) = item.brand_id {
            if prefs.liked_brands.contains(&brand_id) {
                return BRAND_MATCH;
            }
        }
        NO_MATCH
    }

    fn hits_disliked_facet(item: &ItemRecord, prefs: &FacetPreferences) -> bool {
        if let Some(category) = &item.category {
            if prefs.disliked_categories.contains(category) {
                return true;
            }
        }
        if let Some(brand_id) = item.brand_id {
            if prefs.disliked_brands.contains(&brand_id) {
                return true;
            }
        }
        false
    }

    async fn facet_preferences(&self, user_id: Uuid) -> Result<FacetPreferences> {
        let history = self.interactions.recent_interactions(user_id, usize::MAX).await?;
        let ids: Vec<Uuid> = history.iter().map(|i| i.item_id).collect();
        let items = self.catalog.items(&ids).await?;

        let mut prefs = FacetPreferences::default();
        for interaction in &history {
            let Some(item) = items.iter().find(|item| item.id == interaction.item_id) else {
                continue;
            };
            match interaction.action {
                SwipeAction::Like => {
                    if let Some(category) = &item.category {
                        prefs.liked_categories.insert(category.clone());
                    }
                    if let Some(brand_id) = item.brand_id {
                        prefs.liked_brands.insert(brand_id);
                    }
                }
                SwipeAction::Dislike => {
                    if let Some(category) = &item.category {
                        prefs.disliked_categories.insert(category.clone());
                    }
                    if let Some(brand_id) = item.brand_id {
                        prefs.disliked_brands.insert(brand_id);
                    }
                }
            }
        }
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interaction;
    use crate::store::memory::{MemoryCatalog, MemoryInteractions};
    use chrono::Utc;

    fn item(n: u128, category: &str, brand: Option<u128>) -> ItemRecord {
        ItemRecord {
            id: Uuid::from_u128(n),
            name: format!("item-{n}"),
            description: None,
            image_url: None,
            category: Some(category.to_string()),
            brand_id: brand.map(Uuid::from_u128),
            image_vector: None,
            text_vector: None,
            combined_vector: None,
            like_count: 0,
            created_at: Utc::now(),
        }
    }

    fn swipe(user: u128, item: u128, action: SwipeAction) -> Interaction {
        Interaction {
            user_id: Uuid::from_u128(user),
            item_id: Uuid::from_u128(item),
            action,
            created_at: Utc::now(),
        }
    }

    /// The reference scenario: likes in Shirts/Jeans, dislike in Shoes.
    /// Shoes candidates are excluded outright; Shirts/Jeans outrank Hats.
    #[tokio::test]
    async fn test_disliked_category_excluded_and_ranking() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![
            item(1, "Shirts", None), // liked A
            item(2, "Shirts", None), // liked B
            item(3, "Jeans", None),  // liked C
            item(4, "Shoes", None),  // disliked D
            item(5, "Shirts", None), // candidate E
            item(6, "Jeans", None),  // candidate F
            item(7, "Shoes", None),  // candidate G - must be excluded
            item(8, "Hats", None),   // candidate H
        ]));
        let interactions = Arc::new(MemoryInteractions::new());
        for liked in [1u128, 2, 3] {
            interactions.record(swipe(1, liked, SwipeAction::Like));
        }
        interactions.record(swipe(1, 4, SwipeAction::Dislike));

        let seen: HashSet<Uuid> = [1u128, 2, 3, 4].map(Uuid::from_u128).into_iter().collect();
        let scored = ContentScorer::new(catalog, interactions)
            .score_candidates(Uuid::from_u128(1), &seen, None, None, 10, None)
            .await
            .unwrap();

        let ids: Vec<Uuid> = scored.iter().map(|(item, _)| item.id).collect();
        assert!(!ids.contains(&Uuid::from_u128(7)), "disliked-category item leaked");

        let score_of = |n: u128| {
            scored
                .iter()
                .find(|(item, _)| item.id == Uuid::from_u128(n))
                .map(|(_, s)| *s)
                .unwrap()
        };
        assert!(score_of(5) > score_of(8));
        assert!(score_of(6) > score_of(8));
        assert!((score_of(5) - 1.0).abs() < 1e-6); // 3/3
        assert!((score_of(8) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_brand_match_scores_between() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![
            item(1, "Shirts", Some(100)),
            item(2, "Hats", Some(100)), // brand match only
            item(3, "Hats", Some(200)), // no match
        ]));
        let interactions = Arc::new(MemoryInteractions::new());
        interactions.record(swipe(1, 1, SwipeAction::Like));

        let seen: HashSet<Uuid> = [Uuid::from_u128(1)].into_iter().collect();
        let scored = ContentScorer::new(catalog, interactions)
            .score_candidates(Uuid::from_u128(1), &seen, None, None, 10, None)
            .await
            .unwrap();

        assert_eq!(scored[0].0.id, Uuid::from_u128(2));
        assert!((scored[0].1 - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(scored[1].0.id, Uuid::from_u128(3));
    }

    #[tokio::test]
    async fn test_seen_items_never_returned() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![
            item(1, "Shirts", None),
            item(2, "Shirts", None),
        ]));
        let interactions = Arc::new(MemoryInteractions::new());
        interactions.record(swipe(1, 1, SwipeAction::Like));

        let seen: HashSet<Uuid> = [Uuid::from_u128(1)].into_iter().collect();
        let scored = ContentScorer::new(catalog, interactions)
            .score_candidates(Uuid::from_u128(1), &seen, None, None, 10, None)
            .await
            .unwrap();
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].0.id, Uuid::from_u128(2));
    }
}
