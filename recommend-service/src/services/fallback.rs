//! Explicit fallback chain for vector candidate retrieval.
//!
//! Previously-scattered fallbacks (ANN search, brute force, cold-start
//! randoms) live in one place so every response records which tier actually
//! produced it.

use crate::services::vector_search::{facets_match, VectorCandidates, VectorSearchService};
use crate::store::CatalogStore;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use trove_vector_index::Modality;
use uuid::Uuid;

use crate::models::{ItemRecord, PreferenceVectors, RecommendationTier};

/// Cold-start pool over-fetch, to survive exclusion filtering.
const COLD_START_POOL_MULTIPLIER: usize = 4;

/// Output of the vector stage: candidates plus the tier that produced them.
#[derive(Debug)]
pub struct VectorStage {
    pub tier: RecommendationTier,
    pub candidates: Vec<(ItemRecord, f32)>,
}

pub struct FallbackChain {
    search: Arc<VectorSearchService>,
    catalog: Arc<dyn CatalogStore>,
}

impl FallbackChain {
    pub fn new(search: Arc<VectorSearchService>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { search, catalog }
    }

    /// Resolve vector candidates through the tiers:
    /// ANN index -> brute force -> cold start.
    ///
    /// An empty preference vector set routes straight to cold start; an
    /// unavailable index (or one that yields nothing) falls through to the
    /// brute-force scan.
    #[allow(clippy::too_many_arguments)]
    pub async fn vector_candidates(
        &self,
        preferences: &PreferenceVectors,
        limit: usize,
        exclude: &HashSet<Uuid>,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        modality_weights: Option<&HashMap<Modality, f32>>,
        rng: Option<&mut StdRng>,
    ) -> Result<VectorStage> {
        if preferences.is_empty() {
            info!(user_id = %preferences.user_id, "no preference vectors, taking cold-start tier");
            return self.cold_start(limit, exclude, category, brand_id, rng).await;
        }

        match self
            .search
            .search_index(
                &preferences.vectors,
                limit,
                exclude,
                category,
                brand_id,
                modality_weights,
            )
            .await?
        {
            VectorCandidates::Hits(hits) if !hits.is_empty() => Ok(VectorStage {
                tier: RecommendationTier::AnnIndex,
                candidates: hits,
            }),
            VectorCandidates::Hits(_) | VectorCandidates::IndexUnavailable => {
                let hits = self
                    .search
                    .brute_force(
                        &preferences.vectors,
                        limit,
                        exclude,
                        category,
                        brand_id,
                        modality_weights,
                    )
                    .await?;
                Ok(VectorStage {
                    tier: RecommendationTier::BruteForce,
                    candidates: hits,
                })
            }
        }
    }

    /// Cold-start tier: unswiped items with a combined vector, shuffled for
    /// variety (or id-ordered when the engine runs deterministically).
    pub async fn cold_start(
        &self,
        limit: usize,
        exclude: &HashSet<Uuid>,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        rng: Option<&mut StdRng>,
    ) -> Result<VectorStage> {
        let pool = self
            .catalog
            .vectorized_items(
                category,
                brand_id,
                limit.saturating_mul(COLD_START_POOL_MULTIPLIER).max(limit),
            )
            .await?;

        let mut pool: Vec<ItemRecord> = pool
            .into_iter()
            .filter(|item| !exclude.contains(&item.id))
            .filter(|item| facets_match(item, category, brand_id))
            .collect();

        let candidates = match rng {
            Some(rng) => {
                pool.shuffle(&mut *rng);
                pool.into_iter()
                    .take(limit)
                    // Plausible-but-random score band, like a mild match.
                    .map(|item| (item, 0.5 + rng.gen::<f32>() * 0.3))
                    .collect()
            }
            None => {
                pool.sort_by_key(|item| item.id);
                pool.into_iter().take(limit).map(|item| (item, 0.5)).collect()
            }
        };

        Ok(VectorStage {
            tier: RecommendationTier::ColdStart,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::AggregationStrategy;
    use crate::store::memory::MemoryCatalog;
    use chrono::Utc;
    use trove_vector_index::VectorIndex;

    fn item(n: u128, combined: Vec<f32>) -> ItemRecord {
        ItemRecord {
            id: Uuid::from_u128(n),
            name: format!("item-{n}"),
            description: None,
            image_url: None,
            category: None,
            brand_id: None,
            image_vector: None,
            text_vector: None,
            combined_vector: Some(combined),
            like_count: 0,
            created_at: Utc::now(),
        }
    }

    fn prefs_with(v: Vec<f32>) -> PreferenceVectors {
        PreferenceVectors {
            user_id: Uuid::from_u128(99),
            strategy: AggregationStrategy::TimeWeighted,
            vectors: [(Modality::Combined, v)].into_iter().collect(),
            generated_at: Utc::now(),
        }
    }

    fn chain(catalog: Arc<MemoryCatalog>, index: Arc<VectorIndex>) -> FallbackChain {
        let search = Arc::new(VectorSearchService::new(
            index,
            Arc::clone(&catalog) as Arc<dyn CatalogStore>,
            EngineConfig::default().search,
        ));
        FallbackChain::new(search, catalog)
    }

    #[tokio::test]
    async fn test_ann_tier_when_index_populated() {
        let items = vec![item(1, vec![1.0, 0.0]), item(2, vec![0.0, 1.0])];
        let index = Arc::new(VectorIndex::new());
        for i in &items {
            index
                .insert(i.id, Modality::Combined, i.combined_vector.as_ref().unwrap())
                .unwrap();
        }
        let catalog = Arc::new(MemoryCatalog::seed(items));

        let stage = chain(catalog, index)
            .vector_candidates(
                &prefs_with(vec![1.0, 0.0]),
                5,
                &HashSet::new(),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(stage.tier, RecommendationTier::AnnIndex);
        assert_eq!(stage.candidates[0].0.id, Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn test_brute_force_tier_when_index_empty() {
        let items = vec![item(1, vec![1.0, 0.0]), item(2, vec![0.0, 1.0])];
        let catalog = Arc::new(MemoryCatalog::seed(items));
        let index = Arc::new(VectorIndex::new());

        let stage = chain(catalog, index)
            .vector_candidates(
                &prefs_with(vec![1.0, 0.0]),
                5,
                &HashSet::new(),
                None,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(stage.tier, RecommendationTier::BruteForce);
        assert!(!stage.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_cold_start_tier_for_empty_preferences() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![item(1, vec![1.0, 0.0])]));
        let index = Arc::new(VectorIndex::new());

        let empty = PreferenceVectors::empty(Uuid::from_u128(99), AggregationStrategy::TimeWeighted);
        let stage = chain(catalog, index)
            .vector_candidates(&empty, 5, &HashSet::new(), None, None, None, None)
            .await
            .unwrap();

        assert_eq!(stage.tier, RecommendationTier::ColdStart);
        assert_eq!(stage.candidates.len(), 1);
        assert!((stage.candidates[0].1 - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_cold_start_respects_exclusions() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![
            item(1, vec![1.0, 0.0]),
            item(2, vec![0.0, 1.0]),
        ]));
        let index = Arc::new(VectorIndex::new());

        let exclude: HashSet<Uuid> = [Uuid::from_u128(1)].into_iter().collect();
        let stage = chain(catalog, index)
            .cold_start(5, &exclude, None, None, None)
            .await
            .unwrap();

        assert_eq!(stage.candidates.len(), 1);
        assert_eq!(stage.candidates[0].0.id, Uuid::from_u128(2));
    }
}
