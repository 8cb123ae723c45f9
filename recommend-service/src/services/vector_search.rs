//! Vector candidate retrieval: ANN index search with a brute-force fallback.

use crate::config::SearchConfig;
use crate::services::similarity;
use crate::store::CatalogStore;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use trove_vector_index::{Modality, SearchOutcome, VectorIndex};
use uuid::Uuid;

use crate::models::ItemRecord;

/// Vector-search result. `IndexUnavailable` tells the caller to take the
/// brute-force tier; it is not an error.
#[derive(Debug)]
pub enum VectorCandidates {
    Hits(Vec<(ItemRecord, f32)>),
    IndexUnavailable,
}

pub struct VectorSearchService {
    index: Arc<VectorIndex>,
    catalog: Arc<dyn CatalogStore>,
    config: SearchConfig,
}

impl VectorSearchService {
    pub fn new(
        index: Arc<VectorIndex>,
        catalog: Arc<dyn CatalogStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            index,
            catalog,
            config,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Search the ANN index, then apply category/brand filters over the
    /// over-fetched hits. Reports `IndexUnavailable` when no bucket could
    /// serve the query.
    pub async fn search_index(
        &self,
        queries: &HashMap<Modality, Vec<f32>>,
        limit: usize,
        exclude: &HashSet<Uuid>,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        modality_weights: Option<&HashMap<Modality, f32>>,
    ) -> Result<VectorCandidates> {
        // Over-fetch so post-search filtering still fills `limit`.
        let fetch = limit.saturating_mul(trove_vector_index::FETCH_MULTIPLIER);
        let outcome = self.index.search(queries, fetch, exclude, modality_weights);

        let hits = match outcome {
            SearchOutcome::Unavailable => {
                info!("vector index unavailable for query, caller should fall back");
                return Ok(VectorCandidates::IndexUnavailable);
            }
            SearchOutcome::Hits(hits) => hits,
        };

        let ids: Vec<Uuid> = hits.iter().map(|h| h.item_id).collect();
        let items = self.catalog.items(&ids).await?;
        let by_id: HashMap<Uuid, ItemRecord> =
            items.into_iter().map(|item| (item.id, item)).collect();

        let mut results = Vec::new();
        for hit in hits {
            let Some(item) = by_id.get(&hit.item_id) else {
                // Index row without a catalog record: stale entry awaiting
                // rebuild.
                debug!(item_id = %hit.item_id, "index hit missing from catalog");
                continue;
            };
            if !facets_match(item, category, brand_id) {
                continue;
            }
            results.push((item.clone(), hit.score));
            if results.len() >= limit {
                break;
            }
        }
        Ok(VectorCandidates::Hits(results))
    }

    /// Brute-force scan over the stored vectors: bounded candidate pool,
    /// per-modality cosine, fused score. Slower than the index but has no
    /// dimension/bucket preconditions.
    pub async fn brute_force(
        &self,
        queries: &HashMap<Modality, Vec<f32>>,
        limit: usize,
        exclude: &HashSet<Uuid>,
        category: Option<&str>,
        brand_id: Option<Uuid>,
        modality_weights: Option<&HashMap<Modality, f32>>,
    ) -> Result<Vec<(ItemRecord, f32)>> {
        let pool = self
            .catalog
            .vectorized_items(category, brand_id, self.config.brute_force_pool)
            .await?;

        let mut scored = Vec::new();
        for item in pool {
            if exclude.contains(&item.id) {
                continue;
            }
            let per_modality: HashMap<Modality, similarity::Similarity> = queries
                .iter()
                .filter_map(|(modality, query)| {
                    item.vector(*modality)
                        .map(|v| (*modality, similarity::cosine(query, v)))
                })
                .collect();
            let fused = similarity::fuse(&per_modality, modality_weights);
            if fused.contributing == 0 {
                continue;
            }
            scored.push((item, fused.score));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(limit);

        debug!(candidates = scored.len(), "brute-force vector scan complete");
        Ok(scored)
    }
}

pub(crate) fn facets_match(
    item: &ItemRecord,
    category: Option<&str>,
    brand_id: Option<Uuid>,
) -> bool {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::memory::MemoryCatalog;
    use chrono::Utc;

    fn item(n: u128, category: &str, combined: Vec<f32>) -> ItemRecord {
        ItemRecord {
            id: Uuid::from_u128(n),
            name: format!("item-{n}"),
            description: None,
            image_url: None,
            category: Some(category.to_string()),
            brand_id: None,
            image_vector: None,
            text_vector: None,
            combined_vector: Some(combined),
            like_count: 0,
            created_at: Utc::now(),
        }
    }

    fn service(catalog: Arc<MemoryCatalog>, index: Arc<VectorIndex>) -> VectorSearchService {
        VectorSearchService::new(index, catalog, EngineConfig::default().search)
    }

    fn combined_query(v: Vec<f32>) -> HashMap<Modality, Vec<f32>> {
        [(Modality::Combined, v)].into_iter().collect()
    }

    #[tokio::test]
    async fn test_index_search_with_category_filter() {
        let items = vec![
            item(1, "Shirts", vec![1.0, 0.0]),
            item(2, "Jeans", vec![0.9, 0.1]),
            item(3, "Shirts", vec![0.5, 0.5]),
        ];
        let index = Arc::new(VectorIndex::new());
        for i in &items {
            index
                .insert(i.id, Modality::Combined, i.combined_vector.as_ref().unwrap())
                .unwrap();
        }
        let catalog = Arc::new(MemoryCatalog::seed(items));

        let result = service(catalog, index)
            .search_index(
                &combined_query(vec![1.0, 0.0]),
                2,
                &HashSet::new(),
                Some("Shirts"),
                None,
                None,
            )
            .await
            .unwrap();

        let VectorCandidates::Hits(hits) = result else {
            panic!("expected hits");
        };
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, Uuid::from_u128(1));
        assert_eq!(hits[1].0.id, Uuid::from_u128(3));
    }

    #[tokio::test]
    async fn test_index_unavailable_signals_fallback() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![item(1, "Shirts", vec![1.0, 0.0])]));
        let index = Arc::new(VectorIndex::new()); // empty: no buckets

        let result = service(catalog, index)
            .search_index(
                &combined_query(vec![1.0, 0.0]),
                5,
                &HashSet::new(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        assert!(matches!(result, VectorCandidates::IndexUnavailable));
    }

    #[tokio::test]
    async fn test_brute_force_matches_index_ranking() {
        let items = vec![
            item(1, "Shirts", vec![1.0, 0.0]),
            item(2, "Shirts", vec![0.0, 1.0]),
            item(3, "Shirts", vec![0.8, 0.2]),
        ];
        let catalog = Arc::new(MemoryCatalog::seed(items));
        let index = Arc::new(VectorIndex::new());

        let hits = service(catalog, index)
            .brute_force(
                &combined_query(vec![1.0, 0.0]),
                3,
                &HashSet::new(),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0.id, Uuid::from_u128(1));
        assert_eq!(hits[1].0.id, Uuid::from_u128(3));
        assert_eq!(hits[2].0.id, Uuid::from_u128(2));
    }

    #[tokio::test]
    async fn test_brute_force_skips_incomparable_dimensions() {
        let items = vec![
            item(1, "Shirts", vec![1.0, 0.0]),
            item(2, "Shirts", vec![1.0, 0.0, 0.0]), // different space
        ];
        let catalog = Arc::new(MemoryCatalog::seed(items));
        let index = Arc::new(VectorIndex::new());

        let hits = service(catalog, index)
            .brute_force(
                &combined_query(vec![1.0, 0.0]),
                5,
                &HashSet::new(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, Uuid::from_u128(1));
    }
}
