//! Diversity-aware re-ranking.
//!
//! Adjusts fused scores against the user's recent history (penalizing
//! over-represented categories/brands, rewarding unseen ones), applies
//! bounded exploration jitter, then greedily selects under per-category and
//! per-brand caps. When the caps would leave the requested limit unmet, the
//! next-best candidates are backfilled past the caps and flagged.

use crate::config::DiversityConfig;
use crate::services::hybrid::RankedCandidate;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::models::ItemRecord;

/// Penalty/bonus scale factors for the diversity adjustment.
const CATEGORY_PENALTY: f32 = 0.5;
const BRAND_PENALTY: f32 = 0.3;
const CATEGORY_BONUS: f32 = 0.2;
const BRAND_BONUS: f32 = 0.1;

pub struct DiversityReRanker {
    config: DiversityConfig,
}

impl DiversityReRanker {
    pub fn new(config: DiversityConfig) -> Self {
        Self { config }
    }

    /// Re-rank `candidates` against the items of the user's recent
    /// interactions and select up to `limit` under the diversity caps.
    pub fn rerank(
        &self,
        candidates: Vec<RankedCandidate>,
        recent_items: &[ItemRecord],
        limit: usize,
        mut rng: Option<&mut StdRng>,
    ) -> Vec<RankedCandidate> {
        if candidates.is_empty() || limit == 0 {
            return Vec::new();
        }

        let history = FacetHistory::from_items(recent_items);
        let mut adjusted: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|mut candidate| {
                let adjustment = history.adjustment(&candidate.item);
                candidate.score += adjustment * self.config.diversity_boost;
                if self.config.randomness_factor > 0.0 {
                    if let Some(rng) = rng.as_mut() {
                        let jitter: f32 = (rng.gen::<f32>() - 0.5) * self.config.randomness_factor;
                        candidate.score += jitter;
                    }
                }
                candidate.score = candidate.score.clamp(0.0, 1.0);
                candidate
            })
            .collect();

        adjusted.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });

        self.select_with_caps(adjusted, limit)
    }

    /// Greedy cap-respecting selection with flagged backfill.
    fn select_with_caps(
        &self,
        ranked: Vec<RankedCandidate>,
        limit: usize,
    ) -> Vec<RankedCandidate> {
        let mut selected: Vec<RankedCandidate> = Vec::with_capacity(limit);
        let mut skipped: Vec<RankedCandidate> = Vec::new();
        let mut category_counts: HashMap<String, usize> = HashMap::new();
        let mut brand_counts: HashMap<Uuid, usize> = HashMap::new();

        for candidate in ranked {
            if selected.len() >= limit {
                break;
            }
            let category_full = candidate
                .item
                .category
                .as_ref()
                .map(|c| category_counts.get(c).copied().unwrap_or(0) >= self.config.max_per_category)
                .unwrap_or(false);
            let brand_full = candidate
                .item
                .brand_id
                .map(|b| brand_counts.get(&b).copied().unwrap_or(0) >= self.config.max_per_brand)
                .unwrap_or(false);

            if category_full || brand_full {
                skipped.push(candidate);
                continue;
            }
            if let Some(category) = &candidate.item.category {
                *category_counts.entry(category.clone()).or_insert(0) += 1;
            }
            if let Some(brand_id) = candidate.item.brand_id {
                *brand_counts.entry(brand_id).or_insert(0) += 1;
            }
            selected.push(candidate);
        }

        // The caps starved the result: backfill best skipped candidates and
        // flag them so callers can see the exception.
        if selected.len() < limit && !skipped.is_empty() {
            let missing = limit - selected.len();
            debug!(missing, "diversity caps underfilled result, backfilling");
            for mut candidate in skipped.into_iter().take(missing) {
                candidate.backfilled = true;
                selected.push(candidate);
            }
        }
        selected
    }
}

struct FacetHistory {
    total: usize,
    category_counts: HashMap<String, usize>,
    brand_counts: HashMap<Uuid, usize>,
}

impl FacetHistory {
    fn from_items(items: &[ItemRecord]) -> Self {
        let mut category_counts: HashMap<String, usize> = HashMap::new();
        let mut brand_counts: HashMap<Uuid, usize> = HashMap::new();
        for item in items {
            if let Some(category) = &item.category {
                *category_counts.entry(category.clone()).or_insert(0) += 1;
            }
            if let Some(brand_id) = item.brand_id {
                *brand_counts.entry(brand_id).or_insert(0) += 1;
            }
        }
        Self {
            total: items.len().max(1),
            category_counts,
            brand_counts,
        }
    }

    /// Positive for unseen facets, negative proportional to how often a
    /// facet dominates recent history.
    fn adjustment(&self, item: &ItemRecord) -> f32 {
        let mut adjustment = 0.0f32;
        if let Some(category) = &item.category {
            match self.category_counts.get(category) {
                Some(count) => {
                    adjustment -= (*count as f32 / self.total as f32) * CATEGORY_PENALTY
                }
                None => adjustment += CATEGORY_BONUS,
            }
        }
        if let Some(brand_id) = item.brand_id {
            match self.brand_counts.get(&brand_id) {
                Some(count) => adjustment -= (*count as f32 / self.total as f32) * BRAND_PENALTY,
                None => adjustment += BRAND_BONUS,
            }
        }
        adjustment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::ScoreMethod;
    use chrono::Utc;
    use std::collections::BTreeMap;

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

    fn candidate(item: ItemRecord, score: f32) -> RankedCandidate {
        let mut method_scores = BTreeMap::new();
        method_scores.insert(ScoreMethod::Vector, score);
        RankedCandidate {
            item,
            score,
            method_scores,
            backfilled: false,
        }
    }

    fn reranker() -> DiversityReRanker {
        let mut config = EngineConfig::default().diversity;
        config.randomness_factor = 0.0;
        DiversityReRanker::new(config)
    }

    #[test]
    fn test_category_cap_enforced() {
        let candidates = vec![
            candidate(item(1, "Shirts", None), 0.9),
            candidate(item(2, "Shirts", None), 0.85),
            candidate(item(3, "Shirts", None), 0.8),
            candidate(item(4, "Jeans", None), 0.7),
            candidate(item(5, "Hats", None), 0.6),
        ];

        let selected = reranker().rerank(candidates, &[], 4, None);
        assert_eq!(selected.len(), 4);
        let shirts = selected
            .iter()
            .filter(|c| c.item.category.as_deref() == Some("Shirts"))
            .count();
        assert!(shirts <= 2);
        assert!(selected.iter().all(|c| !c.backfilled));
    }

    #[test]
    fn test_backfill_flagged_when_caps_starve() {
        // Only one category available: the cap of 2 cannot fill limit 4.
        let candidates = vec![
            candidate(item(1, "Shirts", None), 0.9),
            candidate(item(2, "Shirts", None), 0.8),
            candidate(item(3, "Shirts", None), 0.7),
            candidate(item(4, "Shirts", None), 0.6),
        ];

        let selected = reranker().rerank(candidates, &[], 4, None);
        assert_eq!(selected.len(), 4);
        assert!(!selected[0].backfilled);
        assert!(!selected[1].backfilled);
        assert!(selected[2].backfilled);
        assert!(selected[3].backfilled);
    }

    #[test]
    fn test_overrepresented_category_penalized() {
        // Recent history is all Shirts.
        let recent: Vec<ItemRecord> = (100..110).map(|n| item(n, "Shirts", None)).collect();

        let candidates = vec![
            candidate(item(1, "Shirts", None), 0.7),
            candidate(item(2, "Hats", None), 0.7), // unseen category
        ];

        let selected = reranker().rerank(candidates, &recent, 2, None);
        // The unseen category gets the bonus, the saturated one the penalty.
        assert_eq!(selected[0].item.id, Uuid::from_u128(2));
    }

    #[test]
    fn test_brand_cap_enforced() {
        let candidates = vec![
            candidate(item(1, "A", Some(7)), 0.9),
            candidate(item(2, "B", Some(7)), 0.8),
            candidate(item(3, "C", Some(7)), 0.7),
            candidate(item(4, "D", Some(8)), 0.6),
        ];

        let selected = reranker().rerank(candidates, &[], 3, None);
        let brand7 = selected
            .iter()
            .filter(|c| c.item.brand_id == Some(Uuid::from_u128(7)) && !c.backfilled)
            .count();
        assert!(brand7 <= 2);
        assert!(selected.iter().any(|c| c.item.brand_id == Some(Uuid::from_u128(8))));
    }

    #[test]
    fn test_scores_clamped_to_unit_interval() {
        let recent: Vec<ItemRecord> = vec![item(100, "Shirts", None)];
        let candidates = vec![
            candidate(item(1, "Hats", Some(9)), 0.99), // bonus would exceed 1.0
            candidate(item(2, "Shirts", None), 0.01),  // penalty would go below 0
        ];

        let selected = reranker().rerank(candidates, &recent, 2, None);
        for c in &selected {
            assert!((0.0..=1.0).contains(&c.score));
        }
    }

    #[test]
    fn test_deterministic_without_randomness() {
        let make = || {
            vec![
                candidate(item(1, "A", None), 0.5),
                candidate(item(2, "B", None), 0.5),
                candidate(item(3, "C", None), 0.5),
            ]
        };
        let a = reranker().rerank(make(), &[], 3, None);
        let b = reranker().rerank(make(), &[], 3, None);
        let ids = |v: &[RankedCandidate]| v.iter().map(|c| c.item.id).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }
}
