//! Preference vector aggregation.
//!
//! Turns a user's swipe history into per-modality taste vectors. Three
//! strategies: plain average, time-decayed average, and like/dislike-balanced
//! (dislikes contribute damped, sign-flipped weight so disliked regions of
//! the embedding space are pushed away rather than ignored).

use crate::config::PreferenceConfig;
use crate::models::{
    AggregationStrategy, Interaction, ItemRecord, Modality, PreferenceVectors, SwipeAction,
};
use crate::store::{CatalogStore, InteractionStore};
use crate::utils::decay_weight;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const MODALITIES: [Modality; 3] = [Modality::Image, Modality::Text, Modality::Combined];

pub struct PreferenceAggregator {
    catalog: Arc<dyn CatalogStore>,
    interactions: Arc<dyn InteractionStore>,
    config: PreferenceConfig,
}

impl PreferenceAggregator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        interactions: Arc<dyn InteractionStore>,
        config: PreferenceConfig,
    ) -> Self {
        Self {
            catalog,
            interactions,
            config,
        }
    }

    pub async fn aggregate(
        &self,
        user_id: Uuid,
        strategy: AggregationStrategy,
    ) -> Result<PreferenceVectors> {
        match strategy {
            AggregationStrategy::Plain => self.plain(user_id).await,
            AggregationStrategy::TimeWeighted => self.time_weighted(user_id).await,
            AggregationStrategy::Balanced => self.balanced(user_id).await,
        }
    }

    /// Unweighted per-modality average over the most recent likes.
    pub async fn plain(&self, user_id: Uuid) -> Result<PreferenceVectors> {
        let likes = self
            .interactions
            .recent_by_action(user_id, SwipeAction::Like, self.config.max_likes)
            .await?;
        let weighted = self.attach_items(&likes, 1.0).await?;
        Ok(self.build(user_id, AggregationStrategy::Plain, weighted))
    }

    /// Per-modality average with each like weighted by
    /// `e^(-age_days / decay_days)`.
    pub async fn time_weighted(&self, user_id: Uuid) -> Result<PreferenceVectors> {
        let likes = self
            .interactions
            .recent_by_action(user_id, SwipeAction::Like, self.config.max_likes)
            .await?;
        let weighted = self.decayed(&likes, 1.0).await?;
        Ok(self.build(user_id, AggregationStrategy::TimeWeighted, weighted))
    }

    /// Time-decayed likes plus time-decayed dislikes at damped, negated
    /// weight.
    pub async fn balanced(&self, user_id: Uuid) -> Result<PreferenceVectors> {
        let likes = self
            .interactions
            .recent_by_action(user_id, SwipeAction::Like, self.config.max_likes)
            .await?;
        let dislikes = self
            .interactions
            .recent_by_action(user_id, SwipeAction::Dislike, self.config.max_dislikes)
            .await?;

        let mut weighted = self.decayed(&likes, 1.0).await?;
        weighted.extend(self.decayed(&dislikes, -self.config.dislike_damping).await?);
        Ok(self.build(user_id, AggregationStrategy::Balanced, weighted))
    }

    async fn decayed(
        &self,
        interactions: &[Interaction],
        sign: f32,
    ) -> Result<Vec<(ItemRecord, f32)>> {
        let now = Utc::now();
        let mut out = Vec::with_capacity(interactions.len());
        for interaction in interactions {
            let age_days =
                (now - interaction.created_at).num_seconds().max(0) as f32 / 86_400.0;
            let weight = sign * decay_weight(age_days, self.config.decay_days);
            if let Some(item) = self.catalog.item(interaction.item_id).await? {
                out.push((item, weight));
            }
        }
        Ok(out)
    }

    async fn attach_items(
        &self,
        interactions: &[Interaction],
        weight: f32,
    ) -> Result<Vec<(ItemRecord, f32)>> {
        let ids: Vec<Uuid> = interactions.iter().map(|i| i.item_id).collect();
        let items = self.catalog.items(&ids).await?;
        Ok(items.into_iter().map(|item| (item, weight)).collect())
    }

    fn build(
        &self,
        user_id: Uuid,
        strategy: AggregationStrategy,
        weighted_items: Vec<(ItemRecord, f32)>,
    ) -> PreferenceVectors {
        let mut vectors = HashMap::new();
        for modality in MODALITIES {
            let gathered: Vec<(&[f32], f32)> = weighted_items
                .iter()
                .filter_map(|(item, weight)| item.vector(modality).map(|v| (v, *weight)))
                .collect();
            if let Some(mean) = weighted_mean(&gathered, modality) {
                vectors.insert(modality, mean);
            }
        }

        debug!(
            user_id = %user_id,
            strategy = strategy.as_str(),
            source_items = weighted_items.len(),
            modalities = vectors.len(),
            "aggregated preference vectors"
        );

        PreferenceVectors {
            user_id,
            strategy,
            vectors,
            generated_at: Utc::now(),
        }
    }
}

/// Weighted mean over vectors of identical length.
///
/// The first gathered vector fixes the modality's expected dimension; any
/// vector of a different length is a data inconsistency and is skipped (with
/// a warning), never zero-padded. A weight sum near zero (possible under the
/// balanced strategy when likes and dislikes cancel) falls back to the
/// unweighted mean of the kept vectors.
fn weighted_mean(vectors: &[(&[f32], f32)], modality: Modality) -> Option<Vec<f32>> {
    let (first, _) = vectors.first()?;
    let dimension = first.len();
    if dimension == 0 {
        return None;
    }

    let kept: Vec<(&[f32], f32)> = vectors
        .iter()
        .filter(|(v, _)| {
            if v.len() == dimension {
                true
            } else {
                warn!(
                    modality = modality.as_str(),
                    expected = dimension,
                    got = v.len(),
                    "skipping incompatible vector length"
                );
                false
            }
        })
        .map(|(v, w)| (*v, *w))
        .collect();
    if kept.is_empty() {
        return None;
    }

    let total_weight: f32 = kept.iter().map(|(_, w)| w).sum();
    let mut mean = vec![0.0f32; dimension];

    if total_weight.abs() < 1e-6 {
        for (vector, _) in &kept {
            for (acc, x) in mean.iter_mut().zip(vector.iter()) {
                *acc += x;
            }
        }
        let n = kept.len() as f32;
        mean.iter_mut().for_each(|x| *x /= n);
    } else {
        for (vector, weight) in &kept {
            for (acc, x) in mean.iter_mut().zip(vector.iter()) {
                *acc += x * weight;
            }
        }
        mean.iter_mut().for_each(|x| *x /= total_weight);
    }
    Some(mean)
}
