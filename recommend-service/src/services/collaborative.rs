//! Collaborative scoring: items liked by behaviorally similar users.

use crate::config::CollaborativeConfig;
use crate::store::InteractionStore;
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::SwipeAction;

/// A user whose liked-item set overlaps the target user's.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarUser {
    pub user_id: Uuid,
    pub similarity: f32,
    pub common_likes: usize,
}

pub struct CollaborativeScorer {
    interactions: Arc<dyn InteractionStore>,
    config: CollaborativeConfig,
}

impl CollaborativeScorer {
    pub fn new(interactions: Arc<dyn InteractionStore>, config: CollaborativeConfig) -> Self {
        Self {
            interactions,
            config,
        }
    }

    /// Users whose liked sets have Jaccard similarity >= the configured
    /// threshold with `liked`, sorted descending, capped.
    pub async fn similar_users(
        &self,
        user_id: Uuid,
        liked: &HashSet<Uuid>,
    ) -> Result<Vec<SimilarUser>> {
        if liked.is_empty() {
            return Ok(Vec::new());
        }

        let mut similar = Vec::new();
        for other in self.interactions.users_with_likes().await? {
            if other == user_id {
                continue;
            }
            let other_likes = self
                .interactions
                .item_ids_by_action(other, SwipeAction::Like)
                .await?;
            if other_likes.is_empty() {
                continue;
            }

            let intersection = liked.intersection(&other_likes).count();
            let union = liked.union(&other_likes).count();
            if union == 0 {
                continue;
            }
            let similarity = intersection as f32 / union as f32;
            if similarity >= self.config.min_jaccard {
                similar.push(SimilarUser {
                    user_id: other,
                    similarity,
                    common_likes: intersection,
                });
            }
        }

        similar.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        similar.truncate(self.config.max_similar_users);
        Ok(similar)
    }

    /// Score candidate items by summed similarity of the users that liked
    /// them, excluding anything the target user already swiped. Zero similar
    /// users yields an empty result, not an error.
    pub async fn score_candidates(
        &self,
        user_id: Uuid,
        already_seen: &HashSet<Uuid>,
        limit: usize,
    ) -> Result<Vec<(Uuid, f32)>> {
        let liked = self
            .interactions
            .item_ids_by_action(user_id, SwipeAction::Like)
            .await?;
        if liked.is_empty() {
            debug!(user_id = %user_id, "no likes, skipping collaborative scoring");
            return Ok(Vec::new());
        }

        let similar = self.similar_users(user_id, &liked).await?;
        if similar.is_empty() {
            info!(user_id = %user_id, "no similar users found");
            return Ok(Vec::new());
        }

        let mut scores: HashMap<Uuid, f32> = HashMap::new();
        for similar_user in &similar {
            let their_likes = self
                .interactions
                .item_ids_by_action(similar_user.user_id, SwipeAction::Like)
                .await?;
            for item_id in their_likes {
                if already_seen.contains(&item_id) {
                    continue;
                }
                *scores.entry(item_id).or_insert(0.0) += similar_user.similarity;
            }
        }

        let mut ranked: Vec<(Uuid, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);

        info!(
            user_id = %user_id,
            similar_users = similar.len(),
            candidates = ranked.len(),
            "collaborative scoring complete"
        );
        Ok(ranked)
    }
}
