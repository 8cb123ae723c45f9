//! Recommendation engine facade.
//!
//! Wires preference aggregation, the vector fallback chain, collaborative
//! and content scoring, hybrid fusion, diversity re-ranking, the response
//! cache, and the vectorization job queue behind the public operations.

use crate::config::EngineConfig;
use crate::embed::Embedder;
use crate::error::{EngineError, Result};
use crate::jobs::{JobPriority, JobRecord, VectorizationQueue};
use crate::services::collaborative::CollaborativeScorer;
use crate::services::content::ContentScorer;
use crate::services::diversity::DiversityReRanker;
use crate::services::fallback::FallbackChain;
use crate::services::hybrid::{self, MethodWeights, RankedCandidate};
use crate::services::preference::PreferenceAggregator;
use crate::services::vector_search::{VectorCandidates, VectorSearchService};
use crate::store::{CatalogStore, InteractionStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use trove_cache::{CacheKey, CacheOperations, MemoryCache};
use trove_vector_index::{Modality, VectorIndex};
use uuid::Uuid;

use crate::models::{
    EngineStatus, ItemRecord, PreferenceVectors, QualityLevel, RankingStats, Recommendation,
    RecommendationResponse, RecommendationTier, ScoreMethod,
};

#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub user_id: Uuid,
    pub limit: usize,
    pub category: Option<String>,
    pub brand_id: Option<Uuid>,
    /// Method fusion weights; engine defaults apply when absent.
    pub weights: Option<MethodWeights>,
    /// Per-modality merge weights for the vector search.
    pub modality_weights: Option<HashMap<Modality, f32>>,
}

impl RecommendationRequest {
    pub fn new(user_id: Uuid, limit: usize) -> Self {
        Self {
            user_id,
            limit,
            category: None,
            brand_id: None,
            weights: None,
            modality_weights: None,
        }
    }
}

pub struct RecommendationEngine {
    catalog: Arc<dyn CatalogStore>,
    interactions: Arc<dyn InteractionStore>,
    index: Arc<VectorIndex>,
    cache: Arc<MemoryCache>,
    embedder: Arc<dyn Embedder>,
    search: Arc<VectorSearchService>,
    chain: FallbackChain,
    preference: PreferenceAggregator,
    collaborative: CollaborativeScorer,
    content: ContentScorer,
    diversity: DiversityReRanker,
    jobs: VectorizationQueue,
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

impl RecommendationEngine {
    /// Build the engine and spawn its background worker. Must be called
    /// within a tokio runtime.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        interactions: Arc<dyn InteractionStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        let index = Arc::new(VectorIndex::new());
        let cache = Arc::new(MemoryCache::with_capacity(config.cache.max_entries));
        let search = Arc::new(VectorSearchService::new(
            Arc::clone(&index),
            Arc::clone(&catalog),
            config.search.clone(),
        ));
        let chain = FallbackChain::new(Arc::clone(&search), Arc::clone(&catalog));
        let preference = PreferenceAggregator::new(
            Arc::clone(&catalog),
            Arc::clone(&interactions),
            config.preference.clone(),
        );
        let collaborative =
            CollaborativeScorer::new(Arc::clone(&interactions), config.collaborative.clone());
        let content = ContentScorer::new(Arc::clone(&catalog), Arc::clone(&interactions));
        let diversity = DiversityReRanker::new(config.diversity.clone());
        let jobs = VectorizationQueue::new(
            Arc::clone(&catalog),
            Arc::clone(&index),
            Arc::clone(&embedder),
        );
        let rng = Mutex::new(match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        });

        Self {
            catalog,
            interactions,
            index,
            cache,
            embedder,
            search,
            chain,
            preference,
            collaborative,
            content,
            diversity,
            jobs,
            config,
            rng,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Rebuild the vector index from the persisted item vectors. Run at
    /// startup and whenever deletions must be honored.
    pub async fn warm_up(&self) -> Result<usize> {
        let items = self
            .catalog
            .vectorized_items(None, None, usize::MAX)
            .await?;
        let entries = items.into_iter().flat_map(|item| {
            item.vectors()
                .into_iter()
                .map(move |(modality, vector)| (item.id, modality, vector))
                .collect::<Vec<_>>()
        });
        let inserted = self
            .index
            .rebuild(entries)
            .map_err(|e| EngineError::Dependency(format!("index rebuild failed: {e}")))?;
        info!(inserted, "vector index warmed up");
        Ok(inserted)
    }

    /// Ranked recommendations for a user, through the full pipeline:
    /// cache -> preference vectors -> vector fallback chain -> hybrid fusion
    /// -> diversity re-rank -> cache store.
    pub async fn get_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        let weights = request
            .weights
            .unwrap_or_else(|| MethodWeights::from(&self.config.weights));
        weights.validate()?;

        if !self.interactions.user_exists(request.user_id).await? {
            return Err(EngineError::invalid(format!(
                "unknown user id {}",
                request.user_id
            )));
        }

        let cache_key = CacheKey::recommendations(
            request.user_id,
            &Self::request_params(request, &weights),
        );
        if let Some(cached) = self.cache_get::<RecommendationResponse>(&cache_key) {
            info!(user_id = %request.user_id, "recommendation cache hit");
            return Ok(cached);
        }

        let exclude = self.interactions.swiped_item_ids(request.user_id).await?;
        let candidate_limit = request
            .limit
            .saturating_mul(self.config.search.candidate_multiplier)
            .max(request.limit);
        let category = request.category.as_deref();
        let mut rng = self.request_rng();

        let mut stats = RankingStats::default();
        let mut inputs: Vec<(ScoreMethod, Vec<(ItemRecord, f32)>)> = Vec::new();
        let mut vector_tier = None;

        if weights.enabled(ScoreMethod::Vector) {
            let preferences = self.preference_vectors(request.user_id).await?;
            let stage = self
                .chain
                .vector_candidates(
                    &preferences,
                    candidate_limit,
                    &exclude,
                    category,
                    request.brand_id,
                    request.modality_weights.as_ref(),
                    rng.as_mut(),
                )
                .await?;
            stats.vector_count = stage.candidates.len();
            vector_tier = Some(stage.tier);
            inputs.push((ScoreMethod::Vector, stage.candidates));
        }

        if weights.enabled(ScoreMethod::Collaborative) {
            let scored = self
                .collaborative
                .score_candidates(request.user_id, &exclude, candidate_limit)
                .await?;
            let resolved = self
                .resolve_collaborative(scored, category, request.brand_id)
                .await?;
            stats.collaborative_count = resolved.len();
            inputs.push((ScoreMethod::Collaborative, resolved));
        }

        if weights.enabled(ScoreMethod::Content) {
            let scored = self
                .content
                .score_candidates(
                    request.user_id,
                    &exclude,
                    category,
                    request.brand_id,
                    candidate_limit,
                    rng.as_mut(),
                )
                .await?;
            stats.content_count = scored.len();
            inputs.push((ScoreMethod::Content, scored));
        }

        let merged = hybrid::merge(inputs, &weights);
        stats.merged_count = merged.len();

        let recent = self.recent_history_items(request.user_id).await?;
        let selected = self
            .diversity
            .rerank(merged, &recent, request.limit, rng.as_mut());
        stats.final_count = selected.len();

        let tier = if selected.is_empty() {
            RecommendationTier::Empty
        } else if stats.vector_count > 0 {
            vector_tier.unwrap_or(RecommendationTier::ContentOnly)
        } else {
            RecommendationTier::ContentOnly
        };

        let recommendations: Vec<Recommendation> = selected
            .iter()
            .map(|candidate| Recommendation {
                item_id: candidate.item.id,
                score: candidate.score,
                reason: Self::reason_for(candidate, tier),
                methods_used: candidate.methods_used(),
                method_scores: candidate.method_scores.clone(),
                backfilled: candidate.backfilled,
            })
            .collect();

        info!(
            user_id = %request.user_id,
            tier = tier.as_str(),
            vector = stats.vector_count,
            collaborative = stats.collaborative_count,
            content = stats.content_count,
            returned = stats.final_count,
            "recommendation request complete"
        );

        let response = RecommendationResponse {
            reason: Self::tier_reason(tier),
            recommendations,
            tier,
            stats,
        };
        if !response.recommendations.is_empty() {
            self.cache_set(
                &cache_key,
                &response,
                Duration::from_secs(self.config.cache.recommendations_ttl_secs),
            );
        }
        Ok(response)
    }

    /// Items most similar to one item, optionally excluding everything a
    /// user already swiped.
    pub async fn get_similar_items(
        &self,
        item_id: Uuid,
        limit: usize,
        exclude_user: Option<Uuid>,
    ) -> Result<RecommendationResponse> {
        let item = self
            .catalog
            .item(item_id)
            .await?
            .ok_or_else(|| EngineError::invalid(format!("unknown item id {item_id}")))?;

        let queries = item.vectors();
        if queries.is_empty() {
            return Ok(Self::empty_response(format!(
                "item {} has no vectors yet",
                item.name
            )));
        }

        let mut exclude: HashSet<Uuid> = [item_id].into_iter().collect();
        if let Some(user_id) = exclude_user {
            exclude.extend(self.interactions.swiped_item_ids(user_id).await?);
        }

        let (tier, hits) = match self
            .search
            .search_index(&queries, limit, &exclude, None, None, None)
            .await?
        {
            VectorCandidates::Hits(hits) if !hits.is_empty() => {
                (RecommendationTier::AnnIndex, hits)
            }
            VectorCandidates::Hits(_) | VectorCandidates::IndexUnavailable => {
                let hits = self
                    .search
                    .brute_force(&queries, limit, &exclude, None, None, None)
                    .await?;
                (RecommendationTier::BruteForce, hits)
            }
        };

        let recommendations = hits
            .into_iter()
            .map(|(candidate, score)| Recommendation {
                item_id: candidate.id,
                score,
                reason: format!("Similar to {}", item.name),
                methods_used: vec![ScoreMethod::Vector],
                method_scores: [(ScoreMethod::Vector, score)].into_iter().collect(),
                backfilled: false,
            })
            .collect();

        Ok(RecommendationResponse {
            recommendations,
            tier,
            reason: Self::tier_reason(tier),
            stats: RankingStats::default(),
        })
    }

    /// Free-text search against the text embedding space. An embedder
    /// failure degrades to an empty result, never an error.
    pub async fn search_by_text(
        &self,
        query: &str,
        limit: usize,
        exclude_user: Option<Uuid>,
    ) -> Result<RecommendationResponse> {
        let Some(text_vector) = self.embedder.embed_text(query) else {
            warn!("text embedding unavailable for query");
            return Ok(Self::empty_response(
                "text embedding unavailable".to_string(),
            ));
        };

        let mut exclude = HashSet::new();
        if let Some(user_id) = exclude_user {
            exclude = self.interactions.swiped_item_ids(user_id).await?;
        }
        let queries: HashMap<Modality, Vec<f32>> =
            [(Modality::Text, text_vector)].into_iter().collect();

        let (tier, hits) = match self
            .search
            .search_index(&queries, limit, &exclude, None, None, None)
            .await?
        {
            VectorCandidates::Hits(hits) if !hits.is_empty() => {
                (RecommendationTier::AnnIndex, hits)
            }
            VectorCandidates::Hits(_) | VectorCandidates::IndexUnavailable => {
                let hits = self
                    .search
                    .brute_force(&queries, limit, &exclude, None, None, None)
                    .await?;
                (RecommendationTier::BruteForce, hits)
            }
        };

        let recommendations = hits
            .into_iter()
            .map(|(candidate, score)| Recommendation {
                item_id: candidate.id,
                score,
                reason: format!("Matches search: '{query}'"),
                methods_used: vec![ScoreMethod::Vector],
                method_scores: [(ScoreMethod::Vector, score)].into_iter().collect(),
                backfilled: false,
            })
            .collect();

        Ok(RecommendationResponse {
            recommendations,
            tier,
            reason: Self::tier_reason(tier),
            stats: RankingStats::default(),
        })
    }

    pub fn enqueue_vectorization(
        &self,
        item_ids: Vec<Uuid>,
        priority: JobPriority,
        force: bool,
    ) -> Uuid {
        self.jobs.enqueue(item_ids, priority, force)
    }

    pub fn job_status(&self, job_id: Uuid) -> Option<JobRecord> {
        self.jobs.status(job_id)
    }

    pub async fn await_job(&self, job_id: Uuid, timeout: Duration) -> Option<JobRecord> {
        self.jobs.await_terminal(job_id, timeout).await
    }

    /// Remove cached entries matching a `*`-glob pattern, or everything.
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.cache.clear(pattern)
    }

    pub async fn engine_status(&self, user_id: Uuid) -> Result<EngineStatus> {
        if !self.interactions.user_exists(user_id).await? {
            return Err(EngineError::invalid(format!("unknown user id {user_id}")));
        }
        let (total_swipes, liked_swipes) =
            self.interactions.interaction_counts(user_id).await?;
        let coverage = self.catalog.vector_coverage().await?;
        let preferences = self
            .preference
            .aggregate(user_id, self.config.preference.strategy)
            .await?;

        Ok(EngineStatus {
            user_id,
            total_swipes,
            liked_swipes,
            total_items: coverage.total,
            items_with_all_vectors: coverage.with_all,
            preference_vectors_available: !preferences.is_empty(),
            quality_level: QualityLevel::from_like_count(liked_swipes),
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn preference_vectors(&self, user_id: Uuid) -> Result<PreferenceVectors> {
        let strategy = self.config.preference.strategy;
        let params = format!(
            "{}:{}:{}",
            strategy.as_str(),
            self.config.preference.max_likes,
            self.config.preference.decay_days,
        );
        let key = CacheKey::preference(user_id, &params);
        if let Some(cached) = self.cache_get::<PreferenceVectors>(&key) {
            return Ok(cached);
        }

        let preferences = self.preference.aggregate(user_id, strategy).await?;
        if !preferences.is_empty() {
            self.cache_set(
                &key,
                &preferences,
                Duration::from_secs(self.config.cache.preference_ttl_secs),
            );
        }
        Ok(preferences)
    }

    /// Resolve collaborative (item id, raw score) pairs into filtered item
    /// records with scores normalized to [0, 1].
    async fn resolve_collaborative(
        &self,
        scored: Vec<(Uuid, f32)>,
        category: Option<&str>,
        brand_id: Option<Uuid>,
    ) -> Result<Vec<(ItemRecord, f32)>> {
        if scored.is_empty() {
            return Ok(Vec::new());
        }
        let max = scored.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        let ids: Vec<Uuid> = scored.iter().map(|(id, _)| *id).collect();
        let items = self.catalog.items(&ids).await?;
        let by_id: HashMap<Uuid, ItemRecord> =
            items.into_iter().map(|item| (item.id, item)).collect();

        Ok(scored
            .into_iter()
            .filter_map(|(id, raw)| {
                let item = by_id.get(&id)?.clone();
                crate::services::vector_search::facets_match(&item, category, brand_id)
                    .then(|| (item, crate::utils::normalize_score(raw, 0.0, max)))
            })
            .collect())
    }

    async fn recent_history_items(&self, user_id: Uuid) -> Result<Vec<ItemRecord>> {
        let recent = self
            .interactions
            .recent_interactions(user_id, self.config.diversity.history_window)
            .await?;
        let ids: Vec<Uuid> = recent.iter().map(|i| i.item_id).collect();
        Ok(self.catalog.items(&ids).await?)
    }

    /// Derive a per-request RNG from the engine RNG, or nothing when
    /// randomness is disabled. The parent lock is never held across awaits.
    fn request_rng(&self) -> Option<StdRng> {
        if self.config.diversity.randomness_factor <= 0.0 {
            return None;
        }
        let mut parent = self.rng.lock().expect("engine rng lock poisoned");
        Some(StdRng::seed_from_u64(parent.gen()))
    }

    fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get::<T>(key) {
            Ok(value) => value,
            Err(e) => {
                // Best effort: a cache failure is a miss, never a request
                // failure.
                warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    fn cache_set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.cache.set(key, value, ttl) {
            warn!(key, error = %e, "cache write failed, continuing without");
        }
    }

    fn request_params(request: &RecommendationRequest, weights: &MethodWeights) -> String {
        format!(
            "{}:{}:{}:{:.2}:{:.2}:{:.2}",
            request.limit,
            request.category.as_deref().unwrap_or("-"),
            request
                .brand_id
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            weights.vector,
            weights.collaborative,
            weights.content,
        )
    }

    fn reason_for(candidate: &RankedCandidate, tier: RecommendationTier) -> String {
        if tier == RecommendationTier::ColdStart {
            return "Fresh picks to get you started".to_string();
        }
        let methods = candidate.methods_used();
        if methods.len() > 1 {
            let names: Vec<&str> = methods.iter().map(|m| m.as_str()).collect();
            return format!("Combined from {} methods: {}", methods.len(), names.join(", "));
        }
        match methods.first() {
            Some(ScoreMethod::Vector) => {
                let pct = (candidate.score * 100.0).round() as i64;
                if candidate.score >= 0.8 {
                    format!("Very similar to items you've liked ({pct}% match)")
                } else if candidate.score >= 0.6 {
                    format!("Similar to your preferences ({pct}% match)")
                } else {
                    format!("Based on your preferences ({pct}% match)")
                }
            }
            Some(ScoreMethod::Collaborative) => {
                "Liked by users with taste similar to yours".to_string()
            }
            Some(ScoreMethod::Content) => {
                "Matches your favorite categories and brands".to_string()
            }
            None => "Recommended for you".to_string(),
        }
    }

    fn tier_reason(tier: RecommendationTier) -> String {
        match tier {
            RecommendationTier::AnnIndex => "ranked by vector similarity".to_string(),
            RecommendationTier::BruteForce => {
                "ranked by vector similarity (exhaustive scan)".to_string()
            }
            RecommendationTier::ContentOnly => {
                "ranked by behavioral and content signals".to_string()
            }
            RecommendationTier::ColdStart => {
                "no interaction history yet, serving starter picks".to_string()
            }
            RecommendationTier::Empty => {
                "no qualifying candidates after all fallback tiers".to_string()
            }
        }
    }

    fn empty_response(reason: String) -> RecommendationResponse {
        RecommendationResponse {
            recommendations: Vec::new(),
            tier: RecommendationTier::Empty,
            reason,
            stats: RankingStats::default(),
        }
    }
}
