use crate::models::AggregationStrategy;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub preference: PreferenceConfig,
    pub collaborative: CollaborativeConfig,
    pub diversity: DiversityConfig,
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub weights: DefaultWeights,
    /// Seed for the engine RNG. Fixed seeds make runs reproducible; `None`
    /// seeds from entropy.
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferenceConfig {
    /// Most recent likes considered when aggregating taste vectors.
    pub max_likes: usize,
    /// Most recent dislikes considered by the balanced strategy.
    pub max_dislikes: usize,
    /// E-folding time for time-decayed weighting, in days.
    pub decay_days: f32,
    /// Dislike magnitude relative to a like in the balanced strategy.
    /// Tunable heuristic, not a law.
    pub dislike_damping: f32,
    /// Aggregation strategy used by the engine for recommendations.
    pub strategy: AggregationStrategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollaborativeConfig {
    /// Minimum Jaccard similarity for a user to count as similar.
    pub min_jaccard: f32,
    /// Cap on the similar-user neighborhood.
    pub max_similar_users: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiversityConfig {
    /// Scale applied to the diversity adjustment before it moves a score.
    pub diversity_boost: f32,
    /// Bounded uniform jitter scale; 0 disables all randomness.
    pub randomness_factor: f32,
    /// Max selected items sharing one category.
    pub max_per_category: usize,
    /// Max selected items sharing one brand.
    pub max_per_brand: usize,
    /// Recent interactions inspected to learn over-represented facets.
    pub history_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub preference_ttl_secs: u64,
    pub recommendations_ttl_secs: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Candidate pool cap for the brute-force fallback scan.
    pub brute_force_pool: usize,
    /// Per-scorer over-fetch multiplier applied to the request limit.
    pub candidate_multiplier: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultWeights {
    pub vector: f32,
    pub collaborative: f32,
    pub content: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preference: PreferenceConfig {
                max_likes: 10,
                max_dislikes: 5,
                decay_days: 30.0,
                dislike_damping: 0.5,
                strategy: AggregationStrategy::TimeWeighted,
            },
            collaborative: CollaborativeConfig {
                min_jaccard: 0.3,
                max_similar_users: 10,
            },
            diversity: DiversityConfig {
                diversity_boost: 0.3,
                randomness_factor: 0.2,
                max_per_category: 2,
                max_per_brand: 2,
                history_window: 20,
            },
            cache: CacheConfig {
                preference_ttl_secs: 300,
                recommendations_ttl_secs: 180,
                max_entries: 4096,
            },
            search: SearchConfig {
                brute_force_pool: 500,
                candidate_multiplier: 2,
            },
            weights: DefaultWeights {
                vector: 0.4,
                collaborative: 0.3,
                content: 0.3,
            },
            rng_seed: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            preference: PreferenceConfig {
                max_likes: env_parse("PREFERENCE_MAX_LIKES", defaults.preference.max_likes),
                max_dislikes: env_parse("PREFERENCE_MAX_DISLIKES", defaults.preference.max_dislikes),
                decay_days: env_parse("PREFERENCE_DECAY_DAYS", defaults.preference.decay_days),
                dislike_damping: env_parse(
                    "PREFERENCE_DISLIKE_DAMPING",
                    defaults.preference.dislike_damping,
                ),
                strategy: match env::var("PREFERENCE_STRATEGY").as_deref() {
                    Ok("plain") => AggregationStrategy::Plain,
                    Ok("balanced") => AggregationStrategy::Balanced,
                    Ok("time_weighted") => AggregationStrategy::TimeWeighted,
                    _ => defaults.preference.strategy,
                },
            },
            collaborative: CollaborativeConfig {
                min_jaccard: env_parse("COLLAB_MIN_JACCARD", defaults.collaborative.min_jaccard),
                max_similar_users: env_parse(
                    "COLLAB_MAX_SIMILAR_USERS",
                    defaults.collaborative.max_similar_users,
                ),
            },
            diversity: DiversityConfig {
                diversity_boost: env_parse("DIVERSITY_BOOST", defaults.diversity.diversity_boost),
                randomness_factor: env_parse(
                    "DIVERSITY_RANDOMNESS",
                    defaults.diversity.randomness_factor,
                ),
                max_per_category: env_parse(
                    "DIVERSITY_MAX_PER_CATEGORY",
                    defaults.diversity.max_per_category,
                ),
                max_per_brand: env_parse(
                    "DIVERSITY_MAX_PER_BRAND",
                    defaults.diversity.max_per_brand,
                ),
                history_window: env_parse(
                    "DIVERSITY_HISTORY_WINDOW",
                    defaults.diversity.history_window,
                ),
            },
            cache: CacheConfig {
                preference_ttl_secs: env_parse(
                    "CACHE_PREFERENCE_TTL_SECS",
                    defaults.cache.preference_ttl_secs,
                ),
                recommendations_ttl_secs: env_parse(
                    "CACHE_RECOMMENDATIONS_TTL_SECS",
                    defaults.cache.recommendations_ttl_secs,
                ),
                max_entries: env_parse("CACHE_MAX_ENTRIES", defaults.cache.max_entries),
            },
            search: SearchConfig {
                brute_force_pool: env_parse("SEARCH_BRUTE_FORCE_POOL", defaults.search.brute_force_pool),
                candidate_multiplier: env_parse(
                    "SEARCH_CANDIDATE_MULTIPLIER",
                    defaults.search.candidate_multiplier,
                ),
            },
            weights: DefaultWeights {
                vector: env_parse("WEIGHT_VECTOR", defaults.weights.vector),
                collaborative: env_parse("WEIGHT_COLLABORATIVE", defaults.weights.collaborative),
                content: env_parse("WEIGHT_CONTENT", defaults.weights.content),
            },
            rng_seed: env::var("ENGINE_RNG_SEED").ok().and_then(|v| v.parse().ok()),
        }
    }
}
