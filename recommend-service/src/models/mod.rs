use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub use trove_vector_index::Modality;

/// Minimal catalog item view the engine reads. Vectors are populated only by
/// the vectorization job queue; everything else is owned externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand_id: Option<Uuid>,
    #[serde(default)]
    pub image_vector: Option<Vec<f32>>,
    #[serde(default)]
    pub text_vector: Option<Vec<f32>>,
    #[serde(default)]
    pub combined_vector: Option<Vec<f32>>,
    #[serde(default)]
    pub like_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ItemRecord {
    pub fn vector(&self, modality: Modality) -> Option<&[f32]> {
        match modality {
            Modality::Image => self.image_vector.as_deref(),
            Modality::Text => self.text_vector.as_deref(),
            Modality::Combined => self.combined_vector.as_deref(),
        }
    }

    pub fn has_all_vectors(&self) -> bool {
        self.image_vector.is_some() && self.text_vector.is_some() && self.combined_vector.is_some()
    }

    /// All present embeddings, keyed by modality.
    pub fn vectors(&self) -> HashMap<Modality, Vec<f32>> {
        let mut map = HashMap::new();
        if let Some(v) = &self.image_vector {
            map.insert(Modality::Image, v.clone());
        }
        if let Some(v) = &self.text_vector {
            map.insert(Modality::Text, v.clone());
        }
        if let Some(v) = &self.combined_vector {
            map.insert(Modality::Combined, v.clone());
        }
        map
    }
}

/// Vector payload written back by the vectorization pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemVectors {
    pub image: Option<Vec<f32>>,
    pub text: Option<Vec<f32>>,
    pub combined: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeAction {
    Like,
    Dislike,
}

impl SwipeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwipeAction::Like => "like",
            SwipeAction::Dislike => "dislike",
        }
    }
}

/// One recorded swipe. At most one interaction exists per (user, item); the
/// engine never mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub action: SwipeAction,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Plain,
    TimeWeighted,
    Balanced,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStrategy::Plain => "plain",
            AggregationStrategy::TimeWeighted => "time_weighted",
            AggregationStrategy::Balanced => "balanced",
        }
    }
}

/// Derived per-modality taste vectors for a user. Re-derivable from
/// interactions + items at any time; cached, never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceVectors {
    pub user_id: Uuid,
    pub strategy: AggregationStrategy,
    pub vectors: HashMap<Modality, Vec<f32>>,
    pub generated_at: DateTime<Utc>,
}

impl PreferenceVectors {
    pub fn empty(user_id: Uuid, strategy: AggregationStrategy) -> Self {
        Self {
            user_id,
            strategy,
            vectors: HashMap::new(),
            generated_at: Utc::now(),
        }
    }

    /// No signal for any modality: the caller must take the cold-start path.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Scoring method that contributed to a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMethod {
    Vector,
    Collaborative,
    Content,
}

impl ScoreMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreMethod::Vector => "vector",
            ScoreMethod::Collaborative => "collaborative",
            ScoreMethod::Content => "content",
        }
    }
}

/// Which tier of the fallback chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationTier {
    AnnIndex,
    BruteForce,
    ContentOnly,
    ColdStart,
    Empty,
}

impl RecommendationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationTier::AnnIndex => "ann_index",
            RecommendationTier::BruteForce => "brute_force",
            RecommendationTier::ContentOnly => "content_only",
            RecommendationTier::ColdStart => "cold_start",
            RecommendationTier::Empty => "empty",
        }
    }
}

/// One ranked recommendation with explainability metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: Uuid,
    pub score: f32,
    pub reason: String,
    pub methods_used: Vec<ScoreMethod>,
    pub method_scores: BTreeMap<ScoreMethod, f32>,
    /// Set when this item was selected past a diversity cap to fill the
    /// requested limit.
    #[serde(default)]
    pub backfilled: bool,
}

/// Full engine response: the ranked list plus which fallback tier served it
/// and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<Recommendation>,
    pub tier: RecommendationTier,
    pub reason: String,
    #[serde(default)]
    pub stats: RankingStats,
}

/// Per-request candidate counts, for logging and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankingStats {
    pub vector_count: usize,
    pub collaborative_count: usize,
    pub content_count: usize,
    pub merged_count: usize,
    pub final_count: usize,
}

/// Swipe statistics and vector coverage reported by `engine_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub user_id: Uuid,
    pub total_swipes: usize,
    pub liked_swipes: usize,
    pub total_items: usize,
    pub items_with_all_vectors: usize,
    pub preference_vectors_available: bool,
    pub quality_level: QualityLevel,
}

/// Coarse recommendation-quality tier derived from the user's like history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    None,
    Basic,
    Good,
    Excellent,
}

impl QualityLevel {
    pub fn from_like_count(likes: usize) -> Self {
        match likes {
            0 => QualityLevel::None,
            1..=4 => QualityLevel::Basic,
            5..=9 => QualityLevel::Good,
            _ => QualityLevel::Excellent,
        }
    }
}
