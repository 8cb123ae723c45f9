//! Cosine similarity and per-modality score fusion.

use crate::models::Modality;
use std::collections::HashMap;

/// Outcome of comparing two vectors. Vectors of different lengths come from
/// different embedding spaces, so the comparison is flagged incomparable
/// (score 0) rather than truncated or padded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub score: f32,
    pub comparable: bool,
}

impl Similarity {
    pub const INCOMPARABLE: Similarity = Similarity {
        score: 0.0,
        comparable: false,
    };
}

/// Cosine similarity between two vectors of identical length.
///
/// Mismatched lengths and zero-norm inputs yield the incomparable result.
/// Comparable scores are clamped into [-1, 1] against float drift.
pub fn cosine(a: &[f32], b: &[f32]) -> Similarity {
    if a.is_empty() || a.len() != b.len() {
        return Similarity::INCOMPARABLE;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Similarity::INCOMPARABLE;
    }

    Similarity {
        score: (dot / (norm_a * norm_b)).clamp(-1.0, 1.0),
        comparable: true,
    }
}

/// Fusion of per-modality similarities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedScore {
    pub score: f32,
    /// How many modalities actually produced a comparable score. Zero means
    /// "no comparable vectors" and a fused score of 0 (not an error).
    pub contributing: usize,
}

/// Weighted mean over the modalities that produced a comparable score.
pub fn fuse(
    scores: &HashMap<Modality, Similarity>,
    weights: Option<&HashMap<Modality, f32>>,
) -> FusedScore {
    let mut weighted_sum = 0.0f32;
    let mut total_weight = 0.0f32;
    let mut contributing = 0usize;

    for (modality, similarity) in scores {
        if !similarity.comparable {
            continue;
        }
        let weight = weights
            .and_then(|w| w.get(modality).copied())
            .unwrap_or_else(|| modality.default_weight());
        weighted_sum += similarity.score * weight;
        total_weight += weight;
        contributing += 1;
    }

    if contributing == 0 || total_weight <= 0.0 {
        return FusedScore {
            score: 0.0,
            contributing: 0,
        };
    }
    FusedScore {
        score: weighted_sum / total_weight,
        contributing,
    }
}
