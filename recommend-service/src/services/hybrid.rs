//! Hybrid score fusion across vector, collaborative, and content signals.

use crate::config::DefaultWeights;
use crate::error::{EngineError, Result};
use crate::models::{ItemRecord, ScoreMethod};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f32 = 0.01;

/// Caller-supplied fusion weights. Must sum to 1.0 within tolerance; an
/// off-sum request is rejected, never silently renormalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MethodWeights {
    pub vector: f32,
    pub collaborative: f32,
    pub content: f32,
}

impl MethodWeights {
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("vector", self.vector),
            ("collaborative", self.collaborative),
            ("content", self.content),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(EngineError::invalid(format!(
                    "{name} weight {w} outside [0, 1]"
                )));
            }
        }
        let sum = self.vector + self.collaborative + self.content;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::invalid(format!(
                "weights must sum to 1.0, got {sum:.3}"
            )));
        }
        Ok(())
    }

    pub fn weight(&self, method: ScoreMethod) -> f32 {
        match method {
            ScoreMethod::Vector => self.vector,
            ScoreMethod::Collaborative => self.collaborative,
            ScoreMethod::Content => self.content,
        }
    }

    pub fn enabled(&self, method: ScoreMethod) -> bool {
        self.weight(method) > 0.0
    }
}

impl From<&DefaultWeights> for MethodWeights {
    fn from(defaults: &DefaultWeights) -> Self {
        Self {
            vector: defaults.vector,
            collaborative: defaults.collaborative,
            content: defaults.content,
        }
    }
}

/// A candidate after fusion, carrying per-method scores for explainability.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub item: ItemRecord,
    pub score: f32,
    pub method_scores: BTreeMap<ScoreMethod, f32>,
    pub backfilled: bool,
}

impl RankedCandidate {
    pub fn methods_used(&self) -> Vec<ScoreMethod> {
        self.method_scores.keys().copied().collect()
    }
}

/// Merge per-method candidate lists into one ranking.
///
/// Each item's fused score is `Σ(weightᵢ × scoreᵢ) / Σ(weightᵢ)` over the
/// methods that actually scored it, so an item found by a single method is
/// not penalized for the absent methods. Ties prefer the item with more
/// contributing methods, then the smaller id for determinism.
pub fn merge(
    inputs: Vec<(ScoreMethod, Vec<(ItemRecord, f32)>)>,
    weights: &MethodWeights,
) -> Vec<RankedCandidate> {
    let mut by_item: HashMap<Uuid, (ItemRecord, BTreeMap<ScoreMethod, f32>)> = HashMap::new();
    for (method, candidates) in inputs {
        for (item, score) in candidates {
            let entry = by_item
                .entry(item.id)
                .or_insert_with(|| (item, BTreeMap::new()));
            entry.1.insert(method, score);
        }
    }

    let mut merged: Vec<RankedCandidate> = by_item
        .into_values()
        .filter_map(|(item, method_scores)| {
            let mut weighted_sum = 0.0f32;
            let mut weight_total = 0.0f32;
            for (method, score) in &method_scores {
                let w = weights.weight(*method);
                weighted_sum += w * score;
                weight_total += w;
            }
            if weight_total <= 0.0 {
                return None;
            }
            Some(RankedCandidate {
                item,
                score: weighted_sum / weight_total,
                method_scores,
                backfilled: false,
            })
        })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.method_scores.len().cmp(&a.method_scores.len()))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    merged
}
