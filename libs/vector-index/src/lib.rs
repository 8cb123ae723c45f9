//! Flat vector index for catalog item embeddings.
//!
//! The index keeps one append-only bucket per (modality, dimension) pair.
//! Vectors are L2-normalized on insert so inner product against stored rows
//! equals cosine similarity, mirroring a flat inner-product index. Searches
//! over-fetch per modality, merge per-item scores with configurable modality
//! weights, and report `Unavailable` (never an error) when no bucket can
//! serve the query, so callers can fall back to a slower path.
//!
//! Deletions are intentionally unsupported in place: removing items requires
//! a wholesale [`VectorIndex::rebuild`] from the authoritative vector store.

mod bucket;
mod error;

pub use bucket::Bucket;
pub use error::{IndexError, IndexResult};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Embedding space a vector belongs to. Vectors from different modalities
/// (or different dimensions within one modality) are never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Image,
    Text,
    Combined,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Image => "image",
            Modality::Text => "text",
            Modality::Combined => "combined",
        }
    }

    /// Default weight for merging per-modality similarity scores.
    pub fn default_weight(&self) -> f32 {
        match self {
            Modality::Image => 0.6,
            Modality::Text => 0.4,
            Modality::Combined => 1.0,
        }
    }
}

/// Over-fetch multiplier: each modality search requests this many times `k`
/// to leave headroom for exclusion and filtering downstream.
pub const FETCH_MULTIPLIER: usize = 5;

/// One merged search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item_id: Uuid,
    pub score: f32,
}

/// Result of a search. `Unavailable` means no bucket matched any query
/// modality/dimension; callers treat it as a signal to fall back, not as a
/// failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Hits(Vec<ScoredItem>),
    Unavailable,
}

impl SearchOutcome {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SearchOutcome::Unavailable)
    }

    pub fn into_hits(self) -> Vec<ScoredItem> {
        match self {
            SearchOutcome::Hits(hits) => hits,
            SearchOutcome::Unavailable => Vec::new(),
        }
    }
}

/// Per-bucket row count, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    pub modality: Modality,
    pub dimension: usize,
    pub rows: usize,
}

#[derive(PartialEq, Eq, Hash, Clone, Copy)]
struct BucketKey {
    modality: Modality,
    dimension: usize,
}

/// Per-dimension ANN index over item embeddings.
///
/// Concurrency: bucket lookup holds the map lock only long enough to clone
/// the bucket handle; scoring runs under the bucket's read lock with the row
/// count captured up front, so concurrent inserts never corrupt an in-flight
/// search (they are merely invisible to it).
pub struct VectorIndex {
    buckets: RwLock<HashMap<BucketKey, Arc<Bucket>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Insert one vector. The vector's length selects (or creates) the bucket
    /// for its dimension; the vector is L2-normalized before storage.
    pub fn insert(&self, item_id: Uuid, modality: Modality, vector: &[f32]) -> IndexResult<()> {
        let normalized = l2_normalize(vector)?;
        let bucket = self.bucket_for(modality, vector.len());
        bucket.append(item_id, &normalized);
        debug!(
            item_id = %item_id,
            modality = modality.as_str(),
            dimension = vector.len(),
            "inserted vector"
        );
        Ok(())
    }

    /// Top-`k` search across all query modalities.
    ///
    /// Each modality present in both the query and the index is searched for
    /// `FETCH_MULTIPLIER * k` candidates; per-item scores are merged by
    /// weighted average (`weights`, falling back to the modality defaults),
    /// excluded ids are dropped, and the best `k` are returned with ties
    /// broken ascending by item id.
    pub fn search(
        &self,
        queries: &HashMap<Modality, Vec<f32>>,
        k: usize,
        exclude: &HashSet<Uuid>,
        weights: Option<&HashMap<Modality, f32>>,
    ) -> SearchOutcome {
        if k == 0 || queries.is_empty() {
            return SearchOutcome::Hits(Vec::new());
        }

        let fetch = k.saturating_mul(FETCH_MULTIPLIER).max(k);
        let mut merged: HashMap<Uuid, (f32, f32)> = HashMap::new();
        let mut searched_any = false;

        // Deterministic modality order keeps float accumulation stable.
        let mut modalities: Vec<&Modality> = queries.keys().collect();
        modalities.sort();

        for modality in modalities {
            let vector = &queries[modality];
            let Some(bucket) = self.lookup(*modality, vector.len()) else {
                debug!(
                    modality = modality.as_str(),
                    dimension = vector.len(),
                    "no bucket for query modality"
                );
                continue;
            };
            let normalized = match l2_normalize(vector) {
                Ok(v) => v,
                Err(_) => {
                    warn!(modality = modality.as_str(), "skipping zero-norm query vector");
                    continue;
                }
            };
            let hits = match bucket.top_k(&normalized, fetch) {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(modality = modality.as_str(), error = %e, "bucket search failed");
                    continue;
                }
            };
            searched_any = true;

            let weight = weights
                .and_then(|w| w.get(modality).copied())
                .unwrap_or_else(|| modality.default_weight());
            for (item_id, score) in hits {
                let entry = merged.entry(item_id).or_insert((0.0, 0.0));
                entry.0 += score * weight;
                entry.1 += weight;
            }
        }

        if !searched_any {
            return SearchOutcome::Unavailable;
        }

        let mut results: Vec<ScoredItem> = merged
            .into_iter()
            .filter(|(item_id, _)| !exclude.contains(item_id))
            .filter(|(_, (_, total_weight))| *total_weight > 0.0)
            .map(|(item_id, (weighted_sum, total_weight))| ScoredItem {
                item_id,
                score: weighted_sum / total_weight,
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        results.truncate(k);
        SearchOutcome::Hits(results)
    }

    /// Replace every bucket from the authoritative vector store. This is the
    /// only way deletions take effect.
    pub fn rebuild<I>(&self, entries: I) -> IndexResult<usize>
    where
        I: IntoIterator<Item = (Uuid, Modality, Vec<f32>)>,
    {
        let mut fresh: HashMap<BucketKey, Arc<Bucket>> = HashMap::new();
        let mut inserted = 0usize;
        for (item_id, modality, vector) in entries {
            let normalized = match l2_normalize(&vector) {
                Ok(v) => v,
                Err(e) => {
                    warn!(item_id = %item_id, modality = modality.as_str(), error = %e, "skipping vector during rebuild");
                    continue;
                }
            };
            let key = BucketKey {
                modality,
                dimension: vector.len(),
            };
            let bucket = fresh
                .entry(key)
                .or_insert_with(|| Arc::new(Bucket::new(vector.len())));
            bucket.append(item_id, &normalized);
            inserted += 1;
        }

        let mut buckets = self.buckets.write().expect("index lock poisoned");
        *buckets = fresh;
        Ok(inserted)
    }

    pub fn stats(&self) -> Vec<BucketStats> {
        let buckets = self.buckets.read().expect("index lock poisoned");
        let mut stats: Vec<BucketStats> = buckets
            .iter()
            .map(|(key, bucket)| BucketStats {
                modality: key.modality,
                dimension: key.dimension,
                rows: bucket.len(),
            })
            .collect();
        stats.sort_by_key(|s| (s.modality, s.dimension));
        stats
    }

    pub fn total_rows(&self) -> usize {
        self.stats().iter().map(|s| s.rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }

    fn bucket_for(&self, modality: Modality, dimension: usize) -> Arc<Bucket> {
        let key = BucketKey {
            modality,
            dimension,
        };
        if let Some(bucket) = self.buckets.read().expect("index lock poisoned").get(&key) {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write().expect("index lock poisoned");
        Arc::clone(
            buckets
                .entry(key)
                .or_insert_with(|| Arc::new(Bucket::new(dimension))),
        )
    }

    fn lookup(&self, modality: Modality, dimension: usize) -> Option<Arc<Bucket>> {
        let key = BucketKey {
            modality,
            dimension,
        };
        self.buckets
            .read()
            .expect("index lock poisoned")
            .get(&key)
            .map(Arc::clone)
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// L2-normalize a vector. Empty and zero-norm vectors are rejected: they
/// carry no direction and would poison cosine scoring.
pub fn l2_normalize(vector: &[f32]) -> IndexResult<Vec<f32>> {
    if vector.is_empty() {
        return Err(IndexError::EmptyVector);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(IndexError::ZeroVector);
    }
    Ok(vector.iter().map(|x| x / norm).collect())
}
