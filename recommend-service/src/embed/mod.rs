//! Embedding function contract and helpers.
//!
//! The real encoders (image/text models) live outside the core; the engine
//! only consumes their numeric output. Either call may fail and return
//! `None` - a failed embedding is a dependency failure for that one item,
//! never for the batch.

use crate::models::ItemRecord;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Weights for blending image and text vectors into the combined vector.
pub const COMBINED_IMAGE_WEIGHT: f32 = 0.6;
pub const COMBINED_TEXT_WEIGHT: f32 = 0.4;

/// Opaque embedding functions.
#[cfg_attr(test, mockall::automock)]
pub trait Embedder: Send + Sync {
    fn embed_image(&self, image_url: &str) -> Option<Vec<f32>>;
    fn embed_text(&self, text: &str) -> Option<Vec<f32>>;
}

/// Textual representation of an item fed to the text encoder.
pub fn build_item_text(item: &ItemRecord) -> String {
    let mut parts = vec![item.name.clone()];
    if let Some(description) = &item.description {
        parts.push(description.clone());
    }
    if let Some(category) = &item.category {
        parts.push(format!("category: {category}"));
    }
    if let Some(brand_id) = &item.brand_id {
        parts.push(format!("brand: {brand_id}"));
    }
    parts.join(" ")
}

/// Blend normalized image and text vectors into one combined vector.
///
/// The shorter vector is zero-padded to the longer one's length. This is the
/// single deliberate zero-padding compatibility shim in the engine: the two
/// encoders emit different dimensions and the combined space is defined as
/// their padded weighted blend. Everywhere else a length mismatch means
/// "incomparable", never padding.
pub fn combine_vectors(
    image: &[f32],
    text: &[f32],
    image_weight: f32,
    text_weight: f32,
) -> Vec<f32> {
    let mut image = normalize_or_copy(image);
    let mut text = normalize_or_copy(text);

    let len = image.len().max(text.len());
    image.resize(len, 0.0);
    text.resize(len, 0.0);

    image
        .iter()
        .zip(text.iter())
        .map(|(i, t)| image_weight * i + text_weight * t)
        .collect()
}

fn normalize_or_copy(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vector.to_vec()
    }
}

/// Deterministic feature-hashing embedder.
///
/// Stands in for the real encoders in tests and the maintenance binary:
/// tokens (and the raw image URL) are hashed into a fixed number of signed
/// buckets, so equal inputs always produce equal vectors and similar texts
/// land close together.
pub struct HashingEmbedder {
    image_dimension: usize,
    text_dimension: usize,
}

impl HashingEmbedder {
    pub fn new(image_dimension: usize, text_dimension: usize) -> Self {
        Self {
            image_dimension,
            text_dimension,
        }
    }

    fn hash_tokens<S: AsRef<str>>(
        &self,
        tokens: impl IntoIterator<Item = S>,
        dimension: usize,
    ) -> Option<Vec<f32>> {
        let mut vector = vec![0.0f32; dimension];
        let mut any = false;
        for token in tokens {
            let token = token.as_ref();
            if token.is_empty() {
                continue;
            }
            any = true;
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % dimension as u64) as usize;
            let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        any.then_some(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        // Dimensions roughly in the shape of small CLIP/MiniLM outputs.
        Self::new(64, 48)
    }
}

impl Embedder for HashingEmbedder {
    fn embed_image(&self, image_url: &str) -> Option<Vec<f32>> {
        if image_url.trim().is_empty() {
            return None;
        }
        // No pixels available here; hash URL path segments instead so equal
        // URLs embed identically.
        self.hash_tokens(
            image_url.split(|c: char| c == '/' || c == '.' || c == '-'),
            self.image_dimension,
        )
    }

    fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        self.hash_tokens(tokens, self.text_dimension)
    }
}
