use ndarray::{ArrayView1, ArrayView2};
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{IndexError, IndexResult};

/// Row storage for one bucket. `data` holds rows contiguously; `data` and
/// `ids` only ever grow, and always together under the write lock.
struct Rows {
    data: Vec<f32>,
    ids: Vec<Uuid>,
}

/// Append-only store of L2-normalized vectors sharing one dimension.
///
/// Inner product against stored rows equals cosine similarity. There is no
/// in-place removal: honoring deletions requires a wholesale rebuild of the
/// owning index.
pub struct Bucket {
    dimension: usize,
    rows: RwLock<Rows>,
}

impl Bucket {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            rows: RwLock::new(Rows {
                data: Vec::new(),
                ids: Vec::new(),
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.rows.read().expect("bucket lock poisoned").ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a row. The caller must have normalized the vector and matched
    /// the bucket dimension.
    pub fn append(&self, item_id: Uuid, normalized: &[f32]) {
        debug_assert_eq!(normalized.len(), self.dimension);
        let mut rows = self.rows.write().expect("bucket lock poisoned");
        rows.data.extend_from_slice(normalized);
        rows.ids.push(item_id);
    }

    /// Score every stored row against `query` and return up to `fetch` hits,
    /// best first, ties broken ascending by item id.
    ///
    /// The row count is captured once under the read lock before scoring, so
    /// an append racing with this search is simply invisible to it.
    pub fn top_k(&self, query: &[f32], fetch: usize) -> IndexResult<Vec<(Uuid, f32)>> {
        if query.len() != self.dimension || fetch == 0 {
            return Ok(Vec::new());
        }

        let rows = self.rows.read().expect("bucket lock poisoned");
        let count = rows.ids.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let matrix = ArrayView2::from_shape((count, self.dimension), &rows.data[..count * self.dimension])
            .map_err(|e| IndexError::Shape(e.to_string()))?;
        let q = ArrayView1::from(query);
        let scores = matrix.dot(&q);

        let mut hits: Vec<(Uuid, f32)> = rows
            .ids
            .iter()
            .zip(scores.iter())
            .map(|(id, score)| (*id, *score))
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(fetch);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l2_normalize;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_top_k_orders_by_similarity() {
        let bucket = Bucket::new(2);
        bucket.append(id(1), &l2_normalize(&[1.0, 0.0]).unwrap());
        bucket.append(id(2), &l2_normalize(&[0.0, 1.0]).unwrap());
        bucket.append(id(3), &l2_normalize(&[1.0, 1.0]).unwrap());

        let query = l2_normalize(&[1.0, 0.0]).unwrap();
        let hits = bucket.top_k(&query, 3).unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, id(1));
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].0, id(3));
        assert_eq!(hits[2].0, id(2));
    }

    #[test]
    fn test_top_k_tie_broken_by_id() {
        let bucket = Bucket::new(2);
        let row = l2_normalize(&[1.0, 0.0]).unwrap();
        bucket.append(id(9), &row);
        bucket.append(id(2), &row);
        bucket.append(id(5), &row);

        let hits = bucket.top_k(&row, 3).unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.0).collect();
        assert_eq!(ids, vec![id(2), id(5), id(9)]);
    }

    #[test]
    fn test_top_k_truncates_to_fetch() {
        let bucket = Bucket::new(2);
        for n in 0..10 {
            bucket.append(id(n), &l2_normalize(&[1.0, n as f32 * 0.1]).unwrap());
        }
        let query = l2_normalize(&[1.0, 0.0]).unwrap();
        assert_eq!(bucket.top_k(&query, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_dimension_mismatch_yields_no_hits() {
        let bucket = Bucket::new(3);
        bucket.append(id(1), &l2_normalize(&[1.0, 0.0, 0.0]).unwrap());
        assert!(bucket.top_k(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_empty_bucket() {
        let bucket = Bucket::new(4);
        assert!(bucket.is_empty());
        assert!(bucket.top_k(&[0.5; 4], 5).unwrap().is_empty());
    }
}
