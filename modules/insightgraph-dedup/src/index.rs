//! Flat cosine index over canonical entity embeddings.
//!
//! Exact brute-force search, which trivially satisfies the "approximate
//! nearest neighbours" contract the store exposes.

use std::collections::HashMap;

use anyhow::{bail, Result};
use uuid::Uuid;

#[derive(Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    vectors: HashMap<Uuid, Vec<f32>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed once the first vector is inserted.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Insert or replace the vector for `id`.
    pub fn upsert(&mut self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            bail!("refusing to index empty vector for {id}");
        }
        match self.dimension {
            Some(dim) if dim != vector.len() => {
                bail!("vector for {id} has dimension {}, index expects {dim}", vector.len())
            }
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }
        self.vectors.insert(id, vector);
        Ok(())
    }

    pub fn remove(&mut self, id: &Uuid) {
        self.vectors.remove(id);
    }

    /// Top `k` ids by cosine similarity, best first. Equal scores order by
    /// ascending id so results are deterministic.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<(Uuid, f64)> {
        if k == 0 || self.dimension.is_some_and(|d| d != vector.len()) {
            return Vec::new();
        }
        let mut scored: Vec<(Uuid, f64)> = self
            .vectors
            .iter()
            .map(|(id, v)| (*id, cosine_similarity(vector, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn query_returns_best_first() {
        let mut index = VectorIndex::new();
        let near = Uuid::now_v7();
        let far = Uuid::now_v7();
        index.upsert(near, vec![1.0, 0.1]).unwrap();
        index.upsert(far, vec![0.0, 1.0]).unwrap();

        let hits = index.query(&[1.0, 0.0], 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, near);
        assert!(hits[0].1 > hits[1].1);

        assert_eq!(index.query(&[1.0, 0.0], 1).len(), 1);
    }

    #[test]
    fn ties_order_by_id() {
        let mut index = VectorIndex::new();
        let a = Uuid::from_u128(2);
        let b = Uuid::from_u128(1);
        index.upsert(a, vec![1.0, 0.0]).unwrap();
        index.upsert(b, vec![1.0, 0.0]).unwrap();
        let hits = index.query(&[1.0, 0.0], 2);
        assert_eq!(hits[0].0, b);
        assert_eq!(hits[1].0, a);
    }

    #[test]
    fn dimension_is_enforced() {
        let mut index = VectorIndex::new();
        index.upsert(Uuid::now_v7(), vec![1.0, 0.0, 0.0]).unwrap();
        assert!(index.upsert(Uuid::now_v7(), vec![1.0]).is_err());
        assert!(index.upsert(Uuid::now_v7(), vec![]).is_err());
        assert!(index.query(&[1.0], 3).is_empty());
        assert_eq!(index.dimension(), Some(3));
    }

    #[test]
    fn upsert_replaces() {
        let mut index = VectorIndex::new();
        let id = Uuid::now_v7();
        index.upsert(id, vec![1.0, 0.0]).unwrap();
        index.upsert(id, vec![0.0, 1.0]).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.query(&[0.0, 1.0], 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }
}
