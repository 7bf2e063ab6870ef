// Test doubles for the embedding boundary.
//
// - FixedEmbedder: deterministic vectors keyed by normalized name, with
//   per-text overrides for controlled similarity
// - FailingEmbedder: always errors, drives the degraded path
// - FlakyStore (EntityStore): in-memory store whose writes fail for chosen names

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use insightgraph_common::{normalize_name, CanonicalEntity, IdentityHash, TextEmbedder};

use crate::store::{EntityStore, MemoryEntityStore};

/// Standard embedding dimension for test vectors.
pub const TEST_EMBEDDING_DIM: usize = 64;

// ---------------------------------------------------------------------------
// FixedEmbedder
// ---------------------------------------------------------------------------

/// Names that normalize the same ("OpenAI", "Open AI") get the same vector;
/// anything else gets an unrelated pseudo-random unit vector.
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
}

impl FixedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dimension,
        }
    }

    /// Register a text→vector mapping for controlled similarity.
    pub fn on_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        normalize_name(text).hash(&mut hasher);
        let mut state = hasher.finish();

        let mut vec = vec![0.0f32; self.dimension];
        for v in vec.iter_mut() {
            // LCG, top 32 bits mapped onto [-1, 1)
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 32) as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hash_vector(text)))
    }
}

// ---------------------------------------------------------------------------
// FailingEmbedder
// ---------------------------------------------------------------------------

pub struct FailingEmbedder;

#[async_trait]
impl TextEmbedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedding provider unreachable")
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// Delegates to a [`MemoryEntityStore`], except that `put` fails for
/// entities whose name was registered with [`fail_put_for`](Self::fail_put_for).
pub struct FlakyStore {
    inner: Arc<MemoryEntityStore>,
    failing: HashSet<String>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryEntityStore>) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
        }
    }

    pub fn fail_put_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn get(&self, id: Uuid) -> Result<Option<CanonicalEntity>> {
        self.inner.get(id).await
    }

    async fn put(&self, entity: CanonicalEntity) -> Result<()> {
        if self.failing.contains(&entity.name) {
            bail!("write rejected for {}", entity.name);
        }
        self.inner.put(entity).await
    }

    async fn query_approximate(&self, embedding: &[f32], k: usize) -> Result<Vec<(Uuid, f64)>> {
        self.inner.query_approximate(embedding, k).await
    }

    async fn might_contain_identity(&self, identity: &IdentityHash) -> bool {
        self.inner.might_contain_identity(identity).await
    }

    async fn find_by_identity(&self, identity: &IdentityHash) -> Result<Option<Uuid>> {
        self.inner.find_by_identity(identity).await
    }

    async fn record_identity(&self, identity: IdentityHash, id: Uuid) -> Result<()> {
        self.inner.record_identity(identity, id).await
    }
}
