//! Canonicalization engine: resolves each candidate entity to an existing
//! canonical entity or creates a new one.
//!
//! Tiers, cheapest first:
//! 1. identity lookup: bloom filter, then the exact identity index
//! 2. similarity search: embed the name, top-k by cosine from the store
//! 3. merge decision: weighted cosine + name similarity against a threshold
//!
//! Locking: every identity hashes into one of `lock_shards` bucket locks, so
//! concurrent work on the same identity is serialized. Creates also pass a
//! single create gate that re-runs the similarity search, which keeps two
//! near-duplicate spellings in different buckets from both creating.
//! Read-modify-write on a canonical record holds that record's shard lock.
//! Locks are always taken in the order bucket → create gate → entity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Result};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use insightgraph_common::{
    normalize_name, CandidateEntity, CanonicalEntity, DedupConfig, IdentityHash, InsightError,
    TextEmbedder,
};

use crate::score::{decide, merge_score, MatchCandidate, ScoreWeights};
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Similarity,
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Created { id: Uuid, degraded: bool },
    Merged { id: Uuid, score: f64, tier: MatchTier, degraded: bool },
    Skipped { reason: String },
}

impl Resolution {
    pub fn canonical_id(&self) -> Option<Uuid> {
        match self {
            Resolution::Created { id, .. } | Resolution::Merged { id, .. } => Some(*id),
            Resolution::Skipped { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Resolution::Created { degraded: true, .. } | Resolution::Merged { degraded: true, .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AddBatchResult {
    /// Ids created by this batch, in candidate order.
    pub created: Vec<Uuid>,
    /// One entry per input candidate, same order.
    pub resolutions: Vec<Resolution>,
}

impl AddBatchResult {
    fn push(&mut self, resolution: Resolution) {
        if let Resolution::Created { id, .. } = &resolution {
            self.created.push(*id);
        }
        self.resolutions.push(resolution);
    }
}

/// A batch that stopped partway. Candidates before the failing one are
/// already in the store and are reported in `committed`.
#[derive(Debug, Error)]
#[error("dedup stopped after {} committed candidates: {error:#}", committed.resolutions.len())]
pub struct AddBatchError {
    pub committed: AddBatchResult,
    pub error: anyhow::Error,
}

#[derive(Default)]
struct Counters {
    candidates: AtomicU64,
    created: AtomicU64,
    merged_exact: AtomicU64,
    merged_similar: AtomicU64,
    skipped: AtomicU64,
    degraded: AtomicU64,
    bloom_false_positives: AtomicU64,
    embedding_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub candidates: u64,
    pub created: u64,
    pub merged_exact: u64,
    pub merged_similar: u64,
    pub skipped: u64,
    pub degraded: u64,
    pub bloom_false_positives: u64,
    pub embedding_failures: u64,
}

impl Counters {
    fn snapshot(&self) -> DedupStats {
        DedupStats {
            candidates: self.candidates.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            merged_exact: self.merged_exact.load(Ordering::Relaxed),
            merged_similar: self.merged_similar.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            bloom_false_positives: self.bloom_false_positives.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct DedupEngine {
    store: Arc<dyn EntityStore>,
    embedder: Arc<dyn TextEmbedder>,
    config: DedupConfig,
    weights: ScoreWeights,
    bucket_locks: Vec<Mutex<()>>,
    create_gate: Mutex<()>,
    entity_locks: Vec<Mutex<()>>,
    dimension: OnceLock<usize>,
    counters: Counters,
}

impl DedupEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        embedder: Arc<dyn TextEmbedder>,
        config: DedupConfig,
    ) -> Self {
        let shards = config.lock_shards.max(1);
        let dimension = OnceLock::new();
        if config.embedding_dimensions > 0 {
            let _ = dimension.set(config.embedding_dimensions);
        }
        Self {
            store,
            embedder,
            weights: ScoreWeights::from(&config),
            bucket_locks: (0..shards).map(|_| Mutex::new(())).collect(),
            create_gate: Mutex::new(()),
            entity_locks: (0..shards).map(|_| Mutex::new(())).collect(),
            dimension,
            config,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn stats(&self) -> DedupStats {
        self.counters.snapshot()
    }

    /// Resolve every candidate in order. Each resolution is committed before
    /// the next candidate is looked at, so duplicates inside one batch merge
    /// with each other.
    pub async fn add_batch(
        &self,
        candidates: Vec<CandidateEntity>,
    ) -> Result<AddBatchResult, AddBatchError> {
        let mut result = AddBatchResult::default();
        for candidate in candidates {
            match self.resolve(&candidate).await {
                Ok(resolution) => result.push(resolution),
                Err(error) => {
                    return Err(AddBatchError {
                        committed: result,
                        error,
                    })
                }
            }
        }
        debug!(
            created = result.created.len(),
            resolved = result.resolutions.len(),
            "Dedup batch applied"
        );
        Ok(result)
    }

    async fn resolve(&self, candidate: &CandidateEntity) -> Result<Resolution> {
        bump(&self.counters.candidates);

        if normalize_name(&candidate.name).is_empty() {
            bump(&self.counters.skipped);
            debug!(name = candidate.name.as_str(), "Skipping candidate with empty name");
            return Ok(Resolution::Skipped {
                reason: "empty name".to_string(),
            });
        }

        let identity = IdentityHash::of(candidate);
        let _bucket = self.bucket_locks[identity.bucket(self.bucket_locks.len())]
            .lock()
            .await;

        // Tier 1
        if self.store.might_contain_identity(&identity).await {
            if let Some(id) = self.store.find_by_identity(&identity).await? {
                self.merge_into(id, candidate, &identity).await?;
                bump(&self.counters.merged_exact);
                debug!(%identity, entity_id = %id, "Exact identity merge");
                return Ok(Resolution::Merged {
                    id,
                    score: 1.0,
                    tier: MatchTier::Exact,
                    degraded: false,
                });
            }
            bump(&self.counters.bloom_false_positives);
        } else if self.config.skip_similarity_for_novel {
            let embedding = match self.embed(candidate).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    self.embedding_unavailable(candidate, &e);
                    Vec::new()
                }
            };
            let _gate = self.create_gate.lock().await;
            return self.create(candidate, identity, embedding).await;
        }

        // Tier 2
        let embedding = match self.embed(candidate).await {
            Ok(embedding) => embedding,
            Err(e) => {
                self.embedding_unavailable(candidate, &e);
                let _gate = self.create_gate.lock().await;
                return self.create(candidate, identity, Vec::new()).await;
            }
        };

        // Tier 3
        if let Some(best) = self.best_match(candidate, &embedding).await? {
            return self.merge_similar(best, candidate, &identity).await;
        }

        let _gate = self.create_gate.lock().await;
        // Another bucket may have created a near-duplicate since the first search.
        if let Some(best) = self.best_match(candidate, &embedding).await? {
            return self.merge_similar(best, candidate, &identity).await;
        }
        self.create(candidate, identity, embedding).await
    }

    /// Embed the candidate name, enforcing a consistent dimension.
    async fn embed(&self, candidate: &CandidateEntity) -> Result<Vec<f32>, InsightError> {
        let embedding = self
            .embedder
            .embed(candidate.name.trim())
            .await
            .map_err(|e| InsightError::EmbeddingUnavailable(e.to_string()))?;
        if embedding.is_empty() {
            return Err(InsightError::EmbeddingUnavailable("empty vector".to_string()));
        }
        let expected = *self.dimension.get_or_init(|| embedding.len());
        if embedding.len() != expected {
            return Err(InsightError::EmbeddingUnavailable(format!(
                "dimension {} does not match {expected}",
                embedding.len()
            )));
        }
        Ok(embedding)
    }

    fn embedding_unavailable(&self, candidate: &CandidateEntity, error: &InsightError) {
        bump(&self.counters.embedding_failures);
        warn!(
            name = candidate.name.as_str(),
            error = %error,
            "Embedding unavailable, falling back to exact matching"
        );
    }

    async fn best_match(
        &self,
        candidate: &CandidateEntity,
        embedding: &[f32],
    ) -> Result<Option<MatchCandidate>> {
        let neighbours = self
            .store
            .query_approximate(embedding, self.config.top_k)
            .await?;
        let mut scored = Vec::with_capacity(neighbours.len());
        for (id, cosine) in neighbours {
            if let Some(entity) = self.store.get(id).await? {
                scored.push(MatchCandidate {
                    id,
                    score: merge_score(candidate, &entity, cosine, self.weights),
                });
            }
        }
        Ok(decide(&scored, self.config.merge_threshold))
    }

    async fn merge_similar(
        &self,
        best: MatchCandidate,
        candidate: &CandidateEntity,
        identity: &IdentityHash,
    ) -> Result<Resolution> {
        self.merge_into(best.id, candidate, identity).await?;
        bump(&self.counters.merged_similar);
        debug!(
            name = candidate.name.as_str(),
            entity_id = %best.id,
            score = best.score,
            "Similarity merge"
        );
        Ok(Resolution::Merged {
            id: best.id,
            score: best.score,
            tier: MatchTier::Similarity,
            degraded: false,
        })
    }

    async fn merge_into(
        &self,
        id: Uuid,
        candidate: &CandidateEntity,
        identity: &IdentityHash,
    ) -> Result<()> {
        let shard = (id.as_u128() % self.entity_locks.len() as u128) as usize;
        let _entity = self.entity_locks[shard].lock().await;

        let mut entity = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("canonical entity {id} vanished during merge"))?;
        entity.absorb(candidate);
        self.store.put(entity).await?;
        self.store.record_identity(identity.clone(), id).await
    }

    /// Caller holds the bucket lock and the create gate.
    async fn create(
        &self,
        candidate: &CandidateEntity,
        identity: IdentityHash,
        embedding: Vec<f32>,
    ) -> Result<Resolution> {
        let entity = CanonicalEntity::from_candidate(candidate, embedding);
        let id = entity.id;
        let degraded = entity.degraded;
        self.store.put(entity).await?;
        self.store.record_identity(identity, id).await?;

        bump(&self.counters.created);
        if degraded {
            bump(&self.counters.degraded);
        }
        info!(
            name = candidate.name.as_str(),
            entity_type = %candidate.entity_type,
            source_id = candidate.source_id.as_str(),
            entity_id = %id,
            degraded,
            "Created canonical entity"
        );
        Ok(Resolution::Created { id, degraded })
    }
}
