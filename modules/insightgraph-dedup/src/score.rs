//! Merge scoring and the pure merge decision.

use std::cmp::Ordering;

use uuid::Uuid;

use insightgraph_common::{normalize_name, CandidateEntity, CanonicalEntity, DedupConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub embedding: f64,
    pub name: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            embedding: 0.7,
            name: 0.3,
        }
    }
}

impl From<&DedupConfig> for ScoreWeights {
    fn from(config: &DedupConfig) -> Self {
        Self {
            embedding: config.embedding_weight,
            name: config.name_weight,
        }
    }
}

/// A scored comparison against one existing canonical entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate {
    pub id: Uuid,
    pub score: f64,
}

/// Best normalized Levenshtein similarity between `name` and the entity's
/// name or any alias, computed on normalized names.
pub fn name_similarity(name: &str, entity: &CanonicalEntity) -> f64 {
    let name = normalize_name(name);
    std::iter::once(&entity.name)
        .chain(entity.aliases.iter())
        .map(|alias| strsim::normalized_levenshtein(&name, &normalize_name(alias)))
        .fold(0.0, f64::max)
}

/// Combined score in [0, 1]. Different entity types never merge.
pub fn merge_score(
    candidate: &CandidateEntity,
    entity: &CanonicalEntity,
    cosine: f64,
    weights: ScoreWeights,
) -> f64 {
    if candidate.entity_type != entity.entity_type {
        return 0.0;
    }
    let score = weights.embedding * cosine.max(0.0)
        + weights.name * name_similarity(&candidate.name, entity);
    score.clamp(0.0, 1.0)
}

/// Pick the merge target: the highest score at or above `threshold`, ties
/// broken by the lowest canonical id. `None` means create a new entity.
pub fn decide(matches: &[MatchCandidate], threshold: f64) -> Option<MatchCandidate> {
    matches
        .iter()
        .filter(|m| m.score >= threshold)
        .max_by(|a, b| match a.score.total_cmp(&b.score) {
            Ordering::Equal => b.id.cmp(&a.id),
            other => other,
        })
        .copied()
}
