pub mod bloom;
pub mod engine;
pub mod index;
pub mod score;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bloom::ScalableBloomFilter;
pub use engine::{AddBatchError, AddBatchResult, DedupEngine, DedupStats, MatchTier, Resolution};
pub use index::{cosine_similarity, VectorIndex};
pub use score::{decide, merge_score, MatchCandidate, ScoreWeights};
pub use store::{EntityStore, MemoryEntityStore};
