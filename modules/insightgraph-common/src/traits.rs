// Boundaries to the two external collaborators the core consumes:
// the entity extractor (text → candidate entities) and the embedding
// provider (name → vector). Neither is implemented in-core beyond thin
// HTTP adapters; tests plug in deterministic fakes.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::InsightError;
use crate::types::{CandidateEntity, ContentItem};

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts. Defaults to one call per text.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in &texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    /// Extract candidate entities from one content item. An empty list is a
    /// valid answer; failures surface as [`InsightError::ExtractionFailed`].
    async fn extract(&self, item: &ContentItem) -> Result<Vec<CandidateEntity>, InsightError>;
}
