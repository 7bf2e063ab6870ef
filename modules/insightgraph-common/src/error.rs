use thiserror::Error;

use crate::types::Capability;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Invalid plugin config for {source_id}: {reason}")]
    InvalidConfig { source_id: String, reason: String },

    #[error("Source not registered: {0}")]
    NotFound(String),

    #[error("Source {source_id} does not support {capability}")]
    CapabilityUnsupported {
        source_id: String,
        capability: Capability,
    },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl InsightError {
    pub fn invalid_config(source_id: &str, reason: impl Into<String>) -> Self {
        InsightError::InvalidConfig {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;
