pub mod config;
pub mod embedder;
pub mod error;
pub mod identity;
pub mod traits;
pub mod types;

pub use config::{AppConfig, DedupConfig, FileConfig, IngestConfig};
pub use embedder::{HttpEmbedder, NoOpEmbedder};
pub use error::InsightError;
pub use identity::{normalize_name, IdentityHash};
pub use traits::{EntityExtractor, TextEmbedder};
pub use types::*;
