use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::SourceConfig;

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, service URLs) stay as env vars, see [`AppConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub max_items_per_source: usize,
    pub source_time_budget_secs: u64,
    pub max_concurrency: usize,
    /// Overall batch deadline. 0 = none.
    pub deadline_secs: u64,
    pub dedup_workers: usize,
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_items_per_source: 1000,
            source_time_budget_secs: 60,
            max_concurrency: 32,
            deadline_secs: 0,
            dedup_workers: 4,
            queue_capacity: 256,
        }
    }
}

impl IngestConfig {
    pub fn source_time_budget(&self) -> Duration {
        Duration::from_secs(self.source_time_budget_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Inclusive: a best score equal to the threshold merges.
    pub merge_threshold: f64,
    pub top_k: usize,
    pub embedding_weight: f64,
    pub name_weight: f64,
    pub bloom_false_positive_rate: f64,
    pub bloom_expected_items: usize,
    pub lock_shards: usize,
    /// 0 = take the dimension of the first embedding seen.
    pub embedding_dimensions: usize,
    /// Create immediately on a negative membership check instead of running
    /// the similarity search. Near-duplicate spellings then stay separate.
    pub skip_similarity_for_novel: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.85,
            top_k: 5,
            embedding_weight: 0.7,
            name_weight: 0.3,
            bloom_false_positive_rate: 0.001,
            bloom_expected_items: 100_000,
            lock_shards: 64,
            embedding_dimensions: 0,
            skip_similarity_for_novel: false,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            anyhow::bail!("dedup.merge_threshold must be within [0, 1]");
        }
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            anyhow::bail!("dedup.bloom_false_positive_rate must be within (0, 1)");
        }
        if self.top_k == 0 || self.lock_shards == 0 {
            anyhow::bail!("dedup.top_k and dedup.lock_shards must be positive");
        }
        if self.embedding_weight < 0.0 || self.name_weight < 0.0 {
            anyhow::bail!("dedup weights must be non-negative");
        }
        Ok(())
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(content)?;
    config.dedup.validate()?;
    Ok(config)
}

/// Secrets and service endpoints loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub embedding_api_key: String,
    pub embedding_base_url: String,
    pub embedding_model: String,
    pub extractor_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            embedding_api_key: std::env::var("EMBEDDING_API_KEY")
                .context("EMBEDDING_API_KEY environment variable is required")?,
            embedding_base_url: std::env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            extractor_url: std::env::var("EXTRACTOR_URL").ok(),
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.len().min(5);
            format!("{}...({} chars)", &val[..n], val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  EMBEDDING_API_KEY: {}", preview(&self.embedding_api_key));
        tracing::info!("  EMBEDDING_BASE_URL: {}", self.embedding_base_url);
        tracing::info!("  EMBEDDING_MODEL: {}", self.embedding_model);
        tracing::info!(
            "  EXTRACTOR_URL: {}",
            self.extractor_url.as_deref().unwrap_or("<not set>")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.ingest.max_items_per_source, 1000);
        assert_eq!(config.ingest.max_concurrency, 32);
        assert_eq!(config.ingest.deadline(), None);
        assert_eq!(config.dedup.merge_threshold, 0.85);
        assert_eq!(config.dedup.top_k, 5);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let config = parse_config(
            r#"
            [ingest]
            max_items_per_source = 50
            deadline_secs = 120

            [dedup]
            merge_threshold = 0.9

            [[sources]]
            source_id = "ai-news"
            kind = "feed"
            settings = { url = "https://example.com/feed.xml" }

            [[sources]]
            source_id = "ml"
            kind = "reddit"
            enabled = false
            rate_limit = { requests_per_minute = 10 }
            settings = { subreddit = "MachineLearning" }
            "#,
        )
        .unwrap();

        assert_eq!(config.ingest.max_items_per_source, 50);
        assert_eq!(config.ingest.deadline(), Some(Duration::from_secs(120)));
        assert_eq!(config.ingest.max_concurrency, 32);
        assert_eq!(config.dedup.merge_threshold, 0.9);
        assert_eq!(config.sources.len(), 2);
        assert!(!config.sources[1].enabled);
        assert_eq!(config.sources[1].rate_limit.requests_per_minute, 10);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(parse_config("[ingest]\nmax_items = 5\n").is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        assert!(parse_config("[dedup]\nmerge_threshold = 1.5\n").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("nope.toml")).is_err());
    }
}
