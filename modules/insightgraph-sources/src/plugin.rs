// Plugin contract every source adapter implements.
//
// fetch_content returns a lazy stream: nothing is requested until the
// orchestrator polls it, and each call starts a fresh fetch. A stream that
// has been partially consumed cannot be resumed.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use insightgraph_common::{Capability, ContentItem, InsightError, SourceConfig};

pub type ContentStream<'a> = BoxStream<'a, Result<ContentItem>>;

/// Per-call fetch parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchParams {
    /// Skip items created before this instant.
    pub since: Option<DateTime<Utc>>,
    /// Plugin-side cap. The orchestrator enforces its own cap on top.
    pub limit: Option<usize>,
    pub query: Option<String>,
    pub options: BTreeMap<String, String>,
}

impl FetchParams {
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True if an item created at `created_at` passes the `since` filter.
    pub fn admits(&self, created_at: DateTime<Utc>) -> bool {
        self.since.is_none_or(|since| created_at >= since)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Short plugin kind for logs (`feed`, `reddit`, ...).
    fn kind(&self) -> &str;

    /// Whether `config` is complete and usable by this plugin.
    fn validate_config(&self, config: &SourceConfig) -> bool;

    fn capabilities(&self) -> BTreeSet<Capability>;

    fn fetch_content(&self, params: FetchParams) -> ContentStream<'_>;

    /// Finite keyword search. Only plugins declaring `Capability::Search`
    /// override this.
    async fn search_content(
        &self,
        _query: &str,
        _filters: &SearchFilters,
    ) -> Result<Vec<ContentItem>, InsightError> {
        Err(InsightError::CapabilityUnsupported {
            source_id: self.kind().to_string(),
            capability: Capability::Search,
        })
    }
}
