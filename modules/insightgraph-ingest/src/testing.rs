// Test doubles for the ingestion pipeline.
//
// Plugins with scripted behaviour for the orchestrator:
// - StaticPlugin: yields a fixed list of items
// - FailingPlugin: yields some items, then errors
// - PanickingPlugin: yields some items, then panics
// - SlowPlugin: yields one item per interval, forever
//
// MockExtractor (EntityExtractor) turns item titles into candidates and
// records the order it saw items in.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use insightgraph_common::{
    CandidateEntity, Capability, ContentItem, EntityExtractor, EntityType, InsightError,
    PluginDescriptor, SourceConfig,
};
use insightgraph_sources::{ContentStream, FetchParams, PluginRegistry, SearchFilters, SourcePlugin};

pub use insightgraph_dedup::testing::{FailingEmbedder, FixedEmbedder, FlakyStore, TEST_EMBEDDING_DIM};

/// Deterministic item `n` for `source_id`, created `n` minutes after a fixed
/// start time.
pub fn test_item(source_id: &str, n: usize, title: &str) -> ContentItem {
    let created_at = Utc
        .with_ymd_and_hms(2025, 6, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + chrono::Duration::minutes(n as i64);
    ContentItem::new(source_id, &format!("item-{n}"), title, format!("body {n}"), created_at)
}

/// Register `plugin` under `source_id` with a descriptor matching its
/// capabilities.
pub fn register(registry: &PluginRegistry, source_id: &str, plugin: impl SourcePlugin + 'static) {
    let descriptor = PluginDescriptor::new(source_id, plugin.capabilities());
    registry
        .register(descriptor, SourceConfig::new(source_id, plugin.kind()), Arc::new(plugin))
        .expect("test plugin registration failed");
}

// ---------------------------------------------------------------------------
// StaticPlugin
// ---------------------------------------------------------------------------

pub struct StaticPlugin {
    items: Vec<ContentItem>,
    searchable: bool,
}

impl StaticPlugin {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            searchable: false,
        }
    }

    /// `count` items titled `"<source_id> item <n>"`.
    pub fn numbered(source_id: &str, count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|n| test_item(source_id, n, &format!("{source_id} item {n}")))
                .collect(),
        )
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }
}

#[async_trait]
impl SourcePlugin for StaticPlugin {
    fn kind(&self) -> &str {
        "static"
    }

    fn validate_config(&self, _config: &SourceConfig) -> bool {
        true
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        let mut caps = BTreeSet::from([Capability::Stream]);
        if self.searchable {
            caps.insert(Capability::Search);
        }
        caps
    }

    fn fetch_content(&self, params: FetchParams) -> ContentStream<'_> {
        let items: Vec<_> = self
            .items
            .iter()
            .filter(|i| params.admits(i.created_at))
            .take(params.limit.unwrap_or(usize::MAX))
            .cloned()
            .map(Ok)
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    async fn search_content(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<ContentItem>, InsightError> {
        if !self.searchable {
            return Err(InsightError::CapabilityUnsupported {
                source_id: self.kind().to_string(),
                capability: Capability::Search,
            });
        }
        let query = query.to_lowercase();
        Ok(self
            .items
            .iter()
            .filter(|i| i.title.to_lowercase().contains(&query))
            .take(filters.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FailingPlugin
// ---------------------------------------------------------------------------

pub struct FailingPlugin {
    source_id: String,
    ok_items: usize,
}

impl FailingPlugin {
    /// Yields `ok_items` items, then fails.
    pub fn after(source_id: &str, ok_items: usize) -> Self {
        Self {
            source_id: source_id.to_string(),
            ok_items,
        }
    }
}

#[async_trait]
impl SourcePlugin for FailingPlugin {
    fn kind(&self) -> &str {
        "failing"
    }

    fn validate_config(&self, _config: &SourceConfig) -> bool {
        true
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Stream])
    }

    fn fetch_content(&self, _params: FetchParams) -> ContentStream<'_> {
        Box::pin(async_stream::try_stream! {
            for n in 0..self.ok_items {
                yield test_item(&self.source_id, n, &format!("{} item {n}", self.source_id));
            }
            Err::<(), _>(anyhow::anyhow!("upstream returned 503 Service Unavailable"))?;
        })
    }
}

// ---------------------------------------------------------------------------
// PanickingPlugin
// ---------------------------------------------------------------------------

pub struct PanickingPlugin {
    source_id: String,
    before: usize,
}

impl PanickingPlugin {
    /// Yields `before` items, then panics while producing the next one.
    pub fn after(source_id: &str, before: usize) -> Self {
        Self {
            source_id: source_id.to_string(),
            before,
        }
    }
}

#[async_trait]
impl SourcePlugin for PanickingPlugin {
    fn kind(&self) -> &str {
        "panicking"
    }

    fn validate_config(&self, _config: &SourceConfig) -> bool {
        true
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Stream])
    }

    fn fetch_content(&self, _params: FetchParams) -> ContentStream<'_> {
        Box::pin(async_stream::try_stream! {
            for n in 0..self.before {
                yield test_item(&self.source_id, n, &format!("{} item {n}", self.source_id));
            }
            panic!("plugin bug in {}", self.source_id);
        })
    }
}

// ---------------------------------------------------------------------------
// SlowPlugin
// ---------------------------------------------------------------------------

pub struct SlowPlugin {
    source_id: String,
    interval: Duration,
}

impl SlowPlugin {
    /// Never finishes on its own: one item every `interval`.
    pub fn every(source_id: &str, interval: Duration) -> Self {
        Self {
            source_id: source_id.to_string(),
            interval,
        }
    }
}

#[async_trait]
impl SourcePlugin for SlowPlugin {
    fn kind(&self) -> &str {
        "slow"
    }

    fn validate_config(&self, _config: &SourceConfig) -> bool {
        true
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        BTreeSet::from([Capability::Stream])
    }

    fn fetch_content(&self, _params: FetchParams) -> ContentStream<'_> {
        Box::pin(async_stream::try_stream! {
            let mut n = 0usize;
            loop {
                tokio::time::sleep(self.interval).await;
                yield test_item(&self.source_id, n, &format!("{} item {n}", self.source_id));
                n += 1;
            }
        })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// By default every item yields one candidate named after its title, typed
/// `Company`. Specific items can be scripted or made to fail.
#[derive(Default)]
pub struct MockExtractor {
    scripted: HashMap<String, Vec<(String, EntityType)>>,
    failing: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_item(mut self, item_id: &str, entities: &[(&str, EntityType)]) -> Self {
        self.scripted.insert(
            item_id.to_string(),
            entities.iter().map(|(n, t)| (n.to_string(), *t)).collect(),
        );
        self
    }

    pub fn fail_on(mut self, item_id: &str) -> Self {
        self.failing.insert(item_id.to_string());
        self
    }

    /// Item ids in the order `extract` was called.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen lock poisoned").clone()
    }
}

#[async_trait]
impl EntityExtractor for MockExtractor {
    async fn extract(&self, item: &ContentItem) -> Result<Vec<CandidateEntity>, InsightError> {
        self.seen
            .lock()
            .expect("seen lock poisoned")
            .push(item.id.clone());
        if self.failing.contains(&item.id) {
            return Err(InsightError::ExtractionFailed(format!(
                "scripted failure for {}",
                item.id
            )));
        }
        let entities = self
            .scripted
            .get(&item.id)
            .cloned()
            .unwrap_or_else(|| vec![(item.title.clone(), EntityType::Company)]);
        Ok(entities
            .into_iter()
            .map(|(name, entity_type)| CandidateEntity::from_item(item, name, entity_type, 0.9))
            .collect())
    }
}
