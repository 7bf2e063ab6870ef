//! Ingestion orchestrator: fans a batch of source requests out to the
//! registered plugins and collects what they yield.
//!
//! One spawned task per resolved source, bounded by a semaphore. Every
//! source's time budget runs from the start of the batch, including time
//! spent waiting for a permit, so a batch never outlasts one budget. Items leave
//! each task through an mpsc channel as soon as they are yielded, so a source
//! that later errors, panics, or runs out of time still contributes what it
//! produced. A failing source never affects its siblings.

use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};

use insightgraph_common::{ContentItem, IngestConfig, InsightError};
use insightgraph_sources::{FetchParams, PluginRegistry, RegisteredSource, SearchFilters};

/// Capacity of the item channel used by [`Orchestrator::run`].
const ITEM_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_items_per_source: usize,
    pub source_time_budget: Duration,
    pub max_concurrency: usize,
    /// Overall batch deadline. Sources still running when it passes report
    /// [`SourceErrorReason::Timeout`].
    pub deadline: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for OrchestratorConfig {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_items_per_source: config.max_items_per_source,
            source_time_budget: config.source_time_budget(),
            max_concurrency: config.max_concurrency,
            deadline: config.deadline(),
        }
    }
}

/// Ordered list of `(source_id, params)` requests.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub requests: Vec<(String, FetchParams)>,
}

impl FetchBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, source_id: &str, params: FetchParams) -> Self {
        self.requests.push((source_id.to_string(), params));
        self
    }

    /// The same params for every listed source.
    pub fn for_sources<I, S>(source_ids: I, params: FetchParams) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            requests: source_ids
                .into_iter()
                .map(|id| (id.as_ref().to_string(), params.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SourceErrorReason {
    Unregistered,
    Timeout,
    FetchFailed(String),
    Panicked,
}

impl fmt::Display for SourceErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceErrorReason::Unregistered => write!(f, "source not registered"),
            SourceErrorReason::Timeout => write!(f, "batch deadline reached"),
            SourceErrorReason::FetchFailed(msg) => write!(f, "fetch failed: {msg}"),
            SourceErrorReason::Panicked => write!(f, "source task panicked"),
        }
    }
}

/// Per-source failure, returned as data alongside the items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    pub source_id: String,
    pub reason: SourceErrorReason,
}

impl SourceError {
    fn new(source_id: &str, reason: SourceErrorReason) -> Self {
        Self {
            source_id: source_id.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub items: Vec<ContentItem>,
    pub errors: Vec<SourceError>,
}

/// Signals every in-flight run of the orchestrator that created it.
#[derive(Clone)]
pub struct CancelHandle {
    generation: Arc<watch::Sender<u64>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    config: OrchestratorConfig,
    cancel: Arc<watch::Sender<u64>>,
}

enum Slot {
    Unregistered(String),
    Running(String, JoinHandle<Option<SourceErrorReason>>),
}

impl Orchestrator {
    pub fn new(registry: Arc<PluginRegistry>, config: OrchestratorConfig) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            registry,
            config,
            cancel: Arc::new(cancel),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            generation: self.cancel.clone(),
        }
    }

    /// Fetch every source in the batch and collect items and errors.
    pub async fn run(&self, batch: &FetchBatch) -> BatchResult {
        let (tx, mut rx) = mpsc::channel(ITEM_CHANNEL_CAPACITY);
        let collect = async move {
            let mut items = Vec::new();
            while let Some(item) = rx.recv().await {
                items.push(item);
            }
            items
        };
        let (errors, items) = tokio::join!(self.run_into(batch, tx), collect);
        BatchResult { items, errors }
    }

    /// Streaming form of [`run`](Self::run): items go to `items` as they are
    /// yielded; returns once every source task has finished. Errors are in
    /// batch order.
    pub async fn run_into(
        &self,
        batch: &FetchBatch,
        items: mpsc::Sender<ContentItem>,
    ) -> Vec<SourceError> {
        let started = Instant::now();
        let deadline = self.config.deadline.map(|d| started + d);
        let budget_ends = started + self.config.source_time_budget;
        let resolved = batch
            .requests
            .iter()
            .filter(|(id, _)| self.registry.get(id).is_ok())
            .count();
        let permits = resolved.min(self.config.max_concurrency).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));

        info!(
            sources = batch.len(),
            resolved,
            concurrency = permits,
            "Starting ingestion batch"
        );

        let mut slots = Vec::with_capacity(batch.len());
        for (source_id, params) in &batch.requests {
            let entry = match self.registry.get(source_id) {
                Ok(entry) => entry,
                Err(_) => {
                    warn!(source_id = source_id.as_str(), "Skipping unregistered source");
                    slots.push(Slot::Unregistered(source_id.clone()));
                    continue;
                }
            };
            let task = SourceTask {
                entry,
                params: params.clone(),
                max_items: self.config.max_items_per_source,
                budget_ends,
                deadline,
                items: items.clone(),
                cancel: self.cancel.subscribe(),
                semaphore: semaphore.clone(),
            };
            slots.push(Slot::Running(source_id.clone(), tokio::spawn(task.run())));
        }
        drop(items);

        let mut errors = Vec::new();
        for slot in slots {
            match slot {
                Slot::Unregistered(source_id) => {
                    errors.push(SourceError::new(&source_id, SourceErrorReason::Unregistered))
                }
                Slot::Running(source_id, handle) => match handle.await {
                    Ok(None) => {}
                    Ok(Some(reason)) => errors.push(SourceError::new(&source_id, reason)),
                    Err(e) => {
                        error!(source_id = source_id.as_str(), error = %e, "Source task panicked");
                        errors.push(SourceError::new(&source_id, SourceErrorReason::Panicked));
                    }
                },
            }
        }

        info!(
            sources = batch.len(),
            errors = errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion batch complete"
        );
        errors
    }

    /// Keyword search against one registered source.
    pub async fn search(
        &self,
        source_id: &str,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<ContentItem>, InsightError> {
        self.registry.search(source_id, query, filters).await
    }
}

struct SourceTask {
    entry: Arc<RegisteredSource>,
    params: FetchParams,
    max_items: usize,
    budget_ends: Instant,
    deadline: Option<Instant>,
    items: mpsc::Sender<ContentItem>,
    cancel: watch::Receiver<u64>,
    semaphore: Arc<Semaphore>,
}

impl SourceTask {
    /// `None` is success, including partial success when a cap was hit.
    async fn run(mut self) -> Option<SourceErrorReason> {
        let source_id = self.entry.source_id().to_string();
        let deadline = self.deadline;
        let mut cancel = self.cancel.clone();
        let stop = async move {
            tokio::select! {
                _ = cancelled(&mut cancel) => {}
                _ = sleep_until_opt(deadline) => {}
            }
        };
        tokio::pin!(stop);

        let budget = sleep_until(self.budget_ends);
        tokio::pin!(budget);

        let _permit = tokio::select! {
            biased;
            _ = &mut stop => return Some(SourceErrorReason::Timeout),
            _ = &mut budget => {
                info!(source_id = source_id.as_str(), "Source time budget spent waiting for a permit");
                return None;
            }
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Some(SourceErrorReason::FetchFailed("semaphore closed".into())),
            },
        };

        let plugin = self.entry.plugin.clone();
        let mut stream = plugin.fetch_content(std::mem::take(&mut self.params));
        let mut count = 0usize;

        loop {
            if count >= self.max_items {
                info!(source_id = source_id.as_str(), items = count, "Item cap reached");
                return None;
            }
            let next = tokio::select! {
                biased;
                _ = &mut stop => {
                    warn!(source_id = source_id.as_str(), items = count, "Source cancelled");
                    return Some(SourceErrorReason::Timeout);
                }
                _ = &mut budget => {
                    info!(source_id = source_id.as_str(), items = count, "Source time budget exhausted");
                    return None;
                }
                next = stream.next() => next,
            };
            match next {
                None => {
                    info!(source_id = source_id.as_str(), items = count, "Source fetch complete");
                    return None;
                }
                Some(Ok(item)) => {
                    let sent = tokio::select! {
                        biased;
                        _ = &mut stop => return Some(SourceErrorReason::Timeout),
                        sent = self.items.send(item) => sent,
                    };
                    if sent.is_err() {
                        warn!(source_id = source_id.as_str(), "Item receiver dropped, stopping source");
                        return None;
                    }
                    count += 1;
                }
                Some(Err(e)) => {
                    warn!(source_id = source_id.as_str(), items = count, error = %e, "Source fetch failed");
                    return Some(SourceErrorReason::FetchFailed(format!("{e:#}")));
                }
            }
        }
    }
}

/// Resolves when a cancel is signalled after subscription.
async fn cancelled(rx: &mut watch::Receiver<u64>) {
    if rx.changed().await.is_err() {
        pending::<()>().await;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_builders_keep_order() {
        let batch = FetchBatch::for_sources(["a", "b", "c"], FetchParams::default().limit(5));
        let ids: Vec<&str> = batch.requests.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(batch.requests[1].1.limit, Some(5));

        let batch = FetchBatch::new().push("x", FetchParams::default());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn config_follows_ingest_settings() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_items_per_source, 1000);
        assert_eq!(config.max_concurrency, 32);
        assert_eq!(config.source_time_budget, Duration::from_secs(60));
        assert_eq!(config.deadline, None);
    }

    #[test]
    fn reasons_render() {
        assert_eq!(SourceErrorReason::Unregistered.to_string(), "source not registered");
        assert_eq!(
            SourceErrorReason::FetchFailed("503".into()).to_string(),
            "fetch failed: 503"
        );
    }

    #[tokio::test]
    async fn empty_batch_finishes_immediately() {
        let orchestrator = Orchestrator::new(Arc::new(PluginRegistry::new()), OrchestratorConfig::default());
        let result = orchestrator.run(&FetchBatch::new()).await;
        assert!(result.items.is_empty());
        assert!(result.errors.is_empty());
    }
}
