//! Fetch → extract → dedup.
//!
//! The orchestrator streams items into a dispatcher, which routes each item
//! to one of `dedup_workers` workers by `hash(source_id)`. Every worker owns a
//! bounded queue and handles its items one at a time, so a source's items are
//! extracted and deduplicated in the order the source yielded them. A full
//! queue blocks the dispatcher, which in turn blocks the fetch tasks.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use insightgraph_common::{ContentItem, EntityExtractor, IngestConfig};
use insightgraph_dedup::{DedupEngine, Resolution};

use crate::orchestrator::{FetchBatch, Orchestrator, SourceError};

/// Worker index for a source. Stable for the life of the process.
pub fn route(source_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    source_id.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub items_fetched: u64,
    pub items_extracted: u64,
    pub extraction_failures: u64,
    pub candidates: u64,
    pub entities_created: u64,
    pub entities_merged: u64,
    pub candidates_skipped: u64,
    pub degraded: u64,
    pub dedup_failures: u64,
    pub worker_panics: u64,
    pub source_errors: Vec<SourceError>,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    fn absorb(&mut self, worker: WorkerStats) {
        self.items_extracted += worker.items_extracted;
        self.extraction_failures += worker.extraction_failures;
        self.candidates += worker.candidates;
        self.entities_created += worker.created;
        self.entities_merged += worker.merged;
        self.candidates_skipped += worker.skipped;
        self.degraded += worker.degraded;
        self.dedup_failures += worker.dedup_failures;
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    items_extracted: u64,
    extraction_failures: u64,
    candidates: u64,
    created: u64,
    merged: u64,
    skipped: u64,
    degraded: u64,
    dedup_failures: u64,
}

impl WorkerStats {
    fn tally(&mut self, resolutions: &[Resolution]) {
        for resolution in resolutions {
            match resolution {
                Resolution::Created { .. } => self.created += 1,
                Resolution::Merged { .. } => self.merged += 1,
                Resolution::Skipped { .. } => self.skipped += 1,
            }
            if resolution.is_degraded() {
                self.degraded += 1;
            }
        }
    }
}

pub struct IngestPipeline {
    orchestrator: Arc<Orchestrator>,
    extractor: Arc<dyn EntityExtractor>,
    engine: Arc<DedupEngine>,
    workers: usize,
    queue_capacity: usize,
}

impl IngestPipeline {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        extractor: Arc<dyn EntityExtractor>,
        engine: Arc<DedupEngine>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            orchestrator,
            extractor,
            engine,
            workers: config.dedup_workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
        }
    }

    pub fn engine(&self) -> &Arc<DedupEngine> {
        &self.engine
    }

    pub async fn run(&self, batch: &FetchBatch) -> PipelineReport {
        let started = Instant::now();

        let mut queues = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            queues.push(tx);
            handles.push(tokio::spawn(run_worker(
                worker_id,
                rx,
                self.extractor.clone(),
                self.engine.clone(),
            )));
        }

        let (item_tx, mut item_rx) = mpsc::channel::<ContentItem>(self.queue_capacity);
        let dispatch = async move {
            let mut fetched = 0u64;
            while let Some(item) = item_rx.recv().await {
                fetched += 1;
                let worker = route(&item.source_id, queues.len());
                if queues[worker].send(item).await.is_err() {
                    warn!(worker, "Dedup worker gone, dropping item");
                }
            }
            fetched
        };

        let (source_errors, items_fetched) =
            tokio::join!(self.orchestrator.run_into(batch, item_tx), dispatch);

        let mut report = PipelineReport {
            items_fetched,
            source_errors,
            ..PipelineReport::default()
        };
        for handle in handles {
            match handle.await {
                Ok(stats) => report.absorb(stats),
                Err(e) => {
                    error!(error = %e, "Dedup worker panicked");
                    report.worker_panics += 1;
                }
            }
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            items = report.items_fetched,
            extracted = report.items_extracted,
            extraction_failures = report.extraction_failures,
            created = report.entities_created,
            merged = report.entities_merged,
            source_errors = report.source_errors.len(),
            elapsed_ms = report.elapsed_ms,
            "Pipeline run complete"
        );
        report
    }
}

async fn run_worker(
    worker_id: usize,
    mut queue: mpsc::Receiver<ContentItem>,
    extractor: Arc<dyn EntityExtractor>,
    engine: Arc<DedupEngine>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(item) = queue.recv().await {
        let candidates = match extractor.extract(&item).await {
            Ok(candidates) => candidates,
            Err(e) => {
                stats.extraction_failures += 1;
                warn!(worker_id, item_id = item.id.as_str(), error = %e, "Extraction failed, skipping item");
                continue;
            }
        };
        stats.items_extracted += 1;
        stats.candidates += candidates.len() as u64;
        if candidates.is_empty() {
            continue;
        }

        match engine.add_batch(candidates).await {
            Ok(result) => stats.tally(&result.resolutions),
            Err(e) => {
                // Candidates before the failing one are already stored.
                stats.tally(&e.committed.resolutions);
                stats.dedup_failures += 1;
                error!(worker_id, item_id = item.id.as_str(), error = %e, "Dedup failed for item");
            }
        }
    }
    stats
}
