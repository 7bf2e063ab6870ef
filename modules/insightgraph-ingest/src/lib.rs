pub mod extract;
pub mod orchestrator;
pub mod pipeline;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use extract::{parse_candidates, HttpEntityExtractor};
pub use orchestrator::{
    BatchResult, CancelHandle, FetchBatch, Orchestrator, OrchestratorConfig, SourceError,
    SourceErrorReason,
};
pub use pipeline::{route, IngestPipeline, PipelineReport};
