use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use insightgraph_common::config::load_config;
use insightgraph_common::{AppConfig, DedupConfig, EntityExtractor, HttpEmbedder, TextEmbedder};
use insightgraph_dedup::{DedupEngine, MemoryEntityStore};
use insightgraph_ingest::{
    FetchBatch, HttpEntityExtractor, IngestPipeline, Orchestrator, OrchestratorConfig,
};
use insightgraph_sources::{build_plugin, default_http_client, FetchParams, PluginRegistry};

#[derive(Parser)]
#[command(name = "insightgraph", about = "Source ingestion and entity deduplication")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every configured source once and fold the extracted entities
    /// into the snapshot.
    Ingest {
        #[arg(long, default_value = "./config/insightgraph.toml")]
        config: PathBuf,
        #[arg(long, default_value = "./data/entities.json")]
        snapshot: PathBuf,
        /// Only fetch items newer than this many hours
        #[arg(long)]
        since_hours: Option<i64>,
    },
    /// List the most mentioned canonical entities in a snapshot.
    Entities {
        #[arg(long, default_value = "./data/entities.json")]
        snapshot: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("insightgraph=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    match cli.command {
        Command::Ingest {
            config,
            snapshot,
            since_hours,
        } => ingest(config, snapshot, since_hours).await,
        Command::Entities { snapshot, limit } => entities(snapshot, limit),
    }
}

async fn ingest(config_path: PathBuf, snapshot: PathBuf, since_hours: Option<i64>) -> Result<()> {
    info!(config = %config_path.display(), "Loading config");
    let file_config = load_config(&config_path)?;
    let app_config = AppConfig::from_env()?;

    let client = default_http_client()?;
    let registry = Arc::new(PluginRegistry::from_configs(&file_config.sources, |config| {
        build_plugin(config, &client)
    }));
    if registry.is_empty() {
        warn!("No usable sources configured, nothing to ingest");
        return Ok(());
    }

    let store = Arc::new(open_store(&snapshot, &file_config.dedup)?);
    let embedder: Arc<dyn TextEmbedder> = Arc::new(HttpEmbedder::new(
        &app_config.embedding_base_url,
        &app_config.embedding_api_key,
        &app_config.embedding_model,
    )?);
    let extractor: Arc<dyn EntityExtractor> = Arc::new(HttpEntityExtractor::new(
        app_config
            .extractor_url
            .as_deref()
            .context("EXTRACTOR_URL environment variable is required for ingest")?,
    )?);
    let engine = Arc::new(DedupEngine::new(store.clone(), embedder, file_config.dedup.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        OrchestratorConfig::from(&file_config.ingest),
    ));
    let pipeline = IngestPipeline::new(orchestrator, extractor, engine.clone(), &file_config.ingest);

    let mut params = FetchParams::default();
    if let Some(hours) = since_hours {
        params = params.since(chrono::Utc::now() - chrono::Duration::hours(hours));
    }
    let batch = FetchBatch::for_sources(registry.list(), params);
    let report = pipeline.run(&batch).await;

    for error in &report.source_errors {
        warn!(source_id = error.source_id.as_str(), reason = %error.reason, "Source did not complete");
    }
    store.save_snapshot(&snapshot)?;

    let stats = engine.stats();
    info!(
        entities = store.len(),
        bloom_false_positives = stats.bloom_false_positives,
        embedding_failures = stats.embedding_failures,
        "Snapshot updated"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn open_store(snapshot: &Path, config: &DedupConfig) -> Result<MemoryEntityStore> {
    if snapshot.exists() {
        MemoryEntityStore::load_snapshot(snapshot, config)
    } else {
        info!(path = %snapshot.display(), "No snapshot yet, starting empty");
        Ok(MemoryEntityStore::new(config))
    }
}

fn entities(snapshot: PathBuf, limit: usize) -> Result<()> {
    let store = MemoryEntityStore::load_snapshot(&snapshot, &DedupConfig::default())?;
    println!("{:<6} {:<12} {:<40} SOURCES", "COUNT", "TYPE", "NAME");
    for entity in store.top_by_mentions(limit) {
        let sources: Vec<&str> = entity.source_ids.iter().map(String::as_str).collect();
        println!(
            "{:<6} {:<12} {:<40} {}",
            entity.mention_count,
            entity.entity_type.as_str(),
            entity.name,
            sources.join(",")
        );
    }
    Ok(())
}
