//! DocVault local ingestion runner
//!
//! Ingests files named on the command line for a local user and waits
//! for each record to reach a terminal state:
//! 1. Accepts each file through the regular upload path
//! 2. Processing runs on the background worker pool
//! 3. Status is polled until ready/error and printed

use anyhow::Context;
use docvault_common::{
    config::AppConfig, embeddings::create_embedder, index::MemoryVectorIndex,
    store::MetadataStore, types::FileStatus, VERSION,
};
use docvault_ingestion::{
    Chunker, DefaultExtractor, FileService, IngestionPipeline, SchedulerHandle, WorkerPool,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting DocVault ingestion runner v{}", VERSION);

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: docvault-ingest <file> [<file> ...]");
        std::process::exit(2);
    }

    // Wire the component graph. The scheduler handle is captured here,
    // once, before any job can be submitted.
    let scheduler = SchedulerHandle::current()?;
    let store = Arc::new(MetadataStore::new(config.storage.uploads_dir.clone()));
    let extractor = Arc::new(DefaultExtractor::new());
    let chunker = Chunker::new(&config.chunking)?;
    let embedder = create_embedder(&config.embedding);
    let index = Arc::new(MemoryVectorIndex::new());
    let pool = Arc::new(WorkerPool::new(config.worker.pool_size));

    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        extractor,
        chunker,
        embedder,
        index.clone(),
        scheduler,
    ));
    let service = FileService::new(
        store,
        index,
        pipeline,
        pool.clone(),
        config.storage.max_file_size_bytes,
    );

    const USER: &str = "local";

    // Queue every file, then poll them all to a terminal state.
    let mut submitted = Vec::new();
    for path in &paths {
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        let mime = if name.to_lowercase().ends_with(".pdf") {
            "application/pdf"
        } else {
            "text/plain"
        };

        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path))?;
        let summary = service.accept_upload(USER, &name, mime, &content).await?;
        println!("queued  {}  ({}, {})", summary.id, summary.name, summary.size);
        submitted.push(summary.id);
    }

    let mut failures = 0;
    for file_id in submitted {
        loop {
            let status = service.get_status(USER, file_id).await?;
            if status.status.is_terminal() {
                match status.status {
                    FileStatus::Ready => {
                        println!("ready   {}  ({} chunks)", file_id, status.chunk_count);
                    }
                    _ => {
                        failures += 1;
                        println!(
                            "error   {}  ({})",
                            file_id,
                            status.error.unwrap_or_else(|| "unknown".to_string())
                        );
                    }
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    // Drain the pool off the runtime; joining worker threads blocks.
    let pool_for_shutdown = pool.clone();
    tokio::task::spawn_blocking(move || pool_for_shutdown.shutdown())
        .await
        .ok();

    if failures > 0 {
        warn!(failures, "some files failed to process");
        std::process::exit(1);
    }
    Ok(())
}
