//! Ingestion pipeline
//!
//! Drives one uploaded file through extract → chunk → embed → index →
//! finalize on a worker thread, recording every transition through the
//! metadata store. Any stage failure aborts the whole job: the record
//! ends at `error` with a captured message, never at a partial "ready".

use crate::chunker::Chunker;
use crate::executor::SchedulerHandle;
use crate::extract::TextExtractor;
use chrono::Utc;
use docvault_common::errors::AppError;
use docvault_common::store::MetadataStore;
use docvault_common::types::{FileStatus, RecordPatch};
use docvault_common::{Embedder, VectorIndex};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// One unit of background work: process this stored file for this user.
#[derive(Clone, Debug)]
pub struct IngestionJob {
    pub user_id: String,
    pub file_id: Uuid,
    pub path: PathBuf,
    pub original_name: String,
    pub mime_type: String,
}

/// Stage failure, labeled with the taxonomy kind used in recorded
/// error messages.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Extraction(String),

    #[error("{0}")]
    Embedding(String),

    #[error("{0}")]
    Index(String),

    #[error("{0}")]
    Store(AppError),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Extraction(_) => "ExtractionError",
            PipelineError::Embedding(_) => "EmbeddingError",
            PipelineError::Index(_) => "IndexError",
            PipelineError::Store(_) => "StoreIOError",
        }
    }
}

/// The orchestrator for background ingestion jobs.
///
/// Runs synchronously on worker threads; all metadata mutations are
/// marshaled onto the async runtime through the [`SchedulerHandle`].
pub struct IngestionPipeline {
    store: Arc<MetadataStore>,
    extractor: Arc<dyn TextExtractor>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    scheduler: SchedulerHandle,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<MetadataStore>,
        extractor: Arc<dyn TextExtractor>,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            store,
            extractor,
            chunker,
            embedder,
            index,
            scheduler,
        }
    }

    /// Process one job to completion.
    ///
    /// Never returns an error and never panics the worker: all outcomes
    /// are reported through the file's metadata record, which callers
    /// poll. If even the error-status write fails, that failure is
    /// logged and swallowed so a broken store cannot loop a broken job.
    #[instrument(
        skip(self, job),
        fields(user_id = %job.user_id, file_id = %job.file_id, name = %job.original_name)
    )]
    pub fn process(&self, job: &IngestionJob) {
        info!("Starting background processing");

        match self.run_stages(job) {
            Ok(chunk_count) => {
                info!(chunk_count, "File processed successfully");
            }
            Err(e) => {
                let message = format!("{}: {}", e.kind(), e);
                error!(error = %message, "Processing failed");

                let patch = RecordPatch::new()
                    .status(FileStatus::Error)
                    .error(message);
                let outcome = self
                    .scheduler
                    .block_on(self.store.update_record(&job.user_id, job.file_id, patch));
                if let Err(update_err) = outcome {
                    warn!(error = %update_err, "Failed to record error status");
                }
            }
        }
    }

    fn run_stages(&self, job: &IngestionJob) -> Result<usize, PipelineError> {
        // Stage 1: extract. A file with no extractable text can never be
        // queried, so an empty result is a visible failure, not a
        // silently-empty success.
        let text = self
            .extractor
            .extract(&job.path, &job.mime_type)
            .map_err(|e| PipelineError::Extraction(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(PipelineError::Extraction(
                "no text extracted from file".to_string(),
            ));
        }

        // Stage 2: chunk.
        debug!(chars = text.len(), "Chunking extracted text");
        // TODO: thread real page numbers through from the PDF extractor
        let mut chunks = self.chunker.chunk(&text, Some(1), job.file_id);
        let chunk_count = chunks.len();

        // Refresh the record so pollers see progress before embedding
        // starts grinding.
        self.update_record(
            job,
            RecordPatch::new()
                .status(FileStatus::Processing)
                .chunk_count(chunk_count),
        )?;

        // Stage 3: embed, one chunk at a time so a bad chunk is
        // attributable. Chunks with nothing to embed are skipped with an
        // empty vector instead of being sent to the model.
        for chunk in &mut chunks {
            if chunk.text.trim().is_empty() {
                debug!(chunk_id = %chunk.id, "Skipping chunk with no embeddable text");
                chunk.embedding = Some(Vec::new());
                continue;
            }

            let vector = self
                .scheduler
                .block_on(self.embedder.embed(&chunk.text))
                .map_err(|e| {
                    PipelineError::Embedding(format!("chunk {}: {}", chunk.id, e))
                })?;
            if vector.is_empty() {
                return Err(PipelineError::Embedding(format!(
                    "invalid embedding for chunk {}",
                    chunk.id
                )));
            }
            chunk.embedding = Some(vector);
        }

        // Stage 4: index.
        let stored = self
            .scheduler
            .block_on(self.index.upsert(&job.user_id, job.file_id, &chunks))
            .map_err(|e| PipelineError::Index(e.to_string()))?;
        debug!(stored, "Chunks stored in vector index");

        // Stage 5: finalize.
        self.update_record(
            job,
            RecordPatch::new()
                .status(FileStatus::Ready)
                .processed_at(Utc::now())
                .chunk_count(chunk_count)
                .embedding_model(self.embedder.model_name()),
        )?;

        Ok(chunk_count)
    }

    fn update_record(&self, job: &IngestionJob, patch: RecordPatch) -> Result<(), PipelineError> {
        self.scheduler
            .block_on(self.store.update_record(&job.user_id, job.file_id, patch))
            .map(|_| ())
            .map_err(PipelineError::Store)
    }
}
