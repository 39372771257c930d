//! End-to-end ingestion scenarios
//!
//! Exercises the full path (upload acceptance, background pipeline,
//! metadata transitions, vector index, delete) against a temp
//! directory, with collaborator doubles standing in for the embedding
//! model where the scenario calls for controlled behavior.

use async_trait::async_trait;
use docvault_common::config::ChunkingConfig;
use docvault_common::errors::{AppError, Result};
use docvault_common::index::{MemoryVectorIndex, QueryMatch, VectorIndex};
use docvault_common::store::MetadataStore;
use docvault_common::types::{Chunk, FileStatus, StatusReport};
use docvault_common::Embedder;
use docvault_ingestion::{
    Chunker, DefaultExtractor, ExtractionError, FileService, IngestionPipeline, SchedulerHandle,
    TextExtractor, UploadSessionManager, WorkerPool,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

const USER: &str = "test-user";

// ---------------------------------------------------------------------
// Collaborator doubles
// ---------------------------------------------------------------------

/// Embedder that counts calls and returns a fixed small vector.
struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.5, 0.25, 0.125])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        "test-embed"
    }

    fn dimension(&self) -> usize {
        4
    }
}

/// Embedder that always fails.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::Embedding {
            message: "model offline".to_string(),
        })
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(AppError::Embedding {
            message: "model offline".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "failing-embed"
    }

    fn dimension(&self) -> usize {
        4
    }
}

/// Extractor that always fails, as an unreadable file would.
struct FailingExtractor;

impl TextExtractor for FailingExtractor {
    fn extract(&self, path: &Path, _mime_type: &str) -> std::result::Result<String, ExtractionError> {
        Err(ExtractionError::Unreadable {
            path: path.display().to_string(),
            message: "synthetic failure".to_string(),
        })
    }
}

/// Extractor that only ever finds whitespace.
struct WhitespaceExtractor;

impl TextExtractor for WhitespaceExtractor {
    fn extract(&self, _path: &Path, _mime_type: &str) -> std::result::Result<String, ExtractionError> {
        Ok("   \n\t   \n".to_string())
    }
}

/// Index wrapper that records the chunk count of every upsert.
struct RecordingIndex {
    inner: MemoryVectorIndex,
    upserts: Mutex<Vec<usize>>,
}

impl RecordingIndex {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryVectorIndex::new(),
            upserts: Mutex::new(Vec::new()),
        })
    }

    fn upserts(&self) -> Vec<usize> {
        self.upserts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn upsert(&self, user_id: &str, file_id: Uuid, chunks: &[Chunk]) -> Result<usize> {
        self.upserts.lock().unwrap().push(chunks.len());
        self.inner.upsert(user_id, file_id, chunks).await
    }

    async fn delete(&self, user_id: &str, file_id: Uuid) -> Result<bool> {
        self.inner.delete(user_id, file_id).await
    }

    async fn query(
        &self,
        user_id: &str,
        file_id: Uuid,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        self.inner.query(user_id, file_id, vector, top_k).await
    }
}

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

struct Harness {
    // field order matters: the pool drains (joining its workers) before
    // the temp directory the jobs write into is removed
    pool: Arc<WorkerPool>,
    store: Arc<MetadataStore>,
    service: FileService,
    sessions: UploadSessionManager,
    _dir: TempDir,
}

fn build_harness(
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::new(dir.path()));
    let chunker = Chunker::new(&ChunkingConfig {
        chunk_size: 400,
        chunk_overlap: 10,
    })
    .unwrap();
    let scheduler = SchedulerHandle::current().unwrap();
    let pool = Arc::new(WorkerPool::new(2));

    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        extractor,
        chunker,
        embedder,
        index.clone(),
        scheduler,
    ));
    let service = FileService::new(
        store.clone(),
        index.clone(),
        pipeline.clone(),
        pool.clone(),
        50 * 1024 * 1024,
    );
    let sessions = UploadSessionManager::new(store.clone(), pipeline, pool.clone(), 50 * 1024 * 1024);

    Harness {
        pool,
        store,
        service,
        sessions,
        _dir: dir,
    }
}

/// 112 unique space-separated words, roughly 900 characters: splits
/// into exactly 3 chunks at chunk size 400 / overlap 10.
fn nine_hundred_chars() -> String {
    (0..112)
        .map(|i| format!("word{:03}", i))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn wait_terminal(service: &FileService, file_id: Uuid) -> StatusReport {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = service.get_status(USER, file_id).await.unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("file never reached a terminal status")
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn end_to_end_upload_reaches_ready() {
    let embedder = CountingEmbedder::new();
    let index = RecordingIndex::new();
    let harness = build_harness(
        Arc::new(DefaultExtractor::new()),
        embedder.clone(),
        index.clone(),
    );

    let text = nine_hundred_chars();
    let summary = harness
        .service
        .accept_upload(USER, "doc.txt", "text/plain", text.as_bytes())
        .await
        .unwrap();
    assert_eq!(summary.status, FileStatus::Processing);

    let status = wait_terminal(&harness.service, summary.id).await;
    assert_eq!(status.status, FileStatus::Ready);
    assert_eq!(status.chunk_count, 3);
    assert!(status.processed_at.is_some());
    assert!(status.error.is_none());

    // one embedding call per chunk, one upsert with all three
    assert_eq!(embedder.calls(), 3);
    assert_eq!(index.upserts(), vec![3]);

    // the chunks are queryable, scoped to this file
    let matches = index
        .query(USER, summary.id, &[1.0, 0.5, 0.25, 0.125], 5)
        .await
        .unwrap();
    assert_eq!(matches.len(), 3);

    // the finalized record carries the embedding model used
    let record = harness.service.get_record(USER, summary.id).await.unwrap();
    assert_eq!(record.embedding_model.as_deref(), Some("test-embed"));
    assert_eq!(record.size, text.len() as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn extraction_failure_marks_error_and_skips_collaborators() {
    let embedder = CountingEmbedder::new();
    let index = RecordingIndex::new();
    let harness = build_harness(Arc::new(FailingExtractor), embedder.clone(), index.clone());

    let summary = harness
        .service
        .accept_upload(USER, "bad.bin", "application/octet-stream", b"\x00\x01")
        .await
        .unwrap();

    let status = wait_terminal(&harness.service, summary.id).await;
    assert_eq!(status.status, FileStatus::Error);
    let error = status.error.expect("error message must be recorded");
    assert!(error.starts_with("ExtractionError:"), "got: {}", error);

    // neither the embedder nor the index was ever reached
    assert_eq!(embedder.calls(), 0);
    assert!(index.upserts().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn whitespace_only_text_is_a_visible_failure() {
    let embedder = CountingEmbedder::new();
    let index = RecordingIndex::new();
    let harness = build_harness(Arc::new(WhitespaceExtractor), embedder.clone(), index.clone());

    let summary = harness
        .service
        .accept_upload(USER, "blank.txt", "text/plain", b"   ")
        .await
        .unwrap();

    let status = wait_terminal(&harness.service, summary.id).await;
    assert_eq!(status.status, FileStatus::Error);
    assert!(status
        .error
        .unwrap()
        .contains("no text extracted"));
    assert_eq!(embedder.calls(), 0);
    assert!(index.upserts().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn embedding_failure_aborts_before_indexing() {
    let index = RecordingIndex::new();
    let harness = build_harness(
        Arc::new(DefaultExtractor::new()),
        Arc::new(FailingEmbedder),
        index.clone(),
    );

    let summary = harness
        .service
        .accept_upload(USER, "doc.txt", "text/plain", nine_hundred_chars().as_bytes())
        .await
        .unwrap();

    let status = wait_terminal(&harness.service, summary.id).await;
    assert_eq!(status.status, FileStatus::Error);
    assert!(status.error.unwrap().starts_with("EmbeddingError:"));
    // no partial results were ever upserted
    assert!(index.upserts().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_upload_is_rejected_synchronously() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MetadataStore::new(dir.path()));
    let chunker = Chunker::new(&ChunkingConfig::default()).unwrap();
    let pool = Arc::new(WorkerPool::new(1));
    let pipeline = Arc::new(IngestionPipeline::new(
        store.clone(),
        Arc::new(DefaultExtractor::new()),
        chunker,
        CountingEmbedder::new(),
        RecordingIndex::new(),
        SchedulerHandle::current().unwrap(),
    ));
    let service = FileService::new(
        store.clone(),
        RecordingIndex::new(),
        pipeline,
        pool,
        16, // tiny cap
    );

    let err = service
        .accept_upload(USER, "big.txt", "text/plain", b"way more than sixteen bytes")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PayloadTooLarge { .. }));

    // nothing was recorded for the rejected upload
    assert!(store.load(USER).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chunked_upload_session_full_lifecycle() {
    let embedder = CountingEmbedder::new();
    let index = RecordingIndex::new();
    let harness = build_harness(
        Arc::new(DefaultExtractor::new()),
        embedder.clone(),
        index.clone(),
    );

    let text = nine_hundred_chars();
    let (first, second) = text.as_bytes().split_at(text.len() / 2);

    let upload_id = harness
        .sessions
        .start(USER, "big doc.txt", text.len() as u64, "text/plain")
        .await
        .unwrap();

    // the session is visible like any record, parked at `uploading`
    let status = harness.service.get_status(USER, upload_id).await.unwrap();
    assert_eq!(status.status, FileStatus::Uploading);

    let size = harness
        .sessions
        .append_chunk(USER, upload_id, first)
        .await
        .unwrap();
    assert_eq!(size, first.len() as u64);
    let size = harness
        .sessions
        .append_chunk(USER, upload_id, second)
        .await
        .unwrap();
    assert_eq!(size, text.len() as u64);

    let summary = harness.sessions.complete(USER, upload_id).await.unwrap();
    assert_ne!(summary.id, upload_id);

    // the session record is gone once the permanent record exists
    let err = harness.service.get_status(USER, upload_id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    let status = wait_terminal(&harness.service, summary.id).await;
    assert_eq!(status.status, FileStatus::Ready);
    assert_eq!(status.chunk_count, 3);

    // appending to the completed (now permanent, processing/ready) file
    // is rejected as a state error
    let err = harness
        .sessions
        .append_chunk(USER, summary.id, b"more")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UploadState { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_session_leaves_nothing_behind() {
    let harness = build_harness(
        Arc::new(DefaultExtractor::new()),
        CountingEmbedder::new(),
        RecordingIndex::new(),
    );

    let upload_id = harness
        .sessions
        .start(USER, "gone.txt", 100, "text/plain")
        .await
        .unwrap();
    harness
        .sessions
        .append_chunk(USER, upload_id, b"partial")
        .await
        .unwrap();

    harness.sessions.abort(USER, upload_id).await.unwrap();
    assert!(harness.store.load(USER).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_removes_disk_index_and_metadata() {
    let embedder = CountingEmbedder::new();
    let index = RecordingIndex::new();
    let harness = build_harness(
        Arc::new(DefaultExtractor::new()),
        embedder.clone(),
        index.clone(),
    );

    let summary = harness
        .service
        .accept_upload(USER, "doc.txt", "text/plain", nine_hundred_chars().as_bytes())
        .await
        .unwrap();
    wait_terminal(&harness.service, summary.id).await;

    let record = harness.service.get_record(USER, summary.id).await.unwrap();
    assert!(record.path.exists());

    let outcome = harness.service.delete(USER, summary.id).await.unwrap();
    assert!(outcome.fully_deleted(), "outcome: {:?}", outcome);

    assert!(!record.path.exists());
    assert!(index
        .query(USER, summary.id, &[1.0, 0.0, 0.0, 0.0], 5)
        .await
        .unwrap()
        .is_empty());
    let err = harness.service.get_status(USER, summary.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_unknown_file_is_not_found() {
    let harness = build_harness(
        Arc::new(DefaultExtractor::new()),
        CountingEmbedder::new(),
        RecordingIndex::new(),
    );

    let err = harness.service.delete(USER, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_reports_all_files_with_human_sizes() {
    let harness = build_harness(
        Arc::new(DefaultExtractor::new()),
        CountingEmbedder::new(),
        RecordingIndex::new(),
    );

    harness
        .service
        .accept_upload(USER, "one.txt", "text/plain", b"first file")
        .await
        .unwrap();
    harness
        .service
        .accept_upload(USER, "two.txt", "text/plain", b"second file")
        .await
        .unwrap();

    let files = harness.service.list(USER).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, "one.txt");
    assert!(files[0].size.ends_with(" B"));

    // drain so background jobs finish before the temp dir goes away
    let pool = harness.pool.clone();
    tokio::task::spawn_blocking(move || pool.shutdown())
        .await
        .unwrap();
}
