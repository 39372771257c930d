//! File service
//!
//! The outward surface the HTTP layer consumes: accept an upload, poll
//! status, list files, fetch a record for download, delete. Uploads are
//! written to the owner's directory under a sanitized,
//! collision-resistant name and handed to the background pipeline; all
//! later progress is observed by polling the metadata record.

use crate::executor::WorkerPool;
use crate::pipeline::{IngestionJob, IngestionPipeline};
use chrono::Utc;
use docvault_common::errors::{AppError, Result};
use docvault_common::store::MetadataStore;
use docvault_common::types::{FileRecord, FileStatus, FileSummary, RecordPatch, StatusReport};
use docvault_common::VectorIndex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Result of one step of a best-effort delete
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "message")]
pub enum StepOutcome {
    Done,
    Failed(String),
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, StepOutcome::Done)
    }
}

/// Per-resource results of a delete.
///
/// Deletion touches disk, vector index, and metadata independently;
/// each step is attempted regardless of the others, and sub-failures
/// are reported here instead of disappearing into logs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub disk: StepOutcome,
    pub index: StepOutcome,
    pub metadata: StepOutcome,
}

impl DeleteOutcome {
    pub fn fully_deleted(&self) -> bool {
        self.disk.is_done() && self.index.is_done() && self.metadata.is_done()
    }
}

/// Library surface for file upload, status, listing, and deletion.
pub struct FileService {
    store: Arc<MetadataStore>,
    index: Arc<dyn VectorIndex>,
    pipeline: Arc<IngestionPipeline>,
    pool: Arc<WorkerPool>,
    max_file_size: u64,
}

impl FileService {
    pub fn new(
        store: Arc<MetadataStore>,
        index: Arc<dyn VectorIndex>,
        pipeline: Arc<IngestionPipeline>,
        pool: Arc<WorkerPool>,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            index,
            pipeline,
            pool,
            max_file_size,
        }
    }

    /// Accept a single-shot upload and queue it for processing.
    ///
    /// The record's size is taken from disk after the write, never from
    /// the caller. Returns once the job is queued; processing outcome is
    /// observed via [`get_status`](Self::get_status).
    #[instrument(skip(self, content), fields(user_id = %user_id, name = %original_name))]
    pub async fn accept_upload(
        &self,
        user_id: &str,
        original_name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<FileSummary> {
        if content.len() as u64 > self.max_file_size {
            return Err(AppError::PayloadTooLarge {
                size: content.len() as u64,
                limit: self.max_file_size,
            });
        }

        let file_id = Uuid::new_v4();
        let stored_name = format!("{}__{}", file_id, sanitize_filename(original_name));
        let user_dir = self.store.user_dir(user_id);
        tokio::fs::create_dir_all(&user_dir).await?;
        let path = user_dir.join(&stored_name);
        tokio::fs::write(&path, content).await?;
        let size = tokio::fs::metadata(&path).await?.len();

        let patch = RecordPatch {
            id: Some(file_id),
            name: Some(original_name.to_string()),
            stored_name: Some(stored_name),
            path: Some(path.clone()),
            size: Some(size),
            mime_type: Some(mime_type.to_string()),
            status: Some(FileStatus::Processing),
            uploaded_at: Some(Utc::now()),
            ..Default::default()
        };
        let record = self.store.update_record(user_id, file_id, patch).await?;

        self.submit_job(IngestionJob {
            user_id: user_id.to_string(),
            file_id,
            path,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
        })?;

        info!(%file_id, size, "Upload accepted and queued");
        Ok(FileSummary::from_record(&record))
    }

    /// Queue a processing job on the worker pool.
    pub(crate) fn submit_job(&self, job: IngestionJob) -> Result<()> {
        let pipeline = self.pipeline.clone();
        self.pool.submit(move || pipeline.process(&job))
    }

    /// Current processing status of one file, or not-found.
    pub async fn get_status(&self, user_id: &str, file_id: Uuid) -> Result<StatusReport> {
        let records = self.store.load(user_id).await?;
        records
            .get(&file_id)
            .map(StatusReport::from_record)
            .ok_or_else(|| AppError::file_not_found(file_id.to_string()))
    }

    /// Full record for one file (e.g. to serve a download), or not-found.
    pub async fn get_record(&self, user_id: &str, file_id: Uuid) -> Result<FileRecord> {
        let records = self.store.load(user_id).await?;
        records
            .get(&file_id)
            .cloned()
            .ok_or_else(|| AppError::file_not_found(file_id.to_string()))
    }

    /// All of a user's files, oldest upload first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<FileSummary>> {
        let records = self.store.load(user_id).await?;
        let mut records: Vec<&FileRecord> = records.values().collect();
        records.sort_by_key(|r| r.uploaded_at);
        Ok(records.iter().map(|r| FileSummary::from_record(r)).collect())
    }

    /// Best-effort delete of a file's disk content, index entries, and
    /// metadata record.
    ///
    /// An unknown file id is an error; past that point every step is
    /// attempted and its individual result reported, so a failed index
    /// cleanup still lets the metadata record go.
    #[instrument(skip(self), fields(user_id = %user_id, file_id = %file_id))]
    pub async fn delete(&self, user_id: &str, file_id: Uuid) -> Result<DeleteOutcome> {
        let records = self.store.load(user_id).await?;
        let record = records
            .get(&file_id)
            .cloned()
            .ok_or_else(|| AppError::file_not_found(file_id.to_string()))?;

        let disk = match tokio::fs::remove_file(&record.path).await {
            Ok(()) => StepOutcome::Done,
            // Already gone counts as deleted.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::Done,
            Err(e) => {
                warn!(error = %e, path = %record.path.display(), "Failed to remove stored file");
                StepOutcome::Failed(e.to_string())
            }
        };

        let index = match self.index.delete(user_id, file_id).await {
            Ok(_) => StepOutcome::Done,
            Err(e) => {
                warn!(error = %e, "Failed to remove index entries");
                StepOutcome::Failed(e.to_string())
            }
        };

        let metadata = match self.store.delete_record(user_id, file_id).await {
            Ok(()) => StepOutcome::Done,
            Err(e) => {
                warn!(error = %e, "Failed to remove metadata record");
                StepOutcome::Failed(e.to_string())
            }
        };

        let outcome = DeleteOutcome {
            disk,
            index,
            metadata,
        };
        if outcome.fully_deleted() {
            info!("File deleted");
        } else {
            warn!(outcome = ?outcome, "File deleted with partial failures");
        }
        Ok(outcome)
    }
}

/// Sanitize a user-supplied filename for storage.
///
/// Keeps only the basename (no traversal), replaces reserved and
/// control characters, collapses underscore runs, caps the stem at 100
/// characters, and lowercases the extension. Degenerate names fall back
/// to a timestamped placeholder.
pub fn sanitize_filename(filename: &str) -> String {
    if filename.is_empty() {
        return "unnamed_file".to_string();
    }

    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let (stem, ext) = split_extension(base);

    let mut cleaned = String::new();
    let mut prev_underscore = false;
    for ch in stem.chars() {
        let mapped = if matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
            || (ch as u32) < 0x20
        {
            '_'
        } else {
            ch
        };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        cleaned.push(mapped);
    }

    let mut stem: String = cleaned.trim_matches([' ', '.', '_']).to_string();
    if stem.chars().count() > 100 {
        stem = stem.chars().take(100).collect();
    }
    let ext = ext.to_lowercase();

    if stem.is_empty() {
        format!("file_{}{}", Utc::now().timestamp(), ext)
    } else {
        format!("{}{}", stem, ext)
    }
}

/// Split `name.ext` into stem and dot-prefixed extension (empty when
/// there is none or the name is all extension).
fn split_extension(name: &str) -> (&str, String) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], name[pos..].to_string()),
        _ => (name, String::new()),
    }
}
