//! Chunked upload sessions
//!
//! Large files arrive in pieces: `start` opens a session whose record
//! sits at `uploading` and whose bytes accumulate in a `.part` file,
//! `append_chunk` grows it, and `complete` renames it into its final
//! sanitized location, mints the permanent `processing` record, and
//! hands the file to the background pipeline. The session shares the
//! metadata store with single-shot uploads, so an in-flight session is
//! visible to listings like any other record.

use crate::executor::WorkerPool;
use crate::pipeline::{IngestionJob, IngestionPipeline};
use crate::service::sanitize_filename;
use chrono::Utc;
use docvault_common::errors::{AppError, Result};
use docvault_common::store::MetadataStore;
use docvault_common::types::{FileRecord, FileStatus, FileSummary, RecordPatch};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct UploadSessionManager {
    store: Arc<MetadataStore>,
    pipeline: Arc<IngestionPipeline>,
    pool: Arc<WorkerPool>,
    max_file_size: u64,
}

impl UploadSessionManager {
    pub fn new(
        store: Arc<MetadataStore>,
        pipeline: Arc<IngestionPipeline>,
        pool: Arc<WorkerPool>,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            pipeline,
            pool,
            max_file_size,
        }
    }

    /// Open an upload session. The declared size is checked against the
    /// cap up front so an obviously oversized upload never starts.
    #[instrument(skip(self), fields(user_id = %user_id, name = %filename))]
    pub async fn start(
        &self,
        user_id: &str,
        filename: &str,
        total_size: u64,
        mime_type: &str,
    ) -> Result<Uuid> {
        if total_size > self.max_file_size {
            return Err(AppError::PayloadTooLarge {
                size: total_size,
                limit: self.max_file_size,
            });
        }

        let upload_id = Uuid::new_v4();
        let user_dir = self.store.user_dir(user_id);
        tokio::fs::create_dir_all(&user_dir).await?;
        let part_name = format!("{}.part", upload_id);
        let part_path = user_dir.join(&part_name);
        tokio::fs::write(&part_path, b"").await?;

        let patch = RecordPatch {
            id: Some(upload_id),
            name: Some(filename.to_string()),
            stored_name: Some(part_name),
            path: Some(part_path),
            size: Some(0),
            mime_type: Some(mime_type.to_string()),
            status: Some(FileStatus::Uploading),
            uploaded_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store.update_record(user_id, upload_id, patch).await?;

        info!(%upload_id, total_size, "Upload session started");
        Ok(upload_id)
    }

    /// Append bytes to an open session; returns the new on-disk size.
    ///
    /// Rejected unless the session is still `uploading`, and the cap is
    /// enforced as the partial file grows, not just on the declared
    /// total.
    pub async fn append_chunk(
        &self,
        user_id: &str,
        upload_id: Uuid,
        bytes: &[u8],
    ) -> Result<u64> {
        let record = self.session_record(user_id, upload_id).await?;

        if record.size + bytes.len() as u64 > self.max_file_size {
            return Err(AppError::PayloadTooLarge {
                size: record.size + bytes.len() as u64,
                limit: self.max_file_size,
            });
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&record.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        let size = tokio::fs::metadata(&record.path).await?.len();
        self.store
            .update_record(user_id, upload_id, RecordPatch::new().size(size))
            .await?;
        Ok(size)
    }

    /// Seal the session: move the assembled file into place, create the
    /// permanent record, drop the session record, and queue processing.
    #[instrument(skip(self), fields(user_id = %user_id, upload_id = %upload_id))]
    pub async fn complete(&self, user_id: &str, upload_id: Uuid) -> Result<FileSummary> {
        let session = self.session_record(user_id, upload_id).await?;

        let file_id = Uuid::new_v4();
        let stored_name = format!("{}__{}", file_id, sanitize_filename(&session.name));
        let final_path = self.store.user_dir(user_id).join(&stored_name);
        tokio::fs::rename(&session.path, &final_path).await?;
        let size = tokio::fs::metadata(&final_path).await?.len();

        let patch = RecordPatch {
            id: Some(file_id),
            name: Some(session.name.clone()),
            stored_name: Some(stored_name),
            path: Some(final_path.clone()),
            size: Some(size),
            mime_type: Some(session.mime_type.clone()),
            status: Some(FileStatus::Processing),
            uploaded_at: Some(session.uploaded_at),
            ..Default::default()
        };
        let record = self.store.update_record(user_id, file_id, patch).await?;
        self.store.delete_record(user_id, upload_id).await?;

        let pipeline = self.pipeline.clone();
        let job = IngestionJob {
            user_id: user_id.to_string(),
            file_id,
            path: final_path,
            original_name: session.name,
            mime_type: session.mime_type,
        };
        self.pool.submit(move || pipeline.process(&job))?;

        info!(%file_id, size, "Upload session completed and queued");
        Ok(FileSummary::from_record(&record))
    }

    /// Drop an unfinished session and its partial file.
    pub async fn abort(&self, user_id: &str, upload_id: Uuid) -> Result<()> {
        let session = self.session_record(user_id, upload_id).await?;

        if let Err(e) = tokio::fs::remove_file(&session.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove partial upload file");
            }
        }
        self.store.delete_record(user_id, upload_id).await?;

        info!(%upload_id, "Upload session aborted");
        Ok(())
    }

    /// Fetch a session record, insisting it is still `uploading`.
    async fn session_record(&self, user_id: &str, upload_id: Uuid) -> Result<FileRecord> {
        let records = self.store.load(user_id).await?;
        let record = records
            .get(&upload_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound {
                resource_type: "upload session".to_string(),
                id: upload_id.to_string(),
            })?;
        if record.status != FileStatus::Uploading {
            return Err(AppError::UploadState {
                id: upload_id.to_string(),
                status: record.status.to_string(),
            });
        }
        Ok(record)
    }
}
