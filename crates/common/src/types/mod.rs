//! Core data types for the ingestion lifecycle
//!
//! A [`FileRecord`] is the durable metadata describing one uploaded file;
//! it moves through the [`FileStatus`] state machine as the background
//! pipeline works on it. A [`Chunk`] is the ephemeral unit of embedding
//! and indexing and never enters the metadata store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Processing status of an uploaded file.
///
/// `uploading → processing → ready` on the success path,
/// `processing → error` on failure. Terminal states are only left by
/// deleting the record outright.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl FileStatus {
    /// Check if the status is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Ready | FileStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploading => "uploading",
            FileStatus::Processing => "processing",
            FileStatus::Ready => "ready",
            FileStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted metadata for one uploaded file.
///
/// One entry per file in the owning user's metadata document. `size` is
/// the authoritative on-disk byte count taken after the write, never the
/// client-declared size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub user_id: String,
    /// Original filename as supplied by the user (untrusted).
    pub name: String,
    /// Sanitized, collision-resistant name used on disk: `{id}__{sanitized(name)}`.
    pub stored_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: String,
    pub status: FileStatus,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// Refreshed on every mutation through the store.
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub image_count: usize,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

/// Partial update applied to a [`FileRecord`] through the metadata store.
///
/// For an existing record, `Some` fields are merged in. For a new file id
/// the patch must carry the full required field set (id, name,
/// stored_name, path, size, mime_type, status, uploaded_at); anything
/// less is a validation error, never a persisted partial record.
#[derive(Clone, Debug, Default)]
pub struct RecordPatch {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub stored_name: Option<String>,
    pub path: Option<PathBuf>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub status: Option<FileStatus>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub chunk_count: Option<usize>,
    pub image_count: Option<usize>,
    pub embedding_model: Option<String>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: FileStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn chunk_count(mut self, count: usize) -> Self {
        self.chunk_count = Some(count);
        self
    }

    pub fn processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.processed_at = Some(at);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Fields required before a patch may create a brand-new record.
    pub fn missing_for_create(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.id.is_none() {
            missing.push("id");
        }
        if self.name.is_none() {
            missing.push("name");
        }
        if self.stored_name.is_none() {
            missing.push("stored_name");
        }
        if self.path.is_none() {
            missing.push("path");
        }
        if self.size.is_none() {
            missing.push("size");
        }
        if self.mime_type.is_none() {
            missing.push("mime_type");
        }
        if self.status.is_none() {
            missing.push("status");
        }
        if self.uploaded_at.is_none() {
            missing.push("uploaded_at");
        }
        missing
    }

    /// Build a complete record from a creation patch, or fail with the
    /// list of missing required fields.
    pub fn try_into_record(
        self,
        user_id: &str,
        file_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FileRecord, crate::errors::AppError> {
        let missing = self.missing_for_create();
        match (
            self.id,
            self.name,
            self.stored_name,
            self.path,
            self.size,
            self.mime_type,
            self.status,
            self.uploaded_at,
        ) {
            (
                Some(id),
                Some(name),
                Some(stored_name),
                Some(path),
                Some(size),
                Some(mime_type),
                Some(status),
                Some(uploaded_at),
            ) => Ok(FileRecord {
                id,
                user_id: user_id.to_string(),
                name,
                stored_name,
                path,
                size,
                mime_type,
                status,
                uploaded_at,
                processed_at: self.processed_at,
                last_updated: now,
                error: self.error,
                chunk_count: self.chunk_count.unwrap_or(0),
                image_count: self.image_count.unwrap_or(0),
                embedding_model: self.embedding_model,
            }),
            _ => Err(crate::errors::AppError::MissingFields {
                file_id: file_id.to_string(),
                fields: missing,
            }),
        }
    }

    /// Merge `Some` fields into an existing record, refreshing `last_updated`.
    pub fn apply_to(self, record: &mut FileRecord, now: DateTime<Utc>) {
        if let Some(id) = self.id {
            record.id = id;
        }
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(stored_name) = self.stored_name {
            record.stored_name = stored_name;
        }
        if let Some(path) = self.path {
            record.path = path;
        }
        if let Some(size) = self.size {
            record.size = size;
        }
        if let Some(mime_type) = self.mime_type {
            record.mime_type = mime_type;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(uploaded_at) = self.uploaded_at {
            record.uploaded_at = uploaded_at;
        }
        if let Some(processed_at) = self.processed_at {
            record.processed_at = Some(processed_at);
        }
        if let Some(error) = self.error {
            record.error = Some(error);
        }
        if let Some(chunk_count) = self.chunk_count {
            record.chunk_count = chunk_count;
        }
        if let Some(image_count) = self.image_count {
            record.image_count = image_count;
        }
        if let Some(embedding_model) = self.embedding_model {
            record.embedding_model = Some(embedding_model);
        }
        record.last_updated = now;
    }
}

/// A bounded text segment derived from a document, the unit of embedding
/// and indexing. Lives only for the duration of one ingestion job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub text: String,
    pub page: Option<u32>,
    pub source_file_id: Uuid,
    /// Unset until the embed stage runs; an empty vector marks a chunk
    /// that was skipped for having no embeddable text.
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(text: String, page: Option<u32>, source_file_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            page,
            source_file_id,
            embedding: None,
        }
    }
}

/// Listing view of a file, sized for humans.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: Uuid,
    pub name: String,
    pub size: String,
    pub status: FileStatus,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileSummary {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            size: human_size(record.size),
            status: record.status,
            mime_type: record.mime_type.clone(),
            error: if record.status == FileStatus::Error {
                record.error.clone()
            } else {
                None
            },
        }
    }
}

/// Status view of a file, polled by callers while the pipeline runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub id: Uuid,
    pub status: FileStatus,
    pub error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub chunk_count: usize,
    pub image_count: usize,
}

impl StatusReport {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            error: record.error.clone(),
            uploaded_at: record.uploaded_at,
            processed_at: record.processed_at,
            chunk_count: record.chunk_count,
            image_count: record.image_count,
        }
    }
}

/// Convert a byte count to a human readable size like "1.9 MB".
pub fn human_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
