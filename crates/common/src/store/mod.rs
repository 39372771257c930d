//! Per-user metadata store
//!
//! Durable, crash-tolerant map from file id to [`FileRecord`], persisted
//! as one JSON document per user under the uploads root. All mutations
//! for a given user are serialized by that user's async lock; operations
//! for different users never block each other. Writes go to a temporary
//! file that replaces the document in one rename, so a failed write
//! never leaves a truncated document behind.
//!
//! Unparseable stored content is treated as an empty mapping (logged,
//! never propagated); write failures are retried with a short linear
//! backoff before surfacing as a hard error.

use crate::errors::{AppError, Result};
use crate::types::{FileRecord, RecordPatch};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Name of the per-user metadata document
const METADATA_FILE: &str = "metadata.json";

/// Write attempts before a save is declared failed
const SAVE_MAX_RETRIES: u32 = 3;

/// Base delay between save attempts; grows linearly (100ms, 200ms, ...)
const SAVE_RETRY_BASE: Duration = Duration::from_millis(100);

/// Mapping of file id to record, as stored in one user's document
pub type RecordMap = HashMap<Uuid, FileRecord>;

/// Per-user, per-process metadata store.
///
/// The lock map grows by one entry per distinct user id seen during the
/// process lifetime; acceptable for small user sets.
pub struct MetadataStore {
    uploads_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetadataStore {
    pub fn new(uploads_root: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding one user's stored files and metadata document.
    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.uploads_root.join(user_id)
    }

    fn metadata_path(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join(METADATA_FILE)
    }

    /// Get or lazily create the lock for a specific user.
    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load a user's full record mapping.
    ///
    /// Returns an empty mapping when no document exists yet or when the
    /// stored content cannot be read or parsed; corrupt content is
    /// logged and discarded, never raised.
    pub async fn load(&self, user_id: &str) -> Result<RecordMap> {
        let lock = self.user_lock(user_id).await;
        let path = self.metadata_path(user_id);

        // Hold the lock for the file read only; decode outside it.
        let content = {
            let _guard = lock.lock().await;
            read_document(&path).await
        };

        let Some(content) = content else {
            return Ok(RecordMap::new());
        };
        Ok(parse_document(user_id, &content))
    }

    /// Replace a user's full record mapping.
    ///
    /// Serialization happens before the lock is taken; only the file
    /// write is protected. Exhausting the write retries surfaces a
    /// [`AppError::StoreIo`] and leaves the previous document intact.
    pub async fn save(&self, user_id: &str, records: &RecordMap) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;

        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        self.write_with_retry(user_id, &json).await?;

        debug!(user_id, files = records.len(), "metadata saved");
        Ok(())
    }

    /// Atomically apply a partial update to one file record.
    ///
    /// Merges into an existing record, or creates a new one when the
    /// patch carries the full required field set; a creation attempt
    /// missing required fields fails validation without touching the
    /// document. The whole read-modify-write window runs under the
    /// user's lock.
    #[instrument(skip(self, patch), fields(user_id = %user_id, file_id = %file_id))]
    pub async fn update_record(
        &self,
        user_id: &str,
        file_id: Uuid,
        patch: RecordPatch,
    ) -> Result<FileRecord> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let path = self.metadata_path(user_id);
        let mut records = match read_document(&path).await {
            Some(content) => parse_document(user_id, &content),
            None => RecordMap::new(),
        };

        let now = Utc::now();
        let record = match records.get_mut(&file_id) {
            Some(existing) => {
                patch.apply_to(existing, now);
                existing.clone()
            }
            None => {
                let record = patch.try_into_record(user_id, file_id, now)?;
                debug!(user_id, %file_id, "creating new file record");
                records.insert(file_id, record.clone());
                record
            }
        };

        let json = serde_json::to_string_pretty(&records)?;
        self.write_with_retry(user_id, &json).await?;

        debug!(user_id, %file_id, status = %record.status, "record updated");
        Ok(record)
    }

    /// Remove one file record. A missing id is a no-op, not an error;
    /// existence checks belong to the caller.
    pub async fn delete_record(&self, user_id: &str, file_id: Uuid) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let path = self.metadata_path(user_id);
        let mut records = match read_document(&path).await {
            Some(content) => parse_document(user_id, &content),
            None => return Ok(()),
        };

        if records.remove(&file_id).is_none() {
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&records)?;
        self.write_with_retry(user_id, &json).await?;

        info!(user_id, %file_id, "file record deleted");
        Ok(())
    }

    /// Write the document via a temporary file and rename, retrying on
    /// I/O failure. Must be called with the user's lock held.
    async fn write_with_retry(&self, user_id: &str, json: &str) -> Result<()> {
        let dir = self.user_dir(user_id);
        let path = self.metadata_path(user_id);
        let tmp = path.with_extension("json.tmp");

        let mut last_error = None;
        for attempt in 1..=SAVE_MAX_RETRIES {
            match write_replacing(&dir, &tmp, &path, json).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        user_id,
                        attempt,
                        max_retries = SAVE_MAX_RETRIES,
                        error = %e,
                        "metadata write failed, retrying"
                    );
                    last_error = Some(e);
                    if attempt < SAVE_MAX_RETRIES {
                        tokio::time::sleep(SAVE_RETRY_BASE * attempt).await;
                    }
                }
            }
        }

        Err(AppError::StoreIo {
            user_id: user_id.to_string(),
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown write failure".to_string()),
        })
    }
}

/// Read the raw document, if any. Read failures are folded into "no
/// document" so a transient read error behaves like corrupt content.
async fn read_document(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read metadata document");
            None
        }
    }
}

/// Decode a document, treating empty or corrupt content as empty.
fn parse_document(user_id: &str, content: &str) -> RecordMap {
    if content.trim().is_empty() {
        return RecordMap::new();
    }
    match serde_json::from_str(content) {
        Ok(records) => records,
        Err(e) => {
            warn!(user_id, error = %e, "corrupt metadata document, treating as empty");
            RecordMap::new()
        }
    }
}

async fn write_replacing(
    dir: &Path,
    tmp: &Path,
    path: &Path,
    json: &str,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(tmp, json).await?;
    tokio::fs::rename(tmp, path).await
}
