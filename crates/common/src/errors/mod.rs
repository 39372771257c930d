//! Error types for DocVault services
//!
//! One central error enum for the shared library, with distinct variants
//! for the failure modes the ingestion core distinguishes: validation,
//! metadata persistence, embedding, vector index, and lifecycle misuse.

use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Cannot create record {file_id}: missing required fields: {fields:?}")]
    MissingFields {
        file_id: String,
        fields: Vec<&'static str>,
    },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Lifecycle errors
    #[error("Upload session {id} is not accepting chunks (status: {status})")]
    UploadState { id: String, status: String },

    // Metadata persistence errors
    #[error("Metadata store I/O error for user {user_id}: {message}")]
    StoreIo { user_id: String, message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    #[error("Vector index error: {message}")]
    Index { message: String },

    // Runtime plumbing errors
    #[error("Scheduler unavailable: {message}")]
    Scheduler { message: String },

    #[error("Worker pool error: {message}")]
    WorkerPool { message: String },

    // Internal errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Shorthand for a validation failure with a plain message.
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a file-record lookup miss.
    pub fn file_not_found(id: impl Into<String>) -> Self {
        AppError::NotFound {
            resource_type: "file".to_string(),
            id: id.into(),
        }
    }

    /// True for errors a client caused (bad input, unknown id, wrong state).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::MissingFields { .. }
                | AppError::PayloadTooLarge { .. }
                | AppError::NotFound { .. }
                | AppError::UploadState { .. }
        )
    }
}
