//! DocVault Common Library
//!
//! Shared code for the DocVault services including:
//! - Core data types (file records, chunks, status lifecycle)
//! - Per-user metadata store with locking and retry
//! - Embedding client abstraction
//! - Vector index abstraction
//! - Error types and handling
//! - Configuration management

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod index;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use index::VectorIndex;
pub use store::MetadataStore;
pub use types::{Chunk, FileRecord, FileStatus, RecordPatch};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
