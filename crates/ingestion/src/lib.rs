//! DocVault Ingestion Service
//!
//! Turns an uploaded file into queryable chunks in the background:
//! 1. Extracts text from the stored file
//! 2. Splits it into overlapping chunks
//! 3. Embeds each chunk
//! 4. Upserts the chunks into the vector index
//! 5. Records the outcome on the file's metadata record
//!
//! The HTTP layer stays outside this crate; it consumes [`FileService`]
//! and the status fields the pipeline writes through the metadata store.

pub mod chunker;
pub mod executor;
pub mod extract;
pub mod pipeline;
pub mod service;
pub mod upload;

pub use chunker::Chunker;
pub use executor::{SchedulerHandle, WorkerPool};
pub use extract::{DefaultExtractor, ExtractionError, TextExtractor};
pub use pipeline::{IngestionJob, IngestionPipeline};
pub use service::{DeleteOutcome, FileService, StepOutcome};
pub use upload::UploadSessionManager;
