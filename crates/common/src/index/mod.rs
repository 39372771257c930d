//! Vector index abstraction
//!
//! The index stores embedded chunks scoped per (user, file) and answers
//! similarity queries. Production deployments back this with an external
//! vector database; [`MemoryVectorIndex`] is the in-process
//! cosine-distance implementation used by tests and the local CLI.

use crate::errors::Result;
use crate::types::Chunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Metadata stored alongside each indexed chunk, for filtering
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_id: Uuid,
    pub page: Option<u32>,
    pub chunk_index: usize,
    pub size: usize,
}

/// One ranked similarity hit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryMatch {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

/// Trait for vector index operations, scoped per user and file
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store embedded chunks; returns the number actually stored.
    /// Chunks without a usable embedding are not indexed.
    async fn upsert(&self, user_id: &str, file_id: Uuid, chunks: &[Chunk]) -> Result<usize>;

    /// Remove all chunks for a file; returns whether anything was removed.
    async fn delete(&self, user_id: &str, file_id: Uuid) -> Result<bool>;

    /// Rank the stored chunks of one file against a query vector.
    async fn query(
        &self,
        user_id: &str,
        file_id: Uuid,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>>;
}

struct IndexedChunk {
    text: String,
    embedding: Vec<f32>,
    metadata: ChunkMetadata,
}

/// In-process vector index keyed by (user, file)
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<(String, Uuid), Vec<IndexedChunk>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, user_id: &str, file_id: Uuid, chunks: &[Chunk]) -> Result<usize> {
        let entries: Vec<IndexedChunk> = chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let embedding = chunk.embedding.as_ref()?;
                if embedding.is_empty() {
                    return None;
                }
                Some(IndexedChunk {
                    text: chunk.text.clone(),
                    embedding: embedding.clone(),
                    metadata: ChunkMetadata {
                        file_id,
                        page: chunk.page,
                        chunk_index: i,
                        size: chunk.text.len(),
                    },
                })
            })
            .collect();

        let stored = entries.len();
        let mut collections = self.collections.write().await;
        collections.insert((user_id.to_string(), file_id), entries);

        debug!(user_id, %file_id, stored, "chunks indexed");
        Ok(stored)
    }

    async fn delete(&self, user_id: &str, file_id: Uuid) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .remove(&(user_id.to_string(), file_id))
            .is_some())
    }

    async fn query(
        &self,
        user_id: &str,
        file_id: Uuid,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let collections = self.collections.read().await;
        let Some(entries) = collections.get(&(user_id.to_string(), file_id)) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<QueryMatch> = entries
            .iter()
            .map(|entry| QueryMatch {
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
                distance: cosine_distance(vector, &entry.embedding),
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

/// Cosine distance in [0, 2]; degenerate vectors score maximally distant.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
