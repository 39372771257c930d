//! Text chunking module
//!
//! Splits text into bounded, overlapping chunks by recursively working
//! through a separator hierarchy, from paragraph breaks down to single
//! spaces, with fixed-stride slicing as the last resort for unbreakable
//! runs. All sizes are measured in characters, not bytes.

use docvault_common::config::ChunkingConfig;
use docvault_common::errors::{AppError, Result};
use docvault_common::types::Chunk;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Split hierarchy, coarsest to finest. The empty separator means
/// "split anywhere" and falls through to fixed-stride slicing.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Recursive separator-hierarchy chunker.
///
/// Deterministic for identical inputs, except for the freshly generated
/// chunk ids.
#[derive(Debug)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Chunker {
    /// Build a chunker from configuration.
    ///
    /// `chunk_overlap >= chunk_size` would make the slicing stride
    /// non-positive and is rejected outright rather than clamped.
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(AppError::validation("chunk_size must be greater than zero"));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(AppError::validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Replace the separator hierarchy (coarsest first).
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Split `text` into tagged chunks.
    ///
    /// Empty or whitespace-only input yields no chunks. Duplicate chunk
    /// texts (exact match after trimming) are dropped, first occurrence
    /// kept.
    pub fn chunk(&self, text: &str, page: Option<u32>, file_id: Uuid) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut pieces = Vec::new();
        let separators: Vec<&str> = self.separators.iter().map(|s| s.as_str()).collect();
        self.split_level(text, &separators, &mut pieces);

        // Deduplicate trimmed texts, preserving first-seen order, and
        // drop anything that trims away to nothing.
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();
        for piece in pieces {
            let trimmed = piece.trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
                continue;
            }
            chunks.push(Chunk::new(trimmed.to_string(), page, file_id));
        }

        debug!(
            input_len = text.len(),
            chunk_count = chunks.len(),
            chunk_size = self.chunk_size,
            "text chunked"
        );
        chunks
    }

    fn split_level(&self, text: &str, separators: &[&str], out: &mut Vec<String>) {
        let text_len = char_len(text);
        if separators.is_empty() || text_len <= self.chunk_size {
            self.slice_fixed(text, out);
            return;
        }

        let sep = separators[0];
        let finer = &separators[1..];
        if sep.is_empty() {
            // "Split anywhere" is exactly fixed-stride slicing.
            self.slice_fixed(text, out);
            return;
        }
        let sep_len = char_len(sep);

        let mut current = String::new();
        let mut current_len = 0usize;

        for part in text.split(sep).filter(|p| !p.is_empty()) {
            let part_len = char_len(part);
            let joined_len = part_len + if current.is_empty() { 0 } else { sep_len };

            if current_len + joined_len <= self.chunk_size {
                if !current.is_empty() {
                    current.push_str(sep);
                }
                current.push_str(part);
                current_len += joined_len;
                continue;
            }

            // Flush the buffer and seed the next one with its tail so
            // local context survives the chunk boundary.
            if !current.is_empty() {
                let tail = tail_chars(&current, self.chunk_overlap);
                out.push(std::mem::replace(&mut current, tail));
                current_len = char_len(&current);
            }

            if part_len > self.chunk_size {
                // The part alone is too big; break it with the finer
                // separators and start the next buffer from scratch.
                self.split_level(part, finer, out);
                current.clear();
                current_len = 0;
            } else if !current.is_empty() && current_len + sep_len + part_len <= self.chunk_size {
                current.push_str(sep);
                current.push_str(part);
                current_len += sep_len + part_len;
            } else {
                current = part.to_string();
                current_len = part_len;
            }
        }

        if !current.trim().is_empty() {
            out.push(current);
        }
    }

    /// Last-resort slicing with stride `chunk_size - chunk_overlap`.
    fn slice_fixed(&self, text: &str, out: &mut Vec<String>) {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return;
        }
        let stride = self.chunk_size - self.chunk_overlap;
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                out.push(piece);
            }
            start += stride;
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s` (all of it when shorter).
fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let len = char_len(s);
    s.chars().skip(len.saturating_sub(n)).collect()
}
