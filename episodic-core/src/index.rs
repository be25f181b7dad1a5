//! Embedding-backed semantic index over prior scene text.
//!
//! The index is advisory memory: retrieval failures degrade generation
//! quality but must never fail the pipeline. The authoritative causal facts
//! live in the continuity store, not here.

use crate::provider::Embedder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const VECTORS_RECORD: &str = "vectors.json";

/// Default number of chunks returned by a search.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// What kind of text a chunk holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    ScriptChunk,
    StoryOverview,
}

/// Metadata attached to every indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Episode the chunk came from (0 = planning stage).
    pub episode: u32,
    /// Position within the batch it was added with.
    pub chunk_index: usize,
    pub kind: ChunkKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    text: String,
    metadata: ChunkMetadata,
    vector: Vec<f32>,
}

/// A ranked search result.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

/// Similarity search over embedded chunks, persisted best-effort to disk.
#[derive(Debug)]
pub struct SemanticIndex<E: Embedder> {
    embedder: E,
    dir: Option<PathBuf>,
    /// `None` means the index is unavailable and needs reprovisioning.
    chunks: Option<Vec<IndexedChunk>>,
}

impl<E: Embedder> SemanticIndex<E> {
    /// Create an ephemeral in-memory index.
    pub fn in_memory(embedder: E) -> Self {
        Self {
            embedder,
            dir: None,
            chunks: Some(Vec::new()),
        }
    }

    /// Open an index persisted under the given directory.
    ///
    /// A missing or unreadable vector file leaves the index unavailable; the
    /// next write reprovisions it empty rather than failing permanently.
    pub async fn open(embedder: E, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(VECTORS_RECORD);

        let chunks = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Vec<IndexedChunk>>(&content) {
                Ok(chunks) => {
                    info!(chunks = chunks.len(), "loaded semantic index from {path:?}");
                    Some(chunks)
                }
                Err(e) => {
                    warn!("semantic index at {path:?} is corrupt, will reprovision: {e}");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(Vec::new()),
            Err(e) => {
                warn!("could not read semantic index at {path:?}, will reprovision: {e}");
                None
            }
        };

        Self {
            embedder,
            dir: Some(dir),
            chunks,
        }
    }

    /// Whether the index is currently usable.
    pub fn available(&self) -> bool {
        self.chunks.is_some()
    }

    /// Recreate an empty index in place of an unavailable one.
    pub fn reconnect(&mut self) {
        info!("reprovisioning semantic index");
        self.chunks = Some(Vec::new());
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embed and index a batch of chunks. Blank chunks are skipped.
    ///
    /// Returns `false` if nothing was indexed — the write is best-effort and
    /// callers must not treat `false` as fatal.
    pub async fn add_chunks(&mut self, chunks: &[String], episode: u32, kind: ChunkKind) -> bool {
        let valid: Vec<String> = chunks
            .iter()
            .filter(|c| !c.trim().is_empty())
            .cloned()
            .collect();
        if valid.is_empty() {
            return false;
        }

        if self.chunks.is_none() {
            self.reconnect();
        }

        let vectors = match self.embedder.embed(&valid).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(episode, "embedding failed, chunks not indexed: {e}");
                return false;
            }
        };

        let Some(entries) = self.chunks.as_mut() else {
            return false;
        };
        for (chunk_index, (text, vector)) in valid.into_iter().zip(vectors).enumerate() {
            entries.push(IndexedChunk {
                text,
                metadata: ChunkMetadata {
                    episode,
                    chunk_index,
                    kind,
                },
                vector,
            });
        }

        info!(episode, total = entries.len(), "indexed chunk batch");
        if !self.flush().await {
            warn!("semantic index not persisted; continuing in memory");
        }
        true
    }

    /// Return up to `k` chunks ranked by cosine similarity to the query.
    ///
    /// Any failure returns an empty result with a logged warning; retrieval
    /// is never fatal to generation.
    pub async fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        let Some(ref entries) = self.chunks else {
            warn!("semantic index unavailable, returning no results");
            return Vec::new();
        };
        if entries.is_empty() || query.trim().is_empty() {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!("query embedding failed, returning no results: {e}");
                return Vec::new();
            }
        };

        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|chunk| ScoredChunk {
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                score: cosine_similarity(&query_vector, &chunk.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Persist the index to disk. Returns `false` on failure (best-effort).
    pub async fn flush(&self) -> bool {
        let Some(dir) = self.dir.as_ref() else {
            // In-memory index, nothing to persist.
            return self.chunks.is_some();
        };
        let Some(entries) = self.chunks.as_ref() else {
            return false;
        };

        let content = match serde_json::to_string(entries) {
            Ok(content) => content,
            Err(e) => {
                warn!("could not serialize semantic index: {e}");
                return false;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("could not create index directory {dir:?}: {e}");
            return false;
        }
        let tmp = dir.join(format!("{VECTORS_RECORD}.tmp"));
        let path = dir.join(VECTORS_RECORD);
        if let Err(e) = tokio::fs::write(&tmp, content).await {
            warn!("could not write semantic index: {e}");
            return false;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!("could not replace semantic index: {e}");
            return false;
        }
        true
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
