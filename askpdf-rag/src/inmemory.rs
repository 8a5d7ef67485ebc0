//! In-memory vector index using cosine similarity, with optional snapshots.
//!
//! This module provides [`InMemoryVectorStore`], a vector index backed by a
//! `Vec` protected by a `tokio::sync::RwLock`. When opened with
//! [`InMemoryVectorStore::open`], every mutation is followed by a JSON snapshot
//! written to a temporary file and atomically renamed over the previous one,
//! so a crash never leaves a half-written snapshot behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::document::{CONTENT_HASH_KEY, IndexEntry, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// File name of the snapshot inside the persistence directory.
pub const SNAPSHOT_FILE: &str = "index.json";

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
struct IndexState {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    dimension: Option<usize>,
    entries: &'a [IndexEntry],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

/// An in-memory vector index using cosine similarity for search.
///
/// Entries are kept in insertion order, which is also the tie-break order for
/// equal scores. Queries share a read lock; `add` and `reset` take the write lock.
///
/// # Example
///
/// ```rust,ignore
/// use askpdf_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::open("db_dir").await?;
/// store.add(entries).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    state: RwLock<IndexState>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryVectorStore {
    /// Create a new empty, non-persistent index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a persistent index in `dir`, loading the existing snapshot if present.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Persistence`] if the directory cannot be created or the
    /// snapshot is unreadable, of an unknown version, or internally inconsistent.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            RagError::Persistence(format!("cannot create '{}': {e}", dir.display()))
        })?;
        let path = dir.join(SNAPSHOT_FILE);

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => load_snapshot(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexState::default(),
            Err(e) => {
                return Err(RagError::Persistence(format!(
                    "cannot read '{}': {e}",
                    path.display()
                )));
            }
        };

        info!(path = %path.display(), entries = state.entries.len(), "opened vector index");
        Ok(Self { state: RwLock::new(state), snapshot_path: Some(path) })
    }

    /// Location of the snapshot file, if persistence is enabled.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    async fn persist(&self, state: &IndexState) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            dimension: state.dimension,
            entries: &state.entries,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        let write = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, path).await
        };
        write.await.map_err(|e| {
            RagError::Persistence(format!("cannot write snapshot '{}': {e}", path.display()))
        })?;

        debug!(path = %path.display(), bytes = bytes.len(), "wrote index snapshot");
        Ok(())
    }
}

fn load_snapshot(path: &Path, bytes: &[u8]) -> Result<IndexState> {
    let snapshot: Snapshot = serde_json::from_slice(bytes).map_err(|e| {
        RagError::Persistence(format!("corrupt snapshot '{}': {e}", path.display()))
    })?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(RagError::Persistence(format!(
            "unsupported snapshot version {} in '{}'",
            snapshot.version,
            path.display()
        )));
    }
    if let Some(dimension) = snapshot.dimension {
        if snapshot.entries.iter().any(|e| e.embedding.len() != dimension) {
            return Err(RagError::Persistence(format!(
                "snapshot '{}' mixes embedding dimensions",
                path.display()
            )));
        }
    } else if !snapshot.entries.is_empty() {
        return Err(RagError::Persistence(format!(
            "snapshot '{}' has entries but no dimension",
            path.display()
        )));
    }
    Ok(IndexState { dimension: snapshot.dimension, entries: snapshot.entries })
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute cosine similarity between two vectors.
///
/// Both vectors are L2-normalized before computing the dot product.
/// Returns 0.0 if either vector has zero (or non-finite) magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    similarity_with_norm(a, l2_norm(a), b)
}

fn similarity_with_norm(a: &[f32], norm_a: f32, b: &[f32]) -> f32 {
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        return 0.0;
    }
    // Normalise each side separately; the product of two tiny norms can underflow.
    let dot: f32 = a.iter().zip(b).map(|(x, y)| (x / norm_a) * (y / norm_b)).sum();
    dot.clamp(-1.0, 1.0)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let Some(first) = entries.first() else {
            return Ok(());
        };

        let mut state = self.state.write().await;
        let expected = state.dimension.unwrap_or(first.embedding.len());
        if expected == 0 {
            return Err(RagError::Validation("embeddings must not be empty".to_string()));
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != expected) {
            error!(expected, actual = bad.embedding.len(), chunk.id = %bad.chunk.id, "dimension mismatch");
            return Err(RagError::DimensionMismatch { expected, actual: bad.embedding.len() });
        }

        let previous_len = state.entries.len();
        let previous_dimension = state.dimension;
        let added = entries.len();
        state.dimension = Some(expected);
        state.entries.extend(entries);

        if let Err(e) = self.persist(&state).await {
            error!(error = %e, "snapshot failed, rolling back add");
            state.entries.truncate(previous_len);
            state.dimension = previous_dimension;
            return Err(e);
        }

        debug!(added, total = state.entries.len(), "added index entries");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(RagError::Validation("k must be greater than zero".to_string()));
        }

        let state = self.state.read().await;
        let Some(dimension) = state.dimension else {
            return Ok(Vec::new());
        };
        if vector.len() != dimension {
            return Err(RagError::DimensionMismatch { expected: dimension, actual: vector.len() });
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<(usize, f32)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, similarity_with_norm(vector, query_norm, &entry.embedding)))
            .collect();

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { entry: state.entries[i].clone(), score })
            .collect())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.entries.is_empty() && state.dimension.is_none() {
            return Ok(());
        }
        let previous = std::mem::take(&mut *state);
        if let Err(e) = self.persist(&state).await {
            error!(error = %e, "snapshot failed, rolling back reset");
            *state = previous;
            return Err(e);
        }
        info!(removed = previous.entries.len(), "vector index reset");
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    async fn dimensions(&self) -> Option<usize> {
        self.state.read().await.dimension
    }

    async fn contains_content_hash(&self, hash: &str) -> bool {
        self.state
            .read()
            .await
            .entries
            .iter()
            .any(|e| e.chunk.metadata.get(CONTENT_HASH_KEY).is_some_and(|h| h == hash))
    }
}
