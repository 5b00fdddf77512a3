//! # VectorStore
//!
//! Exact nearest-neighbor index over document embeddings.
//!
//! The index stores fixed-dimension `f32` vectors in one flat buffer and pairs
//! every vector with the stable identity of the document it came from. Queries
//! compute the squared Euclidean (L2) distance to every stored vector and return
//! the `k` closest, so results are exact rather than approximate.
//!
//! ## Responsibilities
//! - **Indexing**: appends vectors in insertion order; position `n` is the
//!   `n`-th insert and is never reused.
//! - **Association**: maps identity → position through a `HashMap` and
//!   position → identity through the position-ordered entry list, both O(1).
//! - **Removal**: entries are tombstoned, not compacted. A tombstoned entry keeps
//!   its position and is skipped by every search.
//! - **Persistence**: the whole index round-trips through an opaque `bincode`
//!   blob ([`VectorIndex::save`] / [`VectorIndex::load`]).
//!
//! ## Quick Example
//! ```
//! use docent::vector_store::{EntryMetadata, VectorIndex};
//!
//! # fn main() -> Result<(), docent::error::DocentError> {
//! let mut index = VectorIndex::new(3)?;
//! index.insert("a", vec![1.0, 0.0, 0.0], EntryMetadata::new("agent", "a.txt"))?;
//! index.insert("b", vec![0.0, 1.0, 0.0], EntryMetadata::new("agent", "b.txt"))?;
//! let hits = index.search(&[0.9, 0.1, 0.0], 1)?;
//! assert_eq!(hits[0].identity, "a");
//! # Ok(()) }
//! ```

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{DocentError, Result};

/// Embedding dimension of OpenAI's `text-embedding-3-small`.
pub const DEFAULT_DIMENSION: usize = 1536;

/// Neighbors returned when the caller does not choose `k`.
pub const DEFAULT_TOP_K: usize = 3;

/// Linkage kept next to each vector: who owns the document and what it was called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub agent_id: String,
    pub name: String,
}

impl EntryMetadata {
    pub fn new(agent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
        }
    }
}

/// One slot of the index. The slot's position is its offset in `VectorIndex::entries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub identity: String,
    pub metadata: EntryMetadata,
    /// Tombstone flag.
    pub removed: bool,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub identity: String,
    /// Squared L2 distance to the query.
    pub distance: f32,
    pub position: usize,
}

/// Wire form of the index. `positions` is rebuilt on load.
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    dimension: usize,
    vectors: Vec<f32>,
    entries: Vec<IndexEntry>,
}

/// Exact L2 index keyed by document identity.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    /// Row-major, `entries.len() * dimension` floats.
    vectors: Vec<f32>,
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimension` components.
    ///
    /// # Errors
    /// `InvalidArgument` when `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(DocentError::InvalidArgument(
                "index dimension must be positive".into(),
            ));
        }
        Ok(Self {
            dimension,
            vectors: Vec::new(),
            entries: Vec::new(),
            positions: HashMap::new(),
        })
    }

    /// Load the blob at `path` if it exists, otherwise start empty.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        let mut index = Self::new(dimension)?;
        if path.exists() {
            index.load(path)?;
        } else {
            debug!("No index at {}, starting empty", path.display());
        }
        Ok(index)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of positions ever assigned, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries that searches can still return.
    pub fn live_len(&self) -> usize {
        self.entries.iter().filter(|e| !e.removed).count()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.position_of(identity).is_some()
    }

    /// Position of a live identity.
    pub fn position_of(&self, identity: &str) -> Option<usize> {
        self.positions
            .get(identity)
            .copied()
            .filter(|&p| !self.entries[p].removed)
    }

    /// Identity stored at `position`, tombstoned or not.
    pub fn identity_at(&self, position: usize) -> Option<&str> {
        self.entries.get(position).map(|e| e.identity.as_str())
    }


    /// Append `embedding` under `identity`.
    ///
    /// The new vector takes position `self.len()`. On any error the index is left
    /// exactly as it was.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `embedding.len() != dimension`.
    /// - `InvalidArgument` if a component is NaN or infinite.
    /// - `DuplicateDocument` if `identity` is already live.
    pub fn insert(
        &mut self,
        identity: impl Into<String>,
        embedding: Vec<f32>,
        metadata: EntryMetadata,
    ) -> Result<usize> {
        let identity = identity.into();
        self.check_vector(&embedding)?;
        if self.contains(&identity) {
            return Err(DocentError::DuplicateDocument(identity));
        }

        let position = self.entries.len();
        self.vectors.extend_from_slice(&embedding);
        self.positions.insert(identity.clone(), position);
        self.entries.push(IndexEntry {
            identity,
            metadata,
            removed: false,
        });
        debug!("Indexed vector at position {}", position);
        Ok(position)
    }

    /// The `k` live vectors closest to `query`, nearest first.
    ///
    /// Equal distances keep insertion order. An empty index yields an empty list,
    /// and fewer than `k` live vectors yields all of them.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `query.len() != dimension`.
    /// - `InvalidArgument` if `k == 0` or the query has non-finite components.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_filtered(query, k, |_| true)
    }

    /// Like [`search`](Self::search), restricted to entries whose metadata
    /// satisfies `filter`.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, filter: F) -> Result<Vec<Neighbor>>
    where
        F: Fn(&EntryMetadata) -> bool + Sync,
    {
        self.check_vector(query)?;
        if k == 0 {
            return Err(DocentError::InvalidArgument("k must be positive".into()));
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .par_chunks_exact(self.dimension)
            .zip(self.entries.par_iter())
            .enumerate()
            .filter(|(_, (_, entry))| !entry.removed && filter(&entry.metadata))
            .map(|(position, (vector, _))| (position, squared_l2(query, vector)))
            .collect();

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_distance_then_position);
            scored.truncate(k);
        }
        scored.sort_by(by_distance_then_position);

        Ok(scored
            .into_iter()
            .map(|(position, distance)| Neighbor {
                identity: self.entries[position].identity.clone(),
                distance,
                position,
            })
            .collect())
    }

    /// Tombstone `identity`. Returns `false` if it was not live.
    pub fn remove(&mut self, identity: &str) -> bool {
        match self.position_of(identity) {
            Some(position) => {
                self.entries[position].removed = true;
                true
            }
            None => false,
        }
    }

    /// Tombstone every live entry whose metadata matches. Returns how many were removed.
    pub fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&EntryMetadata) -> bool,
    {
        let mut removed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.removed) {
            if predicate(&entry.metadata) {
                entry.removed = true;
                removed += 1;
            }
        }
        removed
    }

    /// Encode the full index as an opaque blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let snapshot = IndexSnapshot {
            dimension: self.dimension,
            vectors: self.vectors.clone(),
            entries: self.entries.clone(),
        };
        Ok(bincode::serde::encode_to_vec(
            &snapshot,
            bincode::config::standard(),
        )?)
    }

    /// Decode a blob produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (snapshot, _): (IndexSnapshot, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Self::from_snapshot(snapshot)
    }

    /// Write the index to `destination`, replacing any previous file atomically.
    pub fn save(&self, destination: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&bytes)?;
        file.persist(destination).map_err(|e| e.error)?;
        info!(
            "Saved {} vectors to {}",
            self.entries.len(),
            destination.display()
        );
        Ok(())
    }

    /// Replace the in-memory state with the blob at `source`.
    ///
    /// # Errors
    /// `DimensionMismatch` if the blob was written for another dimension;
    /// `Persistence` if it is internally inconsistent. On error `self` is unchanged.
    pub fn load(&mut self, source: &Path) -> Result<()> {
        let bytes = fs::read(source)?;
        let loaded = Self::from_bytes(&bytes)?;
        if loaded.dimension != self.dimension {
            return Err(DocentError::DimensionMismatch {
                expected: self.dimension,
                actual: loaded.dimension,
            });
        }
        info!("Loaded {} vectors from {}", loaded.len(), source.display());
        *self = loaded;
        Ok(())
    }

    fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self> {
        let IndexSnapshot {
            dimension,
            vectors,
            entries,
        } = snapshot;
        if dimension == 0 || entries.len().checked_mul(dimension) != Some(vectors.len()) {
            return Err(DocentError::Persistence(format!(
                "{} floats for {} entries of dimension {}",
                vectors.len(),
                entries.len(),
                dimension
            )));
        }

        // A tombstoned identity may reappear later; at most one slot per identity is live.
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if let Some(&previous) = positions.get(&entry.identity) {
                if !entries[previous].removed {
                    return Err(DocentError::Persistence(format!(
                        "identity {} is live at positions {} and {}",
                        entry.identity, previous, position
                    )));
                }
            }
            positions.insert(entry.identity.clone(), position);
        }

        Ok(Self {
            dimension,
            vectors,
            entries,
            positions,
        })
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(DocentError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(DocentError::InvalidArgument(
                "vector contains NaN or infinite components".into(),
            ));
        }
        Ok(())
    }
}

/// Squared Euclidean distance: `Σ (a[i] - b[i])²`.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn by_distance_then_position(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}
