//! IVF (inverted file) index over the symptom vocabulary.
//!
//! A snapshot is immutable once built. The engine publishes a new snapshot
//! on rebuild and readers holding the previous `Arc` keep querying it.
//!
//! Small populations (fewer records than `lists`) produce a flat snapshot
//! that always answers with an exact linear scan.

use std::cmp::Ordering;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::IndexError;
use crate::storage::VectorRecord;
use crate::vector::{
    ClusterId, VectorDimension, assign_to_nearest_centroid, cosine_similarity, kmeans_clustering,
};

/// Default number of partitions (`lists` in ivfflat terms).
pub const DEFAULT_LISTS: usize = 100;

/// Default number of partitions probed per query.
pub const DEFAULT_PROBES: usize = 1;

/// Build parameters for an [`IndexSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    /// Number of k-means partitions.
    pub lists: usize,
    /// Partitions scanned per query.
    pub probes: usize,
    /// Seed for k-means++ initialisation.
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            lists: DEFAULT_LISTS,
            probes: DEFAULT_PROBES,
            seed: 42,
        }
    }
}

/// One `(label, similarity)` hit.
pub type IndexHit = (String, f32);

#[derive(Debug, Clone)]
struct IndexEntry {
    label: String,
    vector: Vec<f32>,
}

/// Immutable, queryable IVF snapshot.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    entries: Vec<IndexEntry>,

    /// Unit-length centroids; empty for flat snapshots.
    centroids: Vec<Vec<f32>>,

    /// Entry positions per centroid.
    partitions: Vec<Vec<usize>>,

    dimension: VectorDimension,
    probes: usize,

    /// Store generation this snapshot was built from.
    generation: u64,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    /// An empty index. Every query returns no hits.
    #[must_use]
    pub fn empty(dimension: VectorDimension) -> Self {
        Self {
            entries: Vec::new(),
            centroids: Vec::new(),
            partitions: Vec::new(),
            dimension,
            probes: DEFAULT_PROBES,
            generation: 0,
            built_at: Utc::now(),
        }
    }

    /// Builds a snapshot from a point-in-time copy of the store.
    ///
    /// # Algorithm
    /// 1. Validates every vector against `dimension`
    /// 2. Population below `params.lists`: flat snapshot, no clustering
    /// 3. Otherwise runs k-means with `k = params.lists` and buckets entries
    ///    by nearest centroid
    pub fn build(
        records: impl IntoIterator<Item = VectorRecord>,
        dimension: VectorDimension,
        params: IndexParams,
        generation: u64,
        deadline: Option<Instant>,
    ) -> Result<Self, IndexError> {
        let mut entries = Vec::new();
        for record in records {
            dimension.validate_vector(&record.vector)?;
            entries.push(IndexEntry {
                label: record.label,
                vector: record.vector,
            });
        }
        // Deterministic partition contents regardless of scan order
        entries.sort_by(|a, b| a.label.cmp(&b.label));

        let mut snapshot = Self {
            entries,
            centroids: Vec::new(),
            partitions: Vec::new(),
            dimension,
            probes: params.probes.max(1),
            generation,
            built_at: Utc::now(),
        };

        let lists = params.lists.max(1);
        if snapshot.entries.len() < lists {
            tracing::debug!(
                "Building flat index: {} records below {lists} lists",
                snapshot.entries.len()
            );
            return Ok(snapshot);
        }

        let vectors: Vec<&[f32]> = snapshot.entries.iter().map(|e| e.vector.as_slice()).collect();
        let clustering = kmeans_clustering(&vectors, lists, params.seed, deadline)?;

        let mut partitions = vec![Vec::new(); clustering.centroids.len()];
        for (position, cluster) in clustering.assignments.iter().enumerate() {
            partitions[cluster.index()].push(position);
        }

        tracing::debug!(
            "Built IVF index: {} records in {} partitions after {} iterations",
            snapshot.entries.len(),
            partitions.len(),
            clustering.iterations
        );

        snapshot.centroids = clustering.centroids;
        snapshot.partitions = partitions;
        Ok(snapshot)
    }

    /// Returns up to `top_k` hits by descending cosine similarity.
    ///
    /// Ties are broken by label ascending. Flat snapshots and snapshots with
    /// no more than `top_k` entries are answered exactly.
    pub fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexHit>, IndexError> {
        self.dimension.validate_vector(vector)?;

        if top_k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        if self.is_flat() || self.entries.len() <= top_k {
            return Ok(rank_exact(
                self.entries.iter().map(|e| (e.label.as_str(), e.vector.as_slice())),
                vector,
                top_k,
            ));
        }

        let candidates = self
            .probe_order(vector)
            .into_iter()
            .take(self.probes)
            .flat_map(|cluster| self.partitions[cluster.index()].iter().copied())
            .map(|position| {
                let entry = &self.entries[position];
                (entry.label.as_str(), entry.vector.as_slice())
            });

        Ok(rank_exact(candidates, vector, top_k))
    }

    /// Centroids ordered from nearest to farthest from `vector`.
    fn probe_order(&self, vector: &[f32]) -> Vec<ClusterId> {
        let mut scored: Vec<(ClusterId, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (ClusterId::from_index(i), cosine_similarity(vector, c)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.into_iter().map(|(cluster, _)| cluster).collect()
    }

    /// Partition assignment of a label, `None` for flat snapshots or unknown labels.
    #[must_use]
    pub fn cluster_of(&self, label: &str) -> Option<ClusterId> {
        let position = self
            .entries
            .binary_search_by(|e| e.label.as_str().cmp(label))
            .ok()?;
        if self.is_flat() {
            return None;
        }
        let centroid_refs: Vec<&[f32]> = self.centroids.iter().map(Vec::as_slice).collect();
        Some(assign_to_nearest_centroid(
            &self.entries[position].vector,
            &centroid_refs,
        ))
    }

    /// True when the snapshot answers every query with an exact scan.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.centroids.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Exact top-k by cosine similarity over `(label, vector)` candidates.
///
/// Orders by similarity descending, then label ascending.
pub fn rank_exact<'a>(
    candidates: impl Iterator<Item = (&'a str, &'a [f32])>,
    query: &[f32],
    top_k: usize,
) -> Vec<IndexHit> {
    let mut scored: Vec<(&str, f32)> = candidates
        .map(|(label, vector)| (label, cosine_similarity(query, vector)))
        .collect();
    scored.sort_by(compare_hits);
    scored.truncate(top_k);
    scored
        .into_iter()
        .map(|(label, score)| (label.to_string(), score))
        .collect()
}

/// Orders owned hits like [`rank_exact`] and keeps the first `top_k`.
pub fn select_top_k(mut hits: Vec<IndexHit>, top_k: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    hits.truncate(top_k);
    hits
}

fn compare_hits(a: &(&str, f32), b: &(&str, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
}
