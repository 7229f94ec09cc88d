//! K-means clustering used to partition the IVF index.
//!
//! Cosine similarity is the distance metric and centroids are kept at unit
//! length. Initialisation uses K-means++ driven by a seeded RNG so two
//! builds over the same population produce the same partitions.
//!
//! # Algorithm Details
//! - Distance metric: cosine (1 - similarity)
//! - Initialization: K-means++
//! - Max iterations: 100
//! - Convergence tolerance: 1e-4
//!
//! The assignment step runs on the rayon pool.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

use crate::vector::types::{ClusterId, VectorError};

/// Maximum number of iterations for K-means clustering.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Vectors assigned per parallel task between deadline checks.
const ASSIGN_CHUNK: usize = 256;

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Unit-length centroids. May hold fewer than `k` entries when the input
    /// has fewer distinct directions than requested clusters.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Seed the store before building a partitioned index"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use k between 1 and the number of vectors")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error(
        "Clustering exceeded its deadline after {iterations} iterations\nSuggestion: Allow a longer deadline or lower index.lists"
    )]
    DeadlineExceeded { iterations: usize },

    #[error("Vector operation error: {0}")]
    Vector(#[from] VectorError),
}

/// Performs seeded K-means clustering using cosine similarity.
///
/// # Arguments
/// * `vectors` - Input vectors (non-empty, same dimension)
/// * `k` - Requested number of clusters (1..=vectors.len())
/// * `seed` - RNG seed for K-means++ and empty-cluster reseeding
/// * `deadline` - Optional instant after which clustering aborts
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    k: usize,
    seed: u64,
    deadline: Option<Instant>,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, &mut rng, deadline)?;
    if centroids.len() < k {
        tracing::debug!(
            "K-means++ found only {} distinct directions for k={k}",
            centroids.len()
        );
    }

    let mut assignments = vec![ClusterId::from_index(0); vectors.len()];
    let mut iterations = 0;

    loop {
        if deadline_passed(deadline) {
            return Err(ClusteringError::DeadlineExceeded { iterations });
        }
        iterations += 1;

        let new_assignments = assign_all(vectors, &centroids, deadline, iterations)?;

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, centroids.len(), &mut rng);
        let centroid_movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if centroid_movement < CONVERGENCE_TOLERANCE {
            // Centroids moved; assignments must reflect the final positions.
            assignments = assign_all(vectors, &centroids, deadline, iterations)?;
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        tracing::warn!("K-means did not fully converge after {MAX_ITERATIONS} iterations");
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Parallel nearest-centroid assignment, checking `deadline` per chunk.
fn assign_all(
    vectors: &[&[f32]],
    centroids: &[Vec<f32>],
    deadline: Option<Instant>,
    iterations: usize,
) -> Result<Vec<ClusterId>, ClusteringError> {
    let centroid_refs: Vec<&[f32]> = centroids.iter().map(Vec::as_slice).collect();
    let chunks = vectors
        .par_chunks(ASSIGN_CHUNK)
        .map(|chunk| {
            if deadline_passed(deadline) {
                return Err(ClusteringError::DeadlineExceeded { iterations });
            }
            Ok(chunk
                .iter()
                .map(|vector| assign_to_nearest_centroid(vector, &centroid_refs))
                .collect())
        })
        .collect::<Result<Vec<Vec<ClusterId>>, ClusteringError>>()?;
    Ok(chunks.into_iter().flatten().collect())
}

/// Assigns a vector to the nearest centroid by cosine similarity.
///
/// Ties resolve to the lowest centroid position.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[&[f32]]) -> ClusterId {
    let mut best_similarity = f32::NEG_INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let similarity = cosine_similarity(vector, centroid);
        if similarity > best_similarity {
            best_similarity = similarity;
            best_cluster = i;
        }
    }

    ClusterId::from_index(best_cluster)
}

/// Computes cosine similarity between two vectors.
///
/// Accumulates in f64 and clamps to [-1, 1]. Returns 0.0 when either
/// vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    ((dot / (norm_a * norm_b).sqrt()) as f32).clamp(-1.0, 1.0)
}

/// Cosine distance, `1 - cosine_similarity`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Updates centroids as the normalised mean of their assigned vectors.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[ClusterId],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let cluster_idx = cluster_id.index();
        for (slot, &value) in new_centroids[cluster_idx].iter_mut().zip(vector.iter()) {
            *slot += value;
        }
        cluster_sizes[cluster_idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random input vector
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = normalize_vector_copy(vectors[random_idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
            normalize_vector(centroid);
        }
    }

    new_centroids
}

/// Selects up to `k` initial centroids with K-means++.
///
/// Stops early when every remaining vector coincides with a chosen centroid.
/// Checks `deadline` before each pick.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    rng: &mut StdRng,
    deadline: Option<Instant>,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(normalize_vector_copy(vectors[first_idx]));

    // Squared distance of each vector to its nearest chosen centroid.
    let mut distances: Vec<f32> = vectors
        .iter()
        .map(|v| {
            let d = cosine_distance(v, &centroids[0]).max(0.0);
            d * d
        })
        .collect();

    while centroids.len() < k {
        if deadline_passed(deadline) {
            return Err(ClusteringError::DeadlineExceeded { iterations: 0 });
        }
        let total_distance: f32 = distances.iter().sum();
        if total_distance < EPSILON {
            break;
        }

        let target = rng.random::<f32>() * total_distance;
        let mut cumulative = 0.0;
        let mut chosen = vectors.len() - 1;
        for (i, &distance) in distances.iter().enumerate() {
            cumulative += distance;
            if cumulative >= target && distance > 0.0 {
                chosen = i;
                break;
            }
        }

        let centroid = normalize_vector_copy(vectors[chosen]);
        for (slot, vector) in distances.iter_mut().zip(vectors.iter()) {
            let d = cosine_distance(vector, &centroid).max(0.0);
            *slot = slot.min(d * d);
        }
        centroids.push(centroid);
    }

    Ok(centroids)
}

/// Mean cosine distance travelled by centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| cosine_distance(old_c, new_c))
        .sum::<f32>()
        / old.len() as f32
}

/// Normalizes a vector in-place to unit length.
fn normalize_vector(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut normalized = vector.to_vec();
    normalize_vector(&mut normalized);
    normalized
}
