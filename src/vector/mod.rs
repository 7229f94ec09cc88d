//! Vector similarity for the symptom vocabulary.
//!
//! # Architecture
//! Symptom vectors are partitioned with seeded K-means into an IVF
//! (inverted file) index. A query probes the nearest partitions and ranks
//! their members by exact cosine similarity. Populations too small to
//! partition are answered by a linear scan.

mod clustering;
mod embedding;
mod index;
mod types;

// Re-export core types for public API
pub use clustering::{
    ClusteringError, KMeansResult, assign_to_nearest_centroid, cosine_distance,
    cosine_similarity, kmeans_clustering,
};
#[cfg(test)]
pub use embedding::MockEmbeddingProvider;
pub use embedding::{DEFAULT_MODEL_IDENTIFIER, EmbeddingProvider, PlaceholderEmbedding};
pub use index::{
    DEFAULT_LISTS, DEFAULT_PROBES, IndexHit, IndexParams, IndexSnapshot, rank_exact, select_top_k,
};
pub use types::{ClusterId, VECTOR_DIMENSION_384, VectorDimension, VectorError};
