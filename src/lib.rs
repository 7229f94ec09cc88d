/// The main library module for aurora-vector
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod ranking;
pub mod storage;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use engine::{EngineStats, SearchEngine};
pub use error::{
    CacheError, CacheResult, EngineError, EngineResult, IndexError, IndexResult, StoreError,
    StoreResult,
};
pub use ranking::{HybridRanker, RankOptions, RankedSymptom, trigram_similarity};
pub use storage::{CacheEntry, EvictionPolicy, VectorRecord, content_hash};
pub use vector::{
    EmbeddingProvider, IndexHit, IndexSnapshot, PlaceholderEmbedding, VECTOR_DIMENSION_384,
    VectorDimension, cosine_similarity,
};
