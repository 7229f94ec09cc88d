//! Hybrid relevance ranking.
//!
//! Combines cosine similarity from the vector index with `pg_trgm`-style
//! trigram similarity over symptom labels.

mod hybrid;
mod trigram;

pub use hybrid::{CandidateSource, HybridRanker, RankOptions, RankedSymptom};
pub use trigram::{trigram_similarity, trigrams};
