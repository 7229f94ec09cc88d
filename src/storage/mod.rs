//! Durable state: the symptom record store and the embedding cache.
//!
//! Both keep their working set in concurrent maps and persist to
//! memory-mapped snapshot files on flush.

pub mod cache;
mod file;
pub mod records;

pub use cache::{
    CacheEntry, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_ENTRIES, EmbeddingCache, EvictionPolicy,
    content_hash,
};
pub use file::FileFormatError;
pub use records::{RecordScan, VectorRecord, VectorRecordStore};

/// File name of the record store under `storage.path`.
pub const RECORDS_FILE: &str = "records.avr";

/// File name of the embedding cache under `storage.path`.
pub const CACHE_FILE: &str = "cache.avc";
