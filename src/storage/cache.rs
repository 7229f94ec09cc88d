//! Content-addressed cache of computed embeddings.
//!
//! Entries are keyed by the SHA-256 hex digest of the raw text and tagged
//! with the encoder that produced them. Eviction is explicit: lookups bump
//! `last_accessed` but never remove anything.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};
use crate::storage::file::{
    CACHE_FIXED_BYTES, CACHE_MAGIC, FileFormatError, MappedFile, RecordWriter,
};
use crate::vector::{VectorDimension, VectorError};

/// Default retention window, 30 days.
pub const DEFAULT_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Default upper bound on cached entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// SHA-256 hex digest used as the cache key.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One cached embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub original_text: String,
    pub vector: Vec<f32>,
    pub model_identifier: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Retention rules applied by [`EmbeddingCache::evict_stale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Entries not accessed within this window are removed.
    pub max_age: TimeDelta,
    /// After age eviction, least-recently-accessed entries are removed
    /// until at most this many remain.
    pub max_entries: usize,
}

impl EvictionPolicy {
    #[must_use]
    pub fn new(max_age_secs: u64, max_entries: usize) -> Self {
        let secs = i64::try_from(max_age_secs).unwrap_or(i64::MAX);
        Self {
            max_age: TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX),
            max_entries,
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_ENTRIES)
    }
}

/// Concurrent embedding cache with optional file persistence.
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: DashMap<String, CacheEntry>,
    dimension: VectorDimension,
    path: Option<PathBuf>,
    dirty: AtomicBool,
    snapshot_gate: RwLock<()>,
    writer: Mutex<()>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn in_memory(dimension: VectorDimension) -> Self {
        Self {
            entries: DashMap::new(),
            dimension,
            path: None,
            dirty: AtomicBool::new(false),
            snapshot_gate: RwLock::new(()),
            writer: Mutex::new(()),
        }
    }

    /// Opens the cache backed by `path`, loading existing entries.
    pub fn open(path: impl AsRef<Path>, dimension: VectorDimension) -> CacheResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut cache = Self::in_memory(dimension);

        let loaded = Self::load(&path, dimension).map_err(|source| CacheError::Corrupted {
            path: path.clone(),
            source,
        })?;
        for entry in loaded {
            cache.entries.insert(entry.content_hash.clone(), entry);
        }

        cache.path = Some(path);
        Ok(cache)
    }

    fn load(path: &Path, dimension: VectorDimension) -> Result<Vec<CacheEntry>, FileFormatError> {
        let Some(mapped) = MappedFile::open(path, CACHE_MAGIC, CACHE_FIXED_BYTES)? else {
            return Ok(Vec::new());
        };
        let header = mapped.header();
        if header.dimension != dimension {
            return Err(VectorError::DimensionMismatch {
                expected: dimension.get(),
                actual: header.dimension.get(),
            }
            .into());
        }

        let mut reader = mapped.reader();
        let mut entries = Vec::with_capacity(header.count);
        for _ in 0..header.count {
            entries.push(CacheEntry {
                content_hash: reader.read_string()?,
                original_text: reader.read_string()?,
                model_identifier: reader.read_string()?,
                created_at: reader.read_timestamp()?,
                last_accessed: reader.read_timestamp()?,
                vector: reader.read_vector(dimension)?,
            });
        }
        Ok(entries)
    }

    /// Returns the cached vector when it was produced by `model_identifier`.
    ///
    /// A hit bumps `last_accessed`.
    pub fn lookup(&self, content_hash: &str, model_identifier: &str) -> Option<Vec<f32>> {
        let _gate = self.snapshot_gate.read();
        let mut entry = self.entries.get_mut(content_hash)?;
        if entry.model_identifier != model_identifier {
            tracing::debug!(
                "Cache entry {content_hash} was produced by '{}', requested '{model_identifier}'",
                entry.model_identifier
            );
            return None;
        }

        entry.last_accessed = Utc::now();
        self.dirty.store(true, Ordering::SeqCst);
        Some(entry.vector.clone())
    }

    /// Stores `vector` under `content_hash`, overwriting any previous entry.
    pub fn store(
        &self,
        content_hash: &str,
        original_text: &str,
        vector: Vec<f32>,
        model_identifier: &str,
    ) -> CacheResult<()> {
        if vector.len() != self.dimension.get() {
            return Err(CacheError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: vector.len(),
            });
        }

        let now = Utc::now();
        let _gate = self.snapshot_gate.read();
        self.entries
            .entry(content_hash.to_string())
            .and_modify(|entry| {
                entry.original_text = original_text.to_string();
                entry.vector.clone_from(&vector);
                entry.model_identifier = model_identifier.to_string();
                entry.last_accessed = now;
            })
            .or_insert_with(|| CacheEntry {
                content_hash: content_hash.to_string(),
                original_text: original_text.to_string(),
                vector: vector.clone(),
                model_identifier: model_identifier.to_string(),
                created_at: now,
                last_accessed: now,
            });
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Full entry for auditing. Does not count as an access.
    #[must_use]
    pub fn get_entry(&self, content_hash: &str) -> Option<CacheEntry> {
        self.entries.get(content_hash).map(|entry| entry.clone())
    }

    /// Applies `policy` relative to the current time.
    pub fn evict_stale(&self, policy: &EvictionPolicy) -> usize {
        self.evict_stale_at(policy, Utc::now())
    }

    /// Applies `policy` relative to `now` and returns the number of
    /// entries removed.
    ///
    /// Entries whose `last_accessed` is strictly older than
    /// `now - max_age` go first. The remainder is trimmed to
    /// `max_entries`, least recently accessed first with ties broken by
    /// hash.
    pub fn evict_stale_at(&self, policy: &EvictionPolicy, now: DateTime<Utc>) -> usize {
        let _gate = self.snapshot_gate.read();
        let cutoff = now
            .checked_sub_signed(policy.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.last_accessed >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        let expired = removed;

        let excess = self.entries.len().saturating_sub(policy.max_entries);
        if excess > 0 {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .entries
                .iter()
                .map(|entry| (entry.last_accessed, entry.key().clone()))
                .collect();
            by_age.sort();

            for (seen, hash) in by_age.into_iter().take(excess) {
                // Skip entries touched since the listing was taken
                if self
                    .entries
                    .remove_if(&hash, |_, entry| entry.last_accessed == seen)
                    .is_some()
                {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            tracing::info!(
                "Evicted {removed} cache entries ({expired} expired, {} over capacity)",
                removed - expired
            );
        }
        removed
    }

    /// Writes the cache to disk when it changed since the last flush.
    pub fn flush(&self) -> CacheResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _writer = self.writer.lock();
        if !self.dirty.swap(false, Ordering::SeqCst) && path.exists() {
            return Ok(());
        }

        let entries = self.snapshot();
        let mut writer = RecordWriter::new(CACHE_MAGIC, self.dimension, entries.len());
        for entry in &entries {
            writer.write_str(&entry.content_hash);
            writer.write_str(&entry.original_text);
            writer.write_str(&entry.model_identifier);
            writer.write_timestamp(entry.created_at);
            writer.write_timestamp(entry.last_accessed);
            writer.write_vector(&entry.vector);
        }

        if let Err(source) = writer.persist(path) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(CacheError::CacheWriteFailed {
                path: path.clone(),
                source,
            });
        }

        tracing::debug!("Persisted {} cache entries to {}", entries.len(), path.display());
        Ok(())
    }

    fn snapshot(&self) -> Vec<CacheEntry> {
        let gate = self.snapshot_gate.write();
        let mut entries: Vec<CacheEntry> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        drop(gate);
        entries.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
        entries
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
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
