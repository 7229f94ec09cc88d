//! The symptom search engine.
//!
//! [`SearchEngine`] owns the record store, the embedding cache and the
//! published IVF snapshot. Every method takes `&self`; the engine can be
//! shared across threads behind an `Arc`.
//!
//! # Index lifecycle
//! The index is built from a point-in-time copy of the store and published
//! by swapping an `Arc`. Queries hold their own `Arc`, so a rebuild never
//! blocks or invalidates a running query. Once the store has moved more
//! than `index.staleness_threshold` mutations past the published snapshot,
//! the next query rebuilds it (`index.auto_rebuild`) or reports
//! [`IndexError::IndexStale`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::Settings;
use crate::error::{EngineError, EngineResult, IndexError};
use crate::ranking::{CandidateSource, HybridRanker, RankOptions, RankedSymptom};
use crate::storage::{
    CACHE_FILE, EmbeddingCache, RECORDS_FILE, RecordScan, VectorRecord, VectorRecordStore,
    content_hash,
};
use crate::vector::{
    EmbeddingProvider, IndexHit, IndexSnapshot, VectorDimension, cosine_similarity, select_top_k,
};

/// Records scored between deadline checks on the exact path.
const EXACT_DEADLINE_INTERVAL: usize = 1024;

/// Counters describing the engine's current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub records: usize,
    pub cache_entries: usize,
    pub store_generation: u64,
    /// `None` until the first rebuild.
    pub index_generation: Option<u64>,
    pub index_partitions: usize,
    pub index_flat: bool,
    pub index_built_at: Option<DateTime<Utc>>,
    /// Store mutations not reflected in the published index.
    pub index_behind: u64,
    pub storage_path: Option<PathBuf>,
}

/// Embedding store plus hybrid vector/trigram search.
pub struct SearchEngine {
    settings: Settings,
    dimension: VectorDimension,
    store: VectorRecordStore,
    cache: EmbeddingCache,
    ranker: HybridRanker,

    /// Published snapshot, `None` until the first build.
    index: RwLock<Option<Arc<IndexSnapshot>>>,
    /// Serializes rebuilds.
    rebuild_lock: Mutex<()>,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("records", &self.store.len())
            .field("cache_entries", &self.cache.len())
            .field("storage", &self.settings.storage.path)
            .finish()
    }
}

impl SearchEngine {
    /// Opens an engine, loading persisted state from `storage.path`.
    pub fn new(settings: Settings) -> EngineResult<Self> {
        settings
            .validate()
            .map_err(|reason| EngineError::Config { reason })?;

        let dimension = VectorDimension::dimension_384();
        let (store, cache) = match &settings.storage.path {
            Some(dir) => (
                VectorRecordStore::open(dir.join(RECORDS_FILE), dimension)?,
                EmbeddingCache::open(dir.join(CACHE_FILE), dimension)?,
            ),
            None => (
                VectorRecordStore::in_memory(dimension),
                EmbeddingCache::in_memory(dimension),
            ),
        };

        tracing::info!(
            "Opened search engine: {} records, {} cached embeddings, storage {}",
            store.len(),
            cache.len(),
            settings
                .storage
                .path
                .as_ref()
                .map_or_else(|| "in memory".to_string(), |p| p.display().to_string())
        );

        Ok(Self {
            ranker: settings.ranking.ranker(),
            settings,
            dimension,
            store,
            cache,
            index: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        })
    }

    /// Engine with default settings and no persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        let settings = Settings::default();
        let dimension = VectorDimension::dimension_384();
        Self {
            ranker: settings.ranking.ranker(),
            settings,
            dimension,
            store: VectorRecordStore::in_memory(dimension),
            cache: EmbeddingCache::in_memory(dimension),
            index: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Ranking options configured in `[ranking]`.
    #[must_use]
    pub fn default_options(&self) -> RankOptions {
        self.settings.ranking.options()
    }

    #[must_use]
    pub fn store(&self) -> &VectorRecordStore {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    // ---- Records ----

    /// Inserts or overwrites a symptom.
    pub fn upsert(&self, label: &str, category: &str, vector: Vec<f32>) -> EngineResult<()> {
        Ok(self.store.upsert(label, category, vector)?)
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<VectorRecord> {
        self.store.get(label)
    }

    pub fn delete(&self, label: &str) -> EngineResult<()> {
        Ok(self.store.delete(label)?)
    }

    /// Point-in-time scan of every record, ordered by label.
    #[must_use]
    pub fn scan_all(&self) -> RecordScan {
        self.store.scan_all()
    }

    // ---- Index ----

    /// Builds a fresh snapshot from the current store and publishes it.
    ///
    /// Queries keep using the previous snapshot until the swap.
    pub fn rebuild_index(&self, deadline: Option<Instant>) -> EngineResult<Arc<IndexSnapshot>> {
        let _rebuild = self.rebuild_lock.lock();
        self.rebuild_locked(deadline)
    }

    fn rebuild_locked(&self, deadline: Option<Instant>) -> EngineResult<Arc<IndexSnapshot>> {
        if deadline_passed(deadline) {
            return Err(IndexError::DeadlineExceeded.into());
        }
        let started = Instant::now();
        let (records, generation) = self.store.snapshot();
        let count = records.len();

        let snapshot = Arc::new(IndexSnapshot::build(
            records,
            self.dimension,
            self.settings.index.params(),
            generation,
            deadline,
        )?);
        *self.index.write() = Some(Arc::clone(&snapshot));

        tracing::info!(
            "Published index generation {generation}: {count} records, {} partitions in {:?}",
            snapshot.partition_count(),
            started.elapsed()
        );
        Ok(snapshot)
    }

    /// Currently published snapshot, if any.
    #[must_use]
    pub fn index_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.index.read().clone()
    }

    /// Nearest `top_k` labels to `vector`.
    pub fn query_index(&self, vector: &[f32], top_k: usize) -> EngineResult<Vec<IndexHit>> {
        self.nearest_with_deadline(vector, top_k, None)
    }

    fn nearest_with_deadline(
        &self,
        vector: &[f32],
        top_k: usize,
        deadline: Option<Instant>,
    ) -> EngineResult<Vec<IndexHit>> {
        self.dimension
            .validate_vector(vector)
            .map_err(IndexError::from)?;

        let population = self.store.len();
        if population < self.settings.index.lists || population <= top_k {
            return self.exact_nearest(vector, top_k, deadline);
        }

        let snapshot = self.fresh_snapshot(deadline)?;
        Ok(snapshot.query(vector, top_k)?)
    }

    /// Linear scan over the live store.
    fn exact_nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        deadline: Option<Instant>,
    ) -> EngineResult<Vec<IndexHit>> {
        let mut hits = Vec::with_capacity(self.store.len());
        self.store.try_for_each(|record| {
            if hits.len() % EXACT_DEADLINE_INTERVAL == 0 && deadline_passed(deadline) {
                return Err(EngineError::DeadlineExceeded);
            }
            hits.push((record.label.clone(), cosine_similarity(vector, &record.vector)));
            Ok(())
        })?;
        Ok(select_top_k(hits, top_k))
    }

    /// Mutations the published snapshot lags behind the store, `None`
    /// when nothing was published yet.
    fn index_lag(&self, snapshot: Option<&IndexSnapshot>) -> Option<u64> {
        snapshot.map(|s| self.store.generation().saturating_sub(s.generation()))
    }

    fn is_fresh(&self, snapshot: &IndexSnapshot) -> bool {
        self.store.generation().saturating_sub(snapshot.generation())
            <= self.settings.index.staleness_threshold
    }

    fn fresh_snapshot(&self, deadline: Option<Instant>) -> EngineResult<Arc<IndexSnapshot>> {
        let current = self.index_snapshot();
        if let Some(snapshot) = current.as_ref().filter(|s| self.is_fresh(s)) {
            return Ok(Arc::clone(snapshot));
        }

        let behind = self
            .index_lag(current.as_deref())
            .unwrap_or_else(|| self.store.generation());
        if !self.settings.index.auto_rebuild {
            return Err(IndexError::IndexStale {
                behind,
                threshold: self.settings.index.staleness_threshold,
            }
            .into());
        }

        let _rebuild = match self.rebuild_lock.try_lock() {
            Some(guard) => guard,
            None => {
                // Readers never wait on a rebuild when there is something to serve
                if let Some(previous) = current {
                    tracing::debug!(
                        "Rebuild in progress, serving generation {} ({behind} behind)",
                        previous.generation()
                    );
                    return Ok(previous);
                }
                match deadline {
                    Some(deadline) => self
                        .rebuild_lock
                        .try_lock_until(deadline)
                        .ok_or(EngineError::DeadlineExceeded)?,
                    None => self.rebuild_lock.lock(),
                }
            }
        };
        // Another query may have rebuilt while we waited
        if let Some(snapshot) = self.index_snapshot().filter(|s| self.is_fresh(s)) {
            return Ok(snapshot);
        }
        tracing::debug!("Index is {behind} mutations behind, rebuilding");
        self.rebuild_locked(deadline)
    }

    // ---- Ranking ----

    /// Hybrid ranking of the vocabulary against a query.
    pub fn rank(
        &self,
        query_text: &str,
        query_vector: &[f32],
        options: &RankOptions,
        deadline: Option<Instant>,
    ) -> EngineResult<Vec<RankedSymptom>> {
        self.ranker
            .rank(self, query_text, Some(query_vector), options, deadline)
    }

    /// Ranks `query_text`, encoding it through the cache and `provider`.
    ///
    /// An encoder failure degrades to text-only ranking.
    pub fn rank_text(
        &self,
        query_text: &str,
        provider: &dyn EmbeddingProvider,
        options: &RankOptions,
        deadline: Option<Instant>,
    ) -> EngineResult<Vec<RankedSymptom>> {
        let vector = match self.embed_cached(query_text, provider) {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!("Could not encode '{query_text}', ranking on text only: {e}");
                None
            }
        };
        self.ranker
            .rank(self, query_text, vector.as_deref(), options, deadline)
    }

    // ---- Embedding cache ----

    /// Cached vector for `text` produced by `model_identifier`.
    #[must_use]
    pub fn lookup_embedding(&self, text: &str, model_identifier: &str) -> Option<Vec<f32>> {
        self.cache.lookup(&content_hash(text), model_identifier)
    }

    /// Caches `vector` as the encoding of `text`.
    pub fn store_embedding(
        &self,
        text: &str,
        vector: Vec<f32>,
        model_identifier: &str,
    ) -> EngineResult<()> {
        Ok(self
            .cache
            .store(&content_hash(text), text, vector, model_identifier)?)
    }

    /// Encodes `text`, consulting the cache first.
    ///
    /// Misses are encoded with `provider` and cached. A failure to cache is
    /// logged and does not fail the call.
    pub fn embed_cached(
        &self,
        text: &str,
        provider: &dyn EmbeddingProvider,
    ) -> EngineResult<Vec<f32>> {
        let hash = content_hash(text);
        let model = provider.model_identifier();
        if let Some(vector) = self.cache.lookup(&hash, model) {
            return Ok(vector);
        }

        let vector = provider.embed(text)?;
        self.dimension.validate_vector(&vector)?;

        if let Err(e) = self.cache.store(&hash, text, vector.clone(), model) {
            tracing::warn!("Failed to cache embedding for '{text}': {e}");
        }
        Ok(vector)
    }

    /// Applies the configured eviction policy. Returns the entries removed.
    pub fn evict_stale(&self) -> usize {
        self.cache.evict_stale(&self.settings.cache.policy())
    }

    // ---- Maintenance ----

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let snapshot = self.index_snapshot();
        let store_generation = self.store.generation();
        EngineStats {
            records: self.store.len(),
            cache_entries: self.cache.len(),
            store_generation,
            index_generation: snapshot.as_ref().map(|s| s.generation()),
            index_partitions: snapshot.as_ref().map_or(0, |s| s.partition_count()),
            index_flat: snapshot.as_ref().is_none_or(|s| s.is_flat()),
            index_built_at: snapshot.as_ref().map(|s| s.built_at()),
            index_behind: self
                .index_lag(snapshot.as_deref())
                .unwrap_or(store_generation),
            storage_path: self.settings.storage.path.clone(),
        }
    }

    /// Persists records and cache.
    ///
    /// Record persistence errors are returned. Cache write failures are
    /// logged and swallowed since the cache can be recomputed.
    pub fn flush(&self) -> EngineResult<()> {
        self.store.flush()?;
        if let Err(e) = self.cache.flush() {
            tracing::warn!("{e}");
        }
        Ok(())
    }
}

impl CandidateSource for SearchEngine {
    fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        deadline: Option<Instant>,
    ) -> EngineResult<Vec<IndexHit>> {
        self.nearest_with_deadline(query, top_k, deadline)
    }

    fn record(&self, label: &str) -> Option<VectorRecord> {
        self.store.get(label)
    }

    fn try_for_each_record(
        &self,
        visit: &mut dyn FnMut(&VectorRecord) -> EngineResult<()>,
    ) -> EngineResult<()> {
        self.store.try_for_each(visit)
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
