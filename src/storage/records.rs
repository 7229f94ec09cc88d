//! Keyed store of symptom vectors.
//!
//! Records live in a sharded [`DashMap`] keyed by label, so writers to
//! different labels never contend. A snapshot gate lets [`VectorRecordStore::snapshot`]
//! observe the map at a single point in time while upserts only take the
//! shared side of it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::storage::file::{
    FileFormatError, MappedFile, RECORD_FIXED_BYTES, RECORDS_MAGIC, RecordWriter,
};
use crate::vector::{VectorDimension, VectorError};

/// A symptom label with its category and embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    /// Unique identity key, e.g. "febre".
    pub label: String,
    /// Display tag, e.g. "respiratorio". Not used for ranking.
    pub category: String,
    pub vector: Vec<f32>,
    /// Set on first insert and kept across upserts.
    pub created_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn new(label: impl Into<String>, category: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            label: label.into(),
            category: category.into(),
            vector,
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time iterator returned by [`VectorRecordStore::scan_all`].
///
/// Later mutations of the store are not visible through it.
#[derive(Debug)]
pub struct RecordScan {
    inner: std::vec::IntoIter<VectorRecord>,
}

impl Iterator for RecordScan {
    type Item = VectorRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RecordScan {}

/// Concurrent record store with optional file persistence.
#[derive(Debug)]
pub struct VectorRecordStore {
    records: DashMap<String, VectorRecord>,
    dimension: VectorDimension,
    path: Option<PathBuf>,

    /// Bumped on every successful mutation.
    generation: AtomicU64,
    /// Generation last written to `path`.
    persisted: AtomicU64,

    /// Mutations hold it shared; snapshots hold it exclusively.
    snapshot_gate: RwLock<()>,
    /// Serializes file writes.
    writer: Mutex<()>,
}

impl VectorRecordStore {
    /// Creates a store that is never written to disk.
    #[must_use]
    pub fn in_memory(dimension: VectorDimension) -> Self {
        Self {
            records: DashMap::new(),
            dimension,
            path: None,
            generation: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            snapshot_gate: RwLock::new(()),
            writer: Mutex::new(()),
        }
    }

    /// Opens the store backed by `path`, loading existing records.
    ///
    /// A missing file yields an empty store; the file is created on the
    /// first [`flush`](Self::flush).
    pub fn open(path: impl AsRef<Path>, dimension: VectorDimension) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::in_memory(dimension);

        let loaded = Self::load(&path, dimension).map_err(|source| StoreError::Corrupted {
            path: path.clone(),
            source,
        })?;
        if !loaded.is_empty() {
            tracing::debug!("Loaded {} records from {}", loaded.len(), path.display());
        }
        for record in loaded {
            store.records.insert(record.label.clone(), record);
        }

        store.path = Some(path);
        Ok(store)
    }

    fn load(path: &Path, dimension: VectorDimension) -> Result<Vec<VectorRecord>, FileFormatError> {
        let Some(mapped) = MappedFile::open(path, RECORDS_MAGIC, RECORD_FIXED_BYTES)? else {
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
        let mut records = Vec::with_capacity(header.count);
        for _ in 0..header.count {
            let label = reader.read_string()?;
            let category = reader.read_string()?;
            let created_at = reader.read_timestamp()?;
            let vector = reader.read_vector(dimension)?;
            records.push(VectorRecord {
                label,
                category,
                vector,
                created_at,
            });
        }
        Ok(records)
    }

    /// Inserts or overwrites the record for `label`.
    ///
    /// Rejects vectors of the wrong length without touching the store.
    pub fn upsert(&self, label: &str, category: &str, vector: Vec<f32>) -> StoreResult<()> {
        if vector.len() != self.dimension.get() {
            return Err(StoreError::DimensionMismatch {
                label: label.to_string(),
                expected: self.dimension.get(),
                actual: vector.len(),
            });
        }

        let _gate = self.snapshot_gate.read();
        match self.records.entry(label.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                record.category = category.to_string();
                record.vector = vector;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(VectorRecord::new(label, category, vector));
            }
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<VectorRecord> {
        self.records.get(label).map(|entry| entry.clone())
    }

    /// Removes the record for `label`.
    pub fn delete(&self, label: &str) -> StoreResult<()> {
        let _gate = self.snapshot_gate.read();
        if self.records.remove(label).is_none() {
            return Err(StoreError::NotFound {
                label: label.to_string(),
            });
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Fresh point-in-time scan, ordered by label.
    #[must_use]
    pub fn scan_all(&self) -> RecordScan {
        let (records, _) = self.snapshot();
        RecordScan {
            inner: records.into_iter(),
        }
    }

    /// Visits every record in place, stopping at the first error.
    ///
    /// Takes neither the snapshot gate nor a copy of the store. Each shard
    /// is read-locked only while it is walked, so concurrent mutations may
    /// or may not be observed. `visit` must not write to this store.
    pub fn try_for_each<E>(
        &self,
        mut visit: impl FnMut(&VectorRecord) -> Result<(), E>,
    ) -> Result<(), E> {
        for entry in self.records.iter() {
            visit(entry.value())?;
        }
        Ok(())
    }

    /// Consistent copy of every record together with the generation it
    /// reflects. Ordered by label.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<VectorRecord>, u64) {
        let gate = self.snapshot_gate.write();
        let mut records: Vec<VectorRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        let generation = self.generation.load(Ordering::SeqCst);
        drop(gate);

        records.sort_by(|a, b| a.label.cmp(&b.label));
        (records, generation)
    }

    /// Writes the current contents to disk when they changed since the
    /// last flush. No-op for in-memory stores.
    pub fn flush(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _writer = self.writer.lock();
        let (records, generation) = self.snapshot();
        if generation == self.persisted.load(Ordering::SeqCst) && path.exists() {
            return Ok(());
        }

        let mut writer = RecordWriter::new(RECORDS_MAGIC, self.dimension, records.len());
        for record in &records {
            writer.write_str(&record.label);
            writer.write_str(&record.category);
            writer.write_timestamp(record.created_at);
            writer.write_vector(&record.vector);
        }
        writer
            .persist(path)
            .map_err(|source| StoreError::Persistence {
                path: path.clone(),
                source,
            })?;

        self.persisted.store(generation, Ordering::SeqCst);
        tracing::debug!("Persisted {} records to {}", records.len(), path.display());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Monotonic mutation counter.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
