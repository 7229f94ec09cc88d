#![allow(dead_code)]

use aurora_vector::vector::VectorError;
use aurora_vector::{EmbeddingProvider, SearchEngine, Settings, VECTOR_DIMENSION_384};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Creates an engine persisting into an isolated temp directory.
pub fn create_test_engine() -> (SearchEngine, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = SearchEngine::new(settings_for(&temp_dir)).expect("Failed to open engine");
    (engine, temp_dir)
}

/// Default settings pointing `storage.path` at `dir`.
pub fn settings_for(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.storage.path = Some(dir.path().to_path_buf());
    settings
}

/// 384-dim vector dominated by component `axis`.
pub fn axis_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; VECTOR_DIMENSION_384];
    v[axis % VECTOR_DIMENSION_384] = 1.0;
    v
}

/// Blend of two axes; `weight` goes to `a`, the rest to `b`.
pub fn blend(a: usize, b: usize, weight: f32) -> Vec<f32> {
    let mut v = vec![0.0; VECTOR_DIMENSION_384];
    v[a % VECTOR_DIMENSION_384] += weight;
    v[b % VECTOR_DIMENSION_384] += 1.0 - weight;
    v
}

/// Encoder returning preset vectors and counting calls.
pub struct FixedProvider {
    model: String,
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl FixedProvider {
    pub fn new(model: &str, vectors: &[(&str, Vec<f32>)]) -> Self {
        Self {
            model: model.to_string(),
            vectors: vectors
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for FixedProvider {
    fn model_identifier(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| VectorError::EmbeddingFailed(format!("no vector for '{text}'")))
    }
}
