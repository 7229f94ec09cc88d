//! Provisioning: storage health check and base vocabulary seeding.

use std::path::Path;

use crate::config::Settings;
use crate::engine::SearchEngine;
use crate::error::{EngineError, EngineResult};
use crate::vector::{EmbeddingProvider, IndexHit, PlaceholderEmbedding};

/// Base clinical vocabulary as `(label, category)` pairs.
pub const SEED_SYMPTOMS: [(&str, &str); 10] = [
    ("febre", "sintoma_geral"),
    ("tosse", "respiratorio"),
    ("dor de cabeça", "neurologico"),
    ("falta de ar", "respiratorio"),
    ("dor no peito", "cardiologico"),
    ("dor abdominal", "gastrointestinal"),
    ("nausea", "gastrointestinal"),
    ("tontura", "neurologico"),
    ("sangramento", "circulatorio"),
    ("inchaço", "circulatorio"),
];

/// Number of neighbours reported by the post-setup self test.
const SELF_TEST_TOP_K: usize = 3;

/// Verifies the storage directory exists (creating it if needed) and
/// accepts writes.
///
/// In-memory configurations always pass.
pub fn health_check(settings: &Settings) -> EngineResult<()> {
    let Some(dir) = settings.storage.path.as_deref() else {
        tracing::debug!("No storage path configured, running in memory");
        return Ok(());
    };

    probe_writable(dir).map_err(|e| EngineError::ConnectivityFailed {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    tracing::info!("Storage at {} is reachable", dir.display());
    Ok(())
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    // Dropped immediately; only proves we can create files here
    tempfile::NamedTempFile::new_in(dir)?;
    Ok(())
}

/// Upserts every seed symptom, encoding its label with `provider`.
///
/// Returns the number of symptoms written.
pub fn seed_vocabulary(
    engine: &SearchEngine,
    provider: &dyn EmbeddingProvider,
) -> EngineResult<usize> {
    for (label, category) in SEED_SYMPTOMS {
        let vector = provider.embed(label)?;
        engine.upsert(label, category, vector)?;
    }

    tracing::info!(
        "Seeded {} symptoms using '{}'",
        SEED_SYMPTOMS.len(),
        provider.model_identifier()
    );
    Ok(SEED_SYMPTOMS.len())
}

/// Queries the index with `vector` and logs the nearest symptoms.
pub fn self_test(engine: &SearchEngine, vector: &[f32]) -> EngineResult<Vec<IndexHit>> {
    let hits = engine.query_index(vector, SELF_TEST_TOP_K)?;
    for (label, similarity) in &hits {
        tracing::info!("Self test: {label} (similarity {similarity:.4})");
    }
    Ok(hits)
}

/// Runs the complete provisioning sequence and returns the ready engine.
///
/// # Steps
/// 1. Storage health check
/// 2. Open the engine
/// 3. Seed the vocabulary with the placeholder encoding
/// 4. Build and publish the index
/// 5. Self-test query
/// 6. Flush to disk
pub fn run_full_setup(settings: Settings) -> EngineResult<SearchEngine> {
    tracing::info!("Starting setup");
    health_check(&settings)?;

    let placeholder = PlaceholderEmbedding::new(settings.cache.model.clone());
    let engine = SearchEngine::new(settings)?;

    seed_vocabulary(&engine, &placeholder)?;
    engine.rebuild_index(None)?;
    self_test(&engine, &placeholder.vector())?;
    engine.flush()?;

    tracing::info!("Setup complete: {} symptoms ready", engine.stats().records);
    Ok(engine)
}
