//! Flush and reopen behaviour of the on-disk record store and cache.

use crate::common::{axis_vector, create_test_engine, settings_for};
use aurora_vector::SearchEngine;
use aurora_vector::storage::{CACHE_FILE, EvictionPolicy, RECORDS_FILE, content_hash};
use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

#[test]
fn test_records_survive_reopen() {
    let (engine, temp_dir) = create_test_engine();
    engine.upsert("febre", "sintoma_geral", axis_vector(1)).unwrap();
    engine.upsert("tosse", "respiratorio", axis_vector(2)).unwrap();
    engine.upsert("tontura", "neurologico", axis_vector(3)).unwrap();
    engine.delete("tosse").unwrap();
    let created = engine.get("febre").unwrap().created_at;
    engine.flush().unwrap();
    drop(engine);

    assert!(temp_dir.path().join(RECORDS_FILE).exists());

    let reopened = SearchEngine::new(settings_for(&temp_dir)).unwrap();
    let labels: Vec<String> = reopened.scan_all().map(|r| r.label).collect();
    assert_eq!(labels, vec!["febre", "tontura"]);

    let febre = reopened.get("febre").unwrap();
    assert_eq!(febre.category, "sintoma_geral");
    assert_eq!(febre.vector, axis_vector(1));
    // Stored with millisecond precision
    assert_eq!(
        febre.created_at.timestamp_millis(),
        created.timestamp_millis()
    );
}

#[test]
fn test_upsert_after_reopen_keeps_created_at() {
    let (engine, temp_dir) = create_test_engine();
    engine.upsert("nausea", "gastrointestinal", axis_vector(4)).unwrap();
    engine.flush().unwrap();
    drop(engine);

    let reopened = SearchEngine::new(settings_for(&temp_dir)).unwrap();
    let before = reopened.get("nausea").unwrap();
    reopened.upsert("nausea", "digestivo", axis_vector(5)).unwrap();
    let after = reopened.get("nausea").unwrap();

    assert_eq!(after.category, "digestivo");
    assert_eq!(after.vector, axis_vector(5));
    assert_eq!(after.created_at, before.created_at);
}

#[test]
fn test_unflushed_changes_are_not_persisted() {
    let (engine, temp_dir) = create_test_engine();
    engine.upsert("febre", "sintoma_geral", axis_vector(1)).unwrap();
    engine.flush().unwrap();
    engine.upsert("tosse", "respiratorio", axis_vector(2)).unwrap();
    drop(engine);

    let reopened = SearchEngine::new(settings_for(&temp_dir)).unwrap();
    assert!(reopened.get("febre").is_some());
    assert!(reopened.get("tosse").is_none());
}

#[test]
fn test_cache_survives_reopen() {
    let (engine, temp_dir) = create_test_engine();
    engine
        .store_embedding("dor no peito", axis_vector(7), "model-a")
        .unwrap();
    engine.flush().unwrap();
    drop(engine);

    assert!(temp_dir.path().join(CACHE_FILE).exists());

    let reopened = SearchEngine::new(settings_for(&temp_dir)).unwrap();
    assert_eq!(
        reopened.lookup_embedding("dor no peito", "model-a"),
        Some(axis_vector(7))
    );
    assert!(reopened.lookup_embedding("dor no peito", "model-b").is_none());

    let entry = reopened
        .cache()
        .get_entry(&content_hash("dor no peito"))
        .unwrap();
    assert_eq!(entry.original_text, "dor no peito");
    assert_eq!(entry.model_identifier, "model-a");
    assert!(entry.last_accessed >= entry.created_at);
}

#[test]
fn test_capacity_eviction_keeps_recently_used() {
    let temp_dir = TempDir::new().unwrap();
    let mut settings = settings_for(&temp_dir);
    settings.cache.max_entries = 2;
    let engine = SearchEngine::new(settings.clone()).unwrap();

    for (i, text) in ["a", "b", "c", "d"].into_iter().enumerate() {
        engine.store_embedding(text, axis_vector(i), "m").unwrap();
    }
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(engine.lookup_embedding("a", "m").is_some());

    assert_eq!(engine.evict_stale(), 2);
    assert_eq!(engine.cache().len(), 2);
    assert!(engine.cache().get_entry(&content_hash("a")).is_some());
    engine.flush().unwrap();
    drop(engine);

    let reopened = SearchEngine::new(settings).unwrap();
    assert_eq!(reopened.cache().len(), 2);
    assert!(reopened.lookup_embedding("a", "m").is_some());
}

#[test]
fn test_age_eviction_is_persisted() {
    let (engine, temp_dir) = create_test_engine();
    engine.store_embedding("febre", axis_vector(1), "m").unwrap();
    engine.store_embedding("tosse", axis_vector(2), "m").unwrap();

    let policy = EvictionPolicy::new(60, 100);
    let later = Utc::now() + TimeDelta::days(31);
    assert_eq!(engine.cache().evict_stale_at(&policy, later), 2);
    engine.flush().unwrap();
    drop(engine);

    let reopened = SearchEngine::new(settings_for(&temp_dir)).unwrap();
    assert!(reopened.cache().is_empty());
}

#[test]
fn test_corrupted_record_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join(RECORDS_FILE),
        b"definitely not a record file",
    )
    .unwrap();

    let err = SearchEngine::new(settings_for(&temp_dir)).unwrap_err();
    assert_eq!(err.status_code(), "CORRUPTED_FILE");
    assert!(!err.recovery_suggestions().is_empty());
}

#[test]
fn test_truncated_record_file_is_reported() {
    let (engine, temp_dir) = create_test_engine();
    engine.upsert("febre", "sintoma_geral", axis_vector(1)).unwrap();
    engine.flush().unwrap();
    drop(engine);

    let path = temp_dir.path().join(RECORDS_FILE);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

    let err = SearchEngine::new(settings_for(&temp_dir)).unwrap_err();
    assert_eq!(err.status_code(), "CORRUPTED_FILE");
}

#[test]
fn test_in_memory_engine_writes_nothing() {
    let engine = SearchEngine::in_memory();
    engine.upsert("febre", "sintoma_geral", axis_vector(1)).unwrap();
    engine.store_embedding("febre", axis_vector(1), "m").unwrap();
    engine.flush().unwrap();

    assert!(engine.store().path().is_none());
    assert!(engine.cache().path().is_none());
    assert_eq!(engine.stats().storage_path, None);
}
