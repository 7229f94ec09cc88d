//! Concurrent writers, readers and rebuilds sharing one engine.

use crate::common::{axis_vector, blend};
use aurora_vector::{SearchEngine, Settings};
use std::sync::Arc;
use std::thread;

fn partitioned_engine() -> Arc<SearchEngine> {
    let mut settings = Settings::default();
    settings.index.lists = 4;
    settings.index.staleness_threshold = 8;
    settings.index.auto_rebuild = true;
    Arc::new(SearchEngine::new(settings).unwrap())
}

#[test]
fn test_concurrent_upserts_to_one_label_never_tear() {
    let engine = Arc::new(SearchEngine::in_memory());

    let handles: Vec<_> = (0..8)
        .map(|writer| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..50 {
                    engine
                        .upsert("febre", &format!("writer-{writer}"), axis_vector(writer))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.store().len(), 1);
    assert_eq!(engine.store().generation(), 400);

    // Category and vector come from the same write
    let record = engine.get("febre").unwrap();
    let writer: usize = record
        .category
        .strip_prefix("writer-")
        .and_then(|n| n.parse().ok())
        .unwrap();
    assert_eq!(record.vector, axis_vector(writer));
}

#[test]
fn test_queries_run_while_index_rebuilds() {
    let engine = partitioned_engine();
    for i in 0..40 {
        engine
            .upsert(&format!("base-{i:02}"), "x", blend(i, i + 1, 0.9))
            .unwrap();
    }
    engine.rebuild_index(None).unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..60 {
                engine
                    .upsert(&format!("new-{i:02}"), "y", blend(i + 100, i + 101, 0.9))
                    .unwrap();
                if i % 10 == 0 {
                    engine.rebuild_index(None).unwrap();
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|reader| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..25 {
                    let axis = (reader * 7 + round) % 40;
                    let hits = engine.query_index(&blend(axis, axis + 1, 0.9), 3).unwrap();
                    assert!(hits.len() <= 3);
                    assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));

                    let ranked = engine
                        .rank("base", &blend(axis, axis + 1, 0.9), &engine.default_options(), None)
                        .unwrap();
                    assert!(ranked.len() <= engine.default_options().top_k);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let snapshot = engine.rebuild_index(None).unwrap();
    assert_eq!(snapshot.len(), 100);
    assert_eq!(engine.stats().index_behind, 0);
}

#[test]
fn test_eviction_races_with_lookups() {
    let engine = Arc::new(SearchEngine::in_memory());
    for i in 0..100 {
        engine
            .store_embedding(&format!("text-{i}"), axis_vector(i), "m")
            .unwrap();
    }

    let evictor = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let policy = aurora_vector::EvictionPolicy::new(3600, 10);
            engine.cache().evict_stale(&policy)
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100 {
                    // Either a complete vector or a miss, never a partial entry
                    if let Some(vector) = engine.lookup_embedding(&format!("text-{i}"), "m") {
                        assert_eq!(vector, axis_vector(i));
                    }
                }
            })
        })
        .collect();

    let evicted = evictor.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    // Entries touched during the trim may survive it
    assert!(evicted <= 90);
    assert_eq!(engine.cache().len(), 100 - evicted);
}

#[test]
fn test_flush_during_writes_is_consistent() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let settings = crate::common::settings_for(&temp_dir);
    let engine = Arc::new(SearchEngine::new(settings.clone()).unwrap());

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..25 {
                    engine
                        .upsert(&format!("w{writer}-{i:02}"), "x", axis_vector(writer * 25 + i))
                        .unwrap();
                    if i % 5 == 0 {
                        engine.flush().unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }
    engine.flush().unwrap();
    drop(engine);

    let reopened = SearchEngine::new(settings).unwrap();
    assert_eq!(reopened.store().len(), 100);
    assert_eq!(reopened.get("w3-24").unwrap().vector, axis_vector(99));
}
