//! IVF index behaviour observed through the engine.

use crate::common::blend;
use aurora_vector::{SearchEngine, Settings, cosine_similarity};
use std::time::{Duration, Instant};

const CLUSTERS: usize = 6;
const MEMBERS: usize = 40;

fn ivf_settings(probes: usize) -> Settings {
    let mut settings = Settings::default();
    settings.index.lists = 8;
    settings.index.probes = probes;
    settings.index.seed = 7;
    settings
}

/// Six tight groups of 40 vectors each, labelled `c{cluster}-m{member}`.
fn populate(engine: &SearchEngine) {
    for cluster in 0..CLUSTERS {
        let anchor = cluster * 50;
        for member in 0..MEMBERS {
            let vector = blend(anchor, anchor + 1 + member, 0.9);
            engine
                .upsert(&format!("c{cluster}-m{member:02}"), "grupo", vector)
                .unwrap();
        }
    }
}

fn brute_force(engine: &SearchEngine, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = engine
        .scan_all()
        .map(|r| {
            let sim = cosine_similarity(query, &r.vector);
            (r.label, sim)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.truncate(top_k);
    scored
}

#[test]
fn test_partitioned_index_answers_within_cluster() {
    let engine = SearchEngine::new(ivf_settings(2)).unwrap();
    populate(&engine);
    let snapshot = engine.rebuild_index(None).unwrap();
    assert_eq!(snapshot.len(), CLUSTERS * MEMBERS);
    assert!(!snapshot.is_flat());
    assert!(snapshot.partition_count() > 1);

    for cluster in 0..CLUSTERS {
        let anchor = cluster * 50;
        let query = blend(anchor, anchor + 3, 0.9);
        let hits = engine.query_index(&query, 5).unwrap();

        assert!(!hits.is_empty() && hits.len() <= 5);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(hits[0].0, format!("c{cluster}-m02"));
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_probing_every_partition_matches_brute_force() {
    let engine = SearchEngine::new(ivf_settings(8)).unwrap();
    populate(&engine);
    engine.rebuild_index(None).unwrap();

    let query = blend(100, 120, 0.6);
    let hits = engine.query_index(&query, 10).unwrap();
    let expected = brute_force(&engine, &query, 10);

    let labels: Vec<&str> = hits.iter().map(|(l, _)| l.as_str()).collect();
    let expected_labels: Vec<&str> = expected.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(labels, expected_labels);
}

#[test]
fn test_population_below_top_k_is_exact() {
    let engine = SearchEngine::new(ivf_settings(1)).unwrap();
    for i in 0..12 {
        engine
            .upsert(&format!("s{i:02}"), "x", blend(i, i + 20, 0.8))
            .unwrap();
    }

    let query = blend(4, 30, 0.7);
    let hits = engine.query_index(&query, 50).unwrap();
    assert_eq!(hits.len(), 12);
    assert_eq!(hits, brute_force(&engine, &query, 50));
}

#[test]
fn test_same_seed_builds_same_partitions() {
    let first = SearchEngine::new(ivf_settings(1)).unwrap();
    let second = SearchEngine::new(ivf_settings(1)).unwrap();
    populate(&first);
    populate(&second);

    let a = first.rebuild_index(None).unwrap();
    let b = second.rebuild_index(None).unwrap();
    assert_eq!(a.partition_count(), b.partition_count());
    for cluster in 0..CLUSTERS {
        let label = format!("c{cluster}-m10");
        assert_eq!(a.cluster_of(&label), b.cluster_of(&label));
    }

    let query = blend(150, 160, 0.9);
    assert_eq!(
        first.query_index(&query, 5).unwrap(),
        second.query_index(&query, 5).unwrap()
    );
}

#[test]
fn test_empty_store_builds_empty_index() {
    let engine = SearchEngine::new(ivf_settings(1)).unwrap();
    let snapshot = engine.rebuild_index(None).unwrap();

    assert!(snapshot.is_empty());
    assert_eq!(snapshot.generation(), 0);
    assert!(engine.query_index(&blend(0, 1, 0.5), 5).unwrap().is_empty());
}

#[test]
fn test_expired_deadline_aborts_rebuild() {
    let engine = SearchEngine::new(ivf_settings(1)).unwrap();
    populate(&engine);
    engine.rebuild_index(None).unwrap();
    let published = engine.index_snapshot().unwrap().generation();

    engine.upsert("extra", "x", blend(7, 8, 0.5)).unwrap();
    let past = Instant::now()
        .checked_sub(Duration::from_millis(10))
        .unwrap_or_else(Instant::now);
    let err = engine.rebuild_index(Some(past)).unwrap_err();
    assert_eq!(err.status_code(), "DEADLINE_EXCEEDED");

    // The previous snapshot stays published
    assert_eq!(engine.index_snapshot().unwrap().generation(), published);
}

#[test]
fn test_stats_track_index_lag() {
    let engine = SearchEngine::new(ivf_settings(1)).unwrap();
    populate(&engine);

    let before = engine.stats();
    assert_eq!(before.index_generation, None);
    assert_eq!(before.index_behind, (CLUSTERS * MEMBERS) as u64);

    engine.rebuild_index(None).unwrap();
    engine.upsert("c0-m00", "grupo", blend(0, 1, 0.8)).unwrap();

    let after = engine.stats();
    assert_eq!(after.index_generation, Some((CLUSTERS * MEMBERS) as u64));
    assert_eq!(after.index_behind, 1);
    assert!(after.index_built_at.is_some());
}
