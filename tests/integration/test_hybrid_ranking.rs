//! End-to-end hybrid ranking through the public engine API.

use crate::common::{FixedProvider, axis_vector};
use aurora_vector::bootstrap::{SEED_SYMPTOMS, run_full_setup};
use aurora_vector::{EngineError, RankOptions, SearchEngine, Settings};
use std::time::{Duration, Instant};

#[test]
fn test_seeded_vocabulary_ranks_exact_label_first() {
    let engine = run_full_setup(Settings::default()).unwrap();
    let ranked = engine
        .rank("febre", &[0.1; 384], &engine.default_options(), None)
        .unwrap();

    assert_eq!(ranked.len(), SEED_SYMPTOMS.len());
    let top = &ranked[0];
    assert_eq!(top.label, "febre");
    assert_eq!(top.category, "sintoma_geral");
    assert!((top.vector_sim - 1.0).abs() < 1e-6);
    assert_eq!(top.text_sim, 1.0);
    assert!((top.final_score - 1.0).abs() < 1e-6);

    // Everything else shares the vector but little or none of the text
    for other in &ranked[1..] {
        assert!(other.final_score >= 0.7 - 1e-6, "{other:?}");
        assert!(other.final_score < top.final_score, "{other:?}");
    }
}

#[test]
fn test_text_signal_alone_qualifies_a_candidate() {
    let engine = SearchEngine::in_memory();
    engine.upsert("tosse", "respiratorio", axis_vector(0)).unwrap();
    engine.upsert("febre", "sintoma_geral", axis_vector(1)).unwrap();
    engine.upsert("nausea", "gastrointestinal", axis_vector(2)).unwrap();

    let ranked = engine
        .rank("tosse seca", &axis_vector(1), &engine.default_options(), None)
        .unwrap();
    let labels: Vec<&str> = ranked.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["febre", "tosse"]);

    let tosse = &ranked[1];
    assert_eq!(tosse.vector_sim, 0.0);
    assert!((tosse.text_sim - 6.0 / 11.0).abs() < 1e-6);
}

#[test]
fn test_rank_text_uses_embedding_cache() {
    let engine = SearchEngine::in_memory();
    engine.upsert("febre", "sintoma_geral", axis_vector(1)).unwrap();
    engine.upsert("tosse", "respiratorio", axis_vector(0)).unwrap();
    let provider = FixedProvider::new("fixed-v1", &[("febre", axis_vector(1))]);

    for _ in 0..3 {
        let ranked = engine
            .rank_text("febre", &provider, &engine.default_options(), None)
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].label, "febre");
        assert!((ranked[0].final_score - 1.0).abs() < 1e-6);
    }

    assert_eq!(provider.calls(), 1);
    assert_eq!(
        engine.lookup_embedding("febre", "fixed-v1"),
        Some(axis_vector(1))
    );
}

#[test]
fn test_rank_text_without_vector_falls_back_to_trigrams() {
    let engine = run_full_setup(Settings::default()).unwrap();
    let provider = FixedProvider::new("fixed-v1", &[]);

    let ranked = engine
        .rank_text("dor", &provider, &engine.default_options(), None)
        .unwrap();
    let labels: Vec<&str> = ranked.iter().map(|r| r.label.as_str()).collect();

    // 4 shared trigrams out of 13; "dor abdominal" only reaches 4/14
    assert_eq!(labels, vec!["dor de cabeça", "dor no peito"]);
    assert!(ranked.iter().all(|r| r.vector_sim == 0.0));
}

#[test]
fn test_configured_weights_and_top_k() {
    let mut settings = Settings::default();
    settings.ranking.vector_weight = 1.0;
    settings.ranking.text_weight = 0.0;
    settings.ranking.top_k = 3;
    let engine = run_full_setup(settings).unwrap();

    let ranked = engine
        .rank("febre", &[0.1; 384], &engine.default_options(), None)
        .unwrap();
    assert_eq!(ranked.len(), 3);
    // Pure vector score ties everything; labels decide
    let labels: Vec<&str> = ranked.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, vec!["dor abdominal", "dor de cabeça", "dor no peito"]);
}

#[test]
fn test_thresholds_drop_weak_candidates() {
    let engine = SearchEngine::in_memory();
    engine.upsert("tontura", "neurologico", axis_vector(3)).unwrap();

    let strict = RankOptions {
        vector_threshold: 0.99,
        text_threshold: 0.99,
        top_k: 10,
    };
    let query = crate::common::blend(3, 4, 0.5);
    assert!(engine.rank("vertigem", &query, &strict, None).unwrap().is_empty());

    let loose = RankOptions {
        vector_threshold: 0.5,
        ..strict
    };
    assert_eq!(engine.rank("vertigem", &query, &loose, None).unwrap().len(), 1);
}

#[test]
fn test_expired_deadline_is_reported() {
    let engine = run_full_setup(Settings::default()).unwrap();
    let past = Instant::now()
        .checked_sub(Duration::from_millis(10))
        .unwrap_or_else(Instant::now);

    let result = engine.rank("febre", &[0.1; 384], &engine.default_options(), Some(past));
    assert!(matches!(result, Err(EngineError::DeadlineExceeded)));
}
