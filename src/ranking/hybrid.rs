//! Fusion of vector and trigram similarity into one ordering.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::ranking::trigram_similarity;
use crate::storage::VectorRecord;
use crate::vector::{IndexHit, cosine_similarity};

/// Records scanned between deadline checks on the text path.
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// Where the ranker pulls candidates from.
pub trait CandidateSource {
    /// Up to `top_k` nearest labels to `query` by cosine similarity.
    fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        deadline: Option<Instant>,
    ) -> EngineResult<Vec<IndexHit>>;

    /// Current record for `label`.
    fn record(&self, label: &str) -> Option<VectorRecord>;

    /// Visits every current record in place, stopping at the first error.
    ///
    /// Not a point-in-time view; records written during the visit may or
    /// may not be seen.
    fn try_for_each_record(
        &self,
        visit: &mut dyn FnMut(&VectorRecord) -> EngineResult<()>,
    ) -> EngineResult<()>;
}

/// Per-query gating and size options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankOptions {
    /// Candidates with `vector_sim` above this are kept.
    pub vector_threshold: f32,
    /// Candidates with `text_sim` above this are kept.
    pub text_threshold: f32,
    pub top_k: usize,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            vector_threshold: 0.5,
            text_threshold: 0.3,
            top_k: 10,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSymptom {
    pub label: String,
    pub category: String,
    pub vector_sim: f32,
    pub text_sim: f32,
    pub final_score: f32,
}

/// Weighted linear fusion of the two similarity signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridRanker {
    pub vector_weight: f32,
    pub text_weight: f32,
    /// Vector candidates fetched per requested result.
    pub oversample: usize,
}

impl Default for HybridRanker {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            text_weight: 0.3,
            oversample: 4,
        }
    }
}

struct Candidate {
    category: String,
    vector_sim: f32,
    text_sim: f32,
}

impl HybridRanker {
    /// Ranks the source's records against a query.
    ///
    /// # Algorithm
    /// 1. Vector path: `top_k * oversample` nearest neighbours of
    ///    `query_vector`, rescored against the live record by cosine and
    ///    against `query_text` by trigram similarity
    /// 2. Text path: every record whose trigram similarity alone exceeds
    ///    `text_threshold`, scored by exact cosine similarity
    /// 3. `final_score = vector_weight * vector_sim + text_weight * text_sim`
    /// 4. Keeps candidates above either threshold, sorts by score then label
    ///
    /// A failing vector path is logged and the query is answered from the
    /// text path alone. Without `query_vector` only the text path runs.
    pub fn rank<S: CandidateSource + ?Sized>(
        &self,
        source: &S,
        query_text: &str,
        query_vector: Option<&[f32]>,
        options: &RankOptions,
        deadline: Option<Instant>,
    ) -> EngineResult<Vec<RankedSymptom>> {
        check_deadline(deadline)?;
        if options.top_k == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        if let Some(vector) = query_vector {
            let fetch = options.top_k.saturating_mul(self.oversample.max(1));
            match source.nearest(vector, fetch, deadline) {
                Ok(hits) => {
                    for (label, _) in hits {
                        // Deleted between index build and now
                        let Some(record) = source.record(&label) else {
                            continue;
                        };
                        // The index may hold an older vector for this label
                        let vector_sim = cosine_similarity(vector, &record.vector);
                        let text_sim = trigram_similarity(&label, query_text);
                        candidates.insert(
                            label,
                            Candidate {
                                category: record.category,
                                vector_sim,
                                text_sim,
                            },
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Vector path failed ({}), ranking '{query_text}' on text similarity only",
                        e.status_code()
                    );
                }
            }
        }

        let mut scanned = 0usize;
        source.try_for_each_record(&mut |record| {
            if scanned % DEADLINE_CHECK_INTERVAL == 0 {
                check_deadline(deadline)?;
            }
            scanned += 1;
            if candidates.contains_key(&record.label) {
                return Ok(());
            }

            let text_sim = trigram_similarity(&record.label, query_text);
            if text_sim > options.text_threshold {
                let vector_sim = query_vector
                    .map(|q| cosine_similarity(q, &record.vector))
                    .unwrap_or(0.0);
                candidates.insert(
                    record.label.clone(),
                    Candidate {
                        category: record.category.clone(),
                        vector_sim,
                        text_sim,
                    },
                );
            }
            Ok(())
        })?;

        let mut ranked: Vec<RankedSymptom> = candidates
            .into_iter()
            .filter(|(_, c)| {
                c.vector_sim > options.vector_threshold || c.text_sim > options.text_threshold
            })
            .map(|(label, c)| RankedSymptom {
                final_score: self.fuse(c.vector_sim, c.text_sim),
                label,
                category: c.category,
                vector_sim: c.vector_sim,
                text_sim: c.text_sim,
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.label.cmp(&b.label))
        });
        ranked.truncate(options.top_k);
        Ok(ranked)
    }

    /// Weighted sum of the two similarities.
    #[must_use]
    pub fn fuse(&self, vector_sim: f32, text_sim: f32) -> f32 {
        self.vector_weight * vector_sim + self.text_weight * text_sim
    }
}

fn check_deadline(deadline: Option<Instant>) -> EngineResult<()> {
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(EngineError::DeadlineExceeded);
    }
    Ok(())
}
