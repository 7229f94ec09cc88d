//! Trigram text similarity compatible with PostgreSQL `pg_trgm`.
//!
//! Text is lowercased and split into words on non-alphanumeric characters.
//! Each word is padded with two leading spaces and one trailing space
//! before its 3-character windows are collected. Similarity is the Jaccard
//! index of the two trigram sets.

use std::collections::HashSet;

/// Set of padded trigrams extracted from `text`.
pub fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let lowered = text.to_lowercase();
    let mut set = HashSet::new();

    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = [' ', ' ']
            .into_iter()
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }

    set
}

/// `|A ∩ B| / |A ∪ B|` over the trigram sets of `a` and `b`.
///
/// Returns 0.0 when neither text contains a word.
pub fn trigram_similarity(a: &str, b: &str) -> f32 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() && right.is_empty() {
        return 0.0;
    }

    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;
    shared as f32 / union as f32
}
