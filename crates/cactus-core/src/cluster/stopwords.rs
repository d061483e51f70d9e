//! Stop words for hunk vectorisation
//!
//! A fixed base set is always ignored. On top of it, the most common words of
//! the current diff can be ignored too; how many is picked with an elbow over
//! the spread of the resulting similarity matrix.

use super::similarity::{count_tokens, vectorize_counts, SimilarityMatrix};
use crate::cluster::SimilarityStrategy;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Reserved words of common programming languages
pub const RESERVED_WORDS: &[&str] = &[
    "def", "import", "from", "as", "if", "else", "return", "class", "self", "for", "in", "try",
    "except", "with", "while", "break", "continue", "pass", "lambda", "is", "not", "and", "or",
    "None", "True", "False",
];

/// Frequent English words
pub const COMMON_ENGLISH_WORDS: &[&str] = &[
    "the", "and", "in", "to", "a", "of", "is", "it", "that", "for", "on", "with", "this", "as",
    "by", "are", "be", "or", "an", "have", "can",
];

const MIN_COMMON_WORDS: usize = 1;
const MAX_COMMON_WORDS: usize = 50;

/// The fixed stop-word set
pub fn base_stop_words() -> BTreeSet<String> {
    RESERVED_WORDS
        .iter()
        .chain(COMMON_ENGLISH_WORDS)
        .map(|w| w.to_string())
        .collect()
}

/// Words of the given texts, most frequent first
///
/// Ties keep the order in which words first appear.
pub fn ranked_words(texts: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut seen = 0;
    for text in texts {
        for word in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let entry = counts.entry(word).or_insert_with(|| {
                seen += 1;
                (0, seen)
            });
            entry.0 += 1;
        }
    }

    let mut ranked: Vec<(&str, usize, usize)> =
        counts.into_iter().map(|(w, (c, first))| (w, c, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().map(|(w, _, _)| w.to_string()).collect()
}

/// Base stop words plus the diff's most common words, elbow-selected
pub fn select_stop_words(texts: &[String]) -> BTreeSet<String> {
    let ranked = ranked_words(texts);
    let base = base_stop_words();

    let with_common = |n: usize| -> BTreeSet<String> {
        let mut words = base.clone();
        words.extend(ranked.iter().take(n).cloned());
        words
    };

    // Tokenise once; each step only adds the next most common word
    let counts = count_tokens(texts);
    let mut stop_words = with_common(MIN_COMMON_WORDS - 1);
    let spreads: Vec<f64> = (MIN_COMMON_WORDS..=MAX_COMMON_WORDS)
        .map(|n| {
            if let Some(word) = ranked.get(n - 1) {
                stop_words.insert(word.clone());
            }
            let vectors = vectorize_counts(&counts, &stop_words, SimilarityStrategy::Count);
            total_column_variance(&vectors.cosine_matrix())
        })
        .collect();

    let n = elbow(&spreads) + MIN_COMMON_WORDS;
    debug!("Ignoring the {} most common words", n);
    with_common(n)
}

/// Offset of the point where the curve drops the most across its neighbours
///
/// Returns 0 when the curve never drops.
pub(crate) fn elbow(curve: &[f64]) -> usize {
    let mut best = 0;
    let mut max_drop = 0.0;
    for i in 1..curve.len().saturating_sub(1) {
        let drop = curve[i - 1] - curve[i + 1];
        if drop > max_drop {
            max_drop = drop;
            best = i;
        }
    }
    best
}

/// Sum of the population variance of every column
pub(crate) fn total_column_variance(matrix: &SimilarityMatrix) -> f64 {
    let n = matrix.size();
    if n == 0 {
        return 0.0;
    }
    (0..n)
        .map(|col| {
            let mean = (0..n).map(|row| matrix.get(row, col)).sum::<f64>() / n as f64;
            (0..n)
                .map(|row| (matrix.get(row, col) - mean).powi(2))
                .sum::<f64>()
                / n as f64
        })
        .sum()
}
