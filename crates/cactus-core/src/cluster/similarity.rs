//! Hunk similarity
//!
//! Turns the changed lines of each hunk into normalised text and scores every
//! pair of hunks in `[0, 1]`. All strategies are deterministic: the same input
//! always produces the same matrix.

use crate::diff::Hunk;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

/// How pairs of hunks are scored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityStrategy {
    /// Cosine over raw term counts
    #[default]
    Count,
    /// Cosine over TF-IDF weights
    Tfidf,
    /// Token-set intersection over union
    Jaccard,
    /// Fuzzy token-set ratio
    Fuzzy,
}

impl SimilarityStrategy {
    /// Every strategy, in display order
    pub const ALL: [SimilarityStrategy; 4] = [
        SimilarityStrategy::Count,
        SimilarityStrategy::Tfidf,
        SimilarityStrategy::Jaccard,
        SimilarityStrategy::Fuzzy,
    ];

    /// Configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityStrategy::Count => "count",
            SimilarityStrategy::Tfidf => "tfidf",
            SimilarityStrategy::Jaccard => "jaccard",
            SimilarityStrategy::Fuzzy => "fuzzy",
        }
    }

    /// Whether the strategy works on term vectors
    pub fn is_vector(&self) -> bool {
        matches!(self, SimilarityStrategy::Count | SimilarityStrategy::Tfidf)
    }
}

impl fmt::Display for SimilarityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(SimilarityStrategy::Count),
            "tfidf" | "tf-idf" => Ok(SimilarityStrategy::Tfidf),
            "jaccard" => Ok(SimilarityStrategy::Jaccard),
            "fuzzy" => Ok(SimilarityStrategy::Fuzzy),
            other => Err(format!(
                "unknown similarity strategy '{}' (expected count, tfidf, jaccard or fuzzy)",
                other
            )),
        }
    }
}

/// Symmetric square matrix of similarity scores with a unit diagonal
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    size: usize,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    /// Build a matrix from a scoring function called once per unordered pair
    pub fn from_fn(size: usize, mut score: impl FnMut(usize, usize) -> f64) -> Self {
        let mut values = vec![0.0; size * size];
        for i in 0..size {
            values[i * size + i] = 1.0;
            for j in (i + 1)..size {
                let s = score(i, j).clamp(0.0, 1.0);
                values[i * size + j] = s;
                values[j * size + i] = s;
            }
        }
        Self { size, values }
    }

    /// Number of rows (and columns)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Similarity of a pair
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    /// Distance of a pair, `1 - similarity`
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        1.0 - self.get(i, j)
    }
}

/// Changed lines of a hunk as normalised text
///
/// Context lines are skipped. Runs of spaces collapse, and every character
/// that is neither ASCII alphanumeric nor whitespace becomes a space.
pub fn modified_text(hunk: &Hunk) -> String {
    hunk.changed_lines()
        .map(|line| normalize_line(&line.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last_space = false;
    for c in line.chars() {
        let c = if c.is_ascii_alphanumeric() || c.is_whitespace() {
            c
        } else {
            ' '
        };
        if c == ' ' && last_space {
            continue;
        }
        last_space = c == ' ';
        out.push(c);
    }
    out.trim().to_string()
}

/// Vectoriser tokens: runs of at least two ASCII alphanumerics
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 2)
}

/// Token counts of one text
pub(crate) type TokenCounts<'a> = BTreeMap<&'a str, usize>;

/// Count the tokens of every text once
pub(crate) fn count_tokens(texts: &[String]) -> Vec<TokenCounts<'_>> {
    texts
        .iter()
        .map(|text| {
            let mut counts = TokenCounts::new();
            for token in tokenize(text) {
                *counts.entry(token).or_insert(0) += 1;
            }
            counts
        })
        .collect()
}

/// Sparse term vectors over a shared vocabulary
///
/// Each row holds `(column, weight)` pairs sorted by column, zeros omitted.
pub(crate) struct TermVectors {
    vocabulary: usize,
    rows: Vec<Vec<(usize, f64)>>,
}

impl TermVectors {
    /// Fewer than two terms, or nothing but empty rows
    pub(crate) fn is_degenerate(&self) -> bool {
        self.vocabulary < 2 || self.rows.iter().all(|r| r.is_empty())
    }

    /// Pairwise cosine similarity
    pub(crate) fn cosine_matrix(&self) -> SimilarityMatrix {
        let norms: Vec<f64> = self.rows.iter().map(|r| norm(r)).collect();
        SimilarityMatrix::from_fn(self.rows.len(), |i, j| {
            if norms[i] == 0.0 || norms[j] == 0.0 {
                return 0.0;
            }
            sparse_dot(&self.rows[i], &self.rows[j]) / (norms[i] * norms[j])
        })
    }
}

fn norm(row: &[(usize, f64)]) -> f64 {
    row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt()
}

/// Dot product of two column-sorted sparse rows
fn sparse_dot(a: &[(usize, f64)], b: &[(usize, f64)]) -> f64 {
    let (mut i, mut j, mut dot) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot
}

/// Count or TF-IDF vectors of `texts`, ignoring `stop_words`
pub(crate) fn vectorize(
    texts: &[String],
    stop_words: &BTreeSet<String>,
    strategy: SimilarityStrategy,
) -> TermVectors {
    vectorize_counts(&count_tokens(texts), stop_words, strategy)
}

/// Count or TF-IDF vectors from precomputed token counts
pub(crate) fn vectorize_counts(
    counts: &[TokenCounts<'_>],
    stop_words: &BTreeSet<String>,
    strategy: SimilarityStrategy,
) -> TermVectors {
    let mut vocabulary: BTreeMap<&str, usize> = BTreeMap::new();
    for row in counts {
        for token in row.keys() {
            if !stop_words.contains(*token) {
                vocabulary.insert(*token, 0);
            }
        }
    }
    for (slot, column) in vocabulary.values_mut().enumerate() {
        *column = slot;
    }

    let mut rows: Vec<Vec<(usize, f64)>> = counts
        .iter()
        .map(|row| {
            // Keys iterate in vocabulary order, so columns come out sorted
            row.iter()
                .filter_map(|(token, &n)| vocabulary.get(token).map(|&col| (col, n as f64)))
                .collect()
        })
        .collect();

    if strategy == SimilarityStrategy::Tfidf {
        apply_tfidf(&mut rows, vocabulary.len());
    }

    TermVectors {
        vocabulary: vocabulary.len(),
        rows,
    }
}

/// Smoothed idf weighting followed by L2 normalisation
fn apply_tfidf(rows: &mut [Vec<(usize, f64)>], columns: usize) {
    let n = rows.len() as f64;
    let mut df = vec![0usize; columns];
    for row in rows.iter() {
        for &(col, _) in row {
            df[col] += 1;
        }
    }
    let idf: Vec<f64> = df
        .iter()
        .map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0)
        .collect();

    for row in rows.iter_mut() {
        for (col, v) in row.iter_mut() {
            *v *= idf[*col];
        }
        let norm = norm(row);
        if norm > 0.0 {
            row.iter_mut().for_each(|(_, v)| *v /= norm);
        }
    }
}

/// Token-set intersection over union; 0 when both sets are empty
pub fn jaccard(a: &str, b: &str) -> f64 {
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Fuzzy token-set ratio in `[0, 1]`
///
/// Compares the sorted shared tokens against each side's sorted shared plus
/// remaining tokens and keeps the best indel ratio. Case is ignored.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let shared = join(left.intersection(&right));
    let only_left = join(left.difference(&right));
    let only_right = join(right.difference(&left));

    let with_left = join_nonempty(&shared, &only_left);
    let with_right = join_nonempty(&shared, &only_right);

    [
        indel_ratio(&shared, &with_left),
        indel_ratio(&shared, &with_right),
        indel_ratio(&with_left, &with_right),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

fn join<S: AsRef<str>>(words: impl Iterator<Item = S>) -> String {
    words
        .map(|w| w.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

/// `2 * matches / total length`; 0 when either side is empty
fn indel_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    similar::TextDiff::from_chars(a, b).ratio() as f64
}

/// Scores hunks with one strategy and a stop-word set
#[derive(Debug, Clone, Default)]
pub struct SimilarityEngine {
    strategy: SimilarityStrategy,
    stop_words: BTreeSet<String>,
}

impl SimilarityEngine {
    /// Create an engine without stop words
    pub fn new(strategy: SimilarityStrategy) -> Self {
        Self {
            strategy,
            stop_words: BTreeSet::new(),
        }
    }

    /// Replace the stop-word set used by vector strategies
    pub fn with_stop_words(mut self, stop_words: BTreeSet<String>) -> Self {
        self.stop_words = stop_words;
        self
    }

    /// Configured strategy
    pub fn strategy(&self) -> SimilarityStrategy {
        self.strategy
    }

    /// Similarity matrix over the changed lines of `hunks`
    pub fn build_matrix(&self, hunks: &[&Hunk]) -> SimilarityMatrix {
        let texts: Vec<String> = hunks.iter().map(|h| modified_text(h)).collect();
        self.build_matrix_from_texts(&texts)
    }

    /// Similarity matrix over already normalised texts
    ///
    /// Vector strategies fall back to the fuzzy ratio when the vocabulary is
    /// degenerate.
    pub fn build_matrix_from_texts(&self, texts: &[String]) -> SimilarityMatrix {
        if self.strategy.is_vector() {
            let vectors = vectorize(texts, &self.stop_words, self.strategy);
            if !vectors.is_degenerate() {
                trace!("Scoring {} hunks with {}", texts.len(), self.strategy);
                return vectors.cosine_matrix();
            }
            debug!(
                "Degenerate {} vectors for {} hunks, falling back to fuzzy matching",
                self.strategy,
                texts.len()
            );
        }

        match self.strategy {
            SimilarityStrategy::Jaccard => {
                SimilarityMatrix::from_fn(texts.len(), |i, j| jaccard(&texts[i], &texts[j]))
            }
            _ => SimilarityMatrix::from_fn(texts.len(), |i, j| {
                token_set_ratio(&texts[i], &texts[j])
            }),
        }
    }

    /// Strategy actually used for `texts`
    pub fn effective_strategy(&self, texts: &[String]) -> SimilarityStrategy {
        if self.strategy.is_vector()
            && vectorize(texts, &self.stop_words, self.strategy).is_degenerate()
        {
            return SimilarityStrategy::Fuzzy;
        }
        self.strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Line, LineType, Range};
    use crate::types::HunkIndex;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn assert_well_formed(matrix: &SimilarityMatrix) {
        for i in 0..matrix.size() {
            assert_eq!(matrix.get(i, i), 1.0);
            for j in 0..matrix.size() {
                let v = matrix.get(i, j);
                assert!((0.0..=1.0).contains(&v), "({i},{j}) = {v}");
                assert_eq!(v, matrix.get(j, i));
            }
        }
    }

    #[test]
    fn test_modified_text_skips_context_and_punctuation() {
        let hunk = Hunk {
            index: HunkIndex(1),
            file: 0,
            header: b"@@ -1,3 +1,3 @@".to_vec(),
            old_range: Range::new(1, 3),
            new_range: Range::new(1, 3),
            lines: vec![
                Line::new(LineType::Context, "keep_me();"),
                Line::new(LineType::Deleted, "let  x = foo(1);"),
                Line::new(LineType::Added, "let x = bar(2, \"s\");"),
            ],
        };
        assert_eq!(modified_text(&hunk), "let x foo 1\nlet x bar 2 s");
    }

    #[test]
    fn test_tokenize_drops_single_characters() {
        let tokens: Vec<&str> = tokenize("let x = parse_config(a1)").collect();
        assert_eq!(tokens, vec!["let", "parse", "config", "a1"]);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("TFIDF".parse::<SimilarityStrategy>().unwrap(), SimilarityStrategy::Tfidf);
        assert_eq!("fuzzy".parse::<SimilarityStrategy>().unwrap(), SimilarityStrategy::Fuzzy);
        assert!("cosine".parse::<SimilarityStrategy>().is_err());
        for strategy in SimilarityStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<SimilarityStrategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn test_count_cosine() {
        let engine = SimilarityEngine::new(SimilarityStrategy::Count);
        let m = engine.build_matrix_from_texts(&texts(&[
            "parse config file",
            "parse config value",
            "render widget",
        ]));
        assert_well_formed(&m);
        assert!((m.get(0, 1) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.get(0, 2), 0.0);
    }

    #[test]
    fn test_tfidf_downweights_shared_terms() {
        let input = texts(&["parse config file", "parse config value", "parse widget"]);
        let count = SimilarityEngine::new(SimilarityStrategy::Count).build_matrix_from_texts(&input);
        let tfidf = SimilarityEngine::new(SimilarityStrategy::Tfidf).build_matrix_from_texts(&input);
        assert_well_formed(&tfidf);
        assert!(tfidf.get(0, 2) < count.get(0, 2));
    }

    #[test]
    fn test_stop_words_are_ignored() {
        let input = texts(&["the parser", "the renderer"]);
        let plain = SimilarityEngine::new(SimilarityStrategy::Count).build_matrix_from_texts(&input);
        assert!(plain.get(0, 1) > 0.0);

        let stop: BTreeSet<String> = ["the".to_string()].into_iter().collect();
        let filtered = SimilarityEngine::new(SimilarityStrategy::Count)
            .with_stop_words(stop)
            .build_matrix_from_texts(&input);
        assert_eq!(filtered.get(0, 1), 0.0);
    }

    #[test]
    fn test_degenerate_vectors_fall_back_to_fuzzy() {
        let engine = SimilarityEngine::new(SimilarityStrategy::Count);
        let input = texts(&["x", "x y"]);
        assert_eq!(engine.effective_strategy(&input), SimilarityStrategy::Fuzzy);

        let input = texts(&["alpha beta", "beta gamma"]);
        assert_eq!(engine.effective_strategy(&input), SimilarityStrategy::Count);
    }

    #[test]
    fn test_sparse_dot_skips_unshared_columns() {
        let a = [(0, 1.0), (3, 2.0), (7, 1.0)];
        let b = [(1, 5.0), (3, 4.0), (7, 3.0), (9, 1.0)];
        assert_eq!(sparse_dot(&a, &b), 11.0);
        assert_eq!(sparse_dot(&a, &[]), 0.0);
    }

    #[test]
    fn test_rows_store_only_present_terms() {
        // Every text uses its own words, so the vocabulary is far wider than any row
        let input: Vec<String> = (0..400)
            .map(|i| format!("shared word{i} other{i} third{i}"))
            .collect();
        let vectors = vectorize(&input, &BTreeSet::new(), SimilarityStrategy::Count);
        assert_eq!(vectors.vocabulary, 1 + 3 * 400);
        assert!(vectors.rows.iter().all(|row| row.len() == 4));
        assert!(vectors
            .rows
            .iter()
            .all(|row| row.windows(2).all(|w| w[0].0 < w[1].0)));

        let m = vectors.cosine_matrix();
        assert_eq!(m.size(), 400);
        assert!((m.get(0, 399) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_counts_are_reusable_across_stop_word_sets() {
        let input = texts(&["the parser reads the file", "the renderer draws", "parser file"]);
        let counts = count_tokens(&input);
        for stop in [vec![], vec!["the"], vec!["the", "parser"]] {
            let stop: BTreeSet<String> = stop.into_iter().map(String::from).collect();
            for strategy in [SimilarityStrategy::Count, SimilarityStrategy::Tfidf] {
                let reused = vectorize_counts(&counts, &stop, strategy).cosine_matrix();
                let fresh = vectorize(&input, &stop, strategy).cosine_matrix();
                assert_eq!(reused, fresh);
            }
        }
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("a b c", "b c d"), 0.5);
        assert_eq!(jaccard("", ""), 0.0);
        assert_eq!(jaccard("same", "same"), 1.0);
    }

    #[test]
    fn test_token_set_ratio() {
        assert_eq!(token_set_ratio("fuzzy wuzzy was a bear", "wuzzy fuzzy was a bear"), 1.0);
        // One side's tokens are a subset of the other's
        assert_eq!(token_set_ratio("config parse", "parse config extra words"), 1.0);
        assert_eq!(token_set_ratio("", "anything"), 0.0);
        let partial = token_set_ratio("render frame", "parse config");
        assert!(partial < 0.5);
    }

    #[test]
    fn test_matrix_is_deterministic() {
        let input = texts(&["parse config file", "parse value", "widget frame", "frame render"]);
        for strategy in SimilarityStrategy::ALL {
            let engine = SimilarityEngine::new(strategy);
            let a = engine.build_matrix_from_texts(&input);
            let b = engine.build_matrix_from_texts(&input);
            assert_eq!(a, b);
            assert_well_formed(&a);
        }
    }
}
