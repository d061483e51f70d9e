//! Offline cluster source built on the similarity and cluster engines

use super::agglomerative::{ClusterEngine, ClusterTarget};
use super::similarity::{modified_text, SimilarityEngine, SimilarityStrategy};
use super::source::{Cluster, ClusterSource};
use super::stopwords::{base_stop_words, select_stop_words};
use crate::diff::{DiffDocument, Hunk, LineType};
use crate::error::Result;
use crate::types::HunkIndex;
use std::path::Path;
use tracing::debug;

/// Default similarity a pair needs to share a commit when no count is requested
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;

const MAX_NAMED_FILES: usize = 3;

/// How a document was split
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// Too few hunks to compare; everything forms one group
    Trivial(Vec<HunkIndex>),
    /// Groups found by agglomerative clustering, ordered by smallest index
    Clustered(Vec<Vec<HunkIndex>>),
}

impl Partition {
    /// The groups, trivial or not
    pub fn into_groups(self) -> Vec<Vec<HunkIndex>> {
        match self {
            Partition::Trivial(all) => vec![all],
            Partition::Clustered(groups) => groups,
        }
    }
}

/// Clusters hunks by text similarity, without any external service
#[derive(Debug, Clone)]
pub struct LocalClusterSource {
    strategy: SimilarityStrategy,
    threshold: f64,
    auto_stop_words: bool,
}

impl Default for LocalClusterSource {
    fn default() -> Self {
        Self::new(SimilarityStrategy::default())
    }
}

impl LocalClusterSource {
    /// Create a source with the default threshold and automatic stop words
    pub fn new(strategy: SimilarityStrategy) -> Self {
        Self {
            strategy,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            auto_stop_words: true,
        }
    }

    /// Set the similarity threshold used when no count is requested
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Enable or disable elbow-selected common-word filtering
    pub fn with_auto_stop_words(mut self, enabled: bool) -> Self {
        self.auto_stop_words = enabled;
        self
    }

    /// Split the document's hunks into groups
    ///
    /// Documents with at most two hunks are never scored.
    pub fn partition(&self, doc: &DiffDocument, requested: Option<usize>) -> Partition {
        let hunks: Vec<&Hunk> = doc.hunks().collect();
        if hunks.len() <= 2 {
            return Partition::Trivial(doc.indices());
        }

        let texts: Vec<String> = hunks.iter().map(|h| modified_text(h)).collect();
        let stop_words = if self.auto_stop_words && self.strategy.is_vector() {
            select_stop_words(&texts)
        } else {
            base_stop_words()
        };
        let matrix = SimilarityEngine::new(self.strategy)
            .with_stop_words(stop_words)
            .build_matrix_from_texts(&texts);

        let target = match requested {
            Some(n) => ClusterTarget::Count(n.min(hunks.len())),
            None => ClusterTarget::SimilarityThreshold(self.threshold),
        };
        let groups = ClusterEngine::new()
            .cluster(&matrix, target)
            .into_iter()
            .map(|group| group.into_iter().map(|pos| hunks[pos].index).collect())
            .collect();

        Partition::Clustered(groups)
    }
}

impl ClusterSource for LocalClusterSource {
    fn name(&self) -> &str {
        "local clustering"
    }

    fn get_clusters(&self, doc: &DiffDocument, requested: Option<usize>) -> Result<Vec<Cluster>> {
        let partition = self.partition(doc, requested);
        if let Partition::Trivial(_) = partition {
            debug!("{} hunks, skipping similarity scoring", doc.hunk_count());
        }

        Ok(partition
            .into_groups()
            .into_iter()
            .map(|indices| Cluster::new(describe(doc, &indices), indices))
            .collect())
    }
}

/// Short commit message naming the verb and the touched files
fn describe(doc: &DiffDocument, indices: &[HunkIndex]) -> String {
    let hunks: Vec<&Hunk> = indices.iter().filter_map(|&i| doc.hunk(i)).collect();

    let mut files: Vec<&str> = Vec::new();
    for hunk in &hunks {
        let path = doc.file_of(hunk).display_path();
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);
        if !files.contains(&name) {
            files.push(name);
        }
    }
    if files.is_empty() {
        files.extend(doc.files.iter().map(|f| f.display_path()));
    }

    let (mut added, mut removed) = (0, 0);
    for line in hunks.iter().flat_map(|h| h.changed_lines()) {
        match line.line_type {
            LineType::Added => added += 1,
            LineType::Deleted => removed += 1,
            _ => {}
        }
    }
    let verb = match (added, removed) {
        (_, 0) if added > 0 => "Add",
        (0, _) if removed > 0 => "Remove",
        _ => "Update",
    };

    let mut subject = files
        .iter()
        .take(MAX_NAMED_FILES)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if files.len() > MAX_NAMED_FILES {
        subject.push_str(&format!(" and {} more", files.len() - MAX_NAMED_FILES));
    }
    if subject.is_empty() {
        return format!("{} staged changes", verb);
    }
    format!("{} {}", verb, subject)
}
