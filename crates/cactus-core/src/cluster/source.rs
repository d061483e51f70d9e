//! Cluster sources and completeness validation

use crate::diff::DiffDocument;
use crate::error::{CactusError, Result};
use crate::types::HunkIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A group of hunks that becomes one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Commit message
    pub message: String,
    /// Hunks in this commit
    pub hunk_indices: Vec<HunkIndex>,
}

impl Cluster {
    /// Create a cluster
    pub fn new(message: impl Into<String>, hunk_indices: Vec<HunkIndex>) -> Self {
        Self {
            message: message.into(),
            hunk_indices,
        }
    }

    /// Selected hunks as a set
    pub fn index_set(&self) -> BTreeSet<HunkIndex> {
        self.hunk_indices.iter().copied().collect()
    }

    /// First line of the message
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Anything that can split a document into commit-sized clusters
///
/// Implementations are not trusted to be complete: callers check the result
/// with [`validate_coverage`] and ask again on mismatch.
pub trait ClusterSource: Send + Sync {
    /// Short name for logs and progress output
    fn name(&self) -> &str;

    /// Propose clusters, aiming for `requested` of them when given
    fn get_clusters(&self, doc: &DiffDocument, requested: Option<usize>) -> Result<Vec<Cluster>>;
}

/// Check that clusters use every hunk of `doc` exactly once
pub fn validate_coverage(doc: &DiffDocument, clusters: &[Cluster]) -> Result<()> {
    let expected = doc.hunk_count();
    let total: usize = clusters.iter().map(|c| c.hunk_indices.len()).sum();

    let mut seen = BTreeSet::new();
    let mut duplicated = BTreeSet::new();
    let mut out_of_range = BTreeSet::new();
    for index in clusters.iter().flat_map(|c| &c.hunk_indices) {
        if index.get() == 0 || index.get() > expected {
            out_of_range.insert(*index);
        } else if !seen.insert(*index) {
            duplicated.insert(*index);
        }
    }
    let missing: Vec<HunkIndex> = doc.indices().into_iter().filter(|i| !seen.contains(i)).collect();

    if total == expected && duplicated.is_empty() && out_of_range.is_empty() && missing.is_empty() {
        return Ok(());
    }

    let mut problems = vec![format!("{} hunk indices for {} hunks", total, expected)];
    if !missing.is_empty() {
        problems.push(format!("missing {}", list(missing.iter())));
    }
    if !duplicated.is_empty() {
        problems.push(format!("duplicated {}", list(duplicated.iter())));
    }
    if !out_of_range.is_empty() {
        problems.push(format!("unknown {}", list(out_of_range.iter())));
    }
    Err(CactusError::ClusterCountMismatch(problems.join(", ")))
}

fn list<'a>(indices: impl Iterator<Item = &'a HunkIndex>) -> String {
    indices
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sort each cluster's indices and drop empty clusters
///
/// When every cluster is empty (an empty document), the first one is kept so
/// that a run always has at least one cluster.
pub fn normalize_clusters(clusters: Vec<Cluster>) -> Vec<Cluster> {
    let all_empty = clusters.iter().all(|c| c.hunk_indices.is_empty());
    let mut normalized: Vec<Cluster> = clusters
        .into_iter()
        .filter(|c| all_empty || !c.hunk_indices.is_empty())
        .map(|mut c| {
            c.hunk_indices.sort_unstable();
            c
        })
        .collect();
    if all_empty {
        normalized.truncate(1);
    }
    normalized
}

/// Ask `source` for clusters until they cover the document, at most
/// `max_attempts` times
///
/// Retryable errors (count mismatch, malformed response) trigger another
/// attempt; anything else is returned immediately. A result whose cluster
/// count differs from `requested` is accepted with a warning.
pub fn fetch_clusters(
    source: &dyn ClusterSource,
    doc: &DiffDocument,
    requested: Option<usize>,
    max_attempts: usize,
) -> Result<Vec<Cluster>> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("Requesting clusters from {} (attempt {}/{})", source.name(), attempt, max_attempts);

        let result = source
            .get_clusters(doc, requested)
            .and_then(|clusters| validate_coverage(doc, &clusters).map(|_| clusters));

        match result {
            Ok(clusters) => {
                let clusters = normalize_clusters(clusters);
                if let Some(n) = requested {
                    if clusters.len() != n {
                        warn!("Requested {} commits but {} proposed {}", n, source.name(), clusters.len());
                    }
                }
                info!("{} proposed {} commits", source.name(), clusters.len());
                return Ok(clusters);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!("{} returned unusable clusters: {}. Retrying...", source.name(), err);
            }
            Err(err) if err.is_retryable() => {
                return Err(err.with_context(format!(
                    "{} failed to cover every hunk after {} attempts",
                    source.name(),
                    max_attempts
                )));
            }
            Err(err) => return Err(err),
        }
    }
}
