//! Core type definitions for cactus

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a hunk within a diff document
///
/// Indices are 1-based and assigned in document order, so a document with
/// `n` hunks uses exactly `1..=n`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct HunkIndex(pub usize);

impl HunkIndex {
    /// Index of the first hunk in a document
    pub const FIRST: HunkIndex = HunkIndex(1);

    /// Build an index from a 0-based position
    pub fn from_position(position: usize) -> Self {
        HunkIndex(position + 1)
    }

    /// 0-based position, for indexing into ordered hunk lists
    pub fn position(self) -> usize {
        self.0.saturating_sub(1)
    }

    /// Raw index value
    pub fn get(self) -> usize {
        self.0
    }

    /// The index following this one
    pub fn next(self) -> Self {
        HunkIndex(self.0 + 1)
    }
}

impl fmt::Display for HunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a commit (a full or abbreviated object name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    /// Create from the output of `git rev-parse`
    pub fn from_string(s: impl Into<String>) -> Self {
        CommitId(s.into().trim().to_string())
    }

    /// Get the string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content digest used to compare hunks and snapshots by content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Digest a sequence of byte chunks
    pub fn of_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for chunk in chunks {
            hasher.update(chunk);
            hasher.update(b"\n");
        }
        Fingerprint(hasher.finalize().to_hex()[..16].to_string())
    }

    /// Digest a single byte buffer
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Fingerprint(blake3::hash(bytes).to_hex()[..16].to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
