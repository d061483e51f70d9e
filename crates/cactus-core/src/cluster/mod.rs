//! Hunk clustering
//!
//! Scores hunk similarity, groups hunks with agglomerative clustering and
//! defines the contract every cluster source (local or remote) satisfies.

pub mod agglomerative;
pub mod local;
pub mod payload;
pub mod similarity;
pub mod source;
pub mod stopwords;

pub use agglomerative::{ClusterEngine, ClusterTarget};
pub use local::{LocalClusterSource, Partition, DEFAULT_SIMILARITY_THRESHOLD};
pub use payload::{FileContext, HunkPayload, PromptPayload};
pub use similarity::{SimilarityEngine, SimilarityMatrix, SimilarityStrategy};
pub use source::{fetch_clusters, normalize_clusters, validate_coverage, Cluster, ClusterSource};
