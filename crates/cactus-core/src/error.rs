//! Error types for cactus

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for cactus
#[derive(Debug, Error)]
pub enum CactusError {
    /// Git operation error
    #[error("Git error: {0}")]
    Git(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(String),

    /// Diff bytes could not be interpreted, even after recovery attempts
    #[error("Malformed diff: {0}")]
    MalformedDiff(String),

    /// Nothing is staged
    #[error("No staged changes found, please stage the desired changes")]
    NoStagedChanges,

    /// HEAD does not point to a commit yet
    #[error("Repository has no commits yet; create an initial commit first")]
    UnbornHead,

    /// A cluster source returned clusters that do not cover every hunk exactly once
    #[error("Cluster count mismatch: {0}")]
    ClusterCountMismatch(String),

    /// A cluster source returned a response that does not match the expected structure
    #[error("Malformed cluster response: {0}")]
    MalformedResponse(String),

    /// Remote cluster source failure (transport, HTTP status)
    #[error("Remote error: {0}")]
    Remote(String),

    /// Applying a cluster's patch to the index failed
    #[error("Failed to apply patch for commit {cluster}: {message}")]
    PatchApply { cluster: usize, message: String },

    /// Committing a cluster failed
    #[error("Failed to commit {cluster}: {message}")]
    Commit { cluster: usize, message: String },

    /// The run was interrupted by a signal
    #[error("Interrupted")]
    Interrupted,

    /// Rollback could not restore the pre-run state
    #[error("ROLLBACK FAILED: {message}{}", recovery_hint(.recovery_path))]
    RollbackFailure {
        message: String,
        recovery_path: Option<PathBuf>,
        /// Original staged diff, kept even when no recovery file could be written
        diff: Vec<u8>,
    },

    /// Another run holds the repository lock
    #[error("Another cactus run holds the lock at {0}")]
    Locked(PathBuf),

    /// The user aborted the run
    #[error("Aborted by user")]
    Aborted,

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// External command error
    #[error("Command '{command}' failed: {message}")]
    Command { command: String, message: String },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CactusError>,
    },
}

fn recovery_hint(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(
            " (original staged diff saved to {}; restore with `git apply --cached {}`)",
            path.display(),
            path.display()
        ),
        None => " (no recovery patch could be written)".to_string(),
    }
}

impl CactusError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CactusError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether asking the cluster source again may fix the error
    pub fn is_retryable(&self) -> bool {
        match self {
            CactusError::ClusterCountMismatch(_) | CactusError::MalformedResponse(_) => true,
            CactusError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for CactusError {
    fn from(err: toml::de::Error) -> Self {
        CactusError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for CactusError {
    fn from(err: toml::ser::Error) -> Self {
        CactusError::Toml(err.to_string())
    }
}

/// Result type alias for cactus
pub type Result<T> = std::result::Result<T, CactusError>;
