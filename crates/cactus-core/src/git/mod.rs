//! Version-control boundary
//!
//! The sequencer only talks to git through [`GitBackend`]. [`GitCli`] is the
//! real implementation; tests use in-memory fakes.

mod cli;

pub use cli::{GitCli, DEFAULT_APPLY_ARGS};

use crate::error::Result;
use crate::types::CommitId;
use std::borrow::Cow;
use std::path::PathBuf;

/// Captured result of an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code (None when killed by a signal)
    pub status: Option<i32>,
    /// Raw standard output
    pub stdout: Vec<u8>,
    /// Raw standard error
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Standard output as text
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Standard error as trimmed text
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Git operations used by a run
pub trait GitBackend {
    /// Staged changes as unified-diff bytes
    fn staged_diff(&self, context_lines: usize) -> Result<Vec<u8>>;

    /// Current HEAD commit, or None for a repository without commits
    fn head(&self) -> Result<Option<CommitId>>;

    /// Move HEAD and the index to `commit`, leaving the working tree alone
    fn reset_to(&self, commit: &CommitId) -> Result<()>;

    /// Reset the index to HEAD
    fn unstage_all(&self) -> Result<()>;

    /// Apply patch bytes to the index only
    fn apply_to_index(&self, patch: &[u8]) -> Result<()>;

    /// Commit the index and return the new HEAD
    fn commit(&self, message: &str) -> Result<CommitId>;

    /// The repository's git directory
    fn git_dir(&self) -> Result<PathBuf>;
}
