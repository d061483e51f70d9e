//! Advisory single-writer lock

use crate::error::{CactusError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name inside the git directory
pub const LOCK_FILE_NAME: &str = "cactus.lock";

/// Exclusive claim on a repository, released on drop
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

impl RepoLock {
    /// Create `<git_dir>/cactus.lock`, failing if another run holds it
    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let path = Self::path_in(git_dir);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CactusError::Locked(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!("Acquired {}", path.display());
        Ok(Self { path })
    }

    /// Where the lock lives for a git directory
    pub fn path_in(git_dir: &Path) -> PathBuf {
        git_dir.join(LOCK_FILE_NAME)
    }

    /// PID recorded in an existing lock file
    pub fn holder(git_dir: &Path) -> Option<u32> {
        fs::read_to_string(Self::path_in(git_dir))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lock = RepoLock::acquire(dir.path()).unwrap();
        assert_eq!(RepoLock::holder(dir.path()), Some(std::process::id()));

        let second = RepoLock::acquire(dir.path());
        assert!(matches!(second, Err(CactusError::Locked(_))));

        drop(lock);
        assert!(!RepoLock::path_in(dir.path()).exists());
        assert!(RepoLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_holder_without_lock() {
        let dir = TempDir::new().unwrap();
        assert_eq!(RepoLock::holder(dir.path()), None);
    }
}
