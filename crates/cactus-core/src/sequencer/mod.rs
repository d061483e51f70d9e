//! Transactional commit sequencer
//!
//! A run is split in two phases. [`CommitSequencer::prepare`] snapshots the
//! repository, parses the staged diff and asks a cluster source for commits
//! without touching anything. [`CommitSequencer::execute`] unstages
//! everything and commits the clusters one by one. Any failure from the
//! unstage step onward rolls HEAD and the index back to the snapshot.

pub mod lock;

pub use lock::RepoLock;

use crate::cluster::{fetch_clusters, normalize_clusters, validate_coverage, Cluster, ClusterSource};
use crate::config::Config;
use crate::diff::{DiffDocument, DiffParser, ParserConfig, PatchSequence, DEFAULT_MAX_PARSE_ATTEMPTS};
use crate::error::{CactusError, Result};
use crate::git::GitBackend;
use crate::types::{CommitId, Fingerprint, HunkIndex};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Pre-run repository state used for rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySnapshot {
    /// HEAD before the run
    pub head: CommitId,
    /// Staged diff before the run, byte for byte
    pub diff: Vec<u8>,
}

impl RepositorySnapshot {
    /// Digest of the staged diff
    pub fn digest(&self) -> Fingerprint {
        Fingerprint::of_bytes(&self.diff)
    }
}

/// Sequencer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerOptions {
    /// Context lines for the staged diff
    pub context_lines: usize,
    /// Diff parse recovery attempts
    pub max_parse_attempts: usize,
    /// Cluster source attempts
    pub max_cluster_attempts: usize,
    /// Number of commits to ask for (None lets the source decide)
    pub requested: Option<usize>,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            context_lines: 1,
            max_parse_attempts: DEFAULT_MAX_PARSE_ATTEMPTS,
            max_cluster_attempts: 3,
            requested: None,
        }
    }
}

impl SequencerOptions {
    /// Options from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            context_lines: config.diff.context_lines,
            max_parse_attempts: config.diff.max_parse_attempts,
            max_cluster_attempts: config.cluster.max_attempts,
            requested: None,
        }
    }

    /// Set the requested number of commits
    pub fn with_requested(mut self, requested: Option<usize>) -> Self {
        self.requested = requested;
        self
    }
}

/// A validated plan, ready to execute
#[derive(Debug, Clone)]
pub struct PreparedRun {
    snapshot: RepositorySnapshot,
    document: DiffDocument,
    clusters: Vec<Cluster>,
}

impl PreparedRun {
    /// Build a plan, checking that the clusters cover every hunk exactly once
    pub fn new(
        snapshot: RepositorySnapshot,
        document: DiffDocument,
        clusters: Vec<Cluster>,
    ) -> Result<Self> {
        validate_coverage(&document, &clusters)?;
        Ok(Self {
            snapshot,
            document,
            clusters: normalize_clusters(clusters),
        })
    }

    /// Snapshot taken when the plan was prepared
    pub fn snapshot(&self) -> &RepositorySnapshot {
        &self.snapshot
    }

    /// Parsed staged diff
    pub fn document(&self) -> &DiffDocument {
        &self.document
    }

    /// Clusters in commit order
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Replace the clusters, validating the new ones
    pub fn with_clusters(self, clusters: Vec<Cluster>) -> Result<Self> {
        Self::new(self.snapshot, self.document, clusters)
    }
}

/// One commit created by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedCommit {
    /// New commit id
    pub id: CommitId,
    /// Commit message
    pub message: String,
    /// Hunks it contains
    pub hunk_indices: Vec<HunkIndex>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// HEAD before the run
    pub previous_head: CommitId,
    /// Commits in creation order
    pub commits: Vec<CreatedCommit>,
}

/// Drives snapshot, classification, commits and rollback
pub struct CommitSequencer<'a, G: GitBackend + ?Sized> {
    git: &'a G,
    options: SequencerOptions,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a, G: GitBackend + ?Sized> CommitSequencer<'a, G> {
    /// Create a sequencer over a git backend
    pub fn new(git: &'a G, options: SequencerOptions) -> Self {
        Self {
            git,
            options,
            interrupt: None,
        }
    }

    /// Poll `flag` during the commit loop; a set flag triggers rollback
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Options in use
    pub fn options(&self) -> &SequencerOptions {
        &self.options
    }

    /// Record HEAD and the staged diff
    pub fn snapshot(&self) -> Result<RepositorySnapshot> {
        let head = self.git.head()?.ok_or(CactusError::UnbornHead)?;
        let diff = self.git.staged_diff(self.options.context_lines)?;
        if diff.is_empty() {
            return Err(CactusError::NoStagedChanges);
        }
        debug!(
            "Snapshot at {} with {} staged bytes ({})",
            head.short(),
            diff.len(),
            Fingerprint::of_bytes(&diff)
        );
        Ok(RepositorySnapshot { head, diff })
    }

    /// Snapshot and parse the staged diff
    pub fn capture(&self) -> Result<(RepositorySnapshot, DiffDocument)> {
        let snapshot = self.snapshot()?;
        let parser = DiffParser::with_config(ParserConfig {
            max_attempts: self.options.max_parse_attempts,
        });
        let document = parser.parse(&snapshot.diff)?;
        if document.is_empty() {
            return Err(CactusError::NoStagedChanges);
        }
        let stats = document.stats();
        info!(
            "Staged: {} files, {} hunks (+{} -{})",
            stats.files_changed, stats.hunks, stats.insertions, stats.deletions
        );
        Ok((snapshot, document))
    }

    /// Snapshot, parse and classify without mutating the repository
    pub fn prepare(&self, source: &dyn ClusterSource) -> Result<PreparedRun> {
        let (snapshot, document) = self.capture()?;
        let clusters = fetch_clusters(
            source,
            &document,
            self.options.requested,
            self.options.max_cluster_attempts,
        )?;
        PreparedRun::new(snapshot, document, clusters)
    }

    /// Prepare and execute in one go
    pub fn run(&self, source: &dyn ClusterSource) -> Result<RunReport> {
        let prepared = self.prepare(source)?;
        self.execute(prepared)
    }

    /// Unstage everything and commit each cluster in order
    ///
    /// Fails without touching the repository when another run holds the lock
    /// or the staged state changed since the plan was prepared.
    pub fn execute(&self, run: PreparedRun) -> Result<RunReport> {
        let _lock = RepoLock::acquire(&self.git.git_dir()?)?;
        let PreparedRun {
            snapshot,
            document,
            clusters,
        } = run;

        if self.git.head()?.as_ref() != Some(&snapshot.head)
            || self.git.staged_diff(self.options.context_lines)? != snapshot.diff
        {
            return Err(CactusError::Validation(
                "staged changes or HEAD changed since the commits were proposed; run again"
                    .to_string(),
            ));
        }

        if let Err(e) = self.git.unstage_all() {
            return Err(self.rollback(&snapshot, e));
        }

        let mut sequence = PatchSequence::new(&document);
        let mut commits = Vec::with_capacity(clusters.len());

        for (position, cluster) in clusters.iter().enumerate() {
            let number = position + 1;
            if self.interrupted() {
                return Err(self.rollback(&snapshot, CactusError::Interrupted));
            }

            let patch = sequence.next_patch(&cluster.index_set());
            if let Err(e) = self.git.apply_to_index(&patch) {
                let cause = CactusError::PatchApply {
                    cluster: number,
                    message: e.to_string(),
                };
                return Err(self.rollback(&snapshot, cause));
            }

            let id = match self.git.commit(&cluster.message) {
                Ok(id) => id,
                Err(e) => {
                    let cause = CactusError::Commit {
                        cluster: number,
                        message: e.to_string(),
                    };
                    return Err(self.rollback(&snapshot, cause));
                }
            };
            info!(
                "Committed {} ({} hunks): {}",
                id.short(),
                cluster.hunk_indices.len(),
                cluster.subject()
            );
            commits.push(CreatedCommit {
                id,
                message: cluster.message.clone(),
                hunk_indices: cluster.hunk_indices.clone(),
            });

            if self.interrupted() {
                return Err(self.rollback(&snapshot, CactusError::Interrupted));
            }
        }

        Ok(RunReport {
            previous_head: snapshot.head,
            commits,
        })
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Restore the snapshot and return the error to report
    ///
    /// Returns `cause` when the restore worked, `RollbackFailure` otherwise.
    fn rollback(&self, snapshot: &RepositorySnapshot, cause: CactusError) -> CactusError {
        warn!("{}; rolling back to {}", cause, snapshot.head.short());

        match self.restore(snapshot) {
            Ok(()) => {
                info!("Restored HEAD {} and the staged changes", snapshot.head.short());
                cause
            }
            Err(e) => {
                let recovery_path = self.write_recovery(snapshot);
                error!("Rollback failed: {}", e);
                CactusError::RollbackFailure {
                    message: format!("{} (while handling: {})", e, cause),
                    recovery_path,
                    diff: snapshot.diff.clone(),
                }
            }
        }
    }

    fn restore(&self, snapshot: &RepositorySnapshot) -> Result<()> {
        self.git.reset_to(&snapshot.head)?;
        self.git.apply_to_index(&snapshot.diff)?;

        let head = self.git.head()?;
        if head.as_ref() != Some(&snapshot.head) {
            return Err(CactusError::Validation(format!(
                "HEAD is {} instead of {}",
                head.map(|h| h.to_string()).unwrap_or_else(|| "unborn".to_string()),
                snapshot.head
            )));
        }
        let staged = self.git.staged_diff(self.options.context_lines)?;
        if staged != snapshot.diff {
            return Err(CactusError::Validation(format!(
                "restored staged diff ({}) differs from the original ({})",
                Fingerprint::of_bytes(&staged),
                snapshot.digest()
            )));
        }
        Ok(())
    }

    /// Save the original diff where a human can reapply it
    fn write_recovery(&self, snapshot: &RepositorySnapshot) -> Option<PathBuf> {
        let dir = match self.git.git_dir() {
            Ok(dir) => dir,
            Err(e) => {
                error!("Cannot locate git directory for the recovery patch: {}", e);
                return None;
            }
        };
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("cactus-recovery-{}.patch", stamp));
        match std::fs::write(&path, &snapshot.diff) {
            Ok(()) => {
                error!("Original staged diff saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Failed to save recovery patch {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffParser;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const STAGED: &str = "diff --git a/src/app.rs b/src/app.rs
index 1111111..2222222 100644
--- a/src/app.rs
+++ b/src/app.rs
@@ -1,3 +1,3 @@ use std::io;
 use std::io;
-fn start() {}
+fn start() { run(); }

@@ -20,2 +20,3 @@ fn stop() {
 fn stop() {
+    cleanup();
 }
diff --git a/README.md b/README.md
index 3333333..4444444 100644
--- a/README.md
+++ b/README.md
@@ -1,2 +1,2 @@
-# app
+# App

@@ -9,2 +9,3 @@ Usage
 Usage
+Run `app start`.

";

    /// In-memory repository: a commit list and the staged bytes
    struct FakeGit {
        dir: TempDir,
        state: Mutex<FakeState>,
    }

    struct FakeState {
        head: Option<CommitId>,
        commits: Vec<(CommitId, String, Vec<u8>)>,
        index: Vec<u8>,
        applies: usize,
        fail_applies: Vec<usize>,
        fail_commit: bool,
        lose_git_dir_on_reset: bool,
        git_dir_lost: bool,
        log: Vec<String>,
    }

    impl FakeGit {
        fn new(staged: &str) -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                state: Mutex::new(FakeState {
                    head: Some(CommitId::from_string("base0000")),
                    commits: Vec::new(),
                    index: staged.as_bytes().to_vec(),
                    applies: 0,
                    fail_applies: Vec::new(),
                    fail_commit: false,
                    lose_git_dir_on_reset: false,
                    git_dir_lost: false,
                    log: Vec::new(),
                }),
            }
        }

        fn failing_applies(self, applies: &[usize]) -> Self {
            self.state.lock().unwrap().fail_applies = applies.to_vec();
            self
        }

        fn failing_commit(self) -> Self {
            self.state.lock().unwrap().fail_commit = true;
            self
        }

        /// The git directory disappears once a rollback starts
        fn losing_git_dir_on_reset(self) -> Self {
            self.state.lock().unwrap().lose_git_dir_on_reset = true;
            self
        }

        fn head_now(&self) -> Option<CommitId> {
            self.state.lock().unwrap().head.clone()
        }

        fn commit_messages(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.commits.iter().map(|(_, m, _)| m.clone()).collect()
        }

        fn committed_patch(&self, n: usize) -> String {
            let state = self.state.lock().unwrap();
            String::from_utf8(state.commits[n].2.clone()).unwrap()
        }

        fn log(&self) -> Vec<String> {
            self.state.lock().unwrap().log.clone()
        }
    }

    impl GitBackend for FakeGit {
        fn staged_diff(&self, _context_lines: usize) -> Result<Vec<u8>> {
            Ok(self.state.lock().unwrap().index.clone())
        }

        fn head(&self) -> Result<Option<CommitId>> {
            Ok(self.head_now())
        }

        fn reset_to(&self, commit: &CommitId) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.log.push(format!("reset {}", commit));
            if state.lose_git_dir_on_reset {
                state.git_dir_lost = true;
            }
            if let Some(pos) = state.commits.iter().position(|(id, _, _)| id == commit) {
                state.commits.truncate(pos + 1);
            } else {
                state.commits.clear();
            }
            state.head = Some(commit.clone());
            state.index.clear();
            Ok(())
        }

        fn unstage_all(&self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.log.push("unstage".to_string());
            state.index.clear();
            Ok(())
        }

        fn apply_to_index(&self, patch: &[u8]) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.applies += 1;
            let applies = state.applies;
            state.log.push(format!("apply {}", applies));
            if state.fail_applies.contains(&state.applies) {
                return Err(CactusError::Git("patch does not apply".to_string()));
            }
            DiffParser::new().parse(patch)?;
            state.index.extend_from_slice(patch);
            Ok(())
        }

        fn commit(&self, message: &str) -> Result<CommitId> {
            let mut state = self.state.lock().unwrap();
            state.log.push(format!("commit {}", message));
            if state.fail_commit || state.index.is_empty() {
                return Err(CactusError::Git("commit rejected".to_string()));
            }
            let id = CommitId::from_string(format!("c{:07}", state.commits.len() + 1));
            let staged = std::mem::take(&mut state.index);
            state.commits.push((id.clone(), message.to_string(), staged));
            state.head = Some(id.clone());
            Ok(id)
        }

        fn git_dir(&self) -> Result<PathBuf> {
            if self.state.lock().unwrap().git_dir_lost {
                return Ok(self.dir.path().join("missing"));
            }
            Ok(self.dir.path().to_path_buf())
        }
    }

    /// Returns queued responses and counts calls
    struct Queued {
        responses: Mutex<VecDeque<Vec<Cluster>>>,
        calls: AtomicUsize,
    }

    impl Queued {
        fn new(responses: Vec<Vec<Cluster>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ClusterSource for Queued {
        fn name(&self) -> &str {
            "queued"
        }

        fn get_clusters(&self, _doc: &DiffDocument, _requested: Option<usize>) -> Result<Vec<Cluster>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn cluster(message: &str, indices: &[usize]) -> Cluster {
        Cluster::new(message, indices.iter().map(|&i| HunkIndex(i)).collect())
    }

    fn two_clusters() -> Queued {
        Queued::new(vec![vec![cluster("Start app", &[1, 2]), cluster("Docs", &[3, 4])]])
    }

    fn lock_exists(dir: &Path) -> bool {
        RepoLock::path_in(dir).exists()
    }

    #[test]
    fn test_successful_run() {
        let git = FakeGit::new(STAGED);
        let report = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap();

        assert_eq!(report.previous_head, CommitId::from_string("base0000"));
        assert_eq!(report.commits.len(), 2);
        assert_eq!(git.commit_messages(), vec!["Start app", "Docs"]);
        assert!(git.committed_patch(0).contains("+fn start() { run(); }"));
        assert!(!git.committed_patch(0).contains("README.md"));
        assert!(git.committed_patch(1).contains("+# App"));
        assert!(git.staged_diff(1).unwrap().is_empty());
        assert!(!lock_exists(git.dir.path()));
    }

    #[test]
    fn test_second_apply_failure_rolls_back() {
        let git = FakeGit::new(STAGED).failing_applies(&[2]);
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap_err();

        assert!(matches!(err, CactusError::PatchApply { cluster: 2, .. }));
        assert_eq!(git.head_now(), Some(CommitId::from_string("base0000")));
        assert_eq!(git.staged_diff(1).unwrap(), STAGED.as_bytes());
        assert!(git.commit_messages().is_empty());
        assert_eq!(
            git.log(),
            vec!["unstage", "apply 1", "commit Start app", "apply 2", "reset base0000", "apply 3"]
        );
        assert!(!lock_exists(git.dir.path()));
    }

    #[test]
    fn test_commit_failure_rolls_back() {
        let git = FakeGit::new(STAGED).failing_commit();
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap_err();

        assert!(matches!(err, CactusError::Commit { cluster: 1, .. }));
        assert_eq!(git.staged_diff(1).unwrap(), STAGED.as_bytes());
        assert_eq!(git.head_now(), Some(CommitId::from_string("base0000")));
    }

    #[test]
    fn test_failed_rollback_writes_recovery_patch() {
        let git = FakeGit::new(STAGED).failing_applies(&[2, 3]);
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap_err();

        match err {
            CactusError::RollbackFailure {
                recovery_path: Some(path),
                message,
                diff,
            } => {
                assert!(message.contains("Failed to apply patch for commit 2"));
                assert!(path.starts_with(git.dir.path()));
                assert_eq!(std::fs::read(&path).unwrap(), STAGED.as_bytes());
                assert_eq!(diff, STAGED.as_bytes());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unwritable_recovery_patch_keeps_diff_in_error() {
        let git = FakeGit::new(STAGED)
            .failing_applies(&[2, 3])
            .losing_git_dir_on_reset();
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap_err();

        match err {
            CactusError::RollbackFailure {
                recovery_path: None,
                diff,
                ..
            } => assert_eq!(diff, STAGED.as_bytes()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_interrupt_rolls_back() {
        let git = FakeGit::new(STAGED);
        let flag = Arc::new(AtomicBool::new(true));
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .with_interrupt(flag)
            .run(&two_clusters())
            .unwrap_err();

        assert!(matches!(err, CactusError::Interrupted));
        assert!(git.commit_messages().is_empty());
        assert_eq!(git.staged_diff(1).unwrap(), STAGED.as_bytes());
    }

    #[test]
    fn test_mismatch_retry_then_success() {
        let git = FakeGit::new(STAGED);
        let source = Queued::new(vec![
            vec![cluster("partial", &[1, 2, 3])],
            vec![cluster("Start app", &[1, 2]), cluster("Docs", &[3, 4])],
        ]);
        let report = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&source)
            .unwrap();

        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(report.commits.len(), 2);
    }

    #[test]
    fn test_preconditions_fail_before_mutation() {
        let git = FakeGit::new("");
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap_err();
        assert!(matches!(err, CactusError::NoStagedChanges));

        let git = FakeGit::new(STAGED);
        git.state.lock().unwrap().head = None;
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap_err();
        assert!(matches!(err, CactusError::UnbornHead));
        assert!(git.log().is_empty());
    }

    #[test]
    fn test_locked_repository_is_untouched() {
        let git = FakeGit::new(STAGED);
        let _held = RepoLock::acquire(git.dir.path()).unwrap();
        let err = CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap_err();

        assert!(matches!(err, CactusError::Locked(_)));
        assert!(git.log().is_empty());
    }

    #[test]
    fn test_changed_index_is_rejected() {
        let git = FakeGit::new(STAGED);
        let sequencer = CommitSequencer::new(&git, SequencerOptions::default());
        let prepared = sequencer.prepare(&two_clusters()).unwrap();

        git.state.lock().unwrap().index.extend_from_slice(b"diff --git a/x b/x\n");
        let err = sequencer.execute(prepared).unwrap_err();
        assert!(matches!(err, CactusError::Validation(_)));
        assert!(git.log().is_empty());
    }

    #[test]
    fn test_prepared_run_rejects_incomplete_clusters() {
        let git = FakeGit::new(STAGED);
        let sequencer = CommitSequencer::new(&git, SequencerOptions::default());
        let prepared = sequencer.prepare(&two_clusters()).unwrap();
        assert_eq!(prepared.clusters().len(), 2);
        assert_eq!(prepared.snapshot().diff, STAGED.as_bytes());

        let err = prepared.with_clusters(vec![cluster("only", &[1])]).unwrap_err();
        assert!(matches!(err, CactusError::ClusterCountMismatch(_)));
    }

    #[test]
    fn test_structural_changes_ride_with_first_commit() {
        let staged = format!(
            "{}diff --git a/old.txt b/new.txt\nsimilarity index 100%\nrename from old.txt\nrename to new.txt\n",
            STAGED
        );
        let git = FakeGit::new(&staged);
        CommitSequencer::new(&git, SequencerOptions::default())
            .run(&two_clusters())
            .unwrap();

        assert!(git.committed_patch(0).contains("rename from old.txt\nrename to new.txt\n"));
        assert!(!git.committed_patch(1).contains("rename from"));
    }
}
