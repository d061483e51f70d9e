//! Git backend that shells out to the `git` binary

use super::{CommandOutput, GitBackend};
use crate::error::{CactusError, Result};
use crate::types::CommitId;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, trace, warn};

/// Default arguments for `git apply --cached`
pub const DEFAULT_APPLY_ARGS: &[&str] = &["--unidiff-zero", "--ignore-whitespace"];

/// Runs git commands in a repository working directory
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    apply_args: Vec<String>,
    no_verify: bool,
}

impl GitCli {
    /// Create a backend rooted at `workdir`
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            apply_args: DEFAULT_APPLY_ARGS.iter().map(|s| s.to_string()).collect(),
            no_verify: false,
        }
    }

    /// Find the repository containing `path` and root the backend at its top level
    pub fn discover(path: &Path) -> Result<Self> {
        let output = run_git(path, &["rev-parse", "--show-toplevel"], None)?;
        if !output.success() {
            return Err(CactusError::Git(format!(
                "not a git repository: {}",
                output.stderr_text()
            )));
        }
        let top = output.stdout_text().trim().to_string();
        Ok(Self::new(top))
    }

    /// Replace the extra arguments given to `git apply --cached`
    pub fn with_apply_args(mut self, args: Vec<String>) -> Self {
        self.apply_args = args;
        self
    }

    /// Skip commit hooks
    pub fn with_no_verify(mut self, no_verify: bool) -> Self {
        self.no_verify = no_verify;
        self
    }

    /// Repository top level
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Check if git is available
    pub fn is_available() -> bool {
        Self::version().is_some()
    }

    /// Get git version
    pub fn version() -> Option<String> {
        Command::new("git")
            .arg("--version")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| {
                String::from_utf8_lossy(&o.stdout)
                    .trim()
                    .replace("git version ", "")
            })
    }

    /// Run git with optional stdin, whatever the exit status
    pub fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        run_git(&self.workdir, args, stdin)
    }

    /// Run git and fail on a nonzero exit status
    fn checked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let output = self.run(args, stdin)?;
        if !output.success() {
            return Err(CactusError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_text()
            )));
        }
        Ok(output)
    }
}

impl GitBackend for GitCli {
    fn staged_diff(&self, context_lines: usize) -> Result<Vec<u8>> {
        let inter = format!("--inter-hunk-context={}", context_lines);
        let unified = format!("--unified={}", context_lines);
        let output = self.checked(
            &[
                "diff",
                &inter,
                &unified,
                "--minimal",
                "--no-color",
                "--no-ext-diff",
                "-p",
                "--staged",
                "--binary",
            ],
            None,
        )?;
        Ok(output.stdout)
    }

    fn head(&self) -> Result<Option<CommitId>> {
        let output = self.run(&["rev-parse", "--verify", "-q", "HEAD"], None)?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(CommitId::from_string(output.stdout_text())))
    }

    fn reset_to(&self, commit: &CommitId) -> Result<()> {
        self.checked(&["reset", "-q", commit.as_str()], None)?;
        Ok(())
    }

    fn unstage_all(&self) -> Result<()> {
        self.checked(&["reset", "-q"], None)?;
        Ok(())
    }

    fn apply_to_index(&self, patch: &[u8]) -> Result<()> {
        if patch.contains(&b'\r') {
            warn!("Patch contains carriage returns; whitespace-insensitive apply may normalise them");
        }

        let mut file = tempfile::Builder::new()
            .prefix("cactus-")
            .suffix(".patch")
            .tempfile()?;
        file.write_all(patch)?;
        file.flush()?;

        let path = file.path().to_string_lossy().to_string();
        let mut args: Vec<&str> = vec!["apply", "--cached"];
        args.extend(self.apply_args.iter().map(|s| s.as_str()));
        args.push(&path);

        trace!("Applying {} byte patch from {}", patch.len(), path);
        self.checked(&args, None)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<CommitId> {
        let mut args = vec!["commit", "-q", "-F", "-"];
        if self.no_verify {
            args.push("--no-verify");
        }
        self.checked(&args, Some(message.as_bytes()))?;

        self.head()?
            .ok_or_else(|| CactusError::Git("HEAD missing after commit".to_string()))
    }

    fn git_dir(&self) -> Result<PathBuf> {
        let output = self.checked(&["rev-parse", "--absolute-git-dir"], None)?;
        Ok(PathBuf::from(output.stdout_text().trim()))
    }
}

fn run_git(dir: &Path, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
    debug!("git {}", args.join(" "));

    let command_error = |message: String| CactusError::Command {
        command: format!("git {}", args.first().copied().unwrap_or_default()),
        message,
    };

    let mut child = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| command_error(e.to_string()))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input)
            .map_err(|e| command_error(format!("Failed to write to stdin: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| command_error(e.to_string()))?;

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
