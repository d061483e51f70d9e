//! Generate command
//!
//! Propose commits for the staged changes, let the user review them, then
//! commit each cluster with rollback on failure.

use anyhow::{bail, Context, Result};
use cactus_core::cluster::{fetch_clusters, Cluster, ClusterSource, LocalClusterSource, SimilarityStrategy};
use cactus_core::config::{ClusterBackend, Config};
use cactus_core::git::GitCli;
use cactus_core::review::{ProposalReviewer, ReviewDecision, ReviewLoop};
use cactus_core::sequencer::{CommitSequencer, RunReport, SequencerOptions};
use cactus_core::CactusError;
use cactus_remote::RemoteClusterSource;
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use super::config;

/// Arguments for the generate command
#[derive(Debug, Clone, Default, Args)]
pub struct GenerateArgs {
    /// Number of commits to create (the source decides when omitted)
    #[arg(value_parser = parse_count)]
    pub count: Option<usize>,

    /// Cluster locally instead of asking a hosted model
    #[arg(long)]
    pub local: bool,

    /// Similarity strategy for local clustering (count, tfidf, jaccard, fuzzy)
    #[arg(long)]
    pub strategy: Option<SimilarityStrategy>,

    /// Similarity needed to share a commit when no count is given (local only)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Model used for remote clustering
    #[arg(long)]
    pub model: Option<String>,

    /// Context lines around each hunk
    #[arg(long = "context-size")]
    pub context_size: Option<usize>,

    /// Accept the first proposal without reviewing it
    #[arg(short, long)]
    pub yes: bool,
}

fn parse_count(value: &str) -> std::result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("the number of commits must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("'{}' is not a number of commits", value)),
    }
}

impl GenerateArgs {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply_to(&self, config: &mut Config) {
        if self.local || self.strategy.is_some() || self.threshold.is_some() {
            config.cluster.backend = ClusterBackend::Local;
        }
        if let Some(strategy) = self.strategy {
            config.cluster.strategy = strategy;
        }
        if let Some(threshold) = self.threshold {
            config.cluster.similarity_threshold = threshold;
        }
        if let Some(model) = &self.model {
            config.remote.model = model.clone();
        }
        if let Some(context) = self.context_size {
            config.diff.context_lines = context;
        }
    }
}

/// Execute the generate command
pub fn execute(args: GenerateArgs, config_path: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let git = GitCli::discover(&cwd).context("cactus must run inside a git repository")?;
    let root = git.workdir().to_path_buf();

    let mut config = config::load(config_path, Some(root.as_path()))?.config;
    args.apply_to(&mut config);
    config.validate()?;

    if !args.yes && !console::Term::stdout().is_term() {
        bail!("Not running in a terminal; pass --yes to accept the first proposal");
    }

    let git = git
        .with_apply_args(config.git.apply_args.clone())
        .with_no_verify(config.git.no_verify);
    let source = build_source(&config, &root)?;
    let interrupt = Arc::new(AtomicBool::new(false));

    let options = SequencerOptions::from_config(&config).with_requested(args.count);
    let max_attempts = options.max_cluster_attempts;
    let sequencer = CommitSequencer::new(&git, options).with_interrupt(Arc::clone(&interrupt));

    let spinner = spinner(format!("Asking {} for commits...", source.name()));
    let prepared = sequencer.prepare(source.as_ref());
    spinner.finish_and_clear();
    let prepared = prepared?;

    let stats = prepared.document().stats();
    println!(
        "{} {} files, {} hunks ({}, {})",
        "Staged:".bold(),
        stats.files_changed,
        stats.hunks,
        format!("+{}", stats.insertions).green(),
        format!("-{}", stats.deletions).red()
    );

    let prepared = if args.yes {
        print_clusters(prepared.clusters());
        prepared
    } else {
        let accepted = {
            let document = prepared.document();
            let mut first = Some(prepared.clusters().to_vec());
            let mut review = ReviewLoop::new(
                |requested| match first.take() {
                    Some(clusters) => Ok(clusters),
                    None => {
                        let spinner = self::spinner(format!("Asking {} again...", source.name()));
                        let result = fetch_clusters(source.as_ref(), document, requested, max_attempts);
                        spinner.finish_and_clear();
                        result
                    }
                },
                args.count,
            );
            match review.run(&mut TerminalReviewer) {
                Err(CactusError::Aborted) => {
                    println!("{}", "Aborted. Nothing was committed.".yellow());
                    return Ok(());
                }
                other => other?,
            }
        };
        prepared.with_clusters(accepted)?
    };

    register_interrupt(&interrupt)?;
    match sequencer.execute(prepared) {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(err @ CactusError::RollbackFailure { .. }) => {
            eprintln!(
                "{}",
                "The repository could not be restored automatically. Do not discard the recovery patch."
                    .red()
                    .bold()
            );
            if let Err(e) = dump_unsaved_diff(&err, &mut std::io::stderr().lock()) {
                tracing::error!("Failed to print the original staged diff: {}", e);
            }
            Err(err.into())
        }
        Err(
            err @ (CactusError::PatchApply { .. }
            | CactusError::Commit { .. }
            | CactusError::Interrupted),
        ) => {
            eprintln!(
                "{} Staged changes were restored to their original state.",
                "↺".yellow()
            );
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Print the original staged diff of a failed rollback that has no recovery file
///
/// Returns whether anything was written.
fn dump_unsaved_diff(err: &CactusError, out: &mut impl Write) -> std::io::Result<bool> {
    let CactusError::RollbackFailure {
        recovery_path: None,
        diff,
        ..
    } = err
    else {
        return Ok(false);
    };
    writeln!(out, "----- original staged diff (restore with `git apply --cached`) -----")?;
    out.write_all(diff)?;
    if !diff.ends_with(b"\n") {
        writeln!(out)?;
    }
    writeln!(out, "----- end of original staged diff -----")?;
    Ok(true)
}

/// Cluster source selected by configuration
fn build_source(config: &Config, root: &Path) -> Result<Box<dyn ClusterSource>> {
    let source: Box<dyn ClusterSource> = match config.cluster.backend {
        ClusterBackend::Local => Box::new(
            LocalClusterSource::new(config.cluster.strategy)
                .with_threshold(config.cluster.similarity_threshold)
                .with_auto_stop_words(config.cluster.auto_stop_words),
        ),
        ClusterBackend::Remote => Box::new(RemoteClusterSource::from_config(&config.remote, root)?),
    };
    tracing::info!("Using {}", source.name());
    Ok(source)
}

/// Raise `flag` on SIGINT or SIGTERM instead of exiting
///
/// Installed only for the commit loop, so the sequencer can roll back.
fn register_interrupt(flag: &Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag::register;

    for signal in [SIGINT, SIGTERM] {
        register(signal, Arc::clone(flag)).context("Failed to register signal handler")?;
    }
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_clusters(clusters: &[Cluster]) {
    println!();
    for (i, cluster) in clusters.iter().enumerate() {
        let hunks: Vec<String> = cluster.hunk_indices.iter().map(|h| h.to_string()).collect();
        println!(
            "  {} {} {}",
            format!("{:>2}.", i + 1).bold(),
            cluster.subject(),
            format!("[hunks {}]", hunks.join(", ")).dimmed()
        );
    }
    println!();
}

fn print_report(report: &RunReport) {
    for commit in &report.commits {
        println!(
            "{} {} {}",
            "✓".green(),
            commit.id.short().yellow(),
            commit.message.lines().next().unwrap_or_default()
        );
    }
    println!(
        "\n{} {} commits created on top of {}",
        "Done:".bold(),
        report.commits.len(),
        report.previous_head.short()
    );
}

/// Reviews proposals with an interactive menu
struct TerminalReviewer;

impl ProposalReviewer for TerminalReviewer {
    fn review(&mut self, clusters: &[Cluster], requested: Option<usize>) -> cactus_core::Result<ReviewDecision> {
        use dialoguer::theme::ColorfulTheme;
        use dialoguer::Select;

        println!(
            "\n{} {} commits{}",
            "Proposal:".bold().underline(),
            clusters.len(),
            requested
                .filter(|n| *n != clusters.len())
                .map(|n| format!(" ({} requested)", n))
                .unwrap_or_default()
        );
        print_clusters(clusters);

        const CHOICES: [(&str, ReviewDecision); 5] = [
            ("Accept", ReviewDecision::Accept),
            ("Regenerate", ReviewDecision::Regenerate),
            ("More commits", ReviewDecision::Increase),
            ("Fewer commits", ReviewDecision::Decrease),
            ("Abort", ReviewDecision::Abort),
        ];
        let labels: Vec<&str> = CHOICES.iter().map(|(label, _)| *label).collect();

        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("What now?")
            .items(&labels)
            .default(0)
            .interact_opt()
            .map_err(|e| CactusError::Command {
                command: "review prompt".to_string(),
                message: e.to_string(),
            })?;

        Ok(choice
            .map(|i| CHOICES[i].1)
            .unwrap_or(ReviewDecision::Abort))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("4"), Ok(4));
        assert!(parse_count("0").is_err());
        assert!(parse_count("many").is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let args = GenerateArgs {
            strategy: Some(SimilarityStrategy::Jaccard),
            context_size: Some(3),
            model: Some("gemini-1.5-pro".to_string()),
            ..GenerateArgs::default()
        };
        args.apply_to(&mut config);
        assert_eq!(config.cluster.backend, ClusterBackend::Local);
        assert_eq!(config.cluster.strategy, SimilarityStrategy::Jaccard);
        assert_eq!(config.diff.context_lines, 3);
        assert_eq!(config.remote.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = Config::default();
        GenerateArgs::default().apply_to(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_local_source_needs_no_key() {
        let mut config = Config::default();
        config.cluster.backend = ClusterBackend::Local;
        let source = build_source(&config, Path::new(".")).unwrap();
        assert_eq!(source.name(), "local clustering");
    }

    #[test]
    fn test_unsaved_diff_is_printed() {
        let err = CactusError::RollbackFailure {
            message: "reset failed".to_string(),
            recovery_path: None,
            diff: b"diff --git a/x b/x\n+kept\n".to_vec(),
        };
        let mut out = Vec::new();
        assert!(dump_unsaved_diff(&err, &mut out).unwrap());
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("diff --git a/x b/x\n+kept\n-----"));
    }

    #[test]
    fn test_saved_diff_is_not_printed() {
        let err = CactusError::RollbackFailure {
            message: "reset failed".to_string(),
            recovery_path: Some(std::path::PathBuf::from(".git/cactus-recovery.patch")),
            diff: b"diff --git a/x b/x\n".to_vec(),
        };
        let mut out = Vec::new();
        assert!(!dump_unsaved_diff(&err, &mut out).unwrap());
        assert!(out.is_empty());
        assert!(!dump_unsaved_diff(&CactusError::Interrupted, &mut out).unwrap());
    }
}
