//! Doctor command
//!
//! Diagnose the environment before running cactus.

use anyhow::Result;
use cactus_core::config::{ClusterBackend, Config};
use cactus_core::diff::DiffParser;
use cactus_core::git::{GitBackend, GitCli};
use cactus_core::sequencer::lock::RepoLock;
use cactus_remote::Provider;
use clap::Args;
use colored::Colorize;
use std::path::Path;

use super::config;

/// Arguments for the doctor command
#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Show suggestions for passing checks too
    #[arg(long)]
    pub all: bool,
}

/// Check result
#[derive(Debug)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    message: String,
    suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Ok, message, None)
    }

    fn warn(name: &str, message: &str, suggestion: Option<&str>) -> Self {
        Self::new(name, CheckStatus::Warn, message, suggestion)
    }

    fn fail(name: &str, message: &str, suggestion: Option<&str>) -> Self {
        Self::new(name, CheckStatus::Fail, message, suggestion)
    }

    fn new(name: &str, status: CheckStatus, message: &str, suggestion: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
            suggestion: suggestion.map(|s| s.to_string()),
        }
    }
}

/// Execute the doctor command
pub fn execute(args: DoctorArgs, config_path: Option<&Path>) -> Result<()> {
    let mut results = Vec::new();

    println!("\n{}", "1. Environment".bold().underline());
    results.extend(print_results(check_environment(), args.all));

    let git = std::env::current_dir()
        .ok()
        .and_then(|cwd| GitCli::discover(&cwd).ok());

    println!("\n{}", "2. Repository".bold().underline());
    results.extend(print_results(check_repository(git.as_ref()), args.all));

    println!("\n{}", "3. Configuration".bold().underline());
    let root = git.as_ref().map(|g| g.workdir());
    let checks = check_configuration(config_path, root, |name| std::env::var(name).ok());
    results.extend(print_results(checks, args.all));

    let warnings = results.iter().filter(|r| r.status == CheckStatus::Warn).count();
    let errors = results.iter().filter(|r| r.status == CheckStatus::Fail).count();
    println!(
        "\n{}: {} warnings, {} errors",
        "Summary".bold(),
        warnings.to_string().yellow(),
        errors.to_string().red()
    );

    if errors == 0 && warnings == 0 {
        println!("\n{} All checks passed!", "✓".green());
    }
    Ok(())
}

fn print_results(results: Vec<CheckResult>, all: bool) -> Vec<CheckResult> {
    for result in &results {
        let status = match result.status {
            CheckStatus::Ok => "✓".green(),
            CheckStatus::Warn => "⚠".yellow(),
            CheckStatus::Fail => "✗".red(),
        };
        println!("   {} {}: {}", status, result.name, result.message);
        if result.status != CheckStatus::Ok || all {
            if let Some(suggestion) = &result.suggestion {
                println!("     {}", suggestion.dimmed());
            }
        }
    }
    results
}

fn check_environment() -> Vec<CheckResult> {
    let mut results = vec![CheckResult::ok("cactus version", env!("CARGO_PKG_VERSION"))];

    match GitCli::version() {
        Some(version) => results.push(CheckResult::ok("Git version", &version)),
        None => results.push(CheckResult::fail(
            "Git",
            "not found",
            Some("Install git: https://git-scm.com/"),
        )),
    }

    results
}

fn check_repository(git: Option<&GitCli>) -> Vec<CheckResult> {
    let Some(git) = git else {
        return vec![CheckResult::fail(
            "Git repository",
            "not detected",
            Some("Run cactus inside a git working tree"),
        )];
    };

    let mut results = vec![CheckResult::ok(
        "Git repository",
        &git.workdir().display().to_string(),
    )];

    match git.head() {
        Ok(Some(head)) => results.push(CheckResult::ok("HEAD", head.short())),
        Ok(None) => results.push(CheckResult::fail(
            "HEAD",
            "no commits yet",
            Some("Create an initial commit first"),
        )),
        Err(e) => results.push(CheckResult::fail("HEAD", &e.to_string(), None)),
    }

    match git.staged_diff(Config::default().diff.context_lines) {
        Ok(diff) if diff.is_empty() => results.push(CheckResult::warn(
            "Staged changes",
            "nothing staged",
            Some("Stage changes with 'git add' before running cactus"),
        )),
        Ok(diff) => match DiffParser::new().parse(&diff) {
            Ok(doc) => {
                let stats = doc.stats();
                results.push(CheckResult::ok(
                    "Staged changes",
                    &format!("{} files, {} hunks", stats.files_changed, stats.hunks),
                ));
            }
            Err(e) => results.push(CheckResult::fail("Staged changes", &e.to_string(), None)),
        },
        Err(e) => results.push(CheckResult::fail("Staged changes", &e.to_string(), None)),
    }

    if let Ok(git_dir) = git.git_dir() {
        match RepoLock::holder(&git_dir) {
            Some(pid) => results.push(CheckResult::warn(
                "Lock",
                &format!("held by process {}", pid),
                Some(
                    format!(
                        "If no cactus run is active, delete {}",
                        RepoLock::path_in(&git_dir).display()
                    )
                    .as_str(),
                ),
            )),
            None if RepoLock::path_in(&git_dir).exists() => results.push(CheckResult::warn(
                "Lock",
                "present without a process id",
                Some(format!("Delete {}", RepoLock::path_in(&git_dir).display()).as_str()),
            )),
            None => results.push(CheckResult::ok("Lock", "free")),
        }
    }

    results
}

fn check_configuration<F>(explicit: Option<&Path>, root: Option<&Path>, lookup: F) -> Vec<CheckResult>
where
    F: Fn(&str) -> Option<String>,
{
    let loaded = match config::load(explicit, root) {
        Ok(loaded) => loaded,
        Err(e) => {
            return vec![CheckResult::fail(
                "Configuration",
                &format!("{:#}", e),
                Some("Fix the file or run 'cactus config reset'"),
            )]
        }
    };

    let source = loaded
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    let mut results = vec![CheckResult::ok("Configuration", &source)];

    let cfg = &loaded.config;
    match cfg.cluster.backend {
        ClusterBackend::Local => results.push(CheckResult::ok(
            "Cluster source",
            &format!("local ({})", cfg.cluster.strategy),
        )),
        ClusterBackend::Remote => {
            let provider = Provider::detect(&cfg.remote.model);
            results.push(CheckResult::ok(
                "Cluster source",
                &format!("{} via {}", cfg.remote.model, provider),
            ));
            match provider.api_key_with(&cfg.remote.api_key_env, lookup) {
                Ok(_) => results.push(CheckResult::ok("API key", "present")),
                Err(e) => results.push(CheckResult::fail(
                    "API key",
                    &e.to_string(),
                    Some("Export the key, or set cluster.backend = \"local\""),
                )),
            }
        }
    }

    results
}
