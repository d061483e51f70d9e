//! Config command
//!
//! Show, locate, reset and validate cactus configuration.
//!
//! Lookup order: `--config`, then `.cactus/config.toml` at the repository
//! root, then the user configuration directory, then built-in defaults.

use anyhow::{bail, Context, Result};
use cactus_core::config::{Config, CONFIG_FILE_NAME};
use cactus_core::git::GitCli;
use clap::Subcommand;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the configuration file path
    Path,

    /// Reset to default configuration
    Reset {
        /// Force reset without confirmation
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration
    Validate,
}

/// Configuration together with the file it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// None when built-in defaults are in use
    pub path: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(cmd: ConfigCommand, explicit: Option<&Path>) -> Result<()> {
    let root = repo_root();
    match cmd {
        ConfigCommand::Show { json } => show_config(explicit, root.as_deref(), json),
        ConfigCommand::Path => {
            let path = target_path(explicit, root.as_deref())?;
            if path.exists() {
                println!("{}", path.display());
            } else {
                println!("{} {}", path.display(), "(not created yet)".dimmed());
            }
            Ok(())
        }
        ConfigCommand::Reset { force } => reset_config(explicit, root.as_deref(), force),
        ConfigCommand::Validate => validate_config(explicit, root.as_deref()),
    }
}

/// Top level of the repository containing the current directory
pub fn repo_root() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    GitCli::discover(&cwd).ok().map(|git| git.workdir().to_path_buf())
}

/// Per-user configuration file
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "cactus").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// First existing configuration file in lookup order
pub fn resolve_path(
    explicit: Option<&Path>,
    repo_root: Option<&Path>,
    user_path: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    repo_root
        .map(Config::project_path)
        .into_iter()
        .chain(user_path.map(Path::to_path_buf))
        .find(|path| path.exists())
}

/// Load the effective configuration
pub fn load(explicit: Option<&Path>, repo_root: Option<&Path>) -> Result<LoadedConfig> {
    let user_path = user_config_path();
    match resolve_path(explicit, repo_root, user_path.as_deref()) {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file {} does not exist", path.display());
            }
            let config = Config::load(&path)?;
            tracing::debug!("Loaded configuration from {}", path.display());
            Ok(LoadedConfig {
                config,
                path: Some(path),
            })
        }
        None => Ok(LoadedConfig {
            config: Config::default(),
            path: None,
        }),
    }
}

/// File that `path` and `reset` act on
fn target_path(explicit: Option<&Path>, repo_root: Option<&Path>) -> Result<PathBuf> {
    let user_path = user_config_path();
    if let Some(path) = resolve_path(explicit, repo_root, user_path.as_deref()) {
        return Ok(path);
    }
    repo_root
        .map(Config::project_path)
        .or(user_path)
        .context("Cannot determine a configuration directory")
}

fn show_config(explicit: Option<&Path>, root: Option<&Path>, as_json: bool) -> Result<()> {
    let loaded = load(explicit, root)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&loaded.config)?);
        return Ok(());
    }

    println!("{}", "Configuration:".bold().underline());
    match &loaded.path {
        Some(path) => println!("{}", path.display().to_string().dimmed()),
        None => println!("{}", "(built-in defaults)".dimmed()),
    }
    println!();
    println!("{}", loaded.config.to_toml()?);
    Ok(())
}

fn reset_config(explicit: Option<&Path>, root: Option<&Path>, force: bool) -> Result<()> {
    let config_path = target_path(explicit, root)?;

    if !force {
        use dialoguer::Confirm;

        let confirmed = Confirm::new()
            .with_prompt(format!("Reset {} to defaults?", config_path.display()))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    if config_path.exists() {
        let backup_path = format!(
            "{}.backup-{}",
            config_path.display(),
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        );
        fs::copy(&config_path, &backup_path)?;
        println!("{} Backed up to {}", "✓".green(), backup_path);
    }

    Config::default()
        .save(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("{} Configuration reset to defaults.", "✓".green());
    Ok(())
}

fn validate_config(explicit: Option<&Path>, root: Option<&Path>) -> Result<()> {
    let loaded = load(explicit, root)?;
    match loaded.path {
        Some(path) => println!("{} {} is valid", "✓".green(), path.display()),
        None => println!("{} No configuration file; using defaults", "✓".green()),
    }
    Ok(())
}
