//! Configuration management for cactus

use crate::cluster::{SimilarityStrategy, DEFAULT_SIMILARITY_THRESHOLD};
use crate::diff::DEFAULT_MAX_PARSE_ATTEMPTS;
use crate::error::{CactusError, Result};
use crate::git::DEFAULT_APPLY_ARGS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Directory holding project-level configuration, relative to the repository root
pub const PROJECT_CONFIG_DIR: &str = ".cactus";
/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Staged diff settings
    pub diff: DiffConfig,
    /// Clustering settings
    pub cluster: ClusterConfig,
    /// Remote language-model settings
    pub remote: RemoteConfig,
    /// Git invocation settings
    pub git: GitConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CactusError::from(e).with_context(format!("Failed to read {}", path.display()))
        })?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| CactusError::from(e).with_context(format!("Invalid {}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration if the file exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write configuration to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Project configuration path for a repository root
    pub fn project_path(repo_root: &Path) -> PathBuf {
        repo_root.join(PROJECT_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let threshold = self.cluster.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CactusError::Config(format!(
                "cluster.similarity_threshold must be between 0 and 1, got {}",
                threshold
            )));
        }
        if self.cluster.max_attempts == 0 {
            return Err(CactusError::Config(
                "cluster.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.diff.max_parse_attempts == 0 {
            return Err(CactusError::Config(
                "diff.max_parse_attempts must be at least 1".to_string(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(CactusError::Config(
                "remote.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.remote.model.trim().is_empty() {
            return Err(CactusError::Config("remote.model must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Staged diff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Context lines around each hunk (`--unified` and `--inter-hunk-context`)
    pub context_lines: usize,
    /// Newline-append recovery attempts when parsing
    pub max_parse_attempts: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            context_lines: 1,
            max_parse_attempts: DEFAULT_MAX_PARSE_ATTEMPTS,
        }
    }
}

/// Which cluster source proposes commits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    /// Similarity clustering on this machine
    Local,
    /// A hosted language model
    #[default]
    Remote,
}

impl fmt::Display for ClusterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterBackend::Local => write!(f, "local"),
            ClusterBackend::Remote => write!(f, "remote"),
        }
    }
}

/// Clustering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster source
    pub backend: ClusterBackend,
    /// Similarity strategy of the local source
    pub strategy: SimilarityStrategy,
    /// Similarity needed to share a commit when no count is requested
    pub similarity_threshold: f64,
    /// Attempts before giving up on incomplete clusters
    pub max_attempts: usize,
    /// Ignore each diff's most common words when vectorising
    pub auto_stop_words: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: ClusterBackend::default(),
            strategy: SimilarityStrategy::default(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_attempts: 3,
            auto_stop_words: true,
        }
    }
}

/// Remote language-model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Model name; names containing "gemini" select the Gemini API
    pub model: String,
    /// Endpoint override (empty = provider default)
    pub endpoint: String,
    /// Environment variable holding the API key (empty = provider default)
    pub api_key_env: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Files larger than this are sent as a placeholder
    pub max_file_bytes: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            endpoint: String::new(),
            api_key_env: String::new(),
            timeout_secs: 120,
            max_file_bytes: 100_000,
        }
    }
}

/// Git invocation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Extra arguments for `git apply --cached`
    pub apply_args: Vec<String>,
    /// Pass `--no-verify` to `git commit`
    pub no_verify: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            apply_args: DEFAULT_APPLY_ARGS.iter().map(|s| s.to_string()).collect(),
            no_verify: false,
        }
    }
}
