//! cactus-remote - Language-model cluster sources for cactus
//!
//! This crate asks a hosted model to group staged hunks into commits.
//!
//! ## Features
//!
//! - Provider detection from the model name (OpenAI-compatible or Gemini)
//! - Prompt rendering from the core [`PromptPayload`](cactus_core::cluster::PromptPayload)
//! - Tolerant parsing of `{"commits": [...]}` responses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cactus_core::cluster::fetch_clusters;
//! use cactus_remote::RemoteClusterSource;
//!
//! let source = RemoteClusterSource::from_config(&config.remote, repo_root)?;
//! let clusters = fetch_clusters(&source, &doc, Some(3), 3)?;
//! ```

pub mod prompt;
pub mod provider;
pub mod response;
pub mod source;

pub use prompt::{render_user_message, SYSTEM_PROMPT};
pub use provider::Provider;
pub use response::parse_commits;
pub use source::RemoteClusterSource;
