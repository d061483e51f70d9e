//! Provider detection
//!
//! The model name decides which API family a request goes to.

use cactus_core::{CactusError, Result};
use std::fmt;

/// Default OpenAI-compatible endpoint
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
/// Base URL for Gemini models; the model name and method are appended
pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Hosted model API family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Chat completions in JSON mode
    OpenAi,
    /// `generateContent` with a JSON response type
    Gemini,
}

impl Provider {
    /// Pick the provider for a model name
    pub fn detect(model: &str) -> Self {
        if model.to_ascii_lowercase().contains("gemini") {
            Provider::Gemini
        } else {
            Provider::OpenAi
        }
    }

    /// Environment variable read when none is configured
    pub fn default_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Request URL for `model`, honouring a non-empty override
    pub fn endpoint(&self, model: &str, override_url: &str) -> String {
        let override_url = override_url.trim();
        match self {
            Provider::OpenAi if !override_url.is_empty() => override_url.to_string(),
            Provider::OpenAi => OPENAI_ENDPOINT.to_string(),
            Provider::Gemini => {
                let base = if override_url.is_empty() {
                    GEMINI_ENDPOINT
                } else {
                    override_url
                };
                format!("{}/{}:generateContent", base.trim_end_matches('/'), model)
            }
        }
    }

    /// Read the API key through `lookup`, using the default variable when
    /// `key_env` is empty
    pub fn api_key_with<F>(&self, key_env: &str, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = if key_env.trim().is_empty() {
            self.default_key_env()
        } else {
            key_env.trim()
        };
        match lookup(name) {
            Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(CactusError::Config(format!(
                "{} is not set; export it or choose --local clustering",
                name
            ))),
        }
    }

    /// Read the API key from the process environment
    pub fn api_key(&self, key_env: &str) -> Result<String> {
        self.api_key_with(key_env, |name| std::env::var(name).ok())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::Gemini => write!(f, "gemini"),
        }
    }
}
