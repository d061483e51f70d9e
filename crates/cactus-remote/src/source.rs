//! Remote cluster source
//!
//! Sends the prompt payload to a hosted model and parses its commit list.
//! Completeness is checked by the caller through
//! [`fetch_clusters`](cactus_core::cluster::fetch_clusters).

use crate::prompt::{render_user_message, SYSTEM_PROMPT};
use crate::provider::Provider;
use crate::response::{extract_content, parse_commits};
use cactus_core::cluster::{Cluster, ClusterSource, PromptPayload};
use cactus_core::config::RemoteConfig;
use cactus_core::diff::DiffDocument;
use cactus_core::{CactusError, Result};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Maximum tokens requested from OpenAI-compatible endpoints
const MAX_OUTPUT_TOKENS: u32 = 16384;

/// Cluster source backed by a hosted language model
pub struct RemoteClusterSource {
    provider: Provider,
    model: String,
    endpoint: String,
    api_key: String,
    root: PathBuf,
    max_file_bytes: u64,
    client: Client,
    name: String,
}

impl RemoteClusterSource {
    /// Create a source for `model`, reading changed files below `root`
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.into();
        let provider = Provider::detect(&model);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CactusError::Remote(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            provider,
            endpoint: provider.endpoint(&model, ""),
            name: format!("{} ({})", model, provider),
            model,
            api_key: api_key.into(),
            root: root.into(),
            max_file_bytes: RemoteConfig::default().max_file_bytes,
            client,
        })
    }

    /// Create a source from configuration, failing early when the API key is missing
    pub fn from_config(config: &RemoteConfig, root: &Path) -> Result<Self> {
        let provider = Provider::detect(&config.model);
        let api_key = provider.api_key(&config.api_key_env)?;
        let source = Self::new(
            &config.model,
            api_key,
            root,
            Duration::from_secs(config.timeout_secs),
        )?
        .with_endpoint(&config.endpoint)
        .with_max_file_bytes(config.max_file_bytes);
        Ok(source)
    }

    /// Override the endpoint (empty keeps the provider default)
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = self.provider.endpoint(&self.model, endpoint);
        self
    }

    /// Set the size above which files are sent as a placeholder
    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Detected provider
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Request URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// JSON request body for a payload
    pub fn request_body(&self, payload: &PromptPayload, requested: Option<usize>) -> Value {
        let user = render_user_message(payload, requested);
        match self.provider {
            Provider::OpenAi => json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": user },
                ],
                "response_format": { "type": "json_object" },
                "temperature": 1,
                "top_p": 1,
                "max_tokens": MAX_OUTPUT_TOKENS,
            }),
            Provider::Gemini => json!({
                "system_instruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
                "contents": [{ "role": "user", "parts": [{ "text": user }] }],
                "generationConfig": {
                    "response_mime_type": "application/json",
                    "temperature": 1,
                    "top_p": 0.8,
                    "top_k": 64,
                },
            }),
        }
    }

    fn send(&self, body: &Value) -> Result<Value> {
        let request = self.client.post(&self.endpoint).json(body);
        let request = match self.provider {
            Provider::OpenAi => request.header("Authorization", format!("Bearer {}", self.api_key)),
            Provider::Gemini => request.header("x-goog-api-key", &self.api_key),
        };

        let response = request
            .send()
            .map_err(|e| CactusError::Remote(format!("Request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(CactusError::Remote(format!(
                "{} returned {}: {}",
                self.provider,
                status,
                text.trim()
            )));
        }

        response
            .json::<Value>()
            .map_err(|e| CactusError::MalformedResponse(format!("response is not JSON: {}", e)))
    }
}

impl ClusterSource for RemoteClusterSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_clusters(&self, doc: &DiffDocument, requested: Option<usize>) -> Result<Vec<Cluster>> {
        let payload = PromptPayload::build(doc, &self.root, self.max_file_bytes);
        info!(
            "Asking {} to group {} hunks across {} files",
            self.name,
            payload.hunk_count(),
            payload.files.len()
        );

        let body = self.request_body(&payload, requested);
        let response = self.send(&body)?;
        let content = extract_content(self.provider, &response)?;
        debug!("Model response: {}", content);

        parse_commits(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cactus_core::diff::DiffParser;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const DIFF: &str = "\
diff --git a/notes.txt b/notes.txt
index 1111111..2222222 100644
--- a/notes.txt
+++ b/notes.txt
@@ -1,2 +1,2 @@
 first
-second
+Second
";

    fn source(model: &str, root: &Path) -> RemoteClusterSource {
        RemoteClusterSource::new(model, "key", root, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_openai_request_body() {
        let dir = TempDir::new().unwrap();
        let source = source("gpt-4o-mini", dir.path());
        assert_eq!(source.provider(), Provider::OpenAi);
        assert_eq!(source.name(), "gpt-4o-mini (openai)");

        let body = source.request_body(&PromptPayload::default(), Some(2));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("exactly 2 commits"));
    }

    #[test]
    fn test_gemini_request_body() {
        let dir = TempDir::new().unwrap();
        let source = source("gemini-1.5-flash", dir.path()).with_endpoint("http://proxy/models");
        assert_eq!(source.endpoint(), "http://proxy/models/gemini-1.5-flash:generateContent");

        let body = source.request_body(&PromptPayload::default(), None);
        assert_eq!(body["generationConfig"]["response_mime_type"], "application/json");
        assert_eq!(body["system_instruction"]["parts"][0]["text"], SYSTEM_PROMPT);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn test_from_config_requires_key() {
        let dir = TempDir::new().unwrap();
        let config = RemoteConfig {
            api_key_env: "CACTUS_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..RemoteConfig::default()
        };
        let err = RemoteClusterSource::from_config(&config, dir.path()).err().unwrap();
        assert!(matches!(err, CactusError::Config(_)));
    }

    #[test]
    fn test_transport_failure_is_remote_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "first\nSecond\n").unwrap();
        let doc = DiffParser::new().parse(DIFF.as_bytes()).unwrap();

        let source = source("gpt-4o-mini", dir.path())
            .with_endpoint("http://127.0.0.1:1/v1/chat/completions");
        let err = source.get_clusters(&doc, None).unwrap_err();
        assert!(matches!(err, CactusError::Remote(_)));
        assert!(!err.is_retryable());
    }
}
