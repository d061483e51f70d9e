//! Response parsing
//!
//! Models are asked for bare JSON but sometimes wrap it in markdown fences or
//! prose. Anything that still does not match the expected shape is a
//! [`CactusError::MalformedResponse`], which callers retry.

use crate::provider::Provider;
use cactus_core::cluster::Cluster;
use cactus_core::{CactusError, HunkIndex, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct CommitList {
    commits: Vec<RawCommit>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    #[serde(default)]
    message: String,
    hunk_indices: Vec<Value>,
}

/// Pull the generated text out of a provider's response envelope
pub fn extract_content(provider: Provider, body: &Value) -> Result<String> {
    let text = match provider {
        Provider::OpenAi => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str),
        Provider::Gemini => body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str),
    };
    text.map(str::to_string).ok_or_else(|| {
        CactusError::MalformedResponse(format!("{} response carries no message text", provider))
    })
}

/// Parse `{"commits": [{"message", "hunk_indices"}]}` into clusters
pub fn parse_commits(text: &str) -> Result<Vec<Cluster>> {
    let json = json_object(text).ok_or_else(|| {
        CactusError::MalformedResponse("response contains no JSON object".to_string())
    })?;
    let list: CommitList = serde_json::from_str(json)
        .map_err(|e| CactusError::MalformedResponse(format!("unexpected structure: {}", e)))?;

    if list.commits.is_empty() {
        return Err(CactusError::MalformedResponse(
            "response lists no commits".to_string(),
        ));
    }

    list.commits
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let indices = raw
                .hunk_indices
                .iter()
                .map(index_value)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    CactusError::MalformedResponse(format!(
                        "commit {} has a non-numeric hunk index",
                        i + 1
                    ))
                })?;
            let message = raw.message.trim();
            let message = if message.is_empty() {
                format!("Commit {}", i + 1)
            } else {
                message.to_string()
            };
            Ok(Cluster::new(message, indices))
        })
        .collect()
}

/// Accept integers and numeric strings
fn index_value(value: &Value) -> Option<HunkIndex> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| HunkIndex(n as usize)),
        Value::String(s) => s.trim().parse().ok().map(HunkIndex),
        _ => None,
    }
}

/// Locate the JSON object in `text`, skipping fences and surrounding prose
fn json_object(text: &str) -> Option<&str> {
    let text = text.trim();
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
