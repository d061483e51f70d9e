//! Prompt payload sent to remote cluster sources

use crate::diff::{DiffDocument, FileChange};
use crate::types::HunkIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// Placeholder for files that are not valid UTF-8
pub const BINARY_PLACEHOLDER: &str = "[BINARY FILE]";
/// Placeholder for files missing from the working tree
pub const MISSING_PLACEHOLDER: &str = "File Not Found (Probably Renamed)";

/// Current contents of one changed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContext {
    pub content: String,
}

/// One hunk as shown to a language model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkPayload {
    pub hunk_index: HunkIndex,
    pub content: String,
}

/// Full file contents plus the ordered hunk list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPayload {
    pub files: BTreeMap<String, FileContext>,
    pub hunks: Vec<HunkPayload>,
}

impl PromptPayload {
    /// Build the payload, reading file contents relative to `root`
    ///
    /// Files larger than `max_file_bytes`, binary files and files that no
    /// longer exist are replaced by placeholders.
    pub fn build(doc: &DiffDocument, root: &Path, max_file_bytes: u64) -> Self {
        let mut payload = PromptPayload::default();

        for file in &doc.files {
            let path = file.worktree_path();
            let content = read_context(root, &path, max_file_bytes);
            payload.files.insert(path, FileContext { content });

            for hunk in &file.hunks {
                payload.hunks.push(HunkPayload {
                    hunk_index: hunk.index,
                    content: format!("{}{}", file_markers(file), hunk.to_text()),
                });
            }
        }

        payload
    }

    /// Number of hunks in the payload
    pub fn hunk_count(&self) -> usize {
        self.hunks.len()
    }
}

fn file_markers(file: &FileChange) -> String {
    let minus = file
        .old_path
        .as_deref()
        .map(|p| format!("a/{}", p))
        .unwrap_or_else(|| "/dev/null".to_string());
    let plus = file
        .new_path
        .as_deref()
        .map(|p| format!("b/{}", p))
        .unwrap_or_else(|| "/dev/null".to_string());
    format!("--- {}\n+++ {}\n", minus, plus)
}

fn read_context(root: &Path, path: &str, max_file_bytes: u64) -> String {
    let full = root.join(path);

    match std::fs::metadata(&full) {
        Ok(meta) if meta.len() > max_file_bytes => {
            return format!("[FILE TOO LARGE: {} bytes]", meta.len());
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return MISSING_PLACEHOLDER.to_string(),
        Err(e) => {
            warn!("Failed to read file {}: {}", path, e);
            return MISSING_PLACEHOLDER.to_string();
        }
    }

    match std::fs::read(&full) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| BINARY_PLACEHOLDER.to_string()),
        Err(e) => {
            warn!("Failed to read file {}: {}", path, e);
            MISSING_PLACEHOLDER.to_string()
        }
    }
}
