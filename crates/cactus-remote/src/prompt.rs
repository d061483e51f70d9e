//! Prompt text sent to hosted models

use cactus_core::cluster::PromptPayload;

/// System instruction shared by every provider
pub const SYSTEM_PROMPT: &str = r#"You organise staged source changes into a sequence of git commits.

You receive the current contents of every modified file and a list of hunks.
Each hunk has a numeric index. Group hunks that belong to the same logical
change into one commit and write a commit message for each group.

Rules:
- Every hunk index must appear in exactly one commit. Do not skip or repeat indices.
- Keep the commits in the order a developer would have made them.
- Prefer commits of similar size over one large commit and many tiny ones.
- Fold small unrelated edits (typos, formatting) into a related commit or a final cleanup commit.
- Commit messages start with a short imperative subject line, optionally followed by a blank line and a body.

Answer with JSON only, in this shape:
{"commits": [{"message": "Add parser for config files", "hunk_indices": [1, 2]}]}"#;

/// Render the user message for a payload
///
/// With `requested`, the model is asked for exactly that many commits.
pub fn render_user_message(payload: &PromptPayload, requested: Option<usize>) -> String {
    let mut out = String::from("Current contents of the modified files:\n\n<file_contents>\n");
    for (path, file) in &payload.files {
        out.push_str(&format!("# {}\n{}\n", path, file.content.trim_end()));
    }
    out.push_str("</file_contents>\n\nStaged hunks, each labelled with its index:\n\n<hunks>\n");
    for hunk in &payload.hunks {
        out.push_str(&format!("# Index: {}\n{}\n", hunk.hunk_index, hunk.content.trim_end()));
    }
    out.push_str("</hunks>\n\n");

    let ask = match requested {
        Some(n) => format!(
            "Return the JSON for exactly {} commit{} covering all {} hunks.",
            n,
            if n == 1 { "" } else { "s" },
            payload.hunk_count()
        ),
        None => format!(
            "Return the JSON for the commits covering all {} hunks.",
            payload.hunk_count()
        ),
    };
    out.push_str(&ask);
    out
}
