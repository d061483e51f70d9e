//! Patch reassembly
//!
//! Rebuilds standalone patches from a subset of a document's hunks. Hunk
//! bodies and `@@` headers are copied verbatim; line ranges are never
//! recomputed.

use crate::diff::model::{DiffDocument, FileChange, Hunk};
use crate::types::HunkIndex;
use std::collections::BTreeSet;
use tracing::trace;

const DEFAULT_FILE_MODE: &str = "100644";

/// Builds standalone patches from hunk selections
pub struct PatchReassembler<'a> {
    doc: &'a DiffDocument,
}

impl<'a> PatchReassembler<'a> {
    /// Create a reassembler over a parsed document
    pub fn new(doc: &'a DiffDocument) -> Self {
        Self { doc }
    }

    /// Patch containing only the selected hunks, each under its file's header
    ///
    /// Added files keep their "new file" header. A deleted file keeps its
    /// "deleted file" header only when every one of its hunks is selected;
    /// otherwise the selection is expressed as a modification.
    pub fn build_patch(&self, selection: &BTreeSet<HunkIndex>) -> Vec<u8> {
        let mut out = Vec::new();
        for file in &self.doc.files {
            let hunks: Vec<&Hunk> = file
                .hunks
                .iter()
                .filter(|h| selection.contains(&h.index))
                .collect();
            if hunks.is_empty() {
                continue;
            }
            let completes = hunks.len() == file.hunks.len();
            write_section(&mut out, file, &hunks, true, completes);
        }
        out
    }

    /// Patch containing every file change that has no textual hunks
    pub fn build_structural_patch(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for file in self.doc.hunkless_files() {
            write_section(&mut out, file, &[], true, true);
        }
        out
    }

    /// Patch containing every hunk and every structural change
    pub fn build_full_patch(&self) -> Vec<u8> {
        let all: BTreeSet<HunkIndex> = self.doc.indices().into_iter().collect();
        let mut sequence = PatchSequence::new(self.doc);
        sequence.next_patch(&all)
    }
}

/// Produces the patches of an ordered series of selections
///
/// Each patch applies on top of the previous ones: a file created or renamed
/// by an earlier patch is addressed by its target path afterwards, and
/// structural changes without hunks ride along with the first patch.
pub struct PatchSequence<'a> {
    doc: &'a DiffDocument,
    touched: Vec<bool>,
    remaining: Vec<usize>,
    structural_pending: bool,
}

impl<'a> PatchSequence<'a> {
    /// Start a new sequence over a document
    pub fn new(doc: &'a DiffDocument) -> Self {
        Self {
            doc,
            touched: vec![false; doc.files.len()],
            remaining: doc.files.iter().map(|f| f.hunks.len()).collect(),
            structural_pending: true,
        }
    }

    /// Patch for the next selection in the series
    pub fn next_patch(&mut self, selection: &BTreeSet<HunkIndex>) -> Vec<u8> {
        let mut out = Vec::new();

        for (pos, file) in self.doc.files.iter().enumerate() {
            if file.is_hunkless() {
                if self.structural_pending {
                    trace!("Adding structural change for {}", file.display_path());
                    write_section(&mut out, file, &[], true, true);
                }
                continue;
            }

            let hunks: Vec<&Hunk> = file
                .hunks
                .iter()
                .filter(|h| selection.contains(&h.index))
                .collect();
            if hunks.is_empty() {
                continue;
            }

            let first_touch = !self.touched[pos];
            let completes = hunks.len() >= self.remaining[pos];
            write_section(&mut out, file, &hunks, first_touch, completes);

            self.touched[pos] = true;
            self.remaining[pos] = self.remaining[pos].saturating_sub(hunks.len());
        }

        self.structural_pending = false;
        out
    }
}

/// Write one file's header and hunks
///
/// `first_touch` is true when no earlier patch in the series touched the
/// file; `completes` is true when this patch carries its last hunks.
fn write_section(
    out: &mut Vec<u8>,
    file: &FileChange,
    hunks: &[&Hunk],
    first_touch: bool,
    completes: bool,
) {
    let creates = first_touch && file.creates_file();
    let deletes = completes && file.deletes_file();
    let renames = first_touch && file.is_rename();

    // Where the file lives before and after this patch
    let before = if first_touch {
        file.old_path.as_deref().or(file.new_path.as_deref())
    } else {
        file.new_path.as_deref().or(file.old_path.as_deref())
    }
    .unwrap_or_default();
    let after = file
        .new_path
        .as_deref()
        .or(file.old_path.as_deref())
        .unwrap_or_default();

    push_line(
        out,
        &format!("diff --git {} {}", side_path("a/", before), side_path("b/", after)),
    );

    if first_touch {
        if let Some(mode) = &file.header.old_mode {
            push_line(out, &format!("old mode {}", mode));
        }
        if let Some(mode) = &file.header.new_mode {
            push_line(out, &format!("new mode {}", mode));
        }
    }
    if creates {
        let mode = file.header.new_file_mode.as_deref().unwrap_or(DEFAULT_FILE_MODE);
        push_line(out, &format!("new file mode {}", mode));
    }
    if deletes {
        let mode = file
            .header
            .deleted_file_mode
            .as_deref()
            .unwrap_or(DEFAULT_FILE_MODE);
        push_line(out, &format!("deleted file mode {}", mode));
    }
    if renames {
        if let Some(similarity) = &file.header.similarity {
            push_line(out, similarity);
        }
        push_line(out, &format!("rename from {}", before));
        push_line(out, &format!("rename to {}", after));
    }

    if let Some(payload) = &file.binary {
        if first_touch {
            // git apply needs the full index line for binary payloads
            if let Some(index) = &file.header.index {
                push_line(out, index);
            }
            for line in payload {
                out.extend_from_slice(line);
                out.push(b'\n');
            }
        }
        return;
    }

    if hunks.is_empty() {
        return;
    }

    let minus = if creates {
        "/dev/null".to_string()
    } else {
        side_path("a/", before)
    };
    let plus = if deletes {
        "/dev/null".to_string()
    } else {
        side_path("b/", after)
    };
    push_line(out, &format!("--- {}", minus));
    push_line(out, &format!("+++ {}", plus));

    for hunk in hunks {
        hunk.write_to(out);
    }
}

/// Prefix a path with its side marker, inside the quotes for quoted paths
fn side_path(prefix: &str, path: &str) -> String {
    match path.strip_prefix('"') {
        Some(inner) => format!("\"{}{}", prefix, inner),
        None => format!("{}{}", prefix, path),
    }
}

fn push_line(out: &mut Vec<u8>, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
}
