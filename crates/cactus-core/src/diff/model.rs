//! Diff data models

use crate::types::{Fingerprint, HunkIndex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A parsed unified diff
///
/// Files appear in the order of the source diff. Hunk indices across all
/// files form the contiguous range `1..=hunk_count()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffDocument {
    /// Changed files, in diff order
    pub files: Vec<FileChange>,
}

impl DiffDocument {
    /// Create an empty document
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the document holds no file changes at all
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total number of hunks
    pub fn hunk_count(&self) -> usize {
        self.files.iter().map(|f| f.hunks.len()).sum()
    }

    /// All hunks in document order
    pub fn hunks(&self) -> impl Iterator<Item = &Hunk> {
        self.files.iter().flat_map(|f| f.hunks.iter())
    }

    /// Every valid hunk index, ascending
    pub fn indices(&self) -> Vec<HunkIndex> {
        self.hunks().map(|h| h.index).collect()
    }

    /// Look up a hunk by index
    pub fn hunk(&self, index: HunkIndex) -> Option<&Hunk> {
        self.hunks().find(|h| h.index == index)
    }

    /// The file a hunk belongs to
    pub fn file_of(&self, hunk: &Hunk) -> &FileChange {
        &self.files[hunk.file]
    }

    /// Files that carry no textual hunks (pure renames, binaries, mode changes)
    pub fn hunkless_files(&self) -> impl Iterator<Item = &FileChange> {
        self.files.iter().filter(|f| f.is_hunkless())
    }

    /// Compute diff statistics
    pub fn stats(&self) -> DiffStats {
        DiffStats::from_document(self)
    }
}

/// A single file's change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    /// Source path, without the `a/` prefix (None for added files)
    pub old_path: Option<String>,
    /// Target path, without the `b/` prefix (None for deleted files)
    pub new_path: Option<String>,
    /// Kind of change
    pub kind: FileKind,
    /// Extended header lines needed to rebuild the file header
    pub header: FileHeader,
    /// Opaque binary payload (`Binary files ... differ` or a `GIT binary patch` block)
    pub binary: Option<Vec<Vec<u8>>>,
    /// Hunks owned by this file, in diff order
    pub hunks: Vec<Hunk>,
}

impl FileChange {
    /// Path shown to users (prefers the target path)
    pub fn display_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    /// Working-tree path of the file, with git's C-style quoting removed
    pub fn worktree_path(&self) -> String {
        unquote_path(self.display_path()).into_owned()
    }

    /// Whether source and target paths differ
    pub fn is_rename(&self) -> bool {
        matches!((&self.old_path, &self.new_path), (Some(a), Some(b)) if a != b)
    }

    /// Whether this is a binary file
    pub fn is_binary(&self) -> bool {
        matches!(self.kind, FileKind::Binary)
    }

    /// Whether this change has no textual hunks
    pub fn is_hunkless(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Whether the change creates the file
    pub fn creates_file(&self) -> bool {
        self.old_path.is_none()
    }

    /// Whether the change removes the file
    pub fn deletes_file(&self) -> bool {
        self.new_path.is_none()
    }
}

/// File change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// New file added
    Added,
    /// File deleted
    Deleted,
    /// File modified in place
    Modified,
    /// File moved, possibly with content changes
    Renamed,
    /// Binary file (no textual hunks)
    Binary,
}

impl FileKind {
    /// Get display character
    pub fn as_char(&self) -> char {
        match self {
            FileKind::Added => '+',
            FileKind::Deleted => '-',
            FileKind::Modified => '~',
            FileKind::Renamed => '→',
            FileKind::Binary => 'B',
        }
    }
}

/// Extended `diff --git` header data carried through reassembly
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    /// `old mode <mode>`
    pub old_mode: Option<String>,
    /// `new mode <mode>`
    pub new_mode: Option<String>,
    /// `new file mode <mode>`
    pub new_file_mode: Option<String>,
    /// `deleted file mode <mode>`
    pub deleted_file_mode: Option<String>,
    /// `similarity index <n>%` or `dissimilarity index <n>%` line, verbatim
    pub similarity: Option<String>,
    /// `index <old>..<new> [mode]` line, verbatim
    pub index: Option<String>,
}

/// A hunk in a diff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hunk {
    /// Stable 1-based index in document order
    pub index: HunkIndex,
    /// Position of the owning file in `DiffDocument::files`
    pub file: usize,
    /// The `@@ ... @@` line, verbatim
    pub header: Vec<u8>,
    /// Old file line range
    pub old_range: Range,
    /// New file line range
    pub new_range: Range,
    /// Lines in this hunk
    pub lines: Vec<Line>,
}

impl Hunk {
    /// Header as text
    pub fn header_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.header)
    }

    /// Added and deleted lines only
    pub fn changed_lines(&self) -> impl Iterator<Item = &Line> {
        self.lines
            .iter()
            .filter(|l| matches!(l.line_type, LineType::Added | LineType::Deleted))
    }

    /// Append the hunk, header included, to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header);
        out.push(b'\n');
        for line in &self.lines {
            line.write_to(out);
        }
    }

    /// Lossy text rendering, as sent to language models
    pub fn to_text(&self) -> String {
        let mut out = Vec::new();
        self.write_to(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Content digest over header and lines
    pub fn fingerprint(&self) -> Fingerprint {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        Fingerprint::of_bytes(&buf)
    }
}

/// Line range in a hunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Starting line number
    pub start: usize,
    /// Number of lines
    pub count: usize,
}

impl Range {
    /// Create a new range
    pub fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    /// Get end line number (exclusive)
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// A single line in a hunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Line type
    pub line_type: LineType,
    /// Raw line bytes without the prefix character and newline
    pub content: Vec<u8>,
}

impl Line {
    /// Create a line
    pub fn new(line_type: LineType, content: impl Into<Vec<u8>>) -> Self {
        Self {
            line_type,
            content: content.into(),
        }
    }

    /// Content as text
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Append the prefixed line and its newline to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.line_type.prefix() as u8);
        out.extend_from_slice(&self.content);
        out.push(b'\n');
    }
}

/// Type of line change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineType {
    /// Line was added
    Added,
    /// Line was deleted
    Deleted,
    /// Context line (unchanged)
    Context,
    /// No newline at end of file marker
    NoNewline,
}

impl LineType {
    /// Get the diff prefix character
    pub fn prefix(&self) -> char {
        match self {
            LineType::Added => '+',
            LineType::Deleted => '-',
            LineType::Context => ' ',
            LineType::NoNewline => '\\',
        }
    }
}

/// Diff statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    /// Number of files changed
    pub files_changed: usize,
    /// Number of hunks
    pub hunks: usize,
    /// Number of insertions
    pub insertions: usize,
    /// Number of deletions
    pub deletions: usize,
}

impl DiffStats {
    /// Calculate stats from a document
    pub fn from_document(doc: &DiffDocument) -> Self {
        let mut insertions = 0;
        let mut deletions = 0;

        for hunk in doc.hunks() {
            for line in &hunk.lines {
                match line.line_type {
                    LineType::Added => insertions += 1,
                    LineType::Deleted => deletions += 1,
                    _ => {}
                }
            }
        }

        Self {
            files_changed: doc.files.len(),
            hunks: doc.hunk_count(),
            insertions,
            deletions,
        }
    }
}

/// Decode a path quoted by git (`core.quotePath`)
///
/// Unquoted paths are returned as is. Octal escapes are raw bytes, so
/// multi-byte UTF-8 names decode back to their characters.
pub fn unquote_path(path: &str) -> Cow<'_, str> {
    let Some(inner) = path.strip_prefix('"').and_then(|p| p.strip_suffix('"')) else {
        return Cow::Borrowed(path);
    };

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let escaped = bytes[i + 1];
        i += 2;
        let byte = match escaped {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0b,
            b'0'..=b'7' => {
                let mut value = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + u32::from(bytes[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                (value & 0xff) as u8
            }
            other => other,
        };
        out.push(byte);
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hunk(index: usize) -> Hunk {
        Hunk {
            index: HunkIndex(index),
            file: 0,
            header: b"@@ -1,2 +1,2 @@ fn main()".to_vec(),
            old_range: Range::new(1, 2),
            new_range: Range::new(1, 2),
            lines: vec![
                Line::new(LineType::Context, "fn main() {"),
                Line::new(LineType::Deleted, "    old();"),
                Line::new(LineType::Added, "    new();"),
            ],
        }
    }

    #[test]
    fn test_document_empty() {
        let doc = DiffDocument::empty();
        assert!(doc.is_empty());
        assert_eq!(doc.hunk_count(), 0);
        assert!(doc.indices().is_empty());
    }

    #[test]
    fn test_file_kind_char() {
        assert_eq!(FileKind::Added.as_char(), '+');
        assert_eq!(FileKind::Deleted.as_char(), '-');
        assert_eq!(FileKind::Modified.as_char(), '~');
    }

    #[test]
    fn test_line_type_prefix() {
        assert_eq!(LineType::Added.prefix(), '+');
        assert_eq!(LineType::Deleted.prefix(), '-');
        assert_eq!(LineType::Context.prefix(), ' ');
        assert_eq!(LineType::NoNewline.prefix(), '\\');
    }

    #[test]
    fn test_hunk_rendering() {
        let hunk = sample_hunk(1);
        assert_eq!(
            hunk.to_text(),
            "@@ -1,2 +1,2 @@ fn main()\n fn main() {\n-    old();\n+    new();\n"
        );
        assert_eq!(hunk.changed_lines().count(), 2);
    }

    #[test]
    fn test_hunk_fingerprint_ignores_index() {
        assert_eq!(sample_hunk(1).fingerprint(), sample_hunk(9).fingerprint());
    }

    #[test]
    fn test_file_change_predicates() {
        let file = FileChange {
            old_path: Some("a.txt".into()),
            new_path: Some("b.txt".into()),
            kind: FileKind::Renamed,
            header: FileHeader::default(),
            binary: None,
            hunks: vec![],
        };
        assert!(file.is_rename());
        assert!(file.is_hunkless());
        assert!(!file.creates_file());
        assert_eq!(file.display_path(), "b.txt");
    }

    #[test]
    fn test_range() {
        let range = Range::new(10, 5);
        assert_eq!(range.end(), 15);
    }

    #[test]
    fn test_unquote_path() {
        assert_eq!(unquote_path("plain/file.rs"), "plain/file.rs");
        assert_eq!(unquote_path("\"caf\\303\\251.txt\""), "caf\u{e9}.txt");
        assert_eq!(unquote_path("\"tab\\there\""), "tab\there");
        assert_eq!(unquote_path("\"say \\\"hi\\\"\""), "say \"hi\"");
        assert_eq!(unquote_path("\"back\\\\slash\""), "back\\slash");
        assert_eq!(unquote_path("\"x y\""), "x y");
    }
}
