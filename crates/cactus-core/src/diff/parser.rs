//! Unified diff parser

use crate::diff::model::*;
use crate::error::{CactusError, Result};
use crate::types::HunkIndex;
use tracing::{debug, trace, warn};

/// Default number of parse attempts before a diff is rejected
pub const DEFAULT_MAX_PARSE_ATTEMPTS: usize = 5;

/// Configuration for the diff parser
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Total parse attempts; each retry appends a newline to the input
    pub max_attempts: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_PARSE_ATTEMPTS,
        }
    }
}

/// Unified diff parser
pub struct DiffParser {
    config: ParserConfig,
}

impl DiffParser {
    /// Create a new parser with default config
    pub fn new() -> Self {
        Self {
            config: ParserConfig::default(),
        }
    }

    /// Create a new parser with custom config
    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse raw diff bytes
    ///
    /// Some producers drop the final newline of a trailing blank context
    /// line. On failure the parser appends a newline and tries again, up to
    /// `max_attempts` attempts in total.
    pub fn parse(&self, input: &[u8]) -> Result<DiffDocument> {
        let attempts = self.config.max_attempts.max(1);
        let mut buffer = input.to_vec();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match parse_once(&buffer) {
                Ok(doc) => {
                    if attempt > 1 {
                        debug!("Diff parsed after appending {} newline(s)", attempt - 1);
                    }
                    return Ok(doc);
                }
                Err(CactusError::MalformedDiff(message)) => {
                    trace!("Parse attempt {} failed: {}", attempt, message);
                    last_error = message;
                    buffer.push(b'\n');
                }
                Err(other) => return Err(other),
            }
        }

        warn!("Giving up on diff after {} attempts", attempts);
        Err(CactusError::MalformedDiff(format!(
            "{} (after {} attempts)",
            last_error, attempts
        )))
    }
}

impl Default for DiffParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split into lines on `\n`, keeping any `\r`
fn split_lines(input: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = input.split(|&b| b == b'\n').collect();
    if input.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

fn parse_once(input: &[u8]) -> Result<DiffDocument> {
    let lines = split_lines(input);
    let mut files = Vec::new();
    let mut next_index = HunkIndex::FIRST;
    let mut i = 0;

    while i < lines.len() {
        if starts_file(&lines, i) {
            let file = parse_file(&lines, &mut i, files.len(), &mut next_index)?;
            files.push(file);
        } else {
            trace!("Skipping line outside of a file block: {}", lossy(lines[i]));
            i += 1;
        }
    }

    if files.is_empty() && lines.iter().any(|l| !l.is_empty()) {
        return Err(CactusError::MalformedDiff(
            "no file headers found".to_string(),
        ));
    }

    Ok(DiffDocument { files })
}

fn starts_file(lines: &[&[u8]], i: usize) -> bool {
    let line = lines[i];
    line.starts_with(b"diff --git ")
        || (line.starts_with(b"--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with(b"+++ ")))
}

fn parse_file(
    lines: &[&[u8]],
    i: &mut usize,
    position: usize,
    next_index: &mut HunkIndex,
) -> Result<FileChange> {
    let mut file = FileChangeBuilder::default();

    if let Some(rest) = lines[*i].strip_prefix(b"diff --git ") {
        let rest = lossy(rest);
        let (old, new) = split_git_header_paths(&rest).ok_or_else(|| {
            CactusError::MalformedDiff(format!("Invalid diff header: diff --git {}", rest))
        })?;
        file.header_old = strip_side_prefix(&old, "a/");
        file.header_new = strip_side_prefix(&new, "b/");
        *i += 1;
    }

    // Extended headers and ---/+++ lines
    while *i < lines.len() {
        let line = lines[*i];
        if line.starts_with(b"diff --git ") || line.starts_with(b"@@ ") {
            break;
        }
        if let Some(rest) = line.strip_prefix(b"--- ") {
            let plus = lines
                .get(*i + 1)
                .and_then(|l| l.strip_prefix(b"+++ "))
                .ok_or_else(|| {
                    CactusError::MalformedDiff(format!(
                        "'--- {}' is not followed by a '+++' line",
                        lossy(rest)
                    ))
                })?;
            file.minus = Some(strip_side_prefix(&marker_path(rest), "a/"));
            file.plus = Some(strip_side_prefix(&marker_path(plus), "b/"));
            *i += 2;
            continue;
        }
        if line.starts_with(b"GIT binary patch") {
            let mut payload = Vec::new();
            while *i < lines.len() && !lines[*i].starts_with(b"diff --git ") {
                payload.push(lines[*i].to_vec());
                *i += 1;
            }
            file.binary = Some(payload);
            break;
        }
        if line.starts_with(b"Binary files ") {
            file.binary = Some(vec![line.to_vec()]);
        } else {
            file.extended_header(&lossy(line));
        }
        *i += 1;
    }

    while *i < lines.len() && lines[*i].starts_with(b"@@ ") {
        let hunk = parse_hunk(lines, i, position, *next_index)?;
        *next_index = next_index.next();
        file.hunks.push(hunk);
    }

    // Anything up to the next file header is noise (e.g. mail signatures)
    while *i < lines.len() && !starts_file(lines, *i) {
        trace!("Ignoring trailing line: {}", lossy(lines[*i]));
        *i += 1;
    }

    Ok(file.build())
}

fn parse_hunk(
    lines: &[&[u8]],
    i: &mut usize,
    file: usize,
    index: HunkIndex,
) -> Result<Hunk> {
    let header = lines[*i];
    let (old_range, new_range) = parse_hunk_header(&lossy(header))?;
    let mut hunk = HunkBuilder::new(index, file, header.to_vec(), old_range, new_range);
    *i += 1;

    let mut old_left = old_range.count;
    let mut new_left = new_range.count;

    while old_left > 0 || new_left > 0 {
        let Some(line) = lines.get(*i) else {
            return Err(CactusError::MalformedDiff(format!(
                "hunk '{}' ends early ({} old / {} new lines missing)",
                lossy(header),
                old_left,
                new_left
            )));
        };
        let (line_type, content) = match line.first() {
            None => (LineType::Context, &line[..]),
            Some(b' ') => (LineType::Context, &line[1..]),
            Some(b'-') => (LineType::Deleted, &line[1..]),
            Some(b'+') => (LineType::Added, &line[1..]),
            Some(b'\\') => (LineType::NoNewline, &line[1..]),
            Some(_) => {
                return Err(CactusError::MalformedDiff(format!(
                    "unexpected line in hunk '{}': {}",
                    lossy(header),
                    lossy(line)
                )))
            }
        };

        let overflow = match line_type {
            LineType::Context => take(&mut old_left) || take(&mut new_left),
            LineType::Deleted => take(&mut old_left),
            LineType::Added => take(&mut new_left),
            LineType::NoNewline => false,
        };
        if overflow {
            return Err(CactusError::MalformedDiff(format!(
                "hunk '{}' has more lines than its header declares",
                lossy(header)
            )));
        }

        hunk.lines.push(Line::new(line_type, content));
        *i += 1;
    }

    while *i < lines.len() && lines[*i].starts_with(b"\\") {
        hunk.lines.push(Line::new(LineType::NoNewline, &lines[*i][1..]));
        *i += 1;
    }

    Ok(hunk.build())
}

/// Decrement a remaining-line counter, reporting underflow
fn take(left: &mut usize) -> bool {
    match left.checked_sub(1) {
        Some(n) => {
            *left = n;
            false
        }
        None => true,
    }
}

/// Parse hunk header to extract ranges
fn parse_hunk_header(line: &str) -> Result<(Range, Range)> {
    // Format: "@@ -10,5 +10,7 @@ optional section" or "@@ -10 +10 @@"
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 || parts[0] != "@@" || parts[3] != "@@" {
        return Err(CactusError::MalformedDiff(format!(
            "Invalid hunk header: {}",
            line
        )));
    }

    let old = parts[1].strip_prefix('-');
    let new = parts[2].strip_prefix('+');
    match (old, new) {
        (Some(old), Some(new)) => Ok((parse_range(old)?, parse_range(new)?)),
        _ => Err(CactusError::MalformedDiff(format!(
            "Invalid hunk header: {}",
            line
        ))),
    }
}

/// Parse a range string like "10,5" or "10"
fn parse_range(s: &str) -> Result<Range> {
    let invalid = || CactusError::MalformedDiff(format!("Invalid range: {}", s));
    let (start, count) = match s.split_once(',') {
        Some((start, count)) => (start, Some(count)),
        None => (s, None),
    };
    let start = start.parse::<usize>().map_err(|_| invalid())?;
    let count = match count {
        Some(count) => count.parse::<usize>().map_err(|_| invalid())?,
        None => 1,
    };
    Ok(Range::new(start, count))
}

/// Split the two path tokens of a `diff --git` header
fn split_git_header_paths(rest: &str) -> Option<(String, String)> {
    if rest.starts_with('"') {
        let end = closing_quote(rest)?;
        let (old, new) = rest.split_at(end + 1);
        return Some((old.to_string(), new.trim_start().to_string()));
    }

    // "a/<path> b/<path>" with identical paths, which may contain spaces
    if rest.len() % 2 == 1 {
        let half = rest.len() / 2;
        if let (Some(old), Some(sep), Some(new)) =
            (rest.get(..half), rest.get(half..half + 1), rest.get(half + 1..))
        {
            if sep == " " && old.get(2..) == new.get(2..) {
                return Some((old.to_string(), new.to_string()));
            }
        }
    }

    if let Some(pos) = rest.find(" \"") {
        return Some((rest[..pos].to_string(), rest[pos + 1..].to_string()));
    }
    rest.find(" b/")
        .or_else(|| rest.find(' '))
        .map(|pos| (rest[..pos].to_string(), rest[pos + 1..].to_string()))
}

fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (pos, c) in s.char_indices().skip(1) {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(pos),
            _ => escaped = false,
        }
    }
    None
}

/// Path token of a `---`/`+++` line, without any trailing tab-separated data
fn marker_path(rest: &[u8]) -> String {
    let text = lossy(rest);
    if text.starts_with('"') {
        return text;
    }
    match text.split_once('\t') {
        Some((path, _)) => path.to_string(),
        None => text,
    }
}

/// Remove the `a/` or `b/` side prefix; `/dev/null` maps to None
///
/// Quoted paths keep their quotes: `"a/x y"` becomes `"x y"`.
fn strip_side_prefix(token: &str, prefix: &str) -> Option<String> {
    let token = token.trim_end_matches('\r');
    if token == "/dev/null" {
        return None;
    }
    if let Some(inner) = token.strip_prefix('"') {
        return Some(match inner.strip_prefix(prefix) {
            Some(rest) => format!("\"{}", rest),
            None => token.to_string(),
        });
    }
    Some(token.strip_prefix(prefix).unwrap_or(token).to_string())
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Builder for FileChange
#[derive(Default)]
struct FileChangeBuilder {
    header_old: Option<String>,
    header_new: Option<String>,
    minus: Option<Option<String>>,
    plus: Option<Option<String>>,
    rename_from: Option<String>,
    rename_to: Option<String>,
    header: FileHeader,
    binary: Option<Vec<Vec<u8>>>,
    hunks: Vec<Hunk>,
}

impl FileChangeBuilder {
    fn extended_header(&mut self, line: &str) {
        let line = line.trim_end_matches('\r');
        if let Some(mode) = line.strip_prefix("old mode ") {
            self.header.old_mode = Some(mode.to_string());
        } else if let Some(mode) = line.strip_prefix("new mode ") {
            self.header.new_mode = Some(mode.to_string());
        } else if let Some(mode) = line.strip_prefix("new file mode ") {
            self.header.new_file_mode = Some(mode.to_string());
        } else if let Some(mode) = line.strip_prefix("deleted file mode ") {
            self.header.deleted_file_mode = Some(mode.to_string());
        } else if line.starts_with("similarity index ") || line.starts_with("dissimilarity index ") {
            self.header.similarity = Some(line.to_string());
        } else if let Some(path) = line.strip_prefix("rename from ") {
            self.rename_from = Some(path.to_string());
        } else if let Some(path) = line.strip_prefix("rename to ") {
            self.rename_to = Some(path.to_string());
        } else if line.starts_with("index ") {
            self.header.index = Some(line.to_string());
        } else {
            debug!("Ignoring unknown extended header: {}", line);
        }
    }

    fn build(self) -> FileChange {
        let is_new = self.header.new_file_mode.is_some()
            || matches!(self.minus, Some(None));
        let is_deleted = self.header.deleted_file_mode.is_some()
            || matches!(self.plus, Some(None));

        let old_path = if is_new {
            None
        } else {
            self.rename_from
                .or_else(|| self.minus.flatten())
                .or(self.header_old)
        };
        let new_path = if is_deleted {
            None
        } else {
            self.rename_to
                .or_else(|| self.plus.flatten())
                .or(self.header_new)
        };

        let renamed = matches!((&old_path, &new_path), (Some(a), Some(b)) if a != b);
        let kind = if self.binary.is_some() {
            FileKind::Binary
        } else if renamed {
            FileKind::Renamed
        } else if is_new {
            FileKind::Added
        } else if is_deleted {
            FileKind::Deleted
        } else {
            FileKind::Modified
        };

        FileChange {
            old_path,
            new_path,
            kind,
            header: self.header,
            binary: self.binary,
            hunks: self.hunks,
        }
    }
}

/// Builder for Hunk
struct HunkBuilder {
    index: HunkIndex,
    file: usize,
    header: Vec<u8>,
    old_range: Range,
    new_range: Range,
    lines: Vec<Line>,
}

impl HunkBuilder {
    fn new(index: HunkIndex, file: usize, header: Vec<u8>, old_range: Range, new_range: Range) -> Self {
        Self {
            index,
            file,
            header,
            old_range,
            new_range,
            lines: Vec::new(),
        }
    }

    fn build(self) -> Hunk {
        Hunk {
            index: self.index,
            file: self.file,
            header: self.header,
            old_range: self.old_range,
            new_range: self.new_range,
            lines: self.lines,
        }
    }
}
