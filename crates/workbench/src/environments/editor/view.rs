//! Pattern-anchored views and the file text they resolve against.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use regex_lite::Regex;

/// A text file split into lines, each remembering its own terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileText {
    pub lines: Vec<String>,
    /// One per line; only the last line may be unterminated.
    endings: Vec<LineEnding>,
    utf8: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Lf,
    CrLf,
    None,
}

impl LineEnding {
    fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::None => "",
        }
    }
}

/// Why a file could not be loaded as text.
#[derive(Debug)]
pub(crate) enum ReadError {
    NotFound,
    Binary,
    Io(io::Error),
}

impl FileText {
    /// Split `text` into lines, recording each line's terminator.
    pub fn parse(text: &str) -> Self {
        let (lines, endings) = text
            .split_inclusive('\n')
            .map(|chunk| {
                if let Some(line) = chunk.strip_suffix("\r\n") {
                    (line.to_string(), LineEnding::CrLf)
                } else if let Some(line) = chunk.strip_suffix('\n') {
                    (line.to_string(), LineEnding::Lf)
                } else {
                    (chunk.to_string(), LineEnding::None)
                }
            })
            .unzip();
        Self {
            lines,
            endings,
            utf8: true,
        }
    }

    /// Read `path` in full. A NUL byte in the first `sniff_bytes` marks the
    /// file as binary. Invalid UTF-8 is decoded lossily and the result is
    /// marked read-only.
    pub fn read(path: &Path, sniff_bytes: usize) -> Result<Self, ReadError> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ReadError::NotFound,
            _ => ReadError::Io(e),
        })?;
        if is_binary(&bytes, sniff_bytes) {
            return Err(ReadError::Binary);
        }
        Ok(match String::from_utf8(bytes) {
            Ok(text) => Self::parse(&text),
            Err(e) => Self {
                utf8: false,
                ..Self::parse(&String::from_utf8_lossy(e.as_bytes()))
            },
        })
    }

    /// False when `lines` is a lossy decode and cannot be written back.
    pub fn is_utf8(&self) -> bool {
        self.utf8
    }

    /// The file contents, every line with its own terminator.
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .zip(&self.endings)
            .fold(String::new(), |mut text, (line, ending)| {
                text.push_str(line);
                text.push_str(ending.as_str());
                text
            })
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.render())
    }

    /// Lines `start..=end` (1-based), if the file has them.
    pub fn range(&self, start: usize, end: usize) -> Option<&[String]> {
        if start == 0 || start > end {
            return None;
        }
        self.lines.get(start - 1..end)
    }

    /// Replace lines `start..=end` (1-based, must exist) with `new`.
    ///
    /// Lines outside the range keep their bytes. The last new line takes the
    /// terminator of the last replaced line; the others take the terminator
    /// of the first replaced line, or the file's usual one if that line was
    /// unterminated.
    pub fn replace(&mut self, start: usize, end: usize, new: &[String]) {
        let first = self.endings[start - 1];
        let last = self.endings[end - 1];
        let fill = match first {
            LineEnding::None => self.usual_ending(),
            ending => ending,
        };
        let endings = (0..new.len()).map(|i| if i + 1 == new.len() { last } else { fill });

        self.endings.splice(start - 1..end, endings.collect::<Vec<_>>());
        self.lines.splice(start - 1..end, new.iter().cloned());
    }

    fn usual_ending(&self) -> LineEnding {
        self.endings
            .iter()
            .copied()
            .find(|ending| *ending != LineEnding::None)
            .unwrap_or(LineEnding::Lf)
    }
}

pub(crate) fn is_binary(bytes: &[u8], sniff_bytes: usize) -> bool {
    bytes[..bytes.len().min(sniff_bytes)].contains(&0)
}

/// One candidate window: a start-pattern line and where it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    /// 1-based, inclusive
    pub start_line: usize,
    /// 1-based, inclusive
    pub end_line: usize,
    /// The end pattern was not found within the scan budget.
    pub truncated: bool,
}

/// Every window in `lines`, one per start-pattern match.
///
/// The end pattern is searched from the line after the start, up to
/// `budget` lines; if it never matches the window is capped and marked
/// truncated.
pub(crate) fn find_windows(
    lines: &[String],
    start: &Regex,
    end: &Regex,
    budget: usize,
) -> Vec<Window> {
    let budget = budget.max(1);
    let mut windows = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !start.is_match(line) {
            continue;
        }
        let scan_end = (i + 1 + budget).min(lines.len());
        let window = match (i + 1..scan_end).find(|&j| end.is_match(&lines[j])) {
            Some(j) => Window {
                start_line: i + 1,
                end_line: j + 1,
                truncated: false,
            },
            None => Window {
                start_line: i + 1,
                end_line: (i + budget).min(lines.len()),
                truncated: true,
            },
        };
        windows.push(window);
    }
    windows
}

/// The last resolved window of a view, used to verify edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub start_line: usize,
    pub end_line: usize,
    pub lines: Vec<String>,
    pub truncated: bool,
}

impl Snapshot {
    pub fn contains(&self, start: usize, end: usize) -> bool {
        self.start_line <= start && end <= self.end_line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ViewStatus {
    Active { match_count: usize },
    Broken { reason: String },
}

/// A live window into a file, anchored by a start and an end pattern.
#[derive(Debug, Clone)]
pub(crate) struct View {
    pub id: u64,
    /// Project-relative, normalized
    pub path: PathBuf,
    pub label: Option<String>,
    pub match_index: usize,
    pub snapshot: Option<Snapshot>,
    pub status: ViewStatus,
    start_pattern: String,
    end_pattern: String,
    start_re: Regex,
    end_re: Regex,
}

impl View {
    pub fn new(
        id: u64,
        path: PathBuf,
        start_pattern: String,
        end_pattern: String,
        label: Option<String>,
    ) -> Result<Self, (String, regex_lite::Error)> {
        let start_re = Regex::new(&start_pattern).map_err(|e| (start_pattern.clone(), e))?;
        let end_re = Regex::new(&end_pattern).map_err(|e| (end_pattern.clone(), e))?;
        Ok(Self {
            id,
            path,
            label,
            match_index: 0,
            snapshot: None,
            status: ViewStatus::Broken {
                reason: "not resolved yet".to_string(),
            },
            start_pattern,
            end_pattern,
            start_re,
            end_re,
        })
    }

    pub fn start_pattern(&self) -> &str {
        &self.start_pattern
    }

    pub fn end_pattern(&self) -> &str {
        &self.end_pattern
    }

    pub fn is_broken(&self) -> bool {
        matches!(self.status, ViewStatus::Broken { .. })
    }

    pub fn match_count(&self) -> usize {
        match self.status {
            ViewStatus::Active { match_count } => match_count,
            ViewStatus::Broken { .. } => 0,
        }
    }

    pub fn windows(&self, text: &FileText, budget: usize) -> Vec<Window> {
        find_windows(&text.lines, &self.start_re, &self.end_re, budget)
    }

    /// Resolve against fresh file text, clamping the match index and storing
    /// the new snapshot.
    pub fn resolve(&mut self, text: &FileText, budget: usize) {
        let windows = self.windows(text, budget);
        let Some(last) = windows.len().checked_sub(1) else {
            self.mark_broken(format!("start pattern /{}/ not found", self.start_pattern));
            return;
        };
        self.match_index = self.match_index.min(last);
        let window = windows[self.match_index];
        self.snapshot = Some(Snapshot {
            start_line: window.start_line,
            end_line: window.end_line,
            lines: text
                .range(window.start_line, window.end_line)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            truncated: window.truncated,
        });
        self.status = ViewStatus::Active {
            match_count: windows.len(),
        };
    }

    pub fn mark_broken(&mut self, reason: impl Into<String>) {
        self.snapshot = None;
        self.status = ViewStatus::Broken {
            reason: reason.into(),
        };
    }

    /// Re-anchor after an edit of lines `start..=end` that replaced them with
    /// `inserted` lines.
    ///
    /// A replaced boundary line whose text changed gets its pattern pinned to
    /// the literal new text, then the view re-selects the window that starts
    /// where the old one did.
    pub fn pin_after_edit(
        &mut self,
        old: &Snapshot,
        start: usize,
        end: usize,
        inserted: usize,
        text: &FileText,
        budget: usize,
    ) {
        let removed = end - start + 1;
        let new_end_line = (old.end_line + inserted).checked_sub(removed);

        if start == old.start_line
            && inserted > 0
            && let Some(line) = text.lines.get(old.start_line - 1)
            && old.lines.first() != Some(line)
        {
            self.set_start_pattern(literal_pattern(line));
        }

        if end == old.end_line
            && !old.truncated
            && let Some(new_end_line) = new_end_line
            && new_end_line > old.start_line
            && let Some(line) = text.lines.get(new_end_line - 1)
            && old.lines.last() != Some(line)
        {
            self.set_end_pattern(literal_pattern(line));
        }

        let windows = self.windows(text, budget);
        if let Some(index) = windows
            .iter()
            .position(|w| w.start_line == old.start_line)
        {
            self.match_index = index;
        }
        self.resolve(text, budget);
    }

    fn set_start_pattern(&mut self, pattern: String) {
        if let Ok(re) = Regex::new(&pattern) {
            tracing::debug!(view = self.id, %pattern, "pinned start pattern");
            self.start_re = re;
            self.start_pattern = pattern;
        }
    }

    fn set_end_pattern(&mut self, pattern: String) {
        if let Ok(re) = Regex::new(&pattern) {
            tracing::debug!(view = self.id, %pattern, "pinned end pattern");
            self.end_re = re;
            self.end_pattern = pattern;
        }
    }

    /// Header line: `[id] path /start/ to /end/ (match i/n) "label"`.
    pub fn header(&self) -> String {
        let mut header = format!(
            "[{}] {} /{}/ to /{}/",
            self.id,
            display_path(&self.path),
            self.start_pattern,
            self.end_pattern
        );
        if let ViewStatus::Active { match_count } = self.status {
            let _ = write!(header, " (match {}/{})", self.match_index + 1, match_count);
        }
        if let Some(label) = &self.label {
            let _ = write!(header, " \"{label}\"");
        }
        header
    }

    /// Header plus numbered content, or the broken marker.
    pub fn render(&self, max_line_length: usize, budget: usize) -> String {
        match (&self.status, &self.snapshot) {
            (ViewStatus::Broken { reason }, _) => format!(
                "[{}] {} [BROKEN: {}]",
                self.id,
                display_path(&self.path),
                reason
            ),
            (ViewStatus::Active { .. }, Some(snapshot)) => {
                let mut out = self.header();
                for (offset, line) in snapshot.lines.iter().enumerate() {
                    let number = snapshot.start_line + offset;
                    if line.is_empty() {
                        let _ = write!(out, "\n{number:6}");
                    } else {
                        let _ = write!(out, "\n{number:6}  {}", cap_line(line, max_line_length));
                    }
                }
                if snapshot.truncated {
                    let _ = write!(
                        out,
                        "\n        [TRUNCATED: end pattern not found within {budget} lines]"
                    );
                }
                out
            }
            (ViewStatus::Active { .. }, None) => self.header(),
        }
    }
}

/// Anchored, escaped literal match of `line`.
pub(crate) fn literal_pattern(line: &str) -> String {
    format!("^{}$", regex_lite::escape(line))
}

/// Cut `line` to `max` characters, marking the cut with `...`.
pub(crate) fn cap_line(line: &str, max: usize) -> String {
    match line.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

/// Project-relative path with `/` separators.
pub(crate) fn display_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
