//! The `editor` environment: pattern-anchored views over project files.
//!
//! A view is a window between a line matching a start pattern and the next
//! line matching an end pattern. Views are re-resolved against the file on
//! disk on every screen pass, so they follow code as it moves. Edits are
//! checked against the last resolved window and refused if the file changed
//! underneath it.

mod command;
pub mod policy;
mod view;

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use regex_lite::Regex;
use thiserror::Error;

use self::command::{COMMANDS, EditorCommand};
use self::policy::{AllowAllPolicy, Operation, PolicyDecision, PolicyHandler};
use self::view::{FileText, ReadError, Snapshot, View, cap_line, display_path};
use crate::environment::{EnvError, Environment};
use crate::limits::EditorLimits;
use crate::types::{CommandResponse, CommandText, ScreenSection};

const SCREEN_MAX_LINES: usize = 100;

/// Command-local failures of the editor.
#[derive(Debug, Error)]
pub enum EditorError {
    /// The command line did not parse.
    #[error("{0}")]
    Parse(String),
    /// File does not exist.
    #[error("File not found: {0}")]
    NotFound(String),
    /// Path names the project directory itself.
    #[error("Not a file: {0}")]
    NotAFile(String),
    /// `create` on an existing path.
    #[error("File already exists: {0}")]
    AlreadyExists(String),
    /// File contains NUL bytes.
    #[error("Cannot view binary file: {0}")]
    Binary(String),
    /// `edit` on a file that is not valid UTF-8.
    #[error("Cannot edit {0}: file is not valid UTF-8")]
    NotUtf8(String),
    /// A regex did not compile.
    #[error("Invalid regex /{pattern}/: {reason}")]
    InvalidPattern {
        /// The pattern as given
        pattern: String,
        /// Compiler message
        reason: String,
    },
    /// A glob did not compile.
    #[error("Invalid glob {pattern}: {reason}")]
    InvalidGlob {
        /// The glob as given
        pattern: String,
        /// Parser message
        reason: String,
    },
    /// `view` whose start pattern matches no line.
    #[error("Start pattern /{pattern}/ not found in {path}")]
    NoMatch {
        /// Start pattern
        pattern: String,
        /// Target file
        path: String,
    },
    /// No view with this id.
    #[error("View [{0}] not found")]
    ViewNotFound(u64),
    /// The view's start pattern no longer matches.
    #[error("View [{id}] is broken: {reason}")]
    ViewBroken {
        /// View id
        id: u64,
        /// Why it broke
        reason: String,
    },
    /// Line range is empty or not 1-based.
    #[error("Invalid line range {start}-{end}: lines are 1-based and start must not exceed end")]
    InvalidRange {
        /// First line
        start: usize,
        /// Last line
        end: usize,
    },
    /// `edit` outside every view's window.
    #[error(
        "No containing view: lines {start}-{end} of {path} are not inside any view's window. \
         Open a view covering them first."
    )]
    NoContainingView {
        /// Target file
        path: String,
        /// First line
        start: usize,
        /// Last line
        end: usize,
    },
    /// The file changed since the view was last resolved.
    #[error(
        "Stale content: {path} changed since view [{id}] was last shown ({detail}). \
         Check the refreshed view and retry."
    )]
    Stale {
        /// Target file
        path: String,
        /// View whose snapshot no longer matches
        id: u64,
        /// First difference
        detail: String,
    },
    /// Path leaves the project directory.
    #[error("Path escapes the project directory: {0}")]
    OutsideProject(String),
    /// Refused by the access policy.
    #[error("Access denied: {0}")]
    Denied(String),
    /// IO error
    #[error("IO error on {path}: {source}")]
    Io {
        /// File involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Views over files under one project directory.
///
/// # Example
///
/// ```rust,no_run
/// use workbench::{CommandText, EditorEnvironment, Environment};
///
/// # async fn demo() -> Result<(), workbench::EnvError> {
/// let mut editor = EditorEnvironment::new("/workspace/project");
/// let response = editor
///     .execute(&CommandText::new("view src/main.py /^def main/ /^if __name__/"))
///     .await?;
/// assert!(response.success);
/// println!("{}", editor.screen()?.content);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EditorEnvironment {
    root: PathBuf,
    limits: EditorLimits,
    policy: Box<dyn PolicyHandler>,
    /// Ascending by id, so the first view is the oldest.
    views: Vec<View>,
    next_id: u64,
}

impl EditorEnvironment {
    /// An editor over `root` with default limits and no access restrictions.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            limits: EditorLimits::default(),
            policy: Box::new(AllowAllPolicy),
            views: Vec::new(),
            next_id: 1,
        }
    }

    /// Replace the limits.
    pub fn with_limits(mut self, limits: EditorLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Replace the access policy.
    pub fn with_policy(mut self, policy: impl PolicyHandler + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Ids of the live views, oldest first.
    pub fn view_ids(&self) -> Vec<u64> {
        self.views.iter().map(|v| v.id).collect()
    }

    fn run(&mut self, command: EditorCommand) -> Result<String, EditorError> {
        match command {
            EditorCommand::View {
                path,
                start,
                end,
                label,
            } => self.open_view(&path, start, end, label),
            EditorCommand::Edit {
                path,
                start,
                end,
                lines,
            } => self.edit(&path, start, end, &lines),
            EditorCommand::Create { path, lines } => self.create(&path, &lines),
            EditorCommand::Close(id) => self.close(id),
            EditorCommand::NextMatch(id) => self.step(id, true),
            EditorCommand::PrevMatch(id) => self.step(id, false),
            EditorCommand::Search { pattern, glob } => self.search(&pattern, &glob),
        }
    }

    /// Map `raw` to (project-relative, absolute), rejecting anything that
    /// leaves the project directory.
    fn resolve_path(&self, raw: &str) -> Result<(PathBuf, PathBuf), EditorError> {
        let path = Path::new(raw);
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| EditorError::OutsideProject(raw.to_string()))?
        } else {
            path
        };

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(EditorError::OutsideProject(raw.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(EditorError::OutsideProject(raw.to_string()));
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(EditorError::NotAFile(raw.to_string()));
        }

        let absolute = self.root.join(&normalized);
        Ok((normalized, absolute))
    }

    fn check(&self, relative: &Path, operation: Operation) -> Result<(), EditorError> {
        match self
            .policy
            .check_access(&display_path(relative), operation)
        {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny(reason) => Err(EditorError::Denied(reason)),
        }
    }

    /// Read a project file for viewing, after a policy check.
    fn load(&self, relative: &Path) -> Result<FileText, EditorError> {
        self.check(relative, Operation::Read)?;
        let shown = display_path(relative);
        FileText::read(&self.root.join(relative), self.limits.binary_sniff_bytes).map_err(
            |e| match e {
                ReadError::NotFound => EditorError::NotFound(shown),
                ReadError::Binary => EditorError::Binary(shown),
                ReadError::Io(source) => EditorError::Io {
                    path: shown,
                    source,
                },
            },
        )
    }

    fn open_view(
        &mut self,
        raw_path: &str,
        start: String,
        end: String,
        label: Option<String>,
    ) -> Result<String, EditorError> {
        let (relative, _) = self.resolve_path(raw_path)?;
        let text = self.load(&relative)?;
        let shown = display_path(&relative);

        let mut view = View::new(self.next_id, relative, start, end, label).map_err(
            |(pattern, e)| EditorError::InvalidPattern {
                pattern,
                reason: e.to_string(),
            },
        )?;
        let match_count = view.windows(&text, self.limits.max_search_lines).len();
        if match_count == 0 {
            return Err(EditorError::NoMatch {
                pattern: view.start_pattern().to_string(),
                path: shown,
            });
        }

        let mut evicted = Vec::new();
        while self.views.len() >= self.limits.max_views.max(1) {
            let oldest = self.views.remove(0);
            tracing::info!(view = oldest.id, "evicted oldest view");
            evicted.push(oldest.id);
        }

        view.resolve(&text, self.limits.max_search_lines);
        let mut message = format!(
            "Added view [{}] {} /{}/ to /{}/ ({} {})",
            view.id,
            shown,
            view.start_pattern(),
            view.end_pattern(),
            match_count,
            if match_count == 1 { "match" } else { "matches" }
        );
        for id in evicted {
            let _ = write!(
                message,
                "\nEvicted view [{id}] (limit of {} views)",
                self.limits.max_views
            );
        }

        self.next_id += 1;
        self.views.push(view);
        Ok(message)
    }

    fn edit(
        &mut self,
        raw_path: &str,
        start: usize,
        end: usize,
        lines: &[String],
    ) -> Result<String, EditorError> {
        if start == 0 || start > end {
            return Err(EditorError::InvalidRange { start, end });
        }
        let (relative, absolute) = self.resolve_path(raw_path)?;
        let shown = display_path(&relative);
        self.check(&relative, Operation::Write)?;

        let Some((index, snapshot)) = self.views.iter().enumerate().find_map(|(i, view)| {
            let snapshot = view.snapshot.as_ref()?;
            (view.path == relative && snapshot.contains(start, end)).then(|| (i, snapshot.clone()))
        }) else {
            return Err(EditorError::NoContainingView {
                path: shown,
                start,
                end,
            });
        };

        let mut text = self.load(&relative)?;
        if !text.is_utf8() {
            return Err(EditorError::NotUtf8(shown));
        }
        if let Some(detail) = stale_detail(&snapshot, &text) {
            let id = self.views[index].id;
            tracing::debug!(view = id, %detail, "rejected stale edit");
            return Err(EditorError::Stale {
                path: shown,
                id,
                detail,
            });
        }

        if text.range(start, end) == Some(lines) {
            return Ok(format!(
                "No changes: lines {start}-{end} of {shown} already have this content"
            ));
        }

        text.replace(start, end, lines);
        text.write(&absolute).map_err(|source| EditorError::Io {
            path: shown.clone(),
            source,
        })?;
        tracing::debug!(path = %shown, start, end, inserted = lines.len(), "edited file");

        self.views[index].pin_after_edit(
            &snapshot,
            start,
            end,
            lines.len(),
            &text,
            self.limits.max_search_lines,
        );

        Ok(format!(
            "Edited {shown}: replaced lines {start}-{end} with {} {}",
            lines.len(),
            if lines.len() == 1 { "line" } else { "lines" }
        ))
    }

    fn create(&mut self, raw_path: &str, lines: &[String]) -> Result<String, EditorError> {
        let (relative, absolute) = self.resolve_path(raw_path)?;
        let shown = display_path(&relative);
        self.check(&relative, Operation::Create)?;

        if absolute.exists() {
            return Err(EditorError::AlreadyExists(shown));
        }
        let io_error = |source| EditorError::Io {
            path: shown.clone(),
            source,
        };
        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&absolute)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EditorError::AlreadyExists(shown));
            }
            Err(e) => return Err(io_error(e)),
        };
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        file.write_all(content.as_bytes()).map_err(io_error)?;

        tracing::debug!(path = %shown, lines = lines.len(), "created file");
        Ok(format!(
            "Created {shown} ({} {})",
            lines.len(),
            if lines.len() == 1 { "line" } else { "lines" }
        ))
    }

    fn close(&mut self, id: u64) -> Result<String, EditorError> {
        let index = self
            .views
            .iter()
            .position(|v| v.id == id)
            .ok_or(EditorError::ViewNotFound(id))?;
        self.views.remove(index);
        Ok(format!("Closed view [{id}]"))
    }

    /// Move a view's match index by one, clamped to the available matches.
    fn step(&mut self, id: u64, forward: bool) -> Result<String, EditorError> {
        let index = self
            .views
            .iter()
            .position(|v| v.id == id)
            .ok_or(EditorError::ViewNotFound(id))?;
        let text = self.load(&self.views[index].path)?;
        let budget = self.limits.max_search_lines;
        let view = &mut self.views[index];

        let count = view.windows(&text, budget).len();
        let Some(last) = count.checked_sub(1) else {
            let reason = format!("start pattern /{}/ not found", view.start_pattern());
            view.mark_broken(reason.clone());
            return Err(EditorError::ViewBroken { id, reason });
        };

        let current = view.match_index.min(last);
        let target = match (forward, current) {
            (true, c) if c == last => None,
            (true, c) => Some(c + 1),
            (false, 0) => None,
            (false, c) => Some(c - 1),
        };

        match target {
            None => {
                view.resolve(&text, budget);
                Ok(format!(
                    "View [{id}] already at {} match ({}/{count})",
                    if forward { "last" } else { "first" },
                    current + 1
                ))
            }
            Some(target) => {
                view.match_index = target;
                view.resolve(&text, budget);
                Ok(format!(
                    "View [{id}] now showing match {}/{count}",
                    target + 1
                ))
            }
        }
    }

    fn search(&self, pattern: &str, glob_pattern: &str) -> Result<String, EditorError> {
        let regex = Regex::new(pattern).map_err(|e| EditorError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let glob_path = Path::new(glob_pattern);
        if glob_path.is_absolute()
            || glob_path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(EditorError::OutsideProject(glob_pattern.to_string()));
        }
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob_pattern
        );
        let entries = glob::glob(&full).map_err(|e| EditorError::InvalidGlob {
            pattern: glob_pattern.to_string(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
        files.sort();
        let mut notes = Vec::new();
        if files.len() > self.limits.max_search_files {
            files.truncate(self.limits.max_search_files);
            notes.push(format!(
                "(searched the first {} files only)",
                self.limits.max_search_files
            ));
        }

        let mut results = Vec::new();
        'files: for file in &files {
            let Ok(relative) = file.strip_prefix(&self.root) else {
                continue;
            };
            // Unreadable, binary and denied files are skipped silently.
            let Ok(text) = self.load(relative) else {
                continue;
            };
            for (i, line) in text.lines.iter().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                if results.len() == self.limits.max_search_matches {
                    notes.push(format!(
                        "(stopped after {} matches)",
                        self.limits.max_search_matches
                    ));
                    break 'files;
                }
                results.push(format!(
                    "{}:{}: {}",
                    display_path(relative),
                    i + 1,
                    cap_line(line.trim_end(), self.limits.max_line_length)
                ));
            }
        }

        if results.is_empty() {
            return Ok("No matches found".to_string());
        }
        let mut output = format!("Matches:\n{}", results.join("\n"));
        for note in notes {
            output.push('\n');
            output.push_str(&note);
        }
        Ok(output)
    }

    /// Re-resolve every view against the files on disk, render them, and
    /// drop the ones that broke.
    fn refresh(&mut self) -> String {
        let texts: Vec<_> = self.views.iter().map(|v| self.load(&v.path)).collect();
        let budget = self.limits.max_search_lines;

        let mut out = String::from("Views:");
        if self.views.is_empty() {
            out.push_str("\n  (no views)");
        }
        for (i, (view, text)) in self.views.iter_mut().zip(texts).enumerate() {
            match text {
                Ok(text) => view.resolve(&text, budget),
                Err(e) => view.mark_broken(e.to_string()),
            }
            if i > 0 {
                out.push('\n');
            }
            out.push('\n');
            out.push_str(&view.render(self.limits.max_line_length, budget));
        }

        self.views.retain(|view| {
            if view.is_broken() {
                tracing::info!(view = view.id, path = %display_path(&view.path), "removed broken view");
            }
            !view.is_broken()
        });

        out.push_str("\n\nCommands:");
        for (_, usage, description) in COMMANDS {
            let _ = write!(out, "\n  {usage} - {description}");
        }
        out
    }
}

/// First difference between a snapshot and the live file, if any.
fn stale_detail(snapshot: &Snapshot, text: &FileText) -> Option<String> {
    for (offset, expected) in snapshot.lines.iter().enumerate() {
        let line_number = snapshot.start_line + offset;
        match text.lines.get(line_number - 1) {
            None => {
                return Some(format!(
                    "file now has {} lines, view expected lines {}-{}",
                    text.lines.len(),
                    snapshot.start_line,
                    snapshot.end_line
                ));
            }
            Some(actual) if actual != expected => {
                return Some(format!(
                    "line {line_number}: expected {expected:?}, found {actual:?}"
                ));
            }
            Some(_) => {}
        }
    }
    None
}

#[async_trait]
impl Environment for EditorEnvironment {
    async fn execute(&mut self, command: &CommandText) -> Result<CommandResponse, EnvError> {
        let result = command::parse(command)
            .map_err(|e| EditorError::Parse(e.to_string()))
            .and_then(|command| self.run(command));

        Ok(match result {
            Ok(output) => CommandResponse::ok(output),
            Err(error) => {
                tracing::debug!(%error, "editor command failed");
                CommandResponse::failed(error.to_string())
            }
        })
    }

    fn screen(&mut self) -> Result<ScreenSection, EnvError> {
        Ok(ScreenSection::new(self.refresh()).with_max_lines(SCREEN_MAX_LINES))
    }
}
