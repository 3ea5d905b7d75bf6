//! Editor command grammar.

use crate::types::CommandText;

/// `(name, usage, description)` for every editor command.
pub(crate) const COMMANDS: &[(&str, &str, &str)] = &[
    (
        "view",
        "view <path> /<start>/ /<end>/ [label]",
        "open a window between two patterns",
    ),
    (
        "edit",
        "edit <path> <start>-<end>  + new lines",
        "replace lines inside a view",
    ),
    ("create", "create <path>  + content lines", "create a new file"),
    ("close", "close <id>", "close a view"),
    ("next_match", "next_match <id>", "show the next start-pattern match"),
    ("prev_match", "prev_match <id>", "show the previous start-pattern match"),
    (
        "search",
        "search \"<pattern>\" <glob>",
        "find matching lines in files",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EditorCommand {
    View {
        path: String,
        start: String,
        end: String,
        label: Option<String>,
    },
    Edit {
        path: String,
        start: usize,
        end: usize,
        lines: Vec<String>,
    },
    Create {
        path: String,
        lines: Vec<String>,
    },
    Close(u64),
    NextMatch(u64),
    PrevMatch(u64),
    Search {
        pattern: String,
        glob: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParseError {
    Empty,
    Unknown(String),
    Usage(&'static str),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Empty => write!(f, "Empty command. Available: {}", command_names()),
            ParseError::Unknown(name) => {
                write!(f, "Unknown command: {name}. Available: {}", command_names())
            }
            ParseError::Usage(name) => write!(f, "Invalid {name} command. Usage: {}", usage(name)),
        }
    }
}

fn command_names() -> String {
    COMMANDS
        .iter()
        .map(|(name, _, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn usage(name: &str) -> &'static str {
    COMMANDS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, usage, _)| *usage)
        .unwrap_or("")
}

pub(crate) fn parse(command: &CommandText) -> Result<EditorCommand, ParseError> {
    let instruction = command.instruction();
    let (name, rest) = match instruction.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (instruction, ""),
    };

    match name {
        "" => Err(ParseError::Empty),
        "view" => parse_view(rest).ok_or(ParseError::Usage("view")),
        "edit" => {
            let (path, start, end) = parse_edit(rest).ok_or(ParseError::Usage("edit"))?;
            Ok(EditorCommand::Edit {
                path,
                start,
                end,
                lines: command.payload_lines(),
            })
        }
        "create" => match tokens(rest).as_slice() {
            [path] => Ok(EditorCommand::Create {
                path: path.to_string(),
                lines: command.payload_lines(),
            }),
            _ => Err(ParseError::Usage("create")),
        },
        "close" => parse_id(rest)
            .map(EditorCommand::Close)
            .ok_or(ParseError::Usage("close")),
        "next_match" => parse_id(rest)
            .map(EditorCommand::NextMatch)
            .ok_or(ParseError::Usage("next_match")),
        "prev_match" => parse_id(rest)
            .map(EditorCommand::PrevMatch)
            .ok_or(ParseError::Usage("prev_match")),
        "search" => parse_search(rest).ok_or(ParseError::Usage("search")),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn tokens(rest: &str) -> Vec<&str> {
    rest.split_whitespace().collect()
}

fn parse_id(rest: &str) -> Option<u64> {
    match tokens(rest).as_slice() {
        [id] => id.parse().ok(),
        _ => None,
    }
}

/// `<path> /<start>/ /<end>/ [label]`
///
/// The start pattern ends at the first `/` followed by whitespace and another
/// `/`; the end pattern ends at the first `/` followed by whitespace or the
/// end of the line.
fn parse_view(rest: &str) -> Option<EditorCommand> {
    let (path, rest) = rest.split_once(char::is_whitespace)?;
    let rest = rest.trim_start().strip_prefix('/')?;

    let start_len = closing_slashes(rest).find(|&i| {
        let after = &rest[i + 1..];
        let trimmed = after.trim_start();
        trimmed.len() < after.len() && trimmed.starts_with('/')
    })?;
    let start = &rest[..start_len];
    let rest = rest[start_len + 1..].trim_start().strip_prefix('/')?;

    let end_len = closing_slashes(rest).find(|&i| {
        let after = &rest[i + 1..];
        after.is_empty() || after.starts_with(char::is_whitespace)
    })?;
    let end = &rest[..end_len];
    let label = rest[end_len + 1..].trim();

    Some(EditorCommand::View {
        path: path.to_string(),
        start: start.to_string(),
        end: end.to_string(),
        label: (!label.is_empty()).then(|| label.to_string()),
    })
}

/// Byte offsets of every `/` after the first character of a pattern.
fn closing_slashes(pattern: &str) -> impl Iterator<Item = usize> + '_ {
    pattern
        .char_indices()
        .skip(1)
        .filter(|&(_, c)| c == '/')
        .map(|(i, _)| i)
}

/// `<path> <start>-<end>`
fn parse_edit(rest: &str) -> Option<(String, usize, usize)> {
    let tokens = tokens(rest);
    let [path, range] = tokens.as_slice() else {
        return None;
    };
    let (start, end) = range.split_once('-')?;
    Some((path.to_string(), start.parse().ok()?, end.parse().ok()?))
}

/// `"<pattern>" <glob>`
fn parse_search(rest: &str) -> Option<EditorCommand> {
    let rest = rest.strip_prefix('"')?;
    let close = rest.rfind('"')?;
    let pattern = &rest[..close];
    let glob = rest[close + 1..].trim();
    if pattern.is_empty() || glob.is_empty() || glob.contains(char::is_whitespace) {
        return None;
    }
    Some(EditorCommand::Search {
        pattern: pattern.to_string(),
        glob: glob.to_string(),
    })
}
