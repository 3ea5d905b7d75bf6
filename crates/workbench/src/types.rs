//! Core value types shared by the router, the aggregator and every environment.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default line cap for a screen section.
pub const DEFAULT_MAX_LINES: usize = 50;

/// Error returned when a string is not a valid environment name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid environment name: {0:?} (must be an identifier: letters, digits and '_', not starting with a digit)")]
pub struct InvalidName(pub String);

/// Name of an environment.
///
/// Names are identifiers (`[A-Za-z_][A-Za-z0-9_]*`) so they can double as
/// manifest file stems and JSON object keys without escaping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EnvironmentName(String);

impl EnvironmentName {
    /// Validate and wrap a name.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidName> {
        let value = value.into();
        if is_identifier(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidName(value))
        }
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for EnvironmentName {
    type Err = InvalidName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for EnvironmentName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The raw text of a command sent to an environment.
///
/// The first line is the instruction; any further lines are a literal payload
/// (used by the editor's `create` and `edit`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandText(String);

impl CommandText {
    /// Wrap command text.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The full command text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The instruction line, trimmed.
    pub fn instruction(&self) -> &str {
        self.0.split('\n').next().unwrap_or("").trim()
    }

    /// Everything after the instruction line, split into lines.
    ///
    /// A trailing newline does not produce an extra empty line.
    pub fn payload_lines(&self) -> Vec<String> {
        match self.0.split_once('\n') {
            Some((_, rest)) => rest.lines().map(str::to_string).collect(),
            None => Vec::new(),
        }
    }
}

impl From<&str> for CommandText {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CommandText {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Text output of the command.
    pub output: String,
    /// Whether the command succeeded, as defined by the environment.
    pub success: bool,
}

impl CommandResponse {
    /// A successful response.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    /// A failed response.
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

/// One environment's contribution to the screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSection {
    /// Text to display.
    pub content: String,
    /// Maximum number of lines the aggregator lets through.
    pub max_lines: usize,
}

impl ScreenSection {
    /// A section with the default line cap.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            max_lines: DEFAULT_MAX_LINES,
        }
    }

    /// Override the line cap.
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }
}
