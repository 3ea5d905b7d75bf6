//! Startup configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environments::editor::policy::{Policy, PolicyBuilder};
use crate::limits::{EditorLimits, ProcessLimits};
use crate::loader::builtin_names;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid JSON for [`WorkbenchConfig`].
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
    /// A protected glob does not compile.
    #[error("invalid protected glob {pattern:?}: {source}")]
    Glob {
        /// The glob as given
        pattern: String,
        /// Underlying error
        #[source]
        source: glob::PatternError,
    },
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the workbench needs to start.
///
/// Every field has a default, so a config file only needs the values it
/// changes:
///
/// ```json
/// { "project_dir": "/workspace", "editor": { "max_views": 5 }, "protected": [".git/**"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkbenchConfig {
    /// Directory the environments work in
    pub project_dir: PathBuf,
    /// View manager limits
    pub editor: EditorLimits,
    /// Subprocess limits
    pub process: ProcessLimits,
    /// Globs (relative to the project) the editor may not write or create
    pub protected: Vec<String>,
    /// Load manifests from `<project_dir>/env/*.json`
    pub discover_extensions: bool,
    /// Built-in environments to leave out
    pub disabled: Vec<String>,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            editor: EditorLimits::default(),
            process: ProcessLimits::default(),
            protected: Vec::new(),
            discover_extensions: true,
            disabled: Vec::new(),
        }
    }
}

impl WorkbenchConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the environments cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.editor.max_views == 0 {
            return Err(ConfigError::Invalid(
                "editor.max_views must be at least 1".to_string(),
            ));
        }
        if self.editor.max_search_lines == 0 {
            return Err(ConfigError::Invalid(
                "editor.max_search_lines must be at least 1".to_string(),
            ));
        }
        if let Some(unknown) = self
            .disabled
            .iter()
            .find(|name| !builtin_names().any(|builtin| builtin == name.as_str()))
        {
            return Err(ConfigError::Invalid(format!(
                "cannot disable unknown built-in {unknown:?} (built-ins: {})",
                builtin_names().collect::<Vec<_>>().join(", ")
            )));
        }
        self.policy().map(|_| ())
    }

    /// The editor access policy: protected globs deny writes, everything else
    /// is allowed.
    pub fn policy(&self) -> Result<Policy, ConfigError> {
        let mut builder = PolicyBuilder::allow_by_default();
        for pattern in &self.protected {
            builder = builder
                .deny_write(pattern)
                .map_err(|source| ConfigError::Glob {
                    pattern: pattern.clone(),
                    source,
                })?;
        }
        Ok(builder.build())
    }

    /// Whether the built-in `name` should be registered.
    pub fn is_enabled(&self, name: &str) -> bool {
        !self.disabled.iter().any(|d| d == name)
    }
}
