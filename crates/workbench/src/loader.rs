//! Startup population of the [`Registry`].
//!
//! Built-ins come from a static list. Extensions are JSON manifests in
//! `<project>/env/*.json`; each candidate is checked on its own and a bad one
//! is reported and skipped without affecting the rest.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{ConfigError, WorkbenchConfig};
use crate::environment::Environment;
use crate::environments::{
    BashEnvironment, EditorEnvironment, ExtensionManifest, InteractiveEnvironment,
    PythonEnvironment,
};
use crate::registry::Registry;
use crate::types::EnvironmentName;

/// Directory under the project holding extension manifests.
pub const EXTENSION_DIR: &str = "env";

type Factory = fn(&WorkbenchConfig) -> Result<Box<dyn Environment>, ConfigError>;

const BUILTINS: &[(&str, Factory)] = &[
    ("bash", bash),
    ("editor", editor),
    ("python", python),
];

fn bash(config: &WorkbenchConfig) -> Result<Box<dyn Environment>, ConfigError> {
    Ok(Box::new(BashEnvironment::new(
        &config.project_dir,
        config.process.clone(),
    )))
}

fn editor(config: &WorkbenchConfig) -> Result<Box<dyn Environment>, ConfigError> {
    Ok(Box::new(
        EditorEnvironment::new(&config.project_dir)
            .with_limits(config.editor.clone())
            .with_policy(config.policy()?),
    ))
}

fn python(config: &WorkbenchConfig) -> Result<Box<dyn Environment>, ConfigError> {
    Ok(Box::new(PythonEnvironment::new(
        &config.project_dir,
        config.process.clone(),
    )))
}

/// Names of the built-in environments, in registration order.
pub(crate) fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, _)| *name)
}

/// Why an extension candidate was rejected.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file stem is not a usable environment name.
    #[error("invalid environment name {0:?}")]
    InvalidName(String),
    /// Another environment already has this name.
    #[error("name {0} is already registered")]
    NameCollision(EnvironmentName),
    /// The manifest could not be read.
    #[error("failed to read manifest: {0}")]
    Read(#[from] std::io::Error),
    /// The manifest is not valid JSON or has unknown or mistyped fields.
    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),
    /// The manifest parsed but a value is unusable.
    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// A candidate that did not load, with everything wrong with it.
#[derive(Debug)]
pub struct Rejection {
    /// Manifest path
    pub candidate: PathBuf,
    /// Problems found
    pub errors: Vec<LoadError>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.candidate.display())?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Outcome of loading.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Registered environments, built-ins first
    pub loaded: Vec<EnvironmentName>,
    /// Extension candidates that were skipped
    pub rejected: Vec<Rejection>,
}

/// Build the registry for `config`.
///
/// Only a problem with the configuration itself is an error; rejected
/// extension candidates are listed in the [`LoadReport`].
pub fn load_environments(config: &WorkbenchConfig) -> Result<(Registry, LoadReport), ConfigError> {
    let mut registry = Registry::new();
    let mut report = LoadReport::default();

    for (name, factory) in BUILTINS {
        if !config.is_enabled(name) {
            tracing::debug!(name, "built-in disabled");
            continue;
        }
        let name = EnvironmentName::new(*name)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        registry
            .register_boxed(name.clone(), factory(config)?)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        report.loaded.push(name);
    }

    if config.discover_extensions {
        let dir = config.project_dir.join(EXTENSION_DIR);
        for candidate in discover_manifests(&dir) {
            match load_extension(&candidate, config, &registry) {
                Ok((name, environment)) => {
                    tracing::info!(%name, candidate = %candidate.display(), "loaded extension");
                    registry
                        .register(name.clone(), environment)
                        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                    report.loaded.push(name);
                }
                Err(errors) => {
                    let rejection = Rejection { candidate, errors };
                    tracing::warn!(%rejection, "skipped extension");
                    report.rejected.push(rejection);
                }
            }
        }
    }

    Ok((registry, report))
}

/// Manifest files in `dir`, sorted. A missing directory has none.
pub fn discover_manifests(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot list extensions");
            }
            return Vec::new();
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| !name.starts_with('_'))
        })
        .collect();
    candidates.sort();
    candidates
}

fn load_extension(
    candidate: &Path,
    config: &WorkbenchConfig,
    registry: &Registry,
) -> Result<(EnvironmentName, InteractiveEnvironment), Vec<LoadError>> {
    let mut errors = Vec::new();

    let stem = candidate
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match EnvironmentName::new(stem.as_str()) {
        Ok(name) if registry.contains(&name) => {
            errors.push(LoadError::NameCollision(name));
            None
        }
        Ok(name) => Some(name),
        Err(_) => {
            errors.push(LoadError::InvalidName(stem));
            None
        }
    };

    let manifest = match std::fs::read_to_string(candidate) {
        Ok(text) => match serde_json::from_str::<ExtensionManifest>(&text) {
            Ok(manifest) => {
                errors.extend(manifest.validate().into_iter().map(LoadError::Invalid));
                Some(manifest)
            }
            Err(e) => {
                errors.push(e.into());
                None
            }
        },
        Err(e) => {
            errors.push(e.into());
            None
        }
    };

    match (name, manifest) {
        (Some(name), Some(manifest)) if errors.is_empty() => Ok((
            name,
            InteractiveEnvironment::new(manifest, &config.project_dir, config.process.clone()),
        )),
        _ => Err(errors),
    }
}
