//! Extension environments declared by JSON manifests.
//!
//! A manifest in `<project>/env/<name>.json` describes an interactive
//! program that prints a fixed prompt when it is ready for input:
//!
//! ```json
//! {
//!     "command": "sqlite3",
//!     "args": ["-interactive", "app.db"],
//!     "prompt": "sqlite> ",
//!     "description": "SQLite shell on app.db",
//!     "max_lines": 10
//! }
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::environment::{EnvError, Environment};
use crate::limits::ProcessLimits;
use crate::process::{ProcessError, PromptedProcess};
use crate::types::{CommandResponse, CommandText, DEFAULT_MAX_LINES, ScreenSection};

/// Declaration of an interactive program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionManifest {
    /// Program to run
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Text the program prints when it waits for input
    pub prompt: String,
    /// Shown on the screen
    #[serde(default)]
    pub description: Option<String>,
    /// Screen line cap
    #[serde(default)]
    pub max_lines: Option<usize>,
    /// Sent at shutdown before stdin is closed
    #[serde(default)]
    pub exit_command: Option<String>,
}

impl ExtensionManifest {
    /// Semantic checks serde cannot express. Returns every problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.command.trim().is_empty() {
            errors.push("command must not be empty".to_string());
        }
        if self.prompt.is_empty() {
            errors.push("prompt must not be empty".to_string());
        }
        if self.max_lines == Some(0) {
            errors.push("max_lines must be positive".to_string());
        }
        errors
    }
}

/// A program driven line by line until its prompt reappears.
#[derive(Debug)]
pub struct InteractiveEnvironment {
    manifest: ExtensionManifest,
    working_dir: PathBuf,
    limits: ProcessLimits,
    process: Option<PromptedProcess>,
    commands_run: usize,
    last_command: Option<String>,
}

impl InteractiveEnvironment {
    /// An environment for `manifest`, started lazily in `working_dir`.
    pub fn new(
        manifest: ExtensionManifest,
        working_dir: impl Into<PathBuf>,
        limits: ProcessLimits,
    ) -> Self {
        Self {
            manifest,
            working_dir: working_dir.into(),
            limits,
            process: None,
            commands_run: 0,
            last_command: None,
        }
    }

    /// Start the program if needed and return whatever it printed before its
    /// first prompt.
    async fn ensure_started(&mut self) -> Result<String, ProcessError> {
        if self.process.is_some() {
            return Ok(String::new());
        }
        let mut process = PromptedProcess::spawn(
            &self.manifest.command,
            &self.manifest.args,
            &self.working_dir,
            &[("TERM", "dumb")],
            self.limits.clone(),
        )?;
        let banner = process.read_until(&self.manifest.prompt).await?;
        tracing::info!(program = %self.manifest.command, "started interactive program");
        self.process = Some(process);
        Ok(banner.trim().to_string())
    }

    async fn run(&mut self, line: &str) -> Result<String, ProcessError> {
        let banner = self.ensure_started().await?;
        let prompt = self.manifest.prompt.clone();
        let process = self.process.as_mut().ok_or_else(|| ProcessError::Exited {
            program: self.manifest.command.clone(),
        })?;

        process.send(&format!("{line}\n")).await?;
        let output = process.read_until(&prompt).await?;
        let output = output.trim_end_matches(['\r', '\n']);

        Ok(match (banner.is_empty(), output.is_empty()) {
            (true, _) => output.to_string(),
            (false, true) => banner,
            (false, false) => format!("{banner}\n{output}"),
        })
    }
}

#[async_trait]
impl Environment for InteractiveEnvironment {
    async fn execute(&mut self, command: &CommandText) -> Result<CommandResponse, EnvError> {
        let line = command.as_str().trim_end_matches(['\r', '\n']);

        match self.run(line).await {
            Ok(output) => {
                self.commands_run += 1;
                self.last_command = Some(command.instruction().to_string());
                Ok(CommandResponse::ok(output))
            }
            Err(error) => {
                if matches!(error, ProcessError::Exited { .. }) {
                    tracing::warn!(program = %self.manifest.command, %error, "interactive program exited");
                    self.process = None;
                }
                Err(error.into())
            }
        }
    }

    fn screen(&mut self) -> Result<ScreenSection, EnvError> {
        let mut lines = vec![match &self.manifest.description {
            Some(description) => description.clone(),
            None => format!(
                "Interactive program: {} {}",
                self.manifest.command,
                self.manifest.args.join(" ")
            )
            .trim_end()
            .to_string(),
        }];

        lines.push(match (&self.process, &self.last_command) {
            (None, None) => "Status: not started (starts on first command)".to_string(),
            (None, Some(_)) => "Status: exited (restarts on next command)".to_string(),
            (Some(_), _) => format!("Status: running, {} commands sent", self.commands_run),
        });
        if let Some(last) = &self.last_command {
            lines.push(format!("Last command: {last}"));
        }

        Ok(ScreenSection::new(lines.join("\n"))
            .with_max_lines(self.manifest.max_lines.unwrap_or(DEFAULT_MAX_LINES)))
    }

    async fn shutdown(&mut self) -> Result<(), EnvError> {
        if let Some(mut process) = self.process.take() {
            let exit = self.manifest.exit_command.as_ref().map(|c| format!("{c}\n"));
            process.shutdown(exit.as_deref()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> ExtensionManifest {
        serde_json::from_str(json).unwrap()
    }

    /// A tiny REPL: doubles numbers, prompt `calc> `.
    fn calculator() -> ExtensionManifest {
        ExtensionManifest {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo 'calc ready'; printf 'calc> '; while read n; do echo $((n * 2)); printf 'calc> '; done"
                    .to_string(),
            ],
            prompt: "calc> ".to_string(),
            description: Some("Doubles numbers".to_string()),
            max_lines: Some(5),
            exit_command: None,
        }
    }

    #[test]
    fn test_manifest_defaults() {
        let m = manifest(r#"{"command": "node", "prompt": "> "}"#);
        assert!(m.args.is_empty());
        assert_eq!(m.description, None);
        assert!(m.validate().is_empty());
    }

    #[test]
    fn test_manifest_rejects_unknown_and_mistyped_fields() {
        assert!(
            serde_json::from_str::<ExtensionManifest>(
                r#"{"command": "node", "prompt": "> ", "timeout": 5}"#
            )
            .is_err()
        );
        assert!(
            serde_json::from_str::<ExtensionManifest>(r#"{"command": "node", "prompt": 5}"#)
                .is_err()
        );
        assert!(serde_json::from_str::<ExtensionManifest>(r#"{"command": "node"}"#).is_err());
    }

    #[test]
    fn test_manifest_validate_collects_all_errors() {
        let m = manifest(r#"{"command": " ", "prompt": "", "max_lines": 0}"#);
        assert_eq!(
            m.validate(),
            vec![
                "command must not be empty",
                "prompt must not be empty",
                "max_lines must be positive",
            ]
        );
    }

    #[tokio::test]
    async fn test_round_trip_until_prompt() {
        let mut env = InteractiveEnvironment::new(calculator(), ".", ProcessLimits::default());

        let screen = env.screen().unwrap();
        assert_eq!(screen.max_lines, 5);
        assert!(screen.content.contains("not started"));

        let response = env.execute(&CommandText::new("21")).await.unwrap();
        assert_eq!(response, CommandResponse::ok("calc ready\n42"));

        let response = env.execute(&CommandText::new("5")).await.unwrap();
        assert_eq!(response, CommandResponse::ok("10"));

        let screen = env.screen().unwrap().content;
        assert_eq!(
            screen,
            "Doubles numbers\nStatus: running, 2 commands sent\nLast command: 5"
        );

        env.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_program_exit_is_an_error() {
        let mut env = InteractiveEnvironment::new(
            ExtensionManifest {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "printf '$ '; read x; exit 0".to_string()],
                prompt: "$ ".to_string(),
                description: None,
                max_lines: None,
                exit_command: None,
            },
            ".",
            ProcessLimits::default(),
        );

        let err = env.execute(&CommandText::new("bye")).await.unwrap_err();

        assert!(matches!(err, EnvError::Process(ProcessError::Exited { .. })));
        let screen = env.screen().unwrap();
        assert_eq!(screen.max_lines, DEFAULT_MAX_LINES);
        assert!(screen.content.starts_with("Interactive program: sh -c"));
    }
}
