//! The `bash` environment: one persistent shell per session.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::environment::{EnvError, Environment};
use crate::limits::ProcessLimits;
use crate::process::{ProcessError, PromptedProcess};
use crate::types::{CommandResponse, CommandText, ScreenSection};

const MARKER: &str = "<<<WORKBENCH_BASH>>>";
const HELP: &str = "Any bash command. Use & for background jobs.";

/// A persistent `bash` process.
///
/// The shell starts on the first command, so variables, functions, the
/// working directory and background jobs carry over between commands. Each
/// command is followed by a `printf` that reports the exit status and working
/// directory behind a marker, then by `jobs`.
#[derive(Debug)]
pub struct BashEnvironment {
    working_dir: PathBuf,
    limits: ProcessLimits,
    process: Option<PromptedProcess>,
    state: Option<ShellState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ShellState {
    cwd: String,
    exit_code: i32,
    jobs: Vec<String>,
}

impl BashEnvironment {
    /// A shell that will start in `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>, limits: ProcessLimits) -> Self {
        Self {
            working_dir: working_dir.into(),
            limits,
            process: None,
            state: None,
        }
    }

    fn ensure_started(&mut self) -> Result<&mut PromptedProcess, ProcessError> {
        if self.process.is_none() {
            let process = PromptedProcess::spawn(
                "bash",
                &["--norc".to_string(), "--noprofile".to_string()],
                &self.working_dir,
                &[("TERM", "dumb")],
                self.limits.clone(),
            )?;
            tracing::info!(working_dir = %self.working_dir.display(), "started bash");
            self.process = Some(process);
        }
        self.process.as_mut().ok_or_else(|| ProcessError::Exited {
            program: "bash".to_string(),
        })
    }

    async fn run(&mut self, script: &str) -> Result<(String, ShellState), ProcessError> {
        let process = self.ensure_started()?;

        process
            .send(&format!(
                "{script}\nprintf '\\n{MARKER}%d %s\\n' \"$?\" \"$PWD\"\n"
            ))
            .await?;
        let output = process.read_until(MARKER).await?;
        let status = process.read_line().await?;

        process.send(&format!("jobs\nprintf '{MARKER}\\n'\n")).await?;
        let jobs = process.read_until(MARKER).await?;
        process.read_line().await?;

        let (code, cwd) = status.split_once(' ').unwrap_or((status.as_str(), ""));
        let state = ShellState {
            cwd: cwd.to_string(),
            exit_code: code.trim().parse().unwrap_or(-1),
            jobs: parse_jobs(&jobs),
        };
        Ok((output.trim_end_matches('\n').to_string(), state))
    }
}

/// Lines of `jobs` output that describe a job (`[1]+  Running  sleep 9 &`).
fn parse_jobs(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.strip_prefix('[')
                .and_then(|rest| rest.split_once(']'))
                .is_some_and(|(id, _)| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        })
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Environment for BashEnvironment {
    async fn execute(&mut self, command: &CommandText) -> Result<CommandResponse, EnvError> {
        let script = command.as_str().trim();
        if script.is_empty() {
            return Ok(CommandResponse::failed("Empty command"));
        }

        match self.run(script).await {
            Ok((output, state)) => {
                let success = state.exit_code == 0;
                self.state = Some(state);
                Ok(CommandResponse { output, success })
            }
            Err(error) => {
                if matches!(error, ProcessError::Exited { .. }) {
                    tracing::warn!(%error, "bash exited, restarting on next command");
                    self.process = None;
                    self.state = None;
                }
                Err(error.into())
            }
        }
    }

    fn screen(&mut self) -> Result<ScreenSection, EnvError> {
        let Some(state) = &self.state else {
            return Ok(ScreenSection::new(HELP));
        };

        let mut lines = vec![
            format!("Working directory: {}", state.cwd),
            format!("Last exit code: {}", state.exit_code),
        ];
        if state.jobs.is_empty() {
            lines.push("Background jobs: none".to_string());
        } else {
            lines.push("Background jobs:".to_string());
            lines.extend(state.jobs.iter().map(|job| format!("  {job}")));
        }
        lines.push(String::new());
        lines.push(HELP.to_string());

        Ok(ScreenSection::new(lines.join("\n")))
    }

    async fn shutdown(&mut self) -> Result<(), EnvError> {
        if let Some(mut process) = self.process.take() {
            process.shutdown(Some("exit\n")).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn have_bash() -> bool {
        std::process::Command::new("bash")
            .arg("--version")
            .output()
            .is_ok()
    }

    async fn run(bash: &mut BashEnvironment, text: &str) -> CommandResponse {
        bash.execute(&CommandText::new(text)).await.unwrap()
    }

    #[test]
    fn test_parse_jobs() {
        let output = "[1]-  Running                 sleep 30 &\n[2]+  Done                    true\nnoise\n[x] not a job\n";
        assert_eq!(
            parse_jobs(output),
            vec![
                "[1]-  Running                 sleep 30 &",
                "[2]+  Done                    true",
            ]
        );
    }

    #[test]
    fn test_screen_before_first_command() {
        let mut bash = BashEnvironment::new(".", ProcessLimits::default());
        assert_eq!(bash.screen().unwrap().content, HELP);
    }

    #[tokio::test]
    async fn test_state_persists() {
        if !have_bash() {
            eprintln!("bash not available, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut bash = BashEnvironment::new(dir.path(), ProcessLimits::default());

        let response = run(&mut bash, "GREETING=hello; cd sub").await;
        assert_eq!(response, CommandResponse::ok(""));

        let response = run(&mut bash, "echo $GREETING; echo oops >&2").await;
        assert_eq!(response, CommandResponse::ok("hello\noops"));

        let screen = bash.screen().unwrap().content;
        assert!(screen.contains("Working directory: "), "{screen}");
        assert!(screen.lines().next().unwrap().ends_with("/sub"), "{screen}");
        assert!(screen.contains("Last exit code: 0"));
        assert!(screen.contains("Background jobs: none"));

        bash.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_code_drives_success() {
        if !have_bash() {
            return;
        }
        let mut bash = BashEnvironment::new(".", ProcessLimits::default());

        let response = run(&mut bash, "echo failing; (exit 7)").await;

        assert_eq!(response, CommandResponse::failed("failing"));
        assert!(bash.screen().unwrap().content.contains("Last exit code: 7"));

        bash.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_background_jobs_listed() {
        if !have_bash() {
            return;
        }
        let mut bash = BashEnvironment::new(".", ProcessLimits::default());

        run(&mut bash, "sleep 30 &").await;

        let screen = bash.screen().unwrap().content;
        assert!(screen.contains("Background jobs:\n  [1]"), "{screen}");
        assert!(screen.contains("sleep 30"));

        run(&mut bash, "kill %1; wait %1 2>/dev/null; true").await;
        bash.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restarts_after_exit() {
        if !have_bash() {
            return;
        }
        let mut bash = BashEnvironment::new(".", ProcessLimits::default());
        run(&mut bash, "X=1").await;

        let err = bash
            .execute(&CommandText::new("exit 3"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("terminated unexpectedly"), "{err}");
        assert_eq!(bash.screen().unwrap().content, HELP);

        let response = run(&mut bash, "echo \"[$X]\"").await;
        assert_eq!(response, CommandResponse::ok("[]"));

        bash.shutdown().await.unwrap();
    }
}
