//! The `python` environment: a persistent interpreter namespace.

use std::path::PathBuf;

use async_trait::async_trait;
use regex_lite::Regex;

use crate::environment::{EnvError, Environment};
use crate::limits::ProcessLimits;
use crate::process::{ProcessError, PromptedProcess};
use crate::types::{CommandResponse, CommandText, ScreenSection};

const END: &str = "<<<WORKBENCH_END>>>";
const MARKER: &str = "<<<WORKBENCH_PYTHON>>>";
const MAX_VARIABLES: usize = 100;

/// Read blocks ending with the END line, run them in one namespace, report
/// `<ok>\t<cwd>\t<name>:<type>,...` behind the marker.
const DRIVER: &str = r#"
import os, sys, traceback, types
sys.stderr = sys.stdout
END = "<<<WORKBENCH_END>>>"
MARKER = "<<<WORKBENCH_PYTHON>>>"
namespace = {"__name__": "__main__", "__builtins__": __builtins__}

def describe():
    names = []
    for key, value in list(namespace.items()):
        if key.startswith("_") or isinstance(value, types.ModuleType):
            continue
        names.append(key + ":" + type(value).__name__)
    return ",".join(names)

while True:
    block = []
    while True:
        line = sys.stdin.readline()
        if not line:
            sys.exit(0)
        if line.rstrip("\r\n") == END:
            break
        block.append(line)
    source = "".join(block)
    ok = 1
    try:
        try:
            code = compile(source, "<input>", "eval")
        except SyntaxError:
            exec(compile(source, "<input>", "exec"), namespace)
        else:
            value = eval(code, namespace)
            if value is not None:
                print(repr(value))
    except SystemExit:
        raise
    except BaseException:
        ok = 0
        traceback.print_exc()
    sys.stdout.write("\n" + MARKER + str(ok) + "\t" + os.getcwd() + "\t" + describe() + "\n")
    sys.stdout.flush()
"#;

/// A persistent `python3` process.
///
/// Each command is compiled as an expression first (its `repr` is printed
/// unless it is `None`), otherwise run as statements. Tracebacks become the
/// output of a failed command. The screen lists the most recently mentioned
/// variables first.
#[derive(Debug)]
pub struct PythonEnvironment {
    working_dir: PathBuf,
    limits: ProcessLimits,
    process: Option<PromptedProcess>,
    cwd: Option<String>,
    /// `(name, type)` as of the last command
    namespace: Vec<(String, String)>,
    /// Most recently mentioned first
    order: Vec<String>,
}

impl PythonEnvironment {
    /// An interpreter that will start in `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>, limits: ProcessLimits) -> Self {
        Self {
            working_dir: working_dir.into(),
            limits,
            process: None,
            cwd: None,
            namespace: Vec::new(),
            order: Vec::new(),
        }
    }

    fn ensure_started(&mut self) -> Result<&mut PromptedProcess, ProcessError> {
        if self.process.is_none() {
            let process = PromptedProcess::spawn(
                "python3",
                &["-u".to_string(), "-c".to_string(), DRIVER.to_string()],
                &self.working_dir,
                &[("TERM", "dumb"), ("PYTHONIOENCODING", "utf-8")],
                self.limits.clone(),
            )?;
            tracing::info!(working_dir = %self.working_dir.display(), "started python");
            self.process = Some(process);
        }
        self.process.as_mut().ok_or_else(|| ProcessError::Exited {
            program: "python3".to_string(),
        })
    }

    async fn run(&mut self, source: &str) -> Result<(String, bool, String, String), ProcessError> {
        let process = self.ensure_started()?;
        process.send(&format!("{source}\n{END}\n")).await?;
        let output = process.read_until(MARKER).await?;
        let status = process.read_line().await?;

        let mut fields = status.splitn(3, '\t');
        let ok = fields.next() == Some("1");
        let cwd = fields.next().unwrap_or_default().to_string();
        let variables = fields.next().unwrap_or_default().to_string();
        Ok((output.trim_end_matches('\n').to_string(), ok, cwd, variables))
    }

    /// Move names mentioned in `source` to the front, append new names, and
    /// forget names that left the namespace.
    fn update_order(&mut self, source: &str) {
        let mentioned: Vec<String> = self
            .namespace
            .iter()
            .map(|(name, _)| name)
            .filter(|name| mentions(source, name))
            .cloned()
            .collect();

        let mut order = mentioned.clone();
        order.extend(
            self.order
                .iter()
                .filter(|name| !mentioned.contains(name))
                .cloned(),
        );
        for (name, _) in &self.namespace {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        order.retain(|name| self.namespace.iter().any(|(n, _)| n == name));
        self.order = order;
    }
}

fn mentions(source: &str, name: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex_lite::escape(name))).is_ok_and(|re| re.is_match(source))
}

/// Parse `name:type,name:type`.
fn parse_namespace(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| entry.split_once(':'))
        .map(|(name, kind)| (name.to_string(), kind.to_string()))
        .collect()
}

#[async_trait]
impl Environment for PythonEnvironment {
    async fn execute(&mut self, command: &CommandText) -> Result<CommandResponse, EnvError> {
        let source = command.as_str();
        if source.trim().is_empty() {
            return Ok(CommandResponse::failed("Empty command"));
        }

        match self.run(source).await {
            Ok((output, ok, cwd, variables)) => {
                self.cwd = Some(cwd);
                self.namespace = parse_namespace(&variables);
                self.update_order(source);
                Ok(CommandResponse {
                    output,
                    success: ok,
                })
            }
            Err(error) => {
                if matches!(error, ProcessError::Exited { .. }) {
                    tracing::warn!(%error, "python exited, restarting on next command");
                    self.process = None;
                    self.cwd = None;
                    self.namespace.clear();
                    self.order.clear();
                }
                Err(error.into())
            }
        }
    }

    fn screen(&mut self) -> Result<ScreenSection, EnvError> {
        let Some(cwd) = &self.cwd else {
            return Ok(ScreenSection::new("Python REPL (ready)"));
        };

        let mut lines = vec![
            format!("Working directory: {cwd}"),
            String::new(),
            "Variables (by recent use):".to_string(),
        ];
        let shown: Vec<String> = self
            .order
            .iter()
            .filter_map(|name| {
                self.namespace
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(n, kind)| format!("  {n}: {kind}"))
            })
            .take(MAX_VARIABLES)
            .collect();
        if shown.is_empty() {
            lines.push("  (no variables)".to_string());
        }
        lines.extend(shown);

        Ok(ScreenSection::new(lines.join("\n")))
    }

    async fn shutdown(&mut self) -> Result<(), EnvError> {
        if let Some(mut process) = self.process.take() {
            // Closing stdin ends the driver loop; `exit()` covers a block in flight.
            process.shutdown(Some(&format!("exit()\n{END}\n"))).await?;
        }
        Ok(())
    }
}
