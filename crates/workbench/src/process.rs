//! Send-text / await-marker primitive over a spawned subprocess.
//!
//! [`PromptedProcess`] is the only piece of machinery the process-backed
//! environments share. It spawns a program with piped stdio (stderr merged
//! into stdout), writes command text to it and reads back everything the
//! program prints until a marker string appears.
//!
//! Reads block until the marker shows up. There is no timeout: a command that
//! never prints the marker blocks its caller indefinitely.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::limits::{LimitedBuffer, ProcessLimits};

/// Errors talking to a subprocess.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The program closed its output before printing the marker.
    #[error("{program} process terminated unexpectedly")]
    Exited {
        /// Program name
        program: String,
    },
    /// Reading or writing the pipes failed.
    #[error("IO error talking to {program}: {source}")]
    Io {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// A running program driven through its stdin/stdout.
#[derive(Debug)]
pub struct PromptedProcess {
    program: String,
    child: Child,
    /// Closed at shutdown so the program sees end of input.
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    /// Bytes read past the last marker.
    pending: Vec<u8>,
    limits: ProcessLimits,
}

impl PromptedProcess {
    /// Spawn `program args...` with stderr redirected into stdout.
    ///
    /// The program is started through `sh -c 'exec "$@" 2>&1'` so both
    /// streams arrive interleaved on one pipe, as they would on a terminal.
    pub fn spawn(
        program: &str,
        args: &[String],
        working_dir: &Path,
        envs: &[(&str, &str)],
        limits: ProcessLimits,
    ) -> Result<Self, ProcessError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("exec \"$@\" 2>&1")
            .arg("sh")
            .arg(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ProcessError::Spawn {
                program: program.to_string(),
                source: std::io::Error::other("stdio pipes not captured"),
            });
        };

        tracing::debug!(program, pid = child.id(), "spawned subprocess");

        Ok(Self {
            program: program.to_string(),
            child,
            stdin: Some(stdin),
            stdout,
            pending: Vec::new(),
            limits,
        })
    }

    /// Write text to the program's stdin.
    pub async fn send(&mut self, text: &str) -> Result<(), ProcessError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ProcessError::Exited {
                program: self.program.clone(),
            });
        };
        let result = match stdin.write_all(text.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|source| self.io_error(source))
    }

    /// Read until `marker` appears; return everything before it.
    ///
    /// The marker itself is consumed. Bytes after it stay buffered for the
    /// next read. Output beyond the configured limit is dropped and a notice
    /// is appended.
    pub async fn read_until(&mut self, marker: &str) -> Result<String, ProcessError> {
        let needle = marker.as_bytes();
        let mut output = LimitedBuffer::new(self.limits.max_output_bytes);
        if needle.is_empty() {
            return Ok(String::new());
        }

        let mut chunk = [0u8; 8192];
        loop {
            if let Some(pos) = find_subslice(&self.pending, needle) {
                output.write(&self.pending[..pos]);
                self.pending.drain(..pos + needle.len());
                return Ok(output.into_text());
            }

            // Keep a tail that could be the start of a split marker.
            let keep = (needle.len() - 1).min(self.pending.len());
            let flush = self.pending.len() - keep;
            output.write(&self.pending[..flush]);
            self.pending.drain(..flush);

            let n = self
                .stdout
                .read(&mut chunk)
                .await
                .map_err(|source| self.io_error(source))?;
            if n == 0 {
                return Err(ProcessError::Exited {
                    program: self.program.clone(),
                });
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read one line (without its terminator).
    pub async fn read_line(&mut self) -> Result<String, ProcessError> {
        let line = self.read_until("\n").await?;
        Ok(line.trim_end_matches('\r').to_string())
    }

    /// Ask the program to exit, then kill it if it has not exited within the
    /// grace period.
    pub async fn shutdown(&mut self, exit_command: Option<&str>) -> Result<(), ProcessError> {
        if let Some(exit_command) = exit_command {
            // The program may already be gone; the wait below decides.
            let _ = self.send(exit_command).await;
        }
        drop(self.stdin.take());

        let waited = tokio::time::timeout(self.limits.shutdown_grace, self.child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                tracing::debug!(program = %self.program, %status, "subprocess exited");
                Ok(())
            }
            Ok(Err(source)) => Err(self.io_error(source)),
            Err(_) => {
                tracing::warn!(program = %self.program, "subprocess did not exit, killing");
                self.child
                    .kill()
                    .await
                    .map_err(|source| self.io_error(source))
            }
        }
    }

    fn io_error(&self, source: std::io::Error) -> ProcessError {
        if source.kind() == std::io::ErrorKind::BrokenPipe {
            return ProcessError::Exited {
                program: self.program.clone(),
            };
        }
        ProcessError::Io {
            program: self.program.clone(),
            source,
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
