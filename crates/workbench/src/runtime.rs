//! The request/response loop tying the router and the aggregator to a
//! line-oriented transport.

use std::fmt;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{ConfigError, WorkbenchConfig};
use crate::loader::{LoadReport, load_environments};
use crate::protocol::{ProtocolError, Reply, Request, decode_request, encode_reply};
use crate::registry::Registry;
use crate::router::dispatch;
use crate::screen::collect_screen;
use crate::types::{CommandText, EnvironmentName};

/// Errors that end the serving loop
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// IO error on the transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A reply could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Routes commands and aggregates screens over a loaded [`Registry`].
///
/// Commands are handled strictly one at a time: a command's side effects and
/// the screen pass that follows it complete before the next line is read.
pub struct Workbench {
    registry: Registry,
}

impl fmt::Debug for Workbench {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workbench")
            .field("environments", &self.registry.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Workbench {
    /// Serve an already populated registry.
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Load built-ins and extensions for `config`.
    pub fn from_config(config: &WorkbenchConfig) -> Result<(Self, LoadReport), ConfigError> {
        let (registry, report) = load_environments(config)?;
        Ok((Self::new(registry), report))
    }

    /// The registered environments.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one command and capture the screen afterwards.
    pub async fn handle(&mut self, name: &EnvironmentName, command: &CommandText) -> Reply {
        let response = dispatch(&mut self.registry, name, command).await;
        let screen = collect_screen(&mut self.registry);
        Reply::Response { response, screen }
    }

    /// Handle one inbound line. Blank lines produce no reply.
    pub async fn handle_line(&mut self, line: &str) -> Option<Reply> {
        if line.trim().is_empty() {
            return None;
        }
        match decode_request(line) {
            Ok(Request::Command {
                environment,
                command,
            }) => Some(self.handle(&environment, &CommandText::new(command)).await),
            Err(error) => {
                tracing::warn!(%error, "rejected inbound line");
                Some(Reply::Error {
                    message: error.to_string(),
                })
            }
        }
    }

    /// Read requests from `reader` and write one reply line per request to
    /// `writer` until end of input, then shut every environment down.
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> Result<(), RuntimeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.serve_lines(reader, &mut writer).await;
        self.shutdown().await;
        result
    }

    async fn serve_lines<R, W>(&mut self, mut reader: R, writer: &mut W) -> Result<(), RuntimeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                tracing::info!("end of input");
                return Ok(());
            }

            let reply = match std::str::from_utf8(&buf) {
                Ok(line) => self.handle_line(line).await,
                Err(e) => {
                    tracing::warn!(error = %e, "inbound line is not UTF-8");
                    Some(Reply::Error {
                        message: format!("Invalid JSON: {e}"),
                    })
                }
            };
            let Some(reply) = reply else {
                continue;
            };

            let mut encoded = encode_reply(&reply)?;
            encoded.push('\n');
            writer.write_all(encoded.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    /// Best-effort shutdown of every environment. Returns the names whose
    /// shutdown failed.
    pub async fn shutdown(&mut self) -> Vec<EnvironmentName> {
        let failed = self.registry.shutdown_all().await;
        if failed.is_empty() {
            tracing::info!("all environments shut down");
        }
        failed
    }
}
