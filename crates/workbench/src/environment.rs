//! The interface every environment implements.

use async_trait::async_trait;
use thiserror::Error;

use crate::process::ProcessError;
use crate::types::{CommandResponse, CommandText, ScreenSection};

/// Errors an environment may return instead of a response.
///
/// The router turns these into a failed [`CommandResponse`]; the aggregator
/// turns them into an inline error marker.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The command could not be understood.
    #[error("{0}")]
    InvalidCommand(String),
    /// A subprocess backing the environment failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// A named, stateful target for agent commands.
///
/// Environments are driven strictly one at a time: `execute` for the addressed
/// environment, then `screen` for every registered one.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use workbench::{CommandResponse, CommandText, EnvError, Environment, ScreenSection};
///
/// #[derive(Debug, Default)]
/// struct Counter {
///     count: u64,
/// }
///
/// #[async_trait]
/// impl Environment for Counter {
///     async fn execute(&mut self, command: &CommandText) -> Result<CommandResponse, EnvError> {
///         match command.instruction() {
///             "inc" => {
///                 self.count += 1;
///                 Ok(CommandResponse::ok(format!("count = {}", self.count)))
///             }
///             other => Err(EnvError::InvalidCommand(format!("unknown command: {other}"))),
///         }
///     }
///
///     fn screen(&mut self) -> Result<ScreenSection, EnvError> {
///         Ok(ScreenSection::new(format!("Counter: {}", self.count)).with_max_lines(1))
///     }
/// }
/// ```
#[async_trait]
pub trait Environment: Send + std::fmt::Debug {
    /// Execute one command and update internal state.
    ///
    /// May block for as long as the command takes; there is no timeout.
    async fn execute(&mut self, command: &CommandText) -> Result<CommandResponse, EnvError>;

    /// Describe the current state for the screen.
    ///
    /// Called after every command, for every environment. Must not wait on
    /// subprocesses or the network.
    fn screen(&mut self) -> Result<ScreenSection, EnvError>;

    /// Release resources before the process exits.
    async fn shutdown(&mut self) -> Result<(), EnvError> {
        Ok(())
    }
}
