//! Workbench: named, stateful environments for agents
//!
//! An agent sends one command at a time to a named environment (`bash`,
//! `python`, `editor` or a manifest-declared interactive program) and gets
//! back the command's result together with a fresh, bounded snapshot of every
//! environment's state. The `editor` environment keeps pattern-anchored views
//! of files that follow their code across edits and gate every write behind a
//! staleness check.

mod config;
mod environment;
mod limits;
mod loader;
mod process;
mod protocol;
mod registry;
mod router;
mod runtime;
mod screen;
mod types;

pub mod environments;

pub use config::{ConfigError, WorkbenchConfig};
pub use environment::{EnvError, Environment};
pub use environments::editor::policy::{
    AllowAllPolicy, Operation, Policy, PolicyBuilder, PolicyDecision, PolicyHandler,
};
pub use environments::{
    BashEnvironment, EditorEnvironment, EditorError, ExtensionManifest, InteractiveEnvironment,
    PythonEnvironment,
};
pub use limits::{EditorLimits, ProcessLimits};
pub use loader::{
    EXTENSION_DIR, LoadError, LoadReport, Rejection, discover_manifests, load_environments,
};
pub use process::{ProcessError, PromptedProcess};
pub use protocol::{ProtocolError, Reply, Request, decode_request, encode_reply};
pub use registry::{DuplicateName, Registry};
pub use router::dispatch;
pub use runtime::{RuntimeError, Workbench};
pub use screen::{Screen, collect_screen, truncate_section};
pub use types::{
    CommandResponse, CommandText, DEFAULT_MAX_LINES, EnvironmentName, InvalidName, ScreenSection,
};
