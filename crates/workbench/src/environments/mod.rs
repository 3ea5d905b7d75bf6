//! Built-in environments and manifest-declared extensions.

mod bash;
pub mod editor;
mod interactive;
mod python;

pub use bash::BashEnvironment;
pub use editor::{EditorEnvironment, EditorError};
pub use interactive::{ExtensionManifest, InteractiveEnvironment};
pub use python::PythonEnvironment;
