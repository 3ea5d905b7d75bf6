//! Name → environment mapping, populated once at startup.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;

use crate::environment::Environment;
use crate::router::panic_message;
use crate::types::EnvironmentName;

/// Returned when registering a name twice.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("environment {0} is already registered")]
pub struct DuplicateName(pub EnvironmentName);

/// Every loaded environment, keyed by name.
///
/// Iteration is in name order, which is also the order of screen sections on
/// the wire.
#[derive(Debug, Default)]
pub struct Registry {
    environments: BTreeMap<EnvironmentName, Box<dyn Environment>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an environment under `name`.
    pub fn register(
        &mut self,
        name: EnvironmentName,
        environment: impl Environment + 'static,
    ) -> Result<(), DuplicateName> {
        self.register_boxed(name, Box::new(environment))
    }

    /// Register an already boxed environment under `name`.
    pub fn register_boxed(
        &mut self,
        name: EnvironmentName,
        environment: Box<dyn Environment>,
    ) -> Result<(), DuplicateName> {
        match self.environments.entry(name) {
            Entry::Occupied(entry) => Err(DuplicateName(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::debug!(name = %entry.key(), "registered environment");
                entry.insert(environment);
                Ok(())
            }
        }
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &EnvironmentName) -> bool {
        self.environments.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &EnvironmentName> {
        self.environments.keys()
    }

    /// Mutable access to one environment.
    pub fn get_mut(&mut self, name: &EnvironmentName) -> Option<&mut Box<dyn Environment>> {
        self.environments.get_mut(name)
    }

    /// Mutable access to every environment, in name order.
    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&EnvironmentName, &mut Box<dyn Environment>)> {
        self.environments.iter_mut()
    }

    /// Number of registered environments.
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }

    /// Remove every environment, calling `shutdown` on each.
    ///
    /// Failures and panics are logged and skipped so one misbehaving
    /// environment cannot keep the others from cleaning up. Returns the names
    /// whose cleanup failed.
    pub async fn shutdown_all(&mut self) -> Vec<EnvironmentName> {
        let mut failed = Vec::new();
        for (name, mut environment) in std::mem::take(&mut self.environments) {
            match AssertUnwindSafe(environment.shutdown()).catch_unwind().await {
                Ok(Ok(())) => tracing::debug!(%name, "environment shut down"),
                Ok(Err(error)) => {
                    tracing::warn!(%name, %error, "environment cleanup failed");
                    failed.push(name);
                }
                Err(payload) => {
                    tracing::error!(
                        %name,
                        panic = %panic_message(payload.as_ref()),
                        "environment cleanup panicked"
                    );
                    failed.push(name);
                }
            }
        }
        failed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::environment::EnvError;
    use crate::types::{CommandResponse, CommandText, ScreenSection};

    #[derive(Debug)]
    enum Cleanup {
        Ok,
        Fails,
        Panics,
    }

    #[derive(Debug)]
    struct Recorder {
        cleanup: Cleanup,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Environment for Recorder {
        async fn execute(&mut self, _command: &CommandText) -> Result<CommandResponse, EnvError> {
            Ok(CommandResponse::ok(""))
        }

        fn screen(&mut self) -> Result<ScreenSection, EnvError> {
            Ok(ScreenSection::new(""))
        }

        async fn shutdown(&mut self) -> Result<(), EnvError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            match self.cleanup {
                Cleanup::Ok => Ok(()),
                Cleanup::Fails => Err(EnvError::Other("cleanup failed".into())),
                Cleanup::Panics => panic!("cleanup exploded"),
            }
        }
    }

    fn name(s: &str) -> EnvironmentName {
        EnvironmentName::new(s).unwrap()
    }

    #[test]
    fn test_names_are_sorted() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        for n in ["python", "bash", "editor"] {
            registry
                .register(
                    name(n),
                    Recorder {
                        cleanup: Cleanup::Ok,
                        shutdowns: counter.clone(),
                    },
                )
                .unwrap();
        }

        let names: Vec<_> = registry.names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["bash", "editor", "python"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        let recorder = || Recorder {
            cleanup: Cleanup::Ok,
            shutdowns: counter.clone(),
        };

        registry.register(name("bash"), recorder()).unwrap();
        let err = registry.register(name("bash"), recorder()).unwrap_err();
        assert_eq!(err, DuplicateName(name("bash")));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_sweep_survives_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        for (n, cleanup) in [
            ("a_fails", Cleanup::Fails),
            ("b_panics", Cleanup::Panics),
            ("c_ok", Cleanup::Ok),
        ] {
            registry
                .register(
                    name(n),
                    Recorder {
                        cleanup,
                        shutdowns: counter.clone(),
                    },
                )
                .unwrap();
        }

        let failed = registry.shutdown_all().await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(failed, vec![name("a_fails"), name("b_panics")]);
        assert!(registry.is_empty());
    }
}
