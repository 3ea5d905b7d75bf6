//! Access policy for editor file operations.
//!
//! Paths handed to a policy are project-relative with `/` separators
//! (`src/main.py`), after the editor has rejected anything that escapes the
//! project directory.

use std::fmt;

/// The kind of file operation being checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Reading a file (`view`, `search`, `next_match`, ...)
    Read,
    /// Rewriting an existing file (`edit`)
    Write,
    /// Creating a new file (`create`)
    Create,
}

/// The result of a policy check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The operation is allowed.
    Allow,
    /// The operation is denied with a reason.
    Deny(String),
}

impl PolicyDecision {
    /// Returns true if the operation is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// Decides whether the editor may touch a path.
///
/// Checks run on every file operation, including every screen refresh, so
/// they must be cheap.
pub trait PolicyHandler: Send + Sync + fmt::Debug {
    /// Check if `operation` on the project-relative `path` is allowed.
    fn check_access(&self, path: &str, operation: Operation) -> PolicyDecision;
}

/// A policy that allows all operations.
#[derive(Clone, Debug, Default)]
pub struct AllowAllPolicy;

impl PolicyHandler for AllowAllPolicy {
    fn check_access(&self, _path: &str, _operation: Operation) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// A policy built from write-protection globs.
///
/// Reads are always allowed. Writes and creation are denied on the first
/// matching glob and allowed when none match.
#[derive(Clone, Debug)]
pub struct Policy {
    protected: Vec<glob::Pattern>,
}

impl PolicyHandler for Policy {
    fn check_access(&self, path: &str, operation: Operation) -> PolicyDecision {
        if operation == Operation::Read {
            return PolicyDecision::Allow;
        }
        match self.protected.iter().find(|pattern| pattern.matches(path)) {
            Some(pattern) => PolicyDecision::Deny(format!(
                "{:?} access to {} denied by policy rule {}",
                operation,
                path,
                pattern.as_str()
            )),
            None => PolicyDecision::Allow,
        }
    }
}

/// Builder for [`Policy`].
///
/// # Example
///
/// ```rust
/// use workbench::{Operation, PolicyBuilder, PolicyHandler};
///
/// let policy = PolicyBuilder::allow_by_default()
///     .deny_write(".git/**")
///     .unwrap()
///     .build();
///
/// assert!(policy.check_access("src/main.py", Operation::Write).is_allowed());
/// assert!(!policy.check_access(".git/config", Operation::Write).is_allowed());
/// assert!(policy.check_access(".git/config", Operation::Read).is_allowed());
/// ```
#[derive(Clone, Debug)]
pub struct PolicyBuilder {
    protected: Vec<glob::Pattern>,
}

impl PolicyBuilder {
    /// Allow anything no rule denies.
    pub fn allow_by_default() -> Self {
        Self {
            protected: Vec::new(),
        }
    }

    /// Deny edits and creation of paths matching `pattern`.
    pub fn deny_write(mut self, pattern: &str) -> Result<Self, glob::PatternError> {
        // `dir/**` also covers `dir` itself.
        if let Some(base) = pattern.strip_suffix("/**") {
            self.protected.push(glob::Pattern::new(base)?);
        }
        self.protected.push(glob::Pattern::new(pattern)?);
        Ok(self)
    }

    /// Build the policy.
    pub fn build(self) -> Policy {
        Policy {
            protected: self.protected,
        }
    }
}
