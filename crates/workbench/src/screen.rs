//! Screen aggregation: one bounded section per environment, every turn.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::registry::Registry;
use crate::router::panic_message;
use crate::types::{EnvironmentName, ScreenSection};

/// The merged screen, keyed by environment name.
pub type Screen = BTreeMap<EnvironmentName, ScreenSection>;

/// Ask every registered environment for its section.
///
/// A section whose `screen` call errors or panics is replaced by an inline
/// `Error getting screen: ...` marker; the other sections are unaffected.
/// Every section is truncated to its own cap.
pub fn collect_screen(registry: &mut Registry) -> Screen {
    let mut screen = Screen::new();
    for (name, environment) in registry.iter_mut() {
        let section = match catch_unwind(AssertUnwindSafe(|| environment.screen())) {
            Ok(Ok(section)) if section.max_lines == 0 => {
                error_section("max_lines must be positive, got 0")
            }
            Ok(Ok(section)) => truncate_section(section),
            Ok(Err(error)) => {
                tracing::warn!(%name, %error, "screen failed");
                error_section(error)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(%name, panic = %message, "environment panicked during screen");
                error_section(message)
            }
        };
        screen.insert(name.clone(), section);
    }
    screen
}

fn error_section(error: impl std::fmt::Display) -> ScreenSection {
    ScreenSection::new(format!("Error getting screen: {error}"))
}

/// Cap `section` to its `max_lines`.
///
/// Overlong content keeps its first `max_lines - 1` lines followed by a
/// `... (N more lines, truncated)` line, so the result never exceeds the cap.
pub fn truncate_section(section: ScreenSection) -> ScreenSection {
    let max_lines = section.max_lines.max(1);
    let lines: Vec<&str> = section.content.split('\n').collect();
    if lines.len() <= max_lines {
        return section;
    }

    let kept = max_lines - 1;
    let dropped = lines.len() - kept;
    let mut content = lines[..kept].join("\n");
    if kept > 0 {
        content.push('\n');
    }
    content.push_str(&format!("... ({dropped} more lines, truncated)"));

    ScreenSection {
        content,
        max_lines: section.max_lines,
    }
}
