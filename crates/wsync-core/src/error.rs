//! Error types for wsync-core
//!
//! Every top-level [`Error`] that a user can act on carries a
//! [`Remediation`], which the CLI prints under the error line.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A command worth running while diagnosing an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedCommand {
    pub label: String,
    pub command: String,
}

/// What the user can do about an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediation {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<SuggestedCommand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

impl Remediation {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(SuggestedCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    #[must_use]
    pub fn alternative(mut self, text: impl Into<String>) -> Self {
        self.alternatives.push(text.into());
        self
    }

    /// Multi-line plain text, as printed by the CLI.
    #[must_use]
    pub fn render_plain(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "To fix:")?;
        writeln!(f, "  {}", self.summary)?;
        if !self.commands.is_empty() {
            writeln!(f, "  Commands:")?;
            for SuggestedCommand { label, command } in &self.commands {
                writeln!(f, "    - {label}: {command}")?;
            }
        }
        if !self.alternatives.is_empty() {
            writeln!(f, "  Alternatives:")?;
            for text in &self.alternatives {
                writeln!(f, "    - {text}")?;
            }
        }
        Ok(())
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wsync-core
#[derive(Error, Debug)]
pub enum Error {
    /// Window identity could not be resolved
    #[error("Window resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Remote workspace fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Remote workspace save errors
    #[error("Save error: {0}")]
    Save(#[from] SaveError),

    /// Local browser-side data could not be cleared
    #[error("Storage error: {0}")]
    StorageClear(#[from] StorageClearError),

    /// Navigation or reload failures
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// User prompt failures
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    /// A command id with no registered handler
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Resolve(err) => Some(err.remediation()),
            Self::Fetch(_) => Some(
                Remediation::new("Check that the workspace exists on the remote service.")
                    .command("List workspaces", "wsync list"),
            ),
            Self::Save(_) => Some(
                Remediation::new("Check that the remote workspace service is reachable and writable, then retry.")
                    .command("Show config", "wsync config")
                    .alternative("Saves are not retried automatically; the next change schedules a new save."),
            ),
            Self::StorageClear(_) => Some(
                Remediation::new("Local data could not be cleared. Close other sessions sharing the same storage and retry."),
            ),
            Self::Route(_) => None,
            Self::Config(err) => Some(err.remediation()),
            Self::Prompt(_) => None,
            Self::UnknownCommand(_) => Some(Remediation::new(format!(
                "Use one of the registered command ids: {}",
                crate::orchestrator::COMMANDS.join(", ")
            ))),
            Self::Io(_) => Some(
                Remediation::new("Check that remote.dir exists and is writable.")
                    .command("Show config", "wsync config"),
            ),
            Self::Json(_) => Some(
                Remediation::new("A state value is not valid JSON.")
                    .alternative("Values passed with --set must be valid JSON (quote strings)."),
            ),
        }
    }
}

/// Window identity resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Another open session already claims the candidate name
    #[error("workspace name {name:?} is already in use by another session")]
    Conflict { name: String },

    /// The naming oracle failed for any other reason
    #[error("naming oracle failed: {0}")]
    Oracle(String),
}

impl ResolveError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Conflict { name } => Remediation::new(format!(
                "Open a different workspace; {name:?} is claimed by a running session."
            ))
            .command("List workspaces", "wsync list")
            .alternative("Close the other session using this workspace and retry."),
            Self::Oracle(_) => Remediation::new("Retry; the naming service could not be reached."),
        }
    }
}

/// Remote workspace fetch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No workspace with this id exists
    #[error("workspace {0:?} not found")]
    NotFound(String),

    /// The remote service could not be reached or answered with a failure
    #[error("workspace service unreachable: {0}")]
    Unreachable(String),

    /// The stored record could not be decoded
    #[error("workspace record could not be decoded: {0}")]
    Decode(String),
}

/// Remote workspace save errors.
///
/// `Clone` so a single outcome can be delivered to every conflated waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// The remote write failed
    #[error("remote save failed: {0}")]
    Remote(String),

    /// The local state snapshot could not be produced
    #[error("state snapshot failed: {0}")]
    Snapshot(String),

    /// The save cycle was torn down before it settled
    #[error("save abandoned before completion")]
    Abandoned,
}

/// Local key-value storage clear failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("clearing local storage failed: {0}")]
pub struct StorageClearError(pub String);

/// Router navigation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("invalid route pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("navigation to {url:?} failed: {message}")]
    Navigate { url: String, message: String },

    #[error("reload failed: {0}")]
    Reload(String),
}

/// User prompt errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    /// The prompt was dismissed without an answer
    #[error("prompt dismissed")]
    Dismissed,

    #[error("prompt unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),

    #[error("failed to read config {0}: {1}")]
    ReadFailed(String, String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("invalid config value: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Create the config file or point --config at an existing one: {path}"
            ))
            .command("Show defaults", "wsync config"),
            Self::ReadFailed(path, _) => {
                Remediation::new(format!("Check read permissions on {path}."))
            }
            Self::ParseError(_) | Self::SerializeFailed(_) => {
                Remediation::new("Fix the TOML syntax in the config file.")
                    .command("Show defaults", "wsync config")
            }
            Self::ValidationError(_) => Remediation::new("Correct the invalid config value.")
                .alternative("Remove the key to fall back to its default."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_renders_commands_and_alternatives() {
        let text = Remediation::new("Do the thing.")
            .command("List", "wsync list")
            .alternative("Or wait.")
            .render_plain();
        assert!(text.starts_with("To fix:\n  Do the thing.\n"));
        assert!(text.contains("    - List: wsync list"));
        assert!(text.contains("  Alternatives:\n    - Or wait."));
    }

    #[test]
    fn conflict_error_names_the_workspace() {
        let err = Error::from(ResolveError::Conflict {
            name: "proj1".to_string(),
        });
        assert!(err.to_string().contains("\"proj1\""));
        let remediation = err.remediation().unwrap();
        assert!(remediation.summary.contains("proj1"));
    }

    #[test]
    fn save_error_is_cloneable_for_broadcast() {
        let err = SaveError::Remote("503".to_string());
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn route_and_prompt_errors_have_no_remediation() {
        assert!(Error::from(PromptError::Dismissed).remediation().is_none());
        assert!(
            Error::from(RouteError::Reload("gone".to_string()))
                .remediation()
                .is_none()
        );
    }
}
