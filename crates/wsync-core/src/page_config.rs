//! Shared page configuration and the window identity published into it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::WsyncConfig;

/// Option key holding the resolved window identity.
pub const WORKSPACE_KEY: &str = "workspace";
/// Option key holding the default workspace name.
pub const DEFAULT_WORKSPACE_KEY: &str = "defaultWorkspace";
/// Option key holding the application base URL.
pub const BASE_URL_KEY: &str = "baseUrl";

/// Unique name of one persisted workspace session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowIdentity(String);

impl WindowIdentity {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for WindowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WindowIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Process-wide option map, shared by handle rather than held in a global.
#[derive(Debug, Default)]
pub struct PageConfig {
    options: RwLock<BTreeMap<String, String>>,
}

impl PageConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `defaultWorkspace` and `baseUrl` from the loaded config.
    #[must_use]
    pub fn from_config(config: &WsyncConfig) -> Self {
        let page = Self::new();
        page.set_option(DEFAULT_WORKSPACE_KEY, &config.workspace.default_name);
        page.set_option(BASE_URL_KEY, &config.workspace.base_url);
        page
    }

    pub fn get_option(&self, key: &str) -> Option<String> {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Set an option, returning the previous value.
    pub fn set_option(&self, key: &str, value: &str) -> Option<String> {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string())
    }

    /// The published window identity, once resolution has succeeded.
    pub fn workspace(&self) -> Option<WindowIdentity> {
        self.get_option(WORKSPACE_KEY).map(WindowIdentity::new)
    }

    pub fn default_workspace(&self) -> String {
        self.get_option(DEFAULT_WORKSPACE_KEY).unwrap_or_default()
    }

    pub fn base_url(&self) -> String {
        self.get_option(BASE_URL_KEY).unwrap_or_else(|| "/".to_string())
    }

    pub(crate) fn publish_workspace(&self, identity: &WindowIdentity) {
        self.set_option(WORKSPACE_KEY, identity.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_seeds_defaults() {
        let page = PageConfig::from_config(&WsyncConfig::default());
        assert_eq!(page.default_workspace(), "default");
        assert_eq!(page.base_url(), "/lab");
        assert!(page.workspace().is_none());
    }

    #[test]
    fn publish_workspace_is_readable() {
        let page = PageConfig::new();
        page.publish_workspace(&WindowIdentity::new("proj1"));
        assert_eq!(page.workspace(), Some(WindowIdentity::new("proj1")));
    }

    #[test]
    fn set_option_returns_previous() {
        let page = PageConfig::new();
        assert_eq!(page.set_option("k", "a"), None);
        assert_eq!(page.set_option("k", "b"), Some("a".to_string()));
    }
}
