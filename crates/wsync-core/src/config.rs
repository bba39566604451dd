//! Configuration for wsync sessions.
//!
//! ```toml
//! [workspace]
//! default_name = "default"
//! base_url = "/lab"
//!
//! [save]
//! debounce_ms = 750
//!
//! [splash]
//! recover_timeout_ms = 12000
//! fade_ms = 200
//!
//! [resolver]
//! beacon_timeout_ms = 100
//!
//! [remote]
//! kind = "file"
//! dir = "~/.local/share/wsync/workspaces"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```
//!
//! Lookup order: explicit path, then `$WSYNC_CONFIG`, then
//! `<config dir>/wsync/wsync.toml`. A missing default file yields defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "WSYNC_CONFIG";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Workspace naming and URL layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace used when the URL names none (and for `?clone=`).
    pub default_name: String,
    /// Application base path; workspaces live under `{base_url}/workspaces/`.
    pub base_url: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            default_name: "default".to_string(),
            base_url: "/lab".to_string(),
        }
    }
}

/// Save pipeline tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Quiet period before a conflated save is written.
    pub debounce_ms: u64,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self { debounce_ms: 750 }
    }
}

impl SaveConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Splash and recovery prompt timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplashConfig {
    /// How long the splash may stay up before the recovery prompt appears.
    pub recover_timeout_ms: u64,
    /// Delay between fading the splash and removing it.
    pub fade_ms: u64,
}

impl Default for SplashConfig {
    fn default() -> Self {
        Self {
            recover_timeout_ms: 12_000,
            fade_ms: 200,
        }
    }
}

impl SplashConfig {
    #[must_use]
    pub fn recover_timeout(&self) -> Duration {
        Duration::from_millis(self.recover_timeout_ms)
    }

    #[must_use]
    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }
}

/// Window-name negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// How long to wait for peers to answer a beacon.
    pub beacon_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            beacon_timeout_ms: 100,
        }
    }
}

impl ResolverConfig {
    #[must_use]
    pub fn beacon_timeout(&self) -> Duration {
        Duration::from_millis(self.beacon_timeout_ms)
    }
}

/// Which remote workspace service backs the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// In-process only; nothing outlives the process.
    Memory,
    /// One JSON file per workspace in `dir`.
    #[default]
    File,
    /// REST service at `url`.
    Http,
}

/// Remote workspace service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub kind: RemoteKind,
    /// Directory for the `file` service. Defaults to `<data dir>/wsync/workspaces`.
    pub dir: Option<PathBuf>,
    /// Base URL for the `http` service.
    pub url: Option<String>,
    /// Optional bearer token for the `http` service.
    pub token: Option<String>,
    /// Per-request timeout for the `http` service.
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::default(),
            dir: None,
            url: None,
            token: None,
            timeout_ms: 10_000,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Directory the file service should use, falling back to the platform data dir.
    #[must_use]
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("wsync").join("workspaces")))
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsyncConfig {
    pub workspace: WorkspaceConfig,
    pub save: SaveConfig,
    pub splash: SplashConfig,
    pub resolver: ResolverConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

impl WsyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file path; the file must exist.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&text)
    }

    /// Load using the standard lookup order.
    ///
    /// An explicit path or `$WSYNC_CONFIG` must exist; the default location
    /// is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
            return Self::load_from_path(Path::new(&path));
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
    }

    /// Reject values that would make a session unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace.default_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "workspace.default_name must not be empty".to_string(),
            ));
        }
        if !self.workspace.base_url.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "workspace.base_url must start with '/': {:?}",
                self.workspace.base_url
            )));
        }
        if self.splash.recover_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "splash.recover_timeout_ms must be >= 1".to_string(),
            ));
        }
        if self.remote.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "remote.timeout_ms must be >= 1".to_string(),
            ));
        }
        match self.remote.kind {
            RemoteKind::File if self.remote.resolved_dir().is_none() => {
                Err(ConfigError::ValidationError(
                    "remote.dir is required for the file service".to_string(),
                ))
            }
            RemoteKind::Http if self.remote.url.as_deref().is_none_or(str::is_empty) => {
                Err(ConfigError::ValidationError(
                    "remote.url is required for the http service".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// `<config dir>/wsync/wsync.toml`, when the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wsync").join("wsync.toml"))
}
