//! Configuration file loading for Lantern.
//!
//! The file is TOML at `~/.lantern/config.toml`, or wherever
//! `LANTERN_CONFIG` points. Every field is optional. Raw structs here mirror
//! the file; [`LanternConfig::resolve`] turns them into validated
//! [`Settings`].

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use lantern_types::settings::{
    DEFAULT_ALERT_THRESHOLD, DEFAULT_CLEAR_THRESHOLD, DEFAULT_EXECUTABLE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TIMEOUT_MS, PROBE_TIMEOUT_MS, SLOW_TIMEOUT_MS,
};
use lantern_types::{CorrelatorSettings, Settings, SettingsError, Timeouts, ToolSettings};
use serde::Deserialize;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "LANTERN_CONFIG";

const fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration")]
    Invalid(#[from] SettingsError),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LanternConfig {
    /// Master kill switch.
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub tool: Option<ToolConfig>,
    pub correlator: Option<CorrelatorConfig>,
    /// Extra success exit codes per subcommand.
    #[serde(default)]
    pub exit_codes: BTreeMap<String, Vec<i32>>,
}

impl Default for LanternConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool: None,
            correlator: None,
            exit_codes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ToolConfig {
    /// Name on `PATH` or a path. `${VAR}` is expanded.
    pub executable: Option<String>,
    pub cwd: Option<String>,
    pub timeout_ms: Option<u64>,
    pub slow_timeout_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CorrelatorConfig {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
    pub alert_threshold: Option<u32>,
    pub clear_threshold: Option<u32>,
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
///
/// An unclosed `${` or an empty name is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            Some(_) => {
                out.push_str("${}");
                rest = &after[1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

impl LanternConfig {
    /// Load the config file, or `None` when it does not exist.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file");
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        toml::from_str(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Validate into [`Settings`]. `default_cwd` is used when `[tool].cwd` is unset.
    pub fn resolve(&self, default_cwd: &Path) -> Result<Settings, ConfigError> {
        let tool = self.tool.as_ref();
        let executable = tool
            .and_then(|t| t.executable.as_deref())
            .map_or_else(|| DEFAULT_EXECUTABLE.to_string(), expand_env_vars);
        let cwd = tool
            .and_then(|t| t.cwd.as_deref())
            .map_or_else(|| default_cwd.to_path_buf(), |c| PathBuf::from(expand_env_vars(c)));
        let timeouts = Timeouts::from_millis(
            tool.and_then(|t| t.timeout_ms).unwrap_or(DEFAULT_TIMEOUT_MS),
            tool.and_then(|t| t.slow_timeout_ms).unwrap_or(SLOW_TIMEOUT_MS),
            tool.and_then(|t| t.probe_timeout_ms).unwrap_or(PROBE_TIMEOUT_MS),
        )?;

        let correlator = self.correlator.as_ref();
        let correlator = CorrelatorSettings::new(
            correlator.and_then(|c| c.enabled).unwrap_or(true),
            correlator
                .and_then(|c| c.interval_ms)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            correlator
                .and_then(|c| c.alert_threshold)
                .unwrap_or(DEFAULT_ALERT_THRESHOLD),
            correlator
                .and_then(|c| c.clear_threshold)
                .unwrap_or(DEFAULT_CLEAR_THRESHOLD),
        )?;

        if let Some((command, _)) = self.exit_codes.iter().find(|(_, codes)| codes.is_empty()) {
            return Err(SettingsError::EmptyExitCodes {
                command: command.clone(),
            }
            .into());
        }

        Ok(Settings {
            enabled: self.enabled,
            tool: ToolSettings::new(executable, cwd)?.with_timeouts(timeouts),
            correlator,
            exit_codes: self.exit_codes.clone(),
        })
    }
}

/// `LANTERN_CONFIG` if set, else `~/.lantern/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".lantern").join("config.toml"))
}
