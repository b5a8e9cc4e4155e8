//! Resolved configuration types shared across crates.
//!
//! These types represent fully-validated, resolved configuration state.
//! Raw TOML deserialization structs (with `Option` fields) stay private in
//! `lantern-config`. The config loader resolves them into these types at
//! the parse boundary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_EXECUTABLE: &str = "warden";

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Used for operations the tool documents as slow (preflight, doctor, compare).
pub const SLOW_TIMEOUT_MS: u64 = 60_000;
pub const PROBE_TIMEOUT_MS: u64 = 5_000;
pub const MIN_TIMEOUT_MS: u64 = 100;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_ALERT_THRESHOLD: u32 = 3;
pub const DEFAULT_CLEAR_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("tool executable must not be empty")]
    EmptyExecutable,
    #[error("working directory must be absolute: {}", .0.display())]
    RelativeCwd(PathBuf),
    #[error("{name} must be at least {min} ms (got {value} ms)")]
    TooShort {
        name: &'static str,
        value: u64,
        min: u64,
    },
    #[error("{name} must be at least 1")]
    ZeroThreshold { name: &'static str },
    #[error("exit code list for '{command}' must not be empty")]
    EmptyExitCodes { command: String },
}

fn checked_millis(name: &'static str, value: u64, min: u64) -> Result<Duration, SettingsError> {
    if value < min {
        return Err(SettingsError::TooShort { name, value, min });
    }
    Ok(Duration::from_millis(value))
}

/// Per-class process timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    default: Duration,
    slow: Duration,
    probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            slow: Duration::from_millis(SLOW_TIMEOUT_MS),
            probe: Duration::from_millis(PROBE_TIMEOUT_MS),
        }
    }
}

impl Timeouts {
    pub fn from_millis(default: u64, slow: u64, probe: u64) -> Result<Self, SettingsError> {
        Ok(Self {
            default: checked_millis("timeout_ms", default, MIN_TIMEOUT_MS)?,
            slow: checked_millis("slow_timeout_ms", slow, MIN_TIMEOUT_MS)?,
            probe: checked_millis("probe_timeout_ms", probe, MIN_TIMEOUT_MS)?,
        })
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default
    }

    #[must_use]
    pub fn slow(&self) -> Duration {
        self.slow
    }

    #[must_use]
    pub fn probe(&self) -> Duration {
        self.probe
    }
}

/// Where the governed tool lives and where it runs.
///
/// Invariant: `executable` is non-empty and `cwd` is absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSettings {
    executable: PathBuf,
    cwd: PathBuf,
    timeouts: Timeouts,
}

impl ToolSettings {
    pub fn new(executable: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let executable = executable.into();
        let cwd = cwd.into();
        if executable.as_os_str().is_empty() {
            return Err(SettingsError::EmptyExecutable);
        }
        if !cwd.is_absolute() {
            return Err(SettingsError::RelativeCwd(cwd));
        }
        Ok(Self {
            executable,
            cwd,
            timeouts: Timeouts::default(),
        })
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}

/// Correlator polling and its alert/clear hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorSettings {
    enabled: bool,
    interval: Duration,
    alert_threshold: u32,
    clear_threshold: u32,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            clear_threshold: DEFAULT_CLEAR_THRESHOLD,
        }
    }
}

impl CorrelatorSettings {
    pub fn new(
        enabled: bool,
        interval_ms: u64,
        alert_threshold: u32,
        clear_threshold: u32,
    ) -> Result<Self, SettingsError> {
        if alert_threshold == 0 {
            return Err(SettingsError::ZeroThreshold {
                name: "alert_threshold",
            });
        }
        if clear_threshold == 0 {
            return Err(SettingsError::ZeroThreshold {
                name: "clear_threshold",
            });
        }
        Ok(Self {
            enabled,
            interval: checked_millis("interval_ms", interval_ms, MIN_POLL_INTERVAL_MS)?,
            alert_threshold,
            clear_threshold,
        })
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn alert_threshold(&self) -> u32 {
        self.alert_threshold
    }

    #[must_use]
    pub fn clear_threshold(&self) -> u32 {
        self.clear_threshold
    }
}

/// Everything one session needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Master kill switch. When false nothing polls.
    pub enabled: bool,
    pub tool: ToolSettings,
    pub correlator: CorrelatorSettings,
    /// Extra per-command success exit codes layered over the built-ins.
    pub exit_codes: BTreeMap<String, Vec<i32>>,
}

impl Settings {
    /// Defaults for a workspace rooted at `cwd`.
    pub fn for_workspace(cwd: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        Ok(Self {
            enabled: true,
            tool: ToolSettings::new(DEFAULT_EXECUTABLE, cwd)?,
            correlator: CorrelatorSettings::default(),
            exit_codes: BTreeMap::new(),
        })
    }
}
