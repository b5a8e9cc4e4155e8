//! Typed payloads printed by the governed tool's `--format json` output.
//!
//! Every struct tolerates unknown fields and defaults missing ones, so a
//! newer tool build that adds data never breaks an older client. Types that
//! UI surfaces render generically also keep the unrecognised fields in
//! `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Overall verdict of a check or preflight run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    #[default]
    #[serde(other)]
    Unknown,
}

impl CheckStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    #[default]
    Warning,
    #[serde(alias = "information")]
    Info,
    Hint,
}

/// Suggested edit attached to a finding; backs editor quick fixes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindingFix {
    pub description: String,
    pub replacement: Option<String>,
}

/// One rule violation. Positions are 1-indexed as printed by the tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Finding {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub end_line: Option<u32>,
    pub end_column: Option<u32>,
    pub fix: Option<FindingFix>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckReport {
    pub status: CheckStatus,
    pub findings: Vec<Finding>,
    pub summary: String,
}

impl CheckReport {
    #[must_use]
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Intent {
    pub text: Option<String>,
    pub set_at: Option<String>,
    pub set_by: Option<String>,
}

impl Intent {
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideEntry {
    pub id: String,
    pub rule: String,
    pub path: Option<String>,
    pub reason: Option<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorStatus {
    /// Whether the correlator currently sees the monitored condition.
    pub captured: bool,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub window_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeStatus {
    pub active: bool,
    pub name: Option<String>,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeGrant {
    pub id: String,
    pub path: String,
    pub granted_by: Option<String>,
    pub expires_at: Option<String>,
}

/// Aggregated state shown in the sidebar tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceState {
    pub intent: Option<Intent>,
    pub scope: Option<ScopeStatus>,
    pub overrides: Vec<OverrideEntry>,
    pub correlator: Option<CorrelatorStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonReport {
    pub base: String,
    pub head: String,
    pub added: Vec<Finding>,
    pub resolved: Vec<Finding>,
    pub unchanged: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: Option<String>,
}

/// Self-check output. The tool exits 1 when any check warns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorReport {
    pub healthy: bool,
    pub checks: Vec<DoctorCheck>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Receipt {
    pub id: String,
    pub kind: String,
    pub path: Option<String>,
    pub created_at: Option<String>,
    pub summary: Option<String>,
}

/// Filter for `receipt query`. Unset fields are omitted from the arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptQuery {
    pub path: Option<String>,
    pub kind: Option<String>,
    pub since: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightReport {
    pub status: CheckStatus,
    pub blocked: bool,
    pub findings: Vec<Finding>,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scar {
    pub id: String,
    pub rule: String,
    pub path: Option<String>,
    pub message: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shield {
    pub id: String,
    pub pattern: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScarHistoryEntry {
    pub scar_id: String,
    pub event: String,
    pub at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelStatus {
    pub healthy: bool,
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleStatus {
    pub available: bool,
    pub model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftEntry {
    pub path: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftReport {
    pub drifted: bool,
    pub entries: Vec<DriftEntry>,
}
