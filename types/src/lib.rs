//! Core domain types for Lantern.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies:
//! the optional features of the governed tool, resolved settings, and the typed
//! payloads its subcommands print. Everything here can be used from any layer.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod capability;
mod payload;
pub mod settings;
mod text;

pub use capability::{CapabilitySet, Feature, UnknownFeature};
pub use payload::{
    CheckReport, CheckStatus, ComparisonReport, CorrelatorStatus, DoctorCheck, DoctorReport,
    DriftEntry, DriftReport, Finding, FindingFix, GovernanceState, Intent, KernelStatus,
    OracleStatus, OverrideEntry, PreflightReport, Receipt, ReceiptQuery, Scar, ScarHistoryEntry,
    ScopeGrant, ScopeStatus, Severity, Shield,
};
pub use settings::{CorrelatorSettings, Settings, SettingsError, Timeouts, ToolSettings};
pub use text::{PREVIEW_CHARS, failure_message, output_preview};
