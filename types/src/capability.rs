//! Optional features of the governed tool and the probed capability set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A subcommand family the governed tool may or may not ship.
///
/// Older tool builds lack some of these; the client probes each one and
/// UI surfaces hide whatever is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Preflight,
    Correlator,
    Scope,
    Kernel,
    Oracle,
    Scar,
    Drift,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Preflight,
        Feature::Correlator,
        Feature::Scope,
        Feature::Kernel,
        Feature::Oracle,
        Feature::Scar,
        Feature::Drift,
    ];

    /// Subcommand name, also the capability key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Correlator => "correlator",
            Self::Scope => "scope",
            Self::Kernel => "kernel",
            Self::Oracle => "oracle",
            Self::Scar => "scar",
            Self::Drift => "drift",
        }
    }

    /// Lightweight invocation whose zero exit means "feature present".
    #[must_use]
    pub fn probe_args(self) -> Vec<String> {
        vec![self.as_str().to_string(), "--help".to_string()]
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown feature: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for Feature {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFeature(s.to_string()))
    }
}

/// Result of one probe pass: which features the current executable supports.
///
/// Features never recorded read as absent. Absence of data is absence of
/// the feature, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    features: BTreeMap<Feature, bool>,
}

impl CapabilitySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the probe outcome for `feature`.
    pub fn set(&mut self, feature: Feature, present: bool) {
        self.features.insert(feature, present);
    }

    #[must_use]
    pub fn has(&self, feature: Feature) -> bool {
        self.features.get(&feature).copied().unwrap_or(false)
    }

    /// Features that probed present, in declaration order.
    pub fn present(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features
            .iter()
            .filter_map(|(feature, present)| present.then_some(*feature))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FromIterator<(Feature, bool)> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = (Feature, bool)>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}
