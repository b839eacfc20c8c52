//! Region identifiers and their canonical locations.

use serde::{Deserialize, Serialize};

/// A multi-region partition of BigQuery metadata, as configured
/// (e.g. `"region-eu"`). Regions are probed independently because
/// `INFORMATION_SCHEMA` is region-scoped; there is no cross-region view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub fn new(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    /// The raw configured value, used verbatim in `FROM \`{region}\`...`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical location code for the jobs API:
    /// `"region-eu"` -> `"EU"`, `"region-us"` -> `"US"`, `"eu"` -> `"EU"`.
    ///
    /// Trims whitespace, passes EU/US through uppercased, strips a
    /// `region-` prefix and uppercases the remainder, and uppercases
    /// anything else as-is. No broader geo mapping is attempted.
    pub fn location(&self) -> String {
        let trimmed = self.0.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "EU" || upper == "US" {
            return upper;
        }
        if let Some(rest) = trimmed.strip_prefix("region-") {
            return rest.to_ascii_uppercase();
        }
        upper
    }
}

impl From<&str> for Region {
    fn from(region: &str) -> Self {
        Self::new(region)
    }
}

impl From<String> for Region {
    fn from(region: String) -> Self {
        Self(region)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two multi-regions the free tier is probed in by default.
pub fn default_regions() -> Vec<Region> {
    vec![Region::new("region-eu"), Region::new("region-us")]
}
