//! The allow/deny decision against free-tier ceilings.

use serde::{Deserialize, Serialize};

use crate::client::BigQueryApi;
use crate::estimate::CostEstimator;
use crate::usage::{Region, UsageProbe, default_regions};
use crate::{Error, Result};

/// Free-tier query processing ceiling: 1 TiB per month.
pub const DEFAULT_QUERY_LIMIT_BYTES: u64 = 1 << 40;

/// Free-tier storage ceiling: 10 GiB.
pub const DEFAULT_STORAGE_LIMIT_BYTES: u64 = 10 * (1 << 30);

/// Byte ceilings a check is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    pub query_limit_bytes: u64,
    pub storage_limit_bytes: u64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            query_limit_bytes: DEFAULT_QUERY_LIMIT_BYTES,
            storage_limit_bytes: DEFAULT_STORAGE_LIMIT_BYTES,
        }
    }
}

impl QuotaLimits {
    pub fn new(query_limit_bytes: u64, storage_limit_bytes: u64) -> Self {
        Self {
            query_limit_bytes,
            storage_limit_bytes,
        }
    }
}

/// Usage and limits at the moment a check passed.
///
/// Taken fresh at decision time and never reused across calls; staleness is
/// traded for an extra round trip per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub used_query_bytes: u64,
    pub planned_query_bytes: u64,
    pub query_limit_bytes: u64,
    pub used_storage_bytes: u64,
    pub storage_limit_bytes: u64,
}

impl UsageSnapshot {
    pub fn storage_used_gb(&self) -> f64 {
        self.used_storage_bytes as f64 / crate::GIB
    }

    pub fn storage_limit_gb(&self) -> f64 {
        self.storage_limit_bytes as f64 / crate::GIB
    }

    pub fn query_used_tb(&self) -> f64 {
        self.used_query_bytes as f64 / crate::TIB
    }

    pub fn query_limit_tb(&self) -> f64 {
        self.query_limit_bytes as f64 / crate::TIB
    }
}

/// A query whose cost should count toward the check, without running it.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub sql: String,
    pub location: Option<String>,
}

impl PendingQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            location: None,
        }
    }

    pub fn at_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Parameters of one allowance check.
///
/// Defaults: the client's project, the EU + US multi-regions, the free-tier
/// limits, no pending query.
#[derive(Debug, Clone)]
pub struct AllowanceCheck {
    pub project_id: Option<String>,
    pub regions: Vec<Region>,
    pub pending_query: Option<PendingQuery>,
    pub limits: QuotaLimits,
}

impl Default for AllowanceCheck {
    fn default() -> Self {
        Self {
            project_id: None,
            regions: default_regions(),
            pending_query: None,
            limits: QuotaLimits::default(),
        }
    }
}

impl AllowanceCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Regions to probe. Callers are responsible for a meaningful set: an
    /// empty list silently yields zero usage for both dimensions.
    pub fn regions(mut self, regions: impl IntoIterator<Item = Region>) -> Self {
        self.regions = regions.into_iter().collect();
        self
    }

    pub fn pending_query(mut self, pending: PendingQuery) -> Self {
        self.pending_query = Some(pending);
        self
    }

    pub fn limits(mut self, limits: QuotaLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Decides whether usage plus a pending query stays inside the free tier.
pub struct QuotaGuard<'a> {
    api: &'a dyn BigQueryApi,
}

impl<'a> QuotaGuard<'a> {
    pub fn new(api: &'a dyn BigQueryApi) -> Self {
        Self { api }
    }

    /// Probe usage, estimate the pending query, and compare against the
    /// limits.
    ///
    /// The query check runs first and short-circuits; the storage check only
    /// runs when the query check passed, so one error is raised per call.
    /// Both probes and the estimate are fresh round trips on every call.
    pub async fn check_allowance(&self, check: AllowanceCheck) -> Result<UsageSnapshot> {
        let project_id = check
            .project_id
            .as_deref()
            .unwrap_or_else(|| self.api.default_project())
            .to_string();

        let probe = UsageProbe::new(self.api);
        let used_query_bytes = probe.sum_query_bytes_billed(&check.regions).await?;
        let used_storage_bytes = probe
            .sum_storage_bytes(&check.regions, &project_id)
            .await?;

        let planned_query_bytes = match &check.pending_query {
            Some(pending) => {
                CostEstimator::new(self.api)
                    .estimate_query_bytes(&pending.sql, pending.location.as_deref())
                    .await?
            }
            None => 0,
        };

        if used_query_bytes + planned_query_bytes > check.limits.query_limit_bytes {
            return Err(Error::QueryQuotaExceeded {
                used_bytes: used_query_bytes,
                planned_bytes: planned_query_bytes,
                limit_bytes: check.limits.query_limit_bytes,
            });
        }

        if used_storage_bytes > check.limits.storage_limit_bytes {
            return Err(Error::StorageQuotaExceeded {
                used_bytes: used_storage_bytes,
                limit_bytes: check.limits.storage_limit_bytes,
            });
        }

        Ok(UsageSnapshot {
            used_query_bytes,
            planned_query_bytes,
            query_limit_bytes: check.limits.query_limit_bytes,
            used_storage_bytes,
            storage_limit_bytes: check.limits.storage_limit_bytes,
        })
    }
}
