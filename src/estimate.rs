//! Dry-run cost estimation.

use crate::client::{BigQueryApi, QueryRequest};
use crate::Result;

/// Estimates what a query would cost without running it.
pub struct CostEstimator<'a> {
    api: &'a dyn BigQueryApi,
}

impl<'a> CostEstimator<'a> {
    pub fn new(api: &'a dyn BigQueryApi) -> Self {
        Self { api }
    }

    /// Bytes the query would process, from a dry run with the query cache
    /// disabled. Scans nothing, bills nothing, returns no rows.
    pub async fn estimate_query_bytes(&self, sql: &str, location: Option<&str>) -> Result<u64> {
        let request = QueryRequest::new(sql).with_location_opt(location).dry_run();
        let response = self.api.query(self.api.default_project(), request).await?;
        response.total_bytes_processed()
    }
}
