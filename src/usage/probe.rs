//! Reads current query and storage usage from BigQuery metadata.

use crate::client::{BigQueryApi, QueryRequest};
use crate::usage::{Region, current_month_bounds};
use crate::Result;

/// Computes the project's billed query bytes for the current calendar month
/// and its current logical storage bytes, summed across regions.
///
/// Every call reads fresh metadata; nothing is cached between checks.
pub struct UsageProbe<'a> {
    api: &'a dyn BigQueryApi,
}

impl<'a> UsageProbe<'a> {
    pub fn new(api: &'a dyn BigQueryApi) -> Self {
        Self { api }
    }

    /// Total `total_bytes_billed` over completed query jobs created this
    /// month (UTC), across `regions`. An empty region list sums to zero
    /// without touching the API.
    pub async fn sum_query_bytes_billed(&self, regions: &[Region]) -> Result<u64> {
        let (start, end) = current_month_bounds();
        let mut total: u64 = 0;
        for region in regions {
            let sql = format!(
                "SELECT COALESCE(SUM(total_bytes_billed), 0) AS billed \
                 FROM `{region}`.INFORMATION_SCHEMA.JOBS_BY_PROJECT \
                 WHERE creation_time >= @start AND creation_time < @end \
                 AND job_type = 'QUERY' AND state = 'DONE'",
                region = region.as_str(),
            );
            let request = QueryRequest::new(sql)
                .with_location(region.location())
                .with_timestamp_param("start", start)
                .with_timestamp_param("end", end);
            let response = self.api.query(self.api.default_project(), request).await?;
            total += response.scalar_u64()?;
        }
        Ok(total)
    }

    /// Total logical storage bytes (active + long-term) for `project_id`
    /// across `regions`.
    ///
    /// Per region, the project-wide `TABLE_STORAGE_BY_PROJECT` aggregate is
    /// tried first; it is not available in all account configurations, so on
    /// any failure of that call the probe falls back to scanning datasets in
    /// that region. Per-dataset failures are skipped, which can undercount.
    pub async fn sum_storage_bytes(&self, regions: &[Region], project_id: &str) -> Result<u64> {
        let mut total: u64 = 0;
        for region in regions {
            let location = region.location();
            match self.project_wide_storage(region, project_id).await {
                Ok(bytes) => {
                    total += bytes;
                    continue;
                }
                Err(error) => {
                    tracing::debug!(
                        region = %region,
                        %error,
                        "project-wide storage query failed, scanning datasets"
                    );
                }
            }
            total += self.per_dataset_storage(project_id, &location).await?;
        }
        Ok(total)
    }

    async fn project_wide_storage(&self, region: &Region, project_id: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COALESCE(SUM(active_logical_bytes + long_term_logical_bytes), 0) AS logical_bytes \
             FROM `{region}`.INFORMATION_SCHEMA.TABLE_STORAGE_BY_PROJECT \
             WHERE project_id = @project",
            region = region.as_str(),
        );
        let request = QueryRequest::new(sql)
            .with_location(region.location())
            .with_string_param("project", project_id);
        let response = self.api.query(self.api.default_project(), request).await?;
        response.scalar_u64()
    }

    async fn per_dataset_storage(&self, project_id: &str, location: &str) -> Result<u64> {
        let mut total: u64 = 0;
        // A failing list_datasets still propagates; only per-dataset
        // metadata reads are best-effort.
        for reference in self.api.list_datasets(project_id).await? {
            match self
                .dataset_storage(project_id, &reference.dataset_id, location)
                .await
            {
                Ok(Some(bytes)) => total += bytes,
                Ok(None) => {} // dataset lives in another location
                Err(error) => {
                    tracing::debug!(
                        dataset = %reference.dataset_id,
                        %error,
                        "skipping dataset in storage scan"
                    );
                }
            }
        }
        Ok(total)
    }

    async fn dataset_storage(
        &self,
        project_id: &str,
        dataset_id: &str,
        location: &str,
    ) -> Result<Option<u64>> {
        let dataset = self.api.get_dataset(project_id, dataset_id).await?;
        let dataset_location = dataset.location.unwrap_or_default();
        if dataset_location.to_ascii_uppercase() != location {
            return Ok(None);
        }
        let sql = format!(
            "SELECT COALESCE(SUM(active_logical_bytes + long_term_logical_bytes), 0) AS logical_bytes \
             FROM `{project_id}.{dataset_id}.INFORMATION_SCHEMA.TABLE_STORAGE`",
        );
        let request = QueryRequest::new(sql).with_location(dataset_location);
        let response = self.api.query(self.api.default_project(), request).await?;
        response.scalar_u64().map(Some)
    }
}
