//! The seam between quota logic and the HTTP client.

use async_trait::async_trait;

use super::types::{Dataset, DatasetReference, JobReference, QueryRequest, QueryResponse, ResultsOptions};
use crate::Result;

/// The slice of BigQuery this crate consumes.
///
/// [`BigQueryClient`](super::BigQueryClient) implements it against the REST
/// v2 surface; tests implement it in memory. Object-safe so probes and the
/// guard can hold a `&dyn BigQueryApi`.
#[async_trait]
pub trait BigQueryApi: Send + Sync {
    /// Project billed for queries when the caller does not name one.
    fn default_project(&self) -> &str;

    /// `jobs.query`: run a query (or, with `dry_run`, estimate it).
    async fn query(&self, project_id: &str, request: QueryRequest) -> Result<QueryResponse>;

    /// `jobs.getQueryResults`: poll completion and page rows.
    async fn get_query_results(
        &self,
        project_id: &str,
        job: &JobReference,
        options: ResultsOptions,
    ) -> Result<QueryResponse>;

    /// `datasets.list`: every dataset in the project, all pages.
    async fn list_datasets(&self, project_id: &str) -> Result<Vec<DatasetReference>>;

    /// `datasets.get`: dataset metadata, including its storage location.
    async fn get_dataset(&self, project_id: &str, dataset_id: &str) -> Result<Dataset>;
}
