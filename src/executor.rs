//! Guarded query execution.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::{
    BigQueryApi, JobReference, QueryRequest, QueryResponse, ResultsOptions, TableRow, TableSchema,
};
use crate::guard::{AllowanceCheck, PendingQuery, QuotaGuard, QuotaLimits, UsageSnapshot};
use crate::usage::{Region, default_regions};
use crate::{Error, Result};

/// Shape of a successful [`SafeExecutor::safe_query`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnMode {
    /// Wait for completion and return the rows in memory.
    #[default]
    Rows,
    /// Return the job reference without waiting for completion.
    JobHandle,
}

/// Result of an executed query.
#[derive(Debug)]
pub enum QueryOutcome {
    Rows(ResultSet),
    Job(JobReference),
}

impl QueryOutcome {
    pub fn rows(&self) -> &[TableRow] {
        match self {
            QueryOutcome::Rows(result) => result.rows(),
            QueryOutcome::Job(_) => &[],
        }
    }

    pub fn job(&self) -> Option<&JobReference> {
        match self {
            QueryOutcome::Job(job) => Some(job),
            QueryOutcome::Rows(_) => None,
        }
    }
}

/// Fully fetched tabular result.
#[derive(Debug, Default)]
pub struct ResultSet {
    pub schema: Option<TableSchema>,
    pub total_rows: Option<u64>,
    rows: Vec<TableRow>,
}

impl ResultSet {
    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<TableRow> {
        self.rows
    }
}

/// Callback invoked with the snapshot after a check passes, before the real
/// query runs.
pub type UsageObserver = Arc<dyn Fn(&UsageSnapshot) + Send + Sync>;

/// Options for one guarded execution.
#[derive(Clone)]
pub struct SafeQuery {
    /// Where the real query executes (EU/US). Independent of `regions`,
    /// which only scope the usage probes.
    pub location: Option<String>,
    pub regions: Vec<Region>,
    pub project_id: Option<String>,
    pub limits: QuotaLimits,
    pub return_mode: ReturnMode,
    /// Bound on waiting for the result fetch. The quota check itself is
    /// never bounded.
    pub timeout: Option<Duration>,
    /// Swallow a quota breach: warn and return `None` instead of failing.
    pub fail_soft: bool,
    observer: Option<UsageObserver>,
}

impl std::fmt::Debug for SafeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeQuery")
            .field("location", &self.location)
            .field("regions", &self.regions)
            .field("project_id", &self.project_id)
            .field("limits", &self.limits)
            .field("return_mode", &self.return_mode)
            .field("timeout", &self.timeout)
            .field("fail_soft", &self.fail_soft)
            .finish_non_exhaustive()
    }
}

impl Default for SafeQuery {
    fn default() -> Self {
        Self {
            location: None,
            regions: default_regions(),
            project_id: None,
            limits: QuotaLimits::default(),
            return_mode: ReturnMode::default(),
            timeout: None,
            fail_soft: false,
            observer: None,
        }
    }
}

impl SafeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn regions(mut self, regions: impl IntoIterator<Item = Region>) -> Self {
        self.regions = regions.into_iter().collect();
        self
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn limits(mut self, limits: QuotaLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn return_mode(mut self, mode: ReturnMode) -> Self {
        self.return_mode = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn fail_soft(mut self, fail_soft: bool) -> Self {
        self.fail_soft = fail_soft;
        self
    }

    /// Redirect the pre-execution usage summary. Without this, the snapshot
    /// is logged at info level in the original one-line format.
    pub fn on_usage(mut self, observer: impl Fn(&UsageSnapshot) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }
}

/// Runs the quota check and, only if it passes, the real query.
pub struct SafeExecutor<'a> {
    api: &'a dyn BigQueryApi,
}

impl<'a> SafeExecutor<'a> {
    pub fn new(api: &'a dyn BigQueryApi) -> Self {
        Self { api }
    }

    /// Check the free-tier allowance with `sql` pending, then execute it.
    ///
    /// Returns `None` only when `fail_soft` is set and a quota ceiling was
    /// hit; every other failure propagates. A denied check is terminal, no
    /// retries happen anywhere in this flow.
    pub async fn safe_query(&self, sql: &str, options: SafeQuery) -> Result<Option<QueryOutcome>> {
        let project_id = options
            .project_id
            .clone()
            .unwrap_or_else(|| self.api.default_project().to_string());

        let mut pending = PendingQuery::new(sql);
        pending.location = options.location.clone();

        let check = AllowanceCheck::new()
            .project(project_id.clone())
            .regions(options.regions.clone())
            .limits(options.limits)
            .pending_query(pending);

        match QuotaGuard::new(self.api).check_allowance(check).await {
            Ok(snapshot) => match &options.observer {
                Some(observer) => observer(&snapshot),
                None => tracing::info!(
                    "Storage {:.2}/{:.0} GB, Trafik {:.3}/{:.0} TB",
                    snapshot.storage_used_gb(),
                    snapshot.storage_limit_gb(),
                    snapshot.query_used_tb(),
                    snapshot.query_limit_tb(),
                ),
            },
            Err(error) if options.fail_soft && error.is_quota_exceeded() => {
                tracing::warn!(%error, "skipping query, free-tier quota exceeded");
                return Ok(None);
            }
            Err(error) => return Err(error),
        }

        let request = QueryRequest::new(sql).with_location_opt(options.location.as_deref());
        let response = self.api.query(&project_id, request).await?;

        match options.return_mode {
            ReturnMode::JobHandle => {
                let job = response.job_reference.ok_or_else(|| {
                    Error::Parse("query response missing jobReference".into())
                })?;
                Ok(Some(QueryOutcome::Job(job)))
            }
            ReturnMode::Rows => {
                let result = self
                    .wait_for_rows(&project_id, response, options.timeout)
                    .await?;
                Ok(Some(QueryOutcome::Rows(result)))
            }
        }
    }

    /// Poll until the job completes (bounded by `timeout`), then page in
    /// every row.
    async fn wait_for_rows(
        &self,
        project_id: &str,
        first: QueryResponse,
        timeout: Option<Duration>,
    ) -> Result<ResultSet> {
        let started = Instant::now();
        let mut response = first;

        while response.job_complete != Some(true) {
            let job = response
                .job_reference
                .clone()
                .ok_or_else(|| Error::Parse("incomplete query has no jobReference".into()))?;
            let timeout_ms = match timeout {
                Some(bound) => {
                    let elapsed = started.elapsed();
                    if elapsed >= bound {
                        return Err(Error::Timeout(bound));
                    }
                    Some((bound - elapsed).as_millis() as u64)
                }
                None => None,
            };
            response = self
                .api
                .get_query_results(
                    project_id,
                    &job,
                    ResultsOptions {
                        timeout_ms,
                        page_token: None,
                    },
                )
                .await?;
        }

        let schema = response.schema.clone();
        let total_rows = response.total_rows();
        let mut rows = response.rows.unwrap_or_default();
        let mut page_token = response.page_token;

        while let Some(token) = page_token {
            let job = response
                .job_reference
                .clone()
                .ok_or_else(|| Error::Parse("paged query has no jobReference".into()))?;
            let page = self
                .api
                .get_query_results(
                    project_id,
                    &job,
                    ResultsOptions {
                        timeout_ms: None,
                        page_token: Some(token),
                    },
                )
                .await?;
            rows.extend(page.rows.unwrap_or_default());
            page_token = page.page_token;
        }

        Ok(ResultSet {
            schema,
            total_rows,
            rows,
        })
    }
}
