//! BigQuery REST v2 client.

mod auth;
mod traits;
mod types;

pub use traits::BigQueryApi;
pub use types::{
    Dataset, DatasetReference, JobReference, QueryParameter, QueryParameterType,
    QueryParameterValue, QueryRequest, QueryResponse, ResultsOptions, TableCell, TableFieldSchema,
    TableRow, TableSchema,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use auth::{GcpAuth, TokenSource};
use types::{DatasetList, ErrorEnvelope};

use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Authenticated handle to one project's BigQuery REST surface.
///
/// Cheap to clone; the HTTP pool and token cache are shared.
#[derive(Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    auth: Arc<GcpAuth>,
    project_id: String,
    base_url: String,
}

impl std::fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BigQueryClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| Error::Config(format!("invalid endpoint URL: {e}")))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.auth.bearer_token().await?;
        let response = request.bearer_auth(token).send().await?;
        Self::check_response(response).await
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        // Google wraps failures in {"error": {"message", "errors": [{"reason"}]}}
        let (message, reason) = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => {
                let reason = envelope.error.errors.into_iter().find_map(|e| e.reason);
                (envelope.error.message, reason)
            }
            Err(_) => (text, None),
        };
        Err(Error::Api {
            message,
            status: Some(status),
            reason,
        })
    }
}

#[async_trait]
impl BigQueryApi for BigQueryClient {
    fn default_project(&self) -> &str {
        &self.project_id
    }

    async fn query(&self, project_id: &str, request: QueryRequest) -> Result<QueryResponse> {
        let url = self.endpoint(&format!("projects/{project_id}/queries"))?;
        tracing::debug!(
            project_id,
            location = request.location.as_deref().unwrap_or("default"),
            dry_run = request.dry_run.unwrap_or(false),
            "jobs.query"
        );
        let response = self.send(self.http.post(url).json(&request)).await?;
        Ok(response.json().await?)
    }

    async fn get_query_results(
        &self,
        project_id: &str,
        job: &JobReference,
        options: ResultsOptions,
    ) -> Result<QueryResponse> {
        let mut url = self.endpoint(&format!("projects/{project_id}/queries/{}", job.job_id))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(ref location) = job.location {
                pairs.append_pair("location", location);
            }
            if let Some(timeout_ms) = options.timeout_ms {
                pairs.append_pair("timeoutMs", &timeout_ms.to_string());
            }
            if let Some(ref token) = options.page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response = self.send(self.http.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn list_datasets(&self, project_id: &str) -> Result<Vec<DatasetReference>> {
        let mut references = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.endpoint(&format!("projects/{project_id}/datasets"))?;
            if let Some(ref token) = page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let response = self.send(self.http.get(url)).await?;
            let page: DatasetList = response.json().await?;
            references.extend(
                page.datasets
                    .unwrap_or_default()
                    .into_iter()
                    .map(|item| item.dataset_reference),
            );
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(references),
            }
        }
    }

    async fn get_dataset(&self, project_id: &str, dataset_id: &str) -> Result<Dataset> {
        let url = self.endpoint(&format!("projects/{project_id}/datasets/{dataset_id}"))?;
        let response = self.send(self.http.get(url)).await?;
        Ok(response.json().await?)
    }
}

/// Builder for [`BigQueryClient`].
///
/// No request timeout is applied unless [`timeout`](Self::timeout) is set:
/// metadata probes are allowed to take as long as the network does.
#[derive(Default)]
pub struct ClientBuilder {
    project_id: Option<String>,
    access_token: Option<String>,
    adc: Option<Arc<dyn gcp_auth::TokenProvider>>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Use a fixed bearer token. Intended for tests and pre-authenticated
    /// gateways; production callers should prefer [`adc`](Self::adc).
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Resolve Application Default Credentials. When no project was set
    /// explicitly, the project id is taken from the credentials.
    pub async fn adc(mut self) -> Result<Self> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| Error::auth(e.to_string()))?;
        if self.project_id.is_none() {
            let project = provider
                .project_id()
                .await
                .map_err(|e| Error::auth(format!("no default project in credentials: {e}")))?;
            self.project_id = Some(project.to_string());
        }
        self.adc = Some(provider);
        Ok(self)
    }

    /// Override the API root, e.g. for a local emulator or test server.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<BigQueryClient> {
        let project_id = self
            .project_id
            .ok_or_else(|| Error::Config("no project id configured".into()))?;

        let source = match (self.access_token, self.adc) {
            (Some(token), _) => TokenSource::Static(token),
            (None, Some(provider)) => TokenSource::Adc(provider),
            (None, None) => {
                return Err(Error::Config(
                    "no credentials: call adc() or access_token()".into(),
                ));
            }
        };

        let mut http = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }
        let http = http.build().map_err(Error::Network)?;

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(BigQueryClient {
            http,
            auth: Arc::new(GcpAuth::new(source)),
            project_id,
            base_url,
        })
    }
}
