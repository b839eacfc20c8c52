//! Wire types for the BigQuery REST v2 surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Body for `jobs.query`.
///
/// Always standard SQL. Named parameters only, matching the metadata
/// queries this crate issues.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_query_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_parameters: Vec<QueryParameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u64>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            use_legacy_sql: false,
            location: None,
            dry_run: None,
            use_query_cache: None,
            parameter_mode: None,
            query_parameters: Vec::new(),
            timeout_ms: None,
            max_results: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_location_opt(mut self, location: Option<&str>) -> Self {
        self.location = location.map(str::to_owned);
        self
    }

    /// Estimate-only mode: nothing is scanned, nothing is billed, and the
    /// cache is disabled so the estimate reflects true bytes processed.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = Some(true);
        self.use_query_cache = Some(false);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_timestamp_param(self, name: &str, value: DateTime<Utc>) -> Self {
        self.with_param(name, "TIMESTAMP", value.to_rfc3339())
    }

    pub fn with_string_param(self, name: &str, value: impl Into<String>) -> Self {
        self.with_param(name, "STRING", value.into())
    }

    fn with_param(mut self, name: &str, param_type: &str, value: String) -> Self {
        self.parameter_mode = Some("NAMED".into());
        self.query_parameters.push(QueryParameter {
            name: name.into(),
            parameter_type: QueryParameterType {
                r#type: param_type.into(),
            },
            parameter_value: QueryParameterValue { value },
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameter {
    pub name: String,
    pub parameter_type: QueryParameterType,
    pub parameter_value: QueryParameterValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParameterType {
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParameterValue {
    pub value: String,
}

/// Response of `jobs.query` and `jobs.getQueryResults`.
///
/// BigQuery encodes 64-bit counters as JSON strings; accessors parse them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub job_reference: Option<JobReference>,
    pub job_complete: Option<bool>,
    pub total_bytes_processed: Option<String>,
    pub total_rows: Option<String>,
    pub cache_hit: Option<bool>,
    pub schema: Option<TableSchema>,
    pub rows: Option<Vec<TableRow>>,
    pub page_token: Option<String>,
}

impl QueryResponse {
    pub fn total_bytes_processed(&self) -> Result<u64> {
        match &self.total_bytes_processed {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| Error::Parse(format!("invalid totalBytesProcessed: {raw:?}"))),
            None => Err(Error::Parse("response missing totalBytesProcessed".into())),
        }
    }

    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows.as_ref().and_then(|raw| raw.parse().ok())
    }

    /// First cell of the first row as a non-negative integer.
    ///
    /// The shape every aggregate metadata query in this crate produces
    /// (one row, one `INT64` column).
    pub fn scalar_u64(&self) -> Result<u64> {
        let cell = self
            .rows
            .as_ref()
            .and_then(|rows| rows.first())
            .and_then(|row| row.f.first())
            .ok_or_else(|| Error::Parse("aggregate query returned no rows".into()))?;
        let raw = cell
            .v
            .as_str()
            .ok_or_else(|| Error::Parse("aggregate cell is not a string".into()))?;
        let value: i64 = raw
            .parse()
            .map_err(|_| Error::Parse(format!("aggregate cell is not an integer: {raw:?}")))?;
        Ok(value.max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: Option<String>,
}

/// One row in BigQuery's `{"f": [{"v": ...}]}` encoding.
#[derive(Debug, Clone, Deserialize)]
pub struct TableRow {
    pub f: Vec<TableCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableCell {
    pub v: serde_json::Value,
}

/// Options for `jobs.getQueryResults`.
#[derive(Debug, Clone, Default)]
pub struct ResultsOptions {
    /// Server-side long-poll bound, in milliseconds.
    pub timeout_ms: Option<u64>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetList {
    pub datasets: Option<Vec<DatasetListItem>>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetListItem {
    pub dataset_reference: DatasetReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReference {
    pub project_id: String,
    pub dataset_id: String,
}

/// Response of `datasets.get`, reduced to what the storage fallback needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub dataset_reference: DatasetReference,
    pub location: Option<String>,
}

/// Google API error envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub reason: Option<String>,
}
