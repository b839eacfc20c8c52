//! # bq-guard
//!
//! Free-tier quota guard for Google BigQuery.
//!
//! Before a query runs, this crate probes how many bytes the project has
//! already billed this calendar month and how many logical bytes it stores,
//! dry-runs the candidate query to estimate what it would process, and only
//! executes it when both totals stay under the configured ceilings.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bq_guard::{BigQueryClient, SafeExecutor, SafeQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bq_guard::Error> {
//!     let client = BigQueryClient::builder().adc().await?.build()?;
//!     let executor = SafeExecutor::new(&client);
//!
//!     let outcome = executor
//!         .safe_query(
//!             "SELECT name FROM `my-project.demo.users` LIMIT 10",
//!             SafeQuery::new().location("EU"),
//!         )
//!         .await?;
//!
//!     if let Some(result) = outcome {
//!         println!("{} rows", result.rows().len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Checking without executing
//!
//! ```rust,no_run
//! use bq_guard::{AllowanceCheck, BigQueryClient, QuotaGuard};
//!
//! # async fn check() -> Result<(), bq_guard::Error> {
//! let client = BigQueryClient::builder().adc().await?.build()?;
//! let guard = QuotaGuard::new(&client);
//! let snapshot = guard.check_allowance(AllowanceCheck::new()).await?;
//! println!("storage used: {} bytes", snapshot.used_storage_bytes);
//! # Ok(())
//! # }
//! ```
//!
//! The guard is a soft, best-effort check: usage is read from
//! eventually-consistent metadata and can grow between the check and the
//! execution. It is not a hard quota enforcement mechanism.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod estimate;
pub mod executor;
pub mod guard;
pub mod prelude;
pub mod usage;

// Re-exports for convenience
pub use client::{
    BigQueryApi, BigQueryClient, ClientBuilder, Dataset, DatasetReference, JobReference,
    QueryRequest, QueryResponse, ResultsOptions, TableCell, TableFieldSchema, TableRow,
    TableSchema,
};
pub use estimate::CostEstimator;
pub use executor::{QueryOutcome, ResultSet, ReturnMode, SafeExecutor, SafeQuery, UsageObserver};
pub use guard::{
    AllowanceCheck, DEFAULT_QUERY_LIMIT_BYTES, DEFAULT_STORAGE_LIMIT_BYTES, PendingQuery,
    QuotaGuard, QuotaLimits, UsageSnapshot,
};
pub use usage::{Region, UsageProbe, current_month_bounds, default_regions, month_bounds};

/// Error type for bq-guard operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// BigQuery returned an error response.
    #[error("BigQuery error (HTTP {status}): {message}", status = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into()))]
    Api {
        message: String,
        status: Option<u16>,
        reason: Option<String>,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Network connectivity or request failed.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to parse a response field.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Free-tier query quota would be exceeded by the pending query.
    #[error(
        "free-tier query quota exceeded: {used:.3} TB used, {planned:.3} TB planned, \
         remaining ~{remaining:.3} TB of {limit:.0} TB",
        used = *used_bytes as f64 / TIB,
        planned = *planned_bytes as f64 / TIB,
        remaining = limit_bytes.saturating_sub(*used_bytes) as f64 / TIB,
        limit = *limit_bytes as f64 / TIB,
    )]
    QueryQuotaExceeded {
        used_bytes: u64,
        planned_bytes: u64,
        limit_bytes: u64,
    },

    /// Free-tier storage quota is exceeded.
    #[error(
        "free-tier storage quota exceeded: {used:.2} GB used of {limit:.0} GB",
        used = *used_bytes as f64 / GIB,
        limit = *limit_bytes as f64 / GIB,
    )]
    StorageQuotaExceeded { used_bytes: u64, limit_bytes: u64 },

    /// Waiting for query completion exceeded the caller's timeout.
    #[error("Query did not complete within {:.1}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),
}

pub(crate) const GIB: f64 = 1_073_741_824.0;
pub(crate) const TIB: f64 = 1_099_511_627_776.0;

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Authentication or authorization failures (401, 403)
    Authorization,
    /// Configuration, parsing, or setup errors
    Configuration,
    /// Network or server-side errors that may succeed on retry
    Transient,
    /// A free-tier ceiling was hit or a wait ran out
    QuotaLimit,
    /// Internal errors (JSON, unexpected states)
    Internal,
}

impl Error {
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Auth { .. } => ErrorCategory::Authorization,
            Error::Api {
                status: Some(401 | 403),
                ..
            } => ErrorCategory::Authorization,

            Error::Config(_) | Error::Parse(_) => ErrorCategory::Configuration,

            Error::Network(_) => ErrorCategory::Transient,
            Error::Api {
                status: Some(500..=599),
                ..
            } => ErrorCategory::Transient,

            Error::QueryQuotaExceeded { .. }
            | Error::StorageQuotaExceeded { .. }
            | Error::Timeout(_) => ErrorCategory::QuotaLimit,

            Error::Json(_) | Error::Api { .. } => ErrorCategory::Internal,
        }
    }

    /// True for the two quota-exceeded kinds, which `fail_soft` may swallow.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            Error::QueryQuotaExceeded { .. } | Error::StorageQuotaExceeded { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Error::Api {
                status: Some(401),
                ..
            } | Error::Auth { .. }
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Query bytes still available before the ceiling, floored at zero.
    ///
    /// Only meaningful for [`Error::QueryQuotaExceeded`].
    pub fn remaining_query_bytes(&self) -> Option<u64> {
        match self {
            Error::QueryQuotaExceeded {
                used_bytes,
                limit_bytes,
                ..
            } => Some(limit_bytes.saturating_sub(*used_bytes)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Guarded one-shot query with all defaults (EU + US regions, 1 TiB / 10 GiB
/// ceilings, rows returned, hard failure on quota breach).
pub async fn safe_query(client: &BigQueryClient, sql: &str) -> Result<Option<QueryOutcome>> {
    SafeExecutor::new(client)
        .safe_query(sql, SafeQuery::new())
        .await
}
