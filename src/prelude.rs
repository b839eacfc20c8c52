//! One-import surface for the common path.
//!
//! ```rust,no_run
//! use bq_guard::prelude::*;
//! ```

pub use crate::client::{BigQueryApi, BigQueryClient, ClientBuilder, QueryRequest, QueryResponse};
pub use crate::estimate::CostEstimator;
pub use crate::executor::{QueryOutcome, ReturnMode, SafeExecutor, SafeQuery};
pub use crate::guard::{
    AllowanceCheck, PendingQuery, QuotaGuard, QuotaLimits, UsageSnapshot,
};
pub use crate::usage::{Region, UsageProbe, default_regions};
pub use crate::{Error, Result};
