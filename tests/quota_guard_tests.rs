//! Guard and executor semantics against an in-memory BigQuery fake.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use bq_guard::{
    AllowanceCheck, BigQueryApi, Dataset, DatasetReference, Error, JobReference, PendingQuery,
    QueryRequest, QueryResponse, QuotaGuard, QuotaLimits, Region, Result, ResultsOptions,
    ReturnMode, SafeExecutor, SafeQuery, TableCell, TableRow,
};

const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    JobsProbe { location: String },
    StorageFast { location: String },
    StorageDataset { dataset: String },
    ListDatasets,
    GetDataset { dataset: String },
    DryRun { use_query_cache: Option<bool> },
    Execute { location: Option<String> },
    GetResults { page_token: Option<String> },
}

struct FakeDataset {
    id: String,
    location: String,
    /// `None` makes the per-dataset storage query fail.
    bytes: Option<u64>,
}

/// In-memory [`BigQueryApi`] with scripted usage numbers and call recording.
struct FakeBigQuery {
    billed: HashMap<String, u64>,
    /// Per location; `None` makes the project-wide fast path fail.
    storage_fast: HashMap<String, Option<u64>>,
    datasets: Vec<FakeDataset>,
    list_datasets_fails: bool,
    planned_bytes: u64,
    complete_immediately: bool,
    calls: Mutex<Vec<Call>>,
}

impl FakeBigQuery {
    fn new() -> Self {
        Self {
            billed: HashMap::new(),
            storage_fast: HashMap::from([("EU".into(), Some(0)), ("US".into(), Some(0))]),
            datasets: Vec::new(),
            list_datasets_fails: false,
            planned_bytes: 0,
            complete_immediately: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn billed(mut self, location: &str, bytes: u64) -> Self {
        self.billed.insert(location.into(), bytes);
        self
    }

    fn storage(mut self, location: &str, bytes: u64) -> Self {
        self.storage_fast.insert(location.into(), Some(bytes));
        self
    }

    fn storage_fast_path_broken(mut self, location: &str) -> Self {
        self.storage_fast.insert(location.into(), None);
        self
    }

    fn dataset(mut self, id: &str, location: &str, bytes: Option<u64>) -> Self {
        self.datasets.push(FakeDataset {
            id: id.into(),
            location: location.into(),
            bytes,
        });
        self
    }

    fn planned(mut self, bytes: u64) -> Self {
        self.planned_bytes = bytes;
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn executed(&self) -> bool {
        self.calls()
            .iter()
            .any(|c| matches!(c, Call::Execute { .. }))
    }
}

fn row(value: &str) -> TableRow {
    TableRow {
        f: vec![TableCell {
            v: json!(value),
        }],
    }
}

fn scalar(value: u64) -> QueryResponse {
    QueryResponse {
        job_complete: Some(true),
        rows: Some(vec![row(&value.to_string())]),
        ..Default::default()
    }
}

fn denied(message: &str) -> Error {
    Error::Api {
        message: message.into(),
        status: Some(403),
        reason: Some("accessDenied".into()),
    }
}

#[async_trait]
impl BigQueryApi for FakeBigQuery {
    fn default_project(&self) -> &str {
        "test-project"
    }

    async fn query(&self, project_id: &str, request: QueryRequest) -> Result<QueryResponse> {
        let sql = request.query.clone();

        if request.dry_run == Some(true) {
            self.record(Call::DryRun {
                use_query_cache: request.use_query_cache,
            });
            return Ok(QueryResponse {
                job_complete: Some(true),
                total_bytes_processed: Some(self.planned_bytes.to_string()),
                ..Default::default()
            });
        }

        if sql.contains("INFORMATION_SCHEMA.JOBS_BY_PROJECT") {
            let location = request.location.clone().unwrap_or_default();
            self.record(Call::JobsProbe {
                location: location.clone(),
            });
            return Ok(scalar(*self.billed.get(&location).unwrap_or(&0)));
        }

        if sql.contains("INFORMATION_SCHEMA.TABLE_STORAGE_BY_PROJECT") {
            let location = request.location.clone().unwrap_or_default();
            self.record(Call::StorageFast {
                location: location.clone(),
            });
            return match self.storage_fast.get(&location) {
                Some(Some(bytes)) => Ok(scalar(*bytes)),
                _ => Err(denied("TABLE_STORAGE_BY_PROJECT is not available")),
            };
        }

        if sql.contains(".INFORMATION_SCHEMA.TABLE_STORAGE`") {
            for dataset in &self.datasets {
                if sql.contains(&format!("{project_id}.{}.INFORMATION_SCHEMA", dataset.id)) {
                    self.record(Call::StorageDataset {
                        dataset: dataset.id.clone(),
                    });
                    return match dataset.bytes {
                        Some(bytes) => Ok(scalar(bytes)),
                        None => Err(Error::Api {
                            message: "internal error".into(),
                            status: Some(500),
                            reason: None,
                        }),
                    };
                }
            }
            panic!("per-dataset query for unknown dataset: {sql}");
        }

        self.record(Call::Execute {
            location: request.location.clone(),
        });
        Ok(QueryResponse {
            job_complete: Some(self.complete_immediately),
            job_reference: Some(JobReference {
                project_id: project_id.into(),
                job_id: "job-1".into(),
                location: request.location.clone(),
            }),
            rows: self.complete_immediately.then(|| vec![row("42")]),
            ..Default::default()
        })
    }

    async fn get_query_results(
        &self,
        _project_id: &str,
        job: &JobReference,
        options: ResultsOptions,
    ) -> Result<QueryResponse> {
        self.record(Call::GetResults {
            page_token: options.page_token.clone(),
        });
        match options.page_token.as_deref() {
            None => Ok(QueryResponse {
                job_complete: Some(true),
                job_reference: Some(job.clone()),
                rows: Some(vec![row("1")]),
                page_token: Some("page-2".into()),
                total_rows: Some("2".into()),
                ..Default::default()
            }),
            Some("page-2") => Ok(QueryResponse {
                job_complete: Some(true),
                rows: Some(vec![row("2")]),
                ..Default::default()
            }),
            Some(other) => panic!("unexpected page token {other}"),
        }
    }

    async fn list_datasets(&self, _project_id: &str) -> Result<Vec<DatasetReference>> {
        self.record(Call::ListDatasets);
        if self.list_datasets_fails {
            return Err(denied("datasets.list denied"));
        }
        Ok(self
            .datasets
            .iter()
            .map(|d| DatasetReference {
                project_id: "test-project".into(),
                dataset_id: d.id.clone(),
            })
            .collect())
    }

    async fn get_dataset(&self, _project_id: &str, dataset_id: &str) -> Result<Dataset> {
        self.record(Call::GetDataset {
            dataset: dataset_id.into(),
        });
        let dataset = self
            .datasets
            .iter()
            .find(|d| d.id == dataset_id)
            .unwrap_or_else(|| panic!("unknown dataset {dataset_id}"));
        Ok(Dataset {
            dataset_reference: DatasetReference {
                project_id: "test-project".into(),
                dataset_id: dataset.id.clone(),
            },
            location: Some(dataset.location.clone()),
        })
    }
}

fn eu_only() -> Vec<Region> {
    vec![Region::new("region-eu")]
}

#[tokio::test]
async fn check_within_limits_returns_snapshot() {
    let api = FakeBigQuery::new().storage("EU", 5 * GIB);
    let guard = QuotaGuard::new(&api);

    let snapshot = guard
        .check_allowance(AllowanceCheck::new().regions(eu_only()))
        .await
        .unwrap();

    assert_eq!(snapshot.used_storage_bytes, 5 * GIB);
    assert_eq!(snapshot.used_query_bytes, 0);
    assert_eq!(snapshot.planned_query_bytes, 0);
    assert_eq!(snapshot.storage_limit_bytes, 10 * GIB);
    assert_eq!(snapshot.query_limit_bytes, TIB);
}

#[tokio::test]
async fn used_plus_planned_over_query_limit_is_denied() {
    let api = FakeBigQuery::new()
        .billed("EU", 512 * GIB)
        .planned(615 * GIB);
    let guard = QuotaGuard::new(&api);

    let err = guard
        .check_allowance(
            AllowanceCheck::new()
                .regions(eu_only())
                .pending_query(PendingQuery::new("SELECT * FROM big").at_location("EU")),
        )
        .await
        .unwrap_err();

    match err {
        Error::QueryQuotaExceeded {
            used_bytes,
            planned_bytes,
            limit_bytes,
        } => {
            assert_eq!(used_bytes, 512 * GIB);
            assert_eq!(planned_bytes, 615 * GIB);
            assert_eq!(limit_bytes, TIB);
        }
        other => panic!("expected QueryQuotaExceeded, got {other:?}"),
    }
    // Half the ceiling was still free before this query.
    assert_eq!(err.remaining_query_bytes(), Some(512 * GIB));
}

#[tokio::test]
async fn storage_over_limit_is_denied() {
    let api = FakeBigQuery::new().storage("EU", 11 * GIB);
    let guard = QuotaGuard::new(&api);

    let err = guard
        .check_allowance(AllowanceCheck::new().regions(eu_only()))
        .await
        .unwrap_err();

    match err {
        Error::StorageQuotaExceeded {
            used_bytes,
            limit_bytes,
        } => {
            assert_eq!(used_bytes, 11 * GIB);
            assert_eq!(limit_bytes, 10 * GIB);
        }
        other => panic!("expected StorageQuotaExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn query_breach_wins_when_both_limits_are_exceeded() {
    let api = FakeBigQuery::new()
        .billed("EU", 2 * TIB)
        .storage("EU", 11 * GIB);
    let guard = QuotaGuard::new(&api);

    let err = guard
        .check_allowance(AllowanceCheck::new().regions(eu_only()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueryQuotaExceeded { .. }), "{err:?}");
}

#[tokio::test]
async fn empty_region_list_probes_nothing() {
    let api = FakeBigQuery::new().billed("EU", TIB).storage("EU", TIB);
    let guard = QuotaGuard::new(&api);

    let snapshot = guard
        .check_allowance(AllowanceCheck::new().regions(Vec::new()))
        .await
        .unwrap();

    assert_eq!(snapshot.used_query_bytes, 0);
    assert_eq!(snapshot.used_storage_bytes, 0);
    assert!(api.calls().is_empty(), "no metadata should be queried");
}

#[tokio::test]
async fn usage_is_summed_across_regions() {
    let api = FakeBigQuery::new()
        .billed("EU", GIB)
        .billed("US", 2 * GIB)
        .storage("EU", 3 * GIB)
        .storage("US", 4 * GIB);
    let guard = QuotaGuard::new(&api);

    let snapshot = guard.check_allowance(AllowanceCheck::new()).await.unwrap();

    assert_eq!(snapshot.used_query_bytes, 3 * GIB);
    assert_eq!(snapshot.used_storage_bytes, 7 * GIB);
}

#[tokio::test]
async fn per_call_limits_override_defaults() {
    let api = FakeBigQuery::new().billed("EU", 6 * GIB);
    let guard = QuotaGuard::new(&api);

    let err = guard
        .check_allowance(
            AllowanceCheck::new()
                .regions(eu_only())
                .limits(QuotaLimits::new(5 * GIB, 10 * GIB)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueryQuotaExceeded { .. }));
}

#[tokio::test]
async fn estimate_disables_the_query_cache() {
    let api = FakeBigQuery::new().planned(GIB);
    let guard = QuotaGuard::new(&api);

    guard
        .check_allowance(
            AllowanceCheck::new()
                .regions(eu_only())
                .pending_query(PendingQuery::new("SELECT 1")),
        )
        .await
        .unwrap();

    assert!(api.calls().contains(&Call::DryRun {
        use_query_cache: Some(false)
    }));
}

#[tokio::test]
async fn fast_path_failure_falls_back_to_matching_datasets() {
    let api = FakeBigQuery::new()
        .storage_fast_path_broken("EU")
        .dataset("events", "EU", Some(3 * GIB))
        .dataset("exports", "US", Some(2 * GIB))
        .dataset("broken", "eu", None);
    let guard = QuotaGuard::new(&api);

    let snapshot = guard
        .check_allowance(AllowanceCheck::new().regions(eu_only()))
        .await
        .unwrap();

    // The US dataset is filtered out; the broken one is skipped, so the
    // total undercounts rather than failing.
    assert_eq!(snapshot.used_storage_bytes, 3 * GIB);

    let calls = api.calls();
    let fallbacks = calls
        .iter()
        .filter(|c| matches!(c, Call::ListDatasets))
        .count();
    assert_eq!(fallbacks, 1, "fallback runs exactly once per region");
    assert!(calls.contains(&Call::StorageDataset {
        dataset: "events".into()
    }));
    assert!(calls.contains(&Call::StorageDataset {
        dataset: "broken".into()
    }));
    assert!(
        !calls.contains(&Call::StorageDataset {
            dataset: "exports".into()
        }),
        "datasets outside the region must not be queried"
    );
}

#[tokio::test]
async fn dataset_location_match_is_case_insensitive() {
    let api = FakeBigQuery::new()
        .storage_fast_path_broken("EU")
        .dataset("lowercase", "eu", Some(GIB));
    let guard = QuotaGuard::new(&api);

    let snapshot = guard
        .check_allowance(AllowanceCheck::new().regions(eu_only()))
        .await
        .unwrap();
    assert_eq!(snapshot.used_storage_bytes, GIB);
}

#[tokio::test]
async fn fail_soft_returns_none_and_skips_execution() {
    let api = FakeBigQuery::new().billed("EU", 2 * TIB);
    let executor = SafeExecutor::new(&api);

    let outcome = executor
        .safe_query(
            "SELECT 1",
            SafeQuery::new().regions(eu_only()).fail_soft(true),
        )
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert!(!api.executed(), "denied query must never execute");
}

#[tokio::test]
async fn hard_failure_propagates_and_skips_execution() {
    let api = FakeBigQuery::new().billed("EU", 2 * TIB);
    let executor = SafeExecutor::new(&api);

    let err = executor
        .safe_query("SELECT 1", SafeQuery::new().regions(eu_only()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::QueryQuotaExceeded { .. }));
    assert!(!api.executed(), "denied query must never execute");
}

#[tokio::test]
async fn fail_soft_does_not_swallow_non_quota_errors() {
    let mut api = FakeBigQuery::new().storage_fast_path_broken("EU");
    api.list_datasets_fails = true;
    let executor = SafeExecutor::new(&api);

    let err = executor
        .safe_query(
            "SELECT 1",
            SafeQuery::new().regions(eu_only()).fail_soft(true),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Api { .. }), "{err:?}");
    assert!(!api.executed());
}

#[tokio::test]
async fn allowed_query_executes_and_returns_rows() {
    let api = FakeBigQuery::new();
    let executor = SafeExecutor::new(&api);

    let outcome = executor
        .safe_query(
            "SELECT 42",
            SafeQuery::new().regions(eu_only()).location("EU"),
        )
        .await
        .unwrap()
        .expect("query was allowed");

    assert_eq!(outcome.rows().len(), 1);
    assert!(api.calls().contains(&Call::Execute {
        location: Some("EU".into())
    }));
}

#[tokio::test]
async fn observer_sees_the_snapshot_before_execution() {
    let api = FakeBigQuery::new().storage("EU", 5 * GIB);
    let executor = SafeExecutor::new(&api);
    let seen = std::sync::Arc::new(Mutex::new(None));
    let seen_by_observer = std::sync::Arc::clone(&seen);

    executor
        .safe_query(
            "SELECT 1",
            SafeQuery::new()
                .regions(eu_only())
                .on_usage(move |snapshot| {
                    *seen_by_observer.lock().unwrap() = Some(*snapshot);
                }),
        )
        .await
        .unwrap();

    let snapshot = seen.lock().unwrap().expect("observer was invoked");
    assert_eq!(snapshot.used_storage_bytes, 5 * GIB);
}

#[tokio::test]
async fn job_handle_mode_does_not_wait_for_completion() {
    let mut api = FakeBigQuery::new();
    api.complete_immediately = false;
    let executor = SafeExecutor::new(&api);

    let outcome = executor
        .safe_query(
            "SELECT 1",
            SafeQuery::new()
                .regions(eu_only())
                .return_mode(ReturnMode::JobHandle),
        )
        .await
        .unwrap()
        .expect("query was allowed");

    assert_eq!(outcome.job().map(|j| j.job_id.as_str()), Some("job-1"));
    assert!(
        !api.calls()
            .iter()
            .any(|c| matches!(c, Call::GetResults { .. })),
        "job handle mode must not poll"
    );
}

#[tokio::test]
async fn rows_mode_waits_and_collects_all_pages() {
    let mut api = FakeBigQuery::new();
    api.complete_immediately = false;
    let executor = SafeExecutor::new(&api);

    let outcome = executor
        .safe_query("SELECT 1", SafeQuery::new().regions(eu_only()))
        .await
        .unwrap()
        .expect("query was allowed");

    assert_eq!(outcome.rows().len(), 2, "both row pages are fetched");
}

#[tokio::test]
async fn exhausted_timeout_fails_the_wait() {
    let mut api = FakeBigQuery::new();
    api.complete_immediately = false;
    let executor = SafeExecutor::new(&api);

    let err = executor
        .safe_query(
            "SELECT 1",
            SafeQuery::new()
                .regions(eu_only())
                .timeout(Duration::ZERO),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err:?}");
}
