//! Discover flows against a recording executor

use chrono::{TimeZone, Utc};
use serde_json::json;
use sift_builder::{InMemoryCatalog, Limits, QueryBuilder};
use sift_discover::{
    histogram_query, query_top_events, top_events_timeseries, DiscoverError, HistogramRequest, RecordingExecutor,
    Row, TopEventsRequest, OTHER_KEY,
};
use sift_ir::{QueryError, RequestParams};
use sift_registry::FunctionRegistry;

fn params() -> RequestParams {
    RequestParams::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 3, 0).unwrap(),
        vec![1],
    )
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_project(1, "frontend")
        .with_issue(7, "FRONTEND-7", 1)
        .with_issue(8, "FRONTEND-8", 1)
}

fn rows(values: serde_json::Value) -> Vec<Row> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

fn start() -> i64 {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().timestamp()
}

#[test]
fn test_histogram_with_explicit_bounds() {
    let params = params();
    let catalog = catalog();
    let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
    let executor = RecordingExecutor::new().with_response(rows(json!([
        {"histogram_transaction_duration_10_0_1": 0, "count": 4},
        {"histogram_transaction_duration_10_0_1": 90, "count": 1},
    ])));

    let request = HistogramRequest {
        field: "transaction.duration".to_string(),
        num_buckets: 10,
        precision: 0,
        min: Some(0.0),
        max: Some(97.0),
        query: String::new(),
        exclude_outliers: false,
    };
    let histogram = histogram_query(&builder, &request, &executor).unwrap();

    assert_eq!(histogram.params.bucket_size, 10);
    assert_eq!(histogram.params.start_offset, 0);
    assert_eq!(histogram.buckets.len(), 10);
    assert_eq!(histogram.buckets[0].count, 4);
    assert_eq!(histogram.buckets[9].bin, 90.0);
    assert_eq!(histogram.buckets[9].count, 1);
    assert_eq!(histogram.buckets.iter().map(|b| b.count).sum::<u64>(), 5);

    let executed = executor.executed();
    assert_eq!(executed.len(), 1);
    let (referrer, plan) = &executed[0];
    assert_eq!(referrer, "discover.histogram");
    assert_eq!(plan.output_names(), vec!["histogram_transaction_duration_10_0_1", "count"]);
    assert_eq!(plan.group_by.len(), 1);
    assert_eq!(plan.limit, Some(10));
}

#[test]
fn test_histogram_queries_missing_bounds() {
    let params = params();
    let catalog = catalog();
    let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
    let executor = RecordingExecutor::new()
        .with_response(rows(json!([
            {"min_transaction_duration": 3, "max_transaction_duration": 42},
        ])))
        .with_response(Vec::new());

    let request: HistogramRequest =
        serde_json::from_str(r#"{"field": "transaction.duration", "num_buckets": 5}"#).unwrap();
    let histogram = histogram_query(&builder, &request, &executor).unwrap();

    assert!(histogram.params.start_offset <= 3);
    assert!(histogram.params.upper_edge() > 42);
    assert!(histogram.buckets.iter().all(|b| b.count == 0));

    let referrers: Vec<String> = executor.executed().into_iter().map(|(r, _)| r).collect();
    assert_eq!(referrers, vec!["discover.histogram.bounds", "discover.histogram"]);
}

#[test]
fn test_histogram_without_data() {
    let params = params();
    let catalog = catalog();
    let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
    let executor = RecordingExecutor::new();

    let request: HistogramRequest =
        serde_json::from_str(r#"{"field": "transaction.duration", "num_buckets": 5}"#).unwrap();
    let histogram = histogram_query(&builder, &request, &executor).unwrap();

    assert!(histogram.buckets.is_empty());
    assert_eq!(executor.executed().len(), 1);
}

#[test]
fn test_histogram_rejects_out_of_range_layout() {
    let params = params();
    let catalog = catalog();
    let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());

    for body in [
        r#"{"field": "transaction.duration", "num_buckets": 5, "precision": 25}"#,
        r#"{"field": "transaction.duration", "num_buckets": 5000, "min": 0, "max": 10}"#,
    ] {
        let executor = RecordingExecutor::new();
        let request: HistogramRequest = serde_json::from_str(body).unwrap();
        let err = histogram_query(&builder, &request, &executor).unwrap_err();
        assert!(matches!(err, DiscoverError::Query(QueryError::InvalidSearchQuery(_))), "{}", body);
    }
}

#[test]
fn test_top_events_limit_is_capped() {
    let params = params();
    let catalog = catalog();
    let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
    let executor = RecordingExecutor::new();

    let request = TopEventsRequest {
        fields: vec!["transaction".to_string(), "count()".to_string()],
        limit: 11,
        rollup: 60,
        ..Default::default()
    };
    let err = query_top_events(&builder, &request, &executor).unwrap_err();
    assert!(matches!(err, DiscoverError::Query(QueryError::InvalidSearchQuery(_))));
    assert!(executor.executed().is_empty());
}

#[test]
fn test_top_events_timeseries_with_other() {
    let params = params();
    let catalog = catalog();
    let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
    let t0 = start();

    let executor = RecordingExecutor::new()
        .with_response(rows(json!([
            {"issue.id": 7, "count": 10},
            {"issue.id": 8, "count": 6},
        ])))
        .with_response(rows(json!([
            {"time": t0, "issue.id": 7, "count": 4},
            {"time": t0 + 60, "issue.id": 8, "count": 6},
            {"time": t0 + 60, "issue.id": 9, "count": 1},
        ])))
        .with_response(rows(json!([
            {"time": t0 + 120, "count": 2},
        ])));

    let request = TopEventsRequest {
        fields: vec!["issue.id".to_string(), "count()".to_string()],
        orderby: vec!["-count".to_string()],
        limit: 2,
        rollup: 60,
        include_other: true,
        ..Default::default()
    };
    let top = query_top_events(&builder, &request, &executor).unwrap();
    let series = top_events_timeseries(&builder, &request, &top, &executor).unwrap();

    let keys: Vec<&str> = series.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(keys, vec![OTHER_KEY, "FRONTEND-7", "FRONTEND-8"]);
    assert_eq!(series[0].order, 2);

    // 00:00 through 00:03 at one-minute rollup.
    for s in &series {
        assert_eq!(s.data.len(), 4, "{}", s.key);
    }
    assert_eq!(series[1].data[0]["count"], 4);
    assert!(series[1].data[1].get("count").is_none());
    assert_eq!(series[2].data[1]["count"], 6);
    assert_eq!(series[0].data[2]["count"], 2);

    let executed = executor.executed();
    let referrers: Vec<&str> = executed.iter().map(|(r, _)| r.as_str()).collect();
    assert_eq!(
        referrers,
        vec!["discover.top_events", "discover.top_events.timeseries", "discover.top_events.other"]
    );

    let timeseries = &executed[1].1;
    assert_eq!(timeseries.granularity, Some(60));
    assert_eq!(
        timeseries.where_conditions.last().unwrap().to_string(),
        "group_id IN [7, 8]"
    );
    let other = &executed[2].1;
    assert_eq!(other.output_names(), vec!["time", "count"]);
    assert_eq!(
        other.where_conditions.last().unwrap().to_string(),
        "group_id NOT IN [7, 8]"
    );
}

#[test]
fn test_other_skipped_when_top_is_not_full() {
    let params = params();
    let catalog = catalog();
    let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
    let executor = RecordingExecutor::new().with_response(Vec::new());

    let request = TopEventsRequest {
        fields: vec!["transaction.status".to_string(), "count()".to_string()],
        limit: 5,
        rollup: 60,
        include_other: true,
        ..Default::default()
    };
    let top = rows(json!([{"transaction.status": 0, "count": 3}]));
    let series = top_events_timeseries(&builder, &request, &top, &executor).unwrap();

    assert_eq!(series.len(), 1);
    assert_eq!(series[0].key, "ok");
    assert_eq!(executor.executed().len(), 1);
}
