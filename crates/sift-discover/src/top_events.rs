//! Top-N grouped timeseries
//!
//! A first query picks the top groups. The timeseries query is then restricted
//! to exactly those groups, and an optional second query aggregates everything
//! else into a single "Other" series.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sift_builder::filters::status_name;
use sift_builder::{QueryBuilder, QueryRequest, SelectedColumn};
use sift_ir::{Condition, ConditionNode, Expr, Op, QueryError, QueryPlan, Value};
use tracing::{debug, warn};

use crate::executor::{QueryExecutor, Row};
use crate::zerofill::{zerofill, TIME_KEY};
use crate::DiscoverError;

pub const OTHER_KEY: &str = "Other";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopEventsRequest {
    #[serde(default)]
    pub query: String,
    /// Group-by fields and the aggregates to chart.
    pub fields: Vec<String>,
    #[serde(default)]
    pub orderby: Vec<String>,
    pub limit: u64,
    /// Bucket width in seconds.
    pub rollup: u64,
    #[serde(default)]
    pub include_other: bool,
}

/// One charted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEventSeries {
    pub key: String,
    /// Rank of the group in the top query; `Other` ranks last.
    pub order: usize,
    pub data: Vec<Row>,
}

/// Run the ranking query that picks the top groups.
pub fn query_top_events(
    builder: &QueryBuilder<'_>,
    request: &TopEventsRequest,
    executor: &dyn QueryExecutor,
) -> Result<Vec<Row>, DiscoverError> {
    let max = builder.limits().max_top_events;
    if request.limit == 0 || request.limit as usize > max {
        return Err(QueryError::invalid(format!("top events limit must be between 1 and {}", max)).into());
    }
    let plan = builder.build(&QueryRequest {
        query: request.query.clone(),
        selected: request.fields.clone(),
        orderby: request.orderby.clone(),
        limit: Some(request.limit),
        ..Default::default()
    })?;
    let result = executor.execute(&plan, "discover.top_events")?;
    debug!(rows = result.row_count(), "Fetched top events");
    Ok(result.rows)
}

/// A group-by column of the top query.
struct GroupColumn {
    name: String,
    expr: Expr,
    is_array: bool,
}

/// Timeseries for each of `top_rows`, plus an `Other` series when requested
/// and the top query was full.
pub fn top_events_timeseries(
    builder: &QueryBuilder<'_>,
    request: &TopEventsRequest,
    top_rows: &[Row],
    executor: &dyn QueryExecutor,
) -> Result<Vec<TopEventSeries>, DiscoverError> {
    if top_rows.is_empty() {
        return Ok(Vec::new());
    }
    let (start, end) = builder.params().time_window()?;
    let rollup = request.rollup as i64;

    let selected = request
        .fields
        .iter()
        .map(|field| builder.resolve_select(field))
        .collect::<Result<Vec<_>, _>>()?;
    let groups: Vec<GroupColumn> = selected
        .iter()
        .filter(|column| !column.is_aggregate())
        .map(|column| GroupColumn {
            name: column.output_name(),
            expr: column.expr().without_alias(),
            is_array: matches!(column, SelectedColumn::Field(f) if f.kind.is_some_and(|k| k.is_array())),
        })
        .collect();

    let (top_condition, other_condition) = group_conditions(&groups, top_rows);

    let mut series_request = QueryRequest {
        query: request.query.clone(),
        selected: std::iter::once(TIME_KEY.to_string())
            .chain(request.fields.iter().cloned())
            .collect(),
        orderby: vec![TIME_KEY.to_string()],
        granularity: Some(request.rollup),
        ..Default::default()
    };
    let mut plan = builder.build(&series_request)?;
    if let Some(condition) = top_condition {
        restrict(&mut plan, condition);
    }
    let result = executor.execute(&plan, "discover.top_events.timeseries")?;

    let short_ids = issue_short_ids(builder, &groups, top_rows)?;
    let keys: Vec<String> = top_rows.iter().map(|row| group_key(&groups, row, &short_ids)).collect();
    let order: HashMap<&str, usize> = keys.iter().enumerate().map(|(i, key)| (key.as_str(), i)).collect();

    let mut grouped: BTreeMap<usize, Vec<Row>> = BTreeMap::new();
    for row in result.rows {
        let key = group_key(&groups, &row, &short_ids);
        match order.get(key.as_str()) {
            Some(rank) => grouped.entry(*rank).or_default().push(row),
            None => warn!(key = %key, "Dropping timeseries row outside the top events"),
        }
    }

    let mut series = Vec::with_capacity(keys.len() + 1);
    if request.include_other && top_rows.len() as u64 >= request.limit {
        if let Some(condition) = other_condition {
            let aggregates: Vec<String> = request
                .fields
                .iter()
                .zip(&selected)
                .filter(|(_, column)| column.is_aggregate())
                .map(|(field, _)| field.clone())
                .collect();
            series_request.selected = std::iter::once(TIME_KEY.to_string()).chain(aggregates).collect();
            let mut plan = builder.build(&series_request)?;
            restrict(&mut plan, condition);
            let other = executor.execute(&plan, "discover.top_events.other")?;
            series.push(TopEventSeries {
                key: OTHER_KEY.to_string(),
                order: keys.len(),
                data: zerofill(other.rows, start.timestamp(), end.timestamp(), rollup),
            });
        }
    }

    for (rank, key) in keys.into_iter().enumerate() {
        let rows = grouped.remove(&rank).unwrap_or_default();
        series.push(TopEventSeries {
            key,
            order: rank,
            data: zerofill(rows, start.timestamp(), end.timestamp(), rollup),
        });
    }
    Ok(series)
}

fn restrict(plan: &mut QueryPlan, condition: ConditionNode) {
    plan.where_conditions.extend(condition.flatten());
}

/// Conditions selecting the top groups and their complement.
///
/// Array columns cannot be matched by membership and are left out of both.
fn group_conditions(groups: &[GroupColumn], top_rows: &[Row]) -> (Option<ConditionNode>, Option<ConditionNode>) {
    let mut top: Option<ConditionNode> = None;
    let mut other: Option<ConditionNode> = None;

    for group in groups.iter().filter(|g| !g.is_array) {
        let mut values: Vec<Value> = Vec::new();
        let mut has_null = false;
        for row in top_rows {
            match row.get(&group.name).and_then(json_value) {
                Some(value) if !values.contains(&value) => values.push(value),
                Some(_) => {}
                None => has_null = true,
            }
        }

        let is_null = || ConditionNode::Leaf(Condition::unary(group.expr.clone(), Op::IsNull));
        let is_not_null = || ConditionNode::Leaf(Condition::unary(group.expr.clone(), Op::IsNotNull));
        let (include, exclude) = if values.is_empty() {
            (is_null(), is_not_null())
        } else {
            let include = ConditionNode::Leaf(Condition::new(group.expr.clone(), Op::In, values.clone()));
            let exclude = ConditionNode::Leaf(Condition::new(group.expr.clone(), Op::NotIn, values));
            if has_null {
                (ConditionNode::or(include, is_null()), ConditionNode::and(exclude, is_not_null()))
            } else {
                (include, exclude)
            }
        };

        top = Some(match top {
            Some(node) => ConditionNode::and(node, include),
            None => include,
        });
        other = Some(match other {
            Some(node) => ConditionNode::or(node, exclude),
            None => exclude,
        });
    }

    (top, other)
}

fn json_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Int).or_else(|| n.as_f64().map(Value::Float)),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

fn issue_short_ids(
    builder: &QueryBuilder<'_>,
    groups: &[GroupColumn],
    top_rows: &[Row],
) -> Result<BTreeMap<u64, String>, DiscoverError> {
    if !groups.iter().any(|g| g.name == "issue.id") {
        return Ok(BTreeMap::new());
    }
    let ids: Vec<u64> = top_rows
        .iter()
        .filter_map(|row| row.get("issue.id").and_then(|id| id.as_u64()))
        .collect();
    Ok(builder.catalog().issue_short_ids(&ids).map_err(QueryError::from)?)
}

/// Display key of a row: its group-by values joined by commas.
///
/// A group that renders as `Other` is qualified with the field names so it
/// cannot collide with the remainder series.
fn group_key(groups: &[GroupColumn], row: &Row, short_ids: &BTreeMap<u64, String>) -> String {
    let key = groups
        .iter()
        .map(|group| {
            let value = row.get(&group.name).unwrap_or(&serde_json::Value::Null);
            key_part(&group.name, value, short_ids)
        })
        .collect::<Vec<_>>()
        .join(",");
    if key == OTHER_KEY {
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        return format!("{} ({})", OTHER_KEY, names.join(", "));
    }
    key
}

fn key_part(field: &str, value: &serde_json::Value, short_ids: &BTreeMap<u64, String>) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .last()
            .map(|item| key_part(field, item, short_ids))
            .unwrap_or_default(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => match (field, n.as_i64()) {
            ("issue.id", Some(id)) => short_ids
                .get(&(id as u64))
                .cloned()
                .unwrap_or_else(|| id.to_string()),
            ("transaction.status", Some(code)) => {
                status_name(code).map(str::to_string).unwrap_or_else(|| code.to_string())
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
